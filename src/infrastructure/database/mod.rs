pub mod lazy_store;
pub mod schema;
pub mod store_handle;

pub use lazy_store::LazyLocalStore;
pub use schema::{SCHEMA_VERSION, SchemaReport, ensure_schema};
pub use store_handle::StoreHandle;
