pub mod connectivity;
pub mod database;
pub mod fallback;
pub mod jobs;
pub mod offline;
