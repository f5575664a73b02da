pub mod fallback_store;
pub mod local_store;
pub mod mutation_handler;
pub mod reachability;
pub mod remote;
pub mod storage_estimator;

pub use fallback_store::FallbackStore;
pub use local_store::{Collection, LocalStore};
pub use mutation_handler::{MutationAck, MutationError, MutationHandler, MutationRequest};
pub use reachability::ReachabilityProbe;
pub use remote::{CredentialProvider, NoCredentials, ReferenceSource, RemoteDraftMirror};
pub use storage_estimator::{StorageEstimate, StorageEstimator};
