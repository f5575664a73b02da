pub mod housekeeping_job;
pub mod queue_processing_job;

pub use housekeeping_job::{HousekeepingJob, HousekeepingReport};
pub use queue_processing_job::{QueueProcessingJob, QueueTriggers};
