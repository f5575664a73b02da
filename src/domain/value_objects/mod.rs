pub mod attachment_id;
pub mod draft_id;
pub mod draft_status;
pub mod key_range;
pub mod mutation_type;
pub mod owner_id;
pub mod payload;
pub mod queue_item_id;

pub use attachment_id::AttachmentId;
pub use draft_id::DraftId;
pub use draft_status::DraftStatus;
pub use key_range::KeyRange;
pub use mutation_type::MutationType;
pub use owner_id::OwnerId;
pub use payload::Payload;
pub use queue_item_id::QueueItemId;
