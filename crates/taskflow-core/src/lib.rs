pub mod activity;
pub mod blob;
pub mod ids;
pub mod query;
pub mod task;

pub use activity::ActivityAction;
pub use blob::{BlobError, BlobStore};
pub use query::{SortKey, SortOrder, TaskQuery};
pub use task::{Attachment, AttachmentChange, NewTask, Priority, TaskPatch};
