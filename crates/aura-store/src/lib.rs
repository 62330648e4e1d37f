pub mod archive;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use archive::{ArchiveStore, WorkflowArchive};
pub use error::StoreError;
pub use sqlite::SqliteArchive;
