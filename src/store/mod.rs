pub mod history;
pub mod offset;

pub use history::{FileSchemaHistoryStore, SchemaHistory, SchemaHistoryStore};
pub use offset::{FileOffsetStore, Offset, OffsetStore};
