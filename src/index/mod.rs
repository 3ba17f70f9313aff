pub mod builder;
pub mod retriever;
pub mod store;

pub use builder::IndexBuilder;
pub use retriever::Retriever;
pub use store::{ChunkIndex, Document, IndexMeta, SummaryIndex};
