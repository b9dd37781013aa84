//! Query-time retrieval over the tenant/role scoped vector index

pub mod index;
pub mod retriever;

pub use index::VectorIndex;
pub use retriever::{RetrievedContext, Retrieval, Retriever};
