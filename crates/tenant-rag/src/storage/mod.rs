//! SQLite persistence
//!
//! One [`Database`] implements the document, vector, conversation and
//! configuration store traits.

mod conversations;
mod database;
mod embeddings;

pub use database::Database;
pub use embeddings::{cosine_distance, decode_vector, encode_vector};
