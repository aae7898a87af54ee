//! Embedding + similarity-search core behind the Decormate API.
//!
//! Stores images and text as points in one CLIP embedding space and retrieves
//! the most similar stored items for a new image or text query. The HTTP
//! layer, the weights-download CLI, and index administration live elsewhere;
//! they interact with this crate only through [`ContentIndexer`] and
//! [`EmbeddingEngine`].

pub mod config;
pub mod embeddings;
mod error;
pub mod indexer;
pub mod logging;
pub mod store;

pub use embeddings::{EmbeddingEngine, Encoder, EngineConfig, EngineStatus, ModelLoader, ModelState};
pub use error::Error;
pub use indexer::{classify, Content, ContentIndexer, ContentKind, Health};
pub use logging::init_logging;
pub use store::{RestVectorStore, SearchHit, VectorIndex};
