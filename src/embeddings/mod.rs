// embeddings/ — Shared multimodal encoder lifecycle using candle (pure Rust).
//
// Provides:
// - Weights directory resolution + SHA256 verification
// - CLIP ViT-B/32 image and text encoding (512-dim, unit-norm)
// - The Unloaded/Loading/Ready/Failed model state machine

pub mod clip;
pub mod engine;
pub mod weights;

pub use engine::{
    EmbeddingEngine, Encoder, EngineConfig, EngineStatus, ModelLoader, ModelState,
};
