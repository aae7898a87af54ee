// indexer.rs — Query routing and content indexing over the engine + store.
//
// This is the surface the HTTP layer calls: classify the caller's input,
// produce a vector, then persist it (add) or search with it (search).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use uuid::Uuid;

use crate::config;
use crate::embeddings::{EmbeddingEngine, ModelState};
use crate::error::Error;
use crate::store::{RestVectorStore, SearchHit, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Image,
    Text,
}

/// Classify a caller-supplied query string.
///
/// Deliberate duck-typing carried over from the service's upload/search
/// contract: a query that names an existing file with a recognized image
/// extension (.jpg/.jpeg/.png/.bmp, case-insensitive) IS an image query,
/// even if the caller meant it as literal text. Callers that need literal
/// text matching a real image path have no escape hatch; that ambiguity is
/// accepted and pinned by tests.
pub fn classify(query: &str) -> ContentKind {
    let path = Path::new(query);
    if path.exists() && has_image_extension(path) {
        ContentKind::Image
    } else {
        ContentKind::Text
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            config::indexer::IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Content to index. The bytes variant is how the HTTP layer hands over
/// uploads; decoding happens in memory and the decoded pixels are dropped
/// when the call returns, success or failure.
#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    ImagePath(PathBuf),
    ImageBytes { bytes: Vec<u8>, name: String },
}

impl Content {
    /// Apply the classification rule to a raw query string.
    pub fn from_query(raw: &str) -> Self {
        match classify(raw) {
            ContentKind::Image => Content::ImagePath(PathBuf::from(raw)),
            ContentKind::Text => Content::Text(raw.to_string()),
        }
    }
}

/// Best-known service status. Building this never fails: degraded internals
/// produce degraded fields.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub model_state: ModelState,
    pub pretrained: bool,
    pub diagnostic: bool,
    pub store_reachable: bool,
}

/// Orchestrates the embedding engine and the vector store. The store client
/// is built lazily on first use so missing credentials surface as a
/// `Configuration` error on the first add/search, not at process start; a
/// failed build is not cached, so fixing the environment un-wedges the next
/// call.
pub struct ContentIndexer {
    engine: Arc<EmbeddingEngine>,
    store: OnceLock<Arc<dyn VectorIndex>>,
}

impl ContentIndexer {
    pub fn new(engine: Arc<EmbeddingEngine>) -> Self {
        Self {
            engine,
            store: OnceLock::new(),
        }
    }

    /// Use a pre-built store instead of environment resolution.
    pub fn with_store(engine: Arc<EmbeddingEngine>, store: Arc<dyn VectorIndex>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(store);
        Self { engine, store: cell }
    }

    /// Embed the content and upsert it. Returns the stored id (the caller's,
    /// or a fresh UUID). Re-adding an existing id overwrites that item.
    pub fn add(
        &self,
        content: Content,
        annotation: Option<&str>,
        custom_id: Option<&str>,
    ) -> Result<String, Error> {
        let store = self.store()?;
        let (vector, metadata) = self.embed_content(&content, annotation)?;

        let id = match custom_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        store.upsert(&id, &vector, &metadata)?;
        log::info!(
            "added {} item {}",
            metadata.get("type").map(String::as_str).unwrap_or("unknown"),
            id
        );
        Ok(id)
    }

    /// Classify the query, embed it, and return the store's matches in store
    /// order. `limit` is clamped by the adapter.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, Error> {
        let store = self.store()?;
        let vector = match classify(query) {
            ContentKind::Image => {
                log::info!("searching with image query: {query}");
                self.engine.encode_image(Path::new(query))?
            }
            ContentKind::Text => {
                log::info!("searching with text query: {query}");
                self.engine.encode_text(query)?
            }
        };
        store.query(&vector, limit, None)
    }

    /// Best-effort model release; always succeeds.
    pub fn release_model(&self) {
        self.engine.release();
    }

    /// Never fails; reports the best-known state of both collaborators.
    pub fn health(&self) -> Health {
        let status = self.engine.status();
        let store_reachable = match self.store() {
            Ok(store) => store.is_reachable(),
            Err(_) => false,
        };
        Health {
            model_state: status.state,
            pretrained: status.pretrained,
            diagnostic: status.diagnostic,
            store_reachable,
        }
    }

    fn store(&self) -> Result<Arc<dyn VectorIndex>, Error> {
        if let Some(store) = self.store.get() {
            return Ok(Arc::clone(store));
        }
        let built: Arc<dyn VectorIndex> = Arc::new(RestVectorStore::from_env()?);
        Ok(Arc::clone(self.store.get_or_init(|| built)))
    }

    fn embed_content(
        &self,
        content: &Content,
        annotation: Option<&str>,
    ) -> Result<(Vec<f32>, HashMap<String, String>), Error> {
        match content {
            Content::Text(text) => {
                let vector = self.engine.encode_text(text)?;
                let mut metadata = HashMap::new();
                metadata.insert("type".to_string(), "text".to_string());
                metadata.insert("content".to_string(), text.clone());
                metadata.insert(
                    "category".to_string(),
                    annotation.unwrap_or_default().to_string(),
                );
                Ok((vector, metadata))
            }
            Content::ImagePath(path) => {
                let vector = self.engine.encode_image(path)?;
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                Ok((vector, image_metadata(name, annotation)))
            }
            Content::ImageBytes { bytes, name } => {
                let vector = self.engine.encode_image_bytes(bytes)?;
                Ok((vector, image_metadata(name.clone(), annotation)))
            }
        }
    }
}

fn image_metadata(name: String, annotation: Option<&str>) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), "image".to_string());
    metadata.insert("name".to_string(), name);
    metadata.insert(
        "description".to_string(),
        annotation.unwrap_or_default().to_string(),
    );
    metadata
}
