// engine.rs — Encoder lifecycle: one shared model handle behind a state machine.
//
// States: Unloaded → Loading → Ready, Loading → Failed, Failed → Unloaded
// (explicit reset only), Ready → Unloaded (release under memory pressure).
// The load transition is the single mutual-exclusion point; encodes on a
// Ready handle run concurrently.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use image::DynamicImage;
use rand::Rng;
use serde::Serialize;

use crate::config;
use crate::embeddings::clip::{l2_normalize, ClipLoader};
use crate::error::Error;

/// A loaded encoder: model + preprocessing + tokenizer as one unit.
/// Implementations must be safe to call from multiple threads at once.
pub trait Encoder: Send + Sync {
    fn dimension(&self) -> usize;
    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>, Error>;
    fn encode_text(&self, text: &str) -> Result<Vec<f32>, Error>;

    /// False when the encoder runs on default-initialized weights.
    fn pretrained(&self) -> bool {
        true
    }

    /// True only for the emergency random-vector encoder.
    fn diagnostic(&self) -> bool {
        false
    }
}

/// Produces an encoder on demand. The engine owns exactly one loader; tests
/// inject counting/failing fakes through this seam.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn Encoder>, Error>;
}

/// Caller-visible model state, reported by `health()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: ModelState,
    /// False when the encoder runs without pretrained weights (degraded mode).
    pub pretrained: bool,
    /// True when the emergency random-vector encoder is active.
    pub diagnostic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Explicit weights directory; overrides environment resolution.
    pub model_dir: Option<std::path::PathBuf>,
    /// Declared process memory ceiling; presence switches the engine to
    /// single-threaded inference with f16 parameters.
    pub memory_ceiling_mb: Option<u64>,
    /// Opt-in emergency mode: a failed load installs a labeled random-vector
    /// encoder instead of going Failed.
    pub diagnostic_fallback: bool,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let memory_ceiling_mb = std::env::var(config::embedding::MEMORY_CEILING_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok());
        let diagnostic_fallback = std::env::var(config::embedding::DIAGNOSTIC_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            model_dir: None,
            memory_ceiling_mb,
            diagnostic_fallback,
        }
    }
}

enum EngineState {
    Unloaded,
    Loading,
    Ready(Arc<dyn Encoder>),
    Failed(String),
}

/// Owns the one model handle for the process. Cheap to construct; the model
/// loads on first encode, not here.
pub struct EmbeddingEngine {
    loader: Box<dyn ModelLoader>,
    diagnostic_fallback: bool,
    state: Mutex<EngineState>,
    loaded: Condvar,
}

impl EmbeddingEngine {
    pub fn new(config: EngineConfig) -> Self {
        let diagnostic_fallback = config.diagnostic_fallback;
        Self::with_loader(Box::new(ClipLoader::new(config)), diagnostic_fallback)
    }

    pub fn with_loader(loader: Box<dyn ModelLoader>, diagnostic_fallback: bool) -> Self {
        Self {
            loader,
            diagnostic_fallback,
            state: Mutex::new(EngineState::Unloaded),
            loaded: Condvar::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        config::embedding::EMBEDDING_DIMS
    }

    /// Encode an image file. Input validation runs before any load attempt so
    /// a bad path never pays the model's load cost.
    pub fn encode_image(&self, path: &Path) -> Result<Vec<f32>, Error> {
        if !path.exists() {
            return Err(Error::Input(format!("image not found: {}", path.display())));
        }
        let image = image::open(path)
            .map_err(|e| Error::Input(format!("cannot decode image {}: {e}", path.display())))?;
        let encoder = self.ensure_ready()?;
        encoder.encode_image(&image)
    }

    /// Encode an in-memory image (e.g. an upload the HTTP layer received).
    /// The decoded pixels live only for the duration of this call.
    pub fn encode_image_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>, Error> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::Input(format!("cannot decode image bytes: {e}")))?;
        let encoder = self.ensure_ready()?;
        encoder.encode_image(&image)
    }

    pub fn encode_text(&self, text: &str) -> Result<Vec<f32>, Error> {
        if text.trim().is_empty() {
            return Err(Error::Input("empty text".into()));
        }
        let encoder = self.ensure_ready()?;
        encoder.encode_text(text)
    }

    /// Best-effort Ready → Unloaded, freeing the model's memory. No-op in any
    /// other state; never fails.
    pub fn release(&self) {
        if let Ok(mut guard) = self.state.lock() {
            if matches!(*guard, EngineState::Ready(_)) {
                *guard = EngineState::Unloaded;
                log::info!("embedding model released");
            }
        }
    }

    /// Failed → Unloaded: the only retry path. A load failure stays sticky
    /// until someone calls this.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.state.lock() {
            if matches!(*guard, EngineState::Failed(_)) {
                *guard = EngineState::Unloaded;
                log::info!("embedding engine reset after failed load");
            }
        }
    }

    /// Best-known status; never fails, even with a poisoned lock.
    pub fn status(&self) -> EngineStatus {
        match self.state.lock() {
            Ok(guard) => match &*guard {
                EngineState::Unloaded => EngineStatus {
                    state: ModelState::Unloaded,
                    pretrained: true,
                    diagnostic: false,
                },
                EngineState::Loading => EngineStatus {
                    state: ModelState::Loading,
                    pretrained: true,
                    diagnostic: false,
                },
                EngineState::Ready(encoder) => EngineStatus {
                    state: ModelState::Ready,
                    pretrained: encoder.pretrained(),
                    diagnostic: encoder.diagnostic(),
                },
                EngineState::Failed(_) => EngineStatus {
                    state: ModelState::Failed,
                    pretrained: true,
                    diagnostic: false,
                },
            },
            Err(_) => EngineStatus {
                state: ModelState::Failed,
                pretrained: true,
                diagnostic: false,
            },
        }
    }

    /// Get the Ready encoder, loading it first if necessary. Exactly one
    /// loader runs under racing first calls; the rest block on the condvar
    /// until Ready or Failed, then proceed or fail identically.
    fn ensure_ready(&self) -> Result<Arc<dyn Encoder>, Error> {
        let mut guard = self.lock_state()?;
        loop {
            match &*guard {
                EngineState::Ready(encoder) => return Ok(Arc::clone(encoder)),
                EngineState::Failed(reason) => {
                    return Err(Error::ModelUnavailable(reason.clone()))
                }
                EngineState::Loading => {
                    guard = self.loaded.wait(guard).map_err(|_| lock_poisoned())?;
                }
                EngineState::Unloaded => {
                    *guard = EngineState::Loading;
                    drop(guard);

                    let outcome = match self.loader.load() {
                        Err(e) if self.diagnostic_fallback => {
                            log::error!(
                                "model load failed ({e}); diagnostic fallback enabled, \
                                 serving random-vector embeddings"
                            );
                            Ok(Arc::new(DiagnosticEncoder {
                                dimension: config::embedding::EMBEDDING_DIMS,
                            }) as Arc<dyn Encoder>)
                        }
                        other => other,
                    };

                    guard = self.lock_state()?;
                    *guard = match outcome {
                        Ok(encoder) => EngineState::Ready(encoder),
                        Err(e) => {
                            log::error!("model load failed: {e}");
                            // Keep the bare reason; ensure_ready re-wraps it.
                            EngineState::Failed(match e {
                                Error::ModelUnavailable(msg) => msg,
                                other => other.to_string(),
                            })
                        }
                    };
                    self.loaded.notify_all();
                }
            }
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EngineState>, Error> {
        self.state.lock().map_err(|_| lock_poisoned())
    }
}

fn lock_poisoned() -> Error {
    Error::ModelUnavailable("engine state lock poisoned".into())
}

/// Emergency encoder: random unit vectors, clearly labeled. Installed only
/// when the diagnostic fallback is explicitly enabled and a real load failed.
/// Results are NOT semantic; `health()` reports `diagnostic: true` while this
/// is active.
struct DiagnosticEncoder {
    dimension: usize,
}

impl DiagnosticEncoder {
    fn random_unit(&self) -> Vec<f32> {
        log::error!("serving diagnostic random-vector embedding (not a real encoding)");
        let mut rng = rand::rng();
        let v: Vec<f32> = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();
        l2_normalize(&v)
    }
}

impl Encoder for DiagnosticEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_image(&self, _image: &DynamicImage) -> Result<Vec<f32>, Error> {
        Ok(self.random_unit())
    }

    fn encode_text(&self, _text: &str) -> Result<Vec<f32>, Error> {
        Ok(self.random_unit())
    }

    fn pretrained(&self) -> bool {
        false
    }

    fn diagnostic(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    /// Deterministic encoder: the vector is a pure function of the input
    /// bytes, so identical inputs embed identically across calls.
    pub(crate) struct StubEncoder {
        pub dimension: usize,
    }

    impl Encoder for StubEncoder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>, Error> {
            Ok(vector_from_seed(seed_of(image.as_bytes()), self.dimension))
        }

        fn encode_text(&self, text: &str) -> Result<Vec<f32>, Error> {
            Ok(vector_from_seed(seed_of(text.as_bytes()), self.dimension))
        }
    }

    pub(crate) fn seed_of(bytes: &[u8]) -> u64 {
        // FNV-1a
        let mut h: u64 = 0xcbf29ce484222325;
        for b in bytes {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    pub(crate) fn vector_from_seed(seed: u64, dimension: usize) -> Vec<f32> {
        let mut x = seed;
        let v: Vec<f32> = (0..dimension)
            .map(|_| {
                x = x
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((x >> 33) as f32 / (1u64 << 31) as f32) - 1.0
            })
            .collect();
        l2_normalize(&v)
    }

    pub(crate) struct CountingLoader {
        pub loads: Arc<AtomicUsize>,
        pub delay: Duration,
        pub dimension: usize,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self) -> Result<Arc<dyn Encoder>, Error> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(Arc::new(StubEncoder {
                dimension: self.dimension,
            }))
        }
    }

    pub(crate) struct FailingLoader {
        pub loads: Arc<AtomicUsize>,
    }

    impl ModelLoader for FailingLoader {
        fn load(&self) -> Result<Arc<dyn Encoder>, Error> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Err(Error::ModelUnavailable("weights corrupted".into()))
        }
    }

    pub(crate) fn engine_with_stub(dimension: usize) -> (EmbeddingEngine, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let engine = EmbeddingEngine::with_loader(
            Box::new(CountingLoader {
                loads: Arc::clone(&loads),
                delay: Duration::from_millis(0),
                dimension,
            }),
            false,
        );
        (engine, loads)
    }
}
