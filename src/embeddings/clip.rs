// clip.rs — Candle CLIP ViT-B/32 encoder: one model, two towers.
//
// Images: resize-to-fill 224×224, RGB, NCHW, scaled to [-1, 1].
// Text: CLIP BPE, padded/truncated to the 77-token context.
// Both towers project into the shared 512-dim space; outputs are L2-normalized
// so the store's dot-product metric behaves as cosine similarity.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::clip::{self, ClipModel};
use image::DynamicImage;
use tokenizers::Tokenizer;

use crate::config;
use crate::embeddings::engine::{Encoder, EngineConfig, ModelLoader};
use crate::embeddings::weights;
use crate::error::Error;

/// Production loader: resolves a local weights directory and builds the CLIP
/// encoder, degrading to default-initialized weights when nothing resolves.
pub struct ClipLoader {
    config: EngineConfig,
}

impl ClipLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for ClipLoader {
    fn load(&self) -> Result<Arc<dyn Encoder>, Error> {
        Ok(Arc::new(ClipEncoder::load(&self.config)?))
    }
}

pub struct ClipEncoder {
    model: ClipModel,
    tokenizer: Option<Tokenizer>,
    device: Device,
    dtype: DType,
    image_size: usize,
    pretrained: bool,
}

impl ClipEncoder {
    pub fn load(cfg: &EngineConfig) -> Result<Self, Error> {
        let device = Device::Cpu;
        let low_memory = cfg.memory_ceiling_mb.is_some();
        if let Some(ceiling_mb) = cfg.memory_ceiling_mb {
            apply_memory_ceiling(ceiling_mb);
        }

        match weights::resolve_model_dir(cfg.model_dir.as_deref()) {
            Some(dir) => Self::load_pretrained(&dir, &device, low_memory),
            None => {
                log::warn!(
                    "no pretrained weights found for {}; encoder starts with default weights \
                     (embeddings will not be semantic)",
                    config::embedding::EMBEDDING_MODEL_NAME
                );
                Self::load_default(&device)
            }
        }
    }

    fn load_pretrained(dir: &Path, device: &Device, low_memory: bool) -> Result<Self, Error> {
        let weights_path = dir.join(config::embedding::WEIGHTS_FILE);

        let mut dtype = if low_memory { DType::F16 } else { DType::F32 };
        let model = match build_model(&weights_path, dtype, device) {
            Ok(model) => model,
            Err(e) if dtype == DType::F16 => {
                // Reduced precision is an optimization, never a load requirement.
                log::warn!("f16 parameter load failed on this device ({e}); falling back to f32");
                dtype = DType::F32;
                build_model(&weights_path, dtype, device)?
            }
            Err(e) => return Err(e),
        };

        let tokenizer_path = dir.join(config::embedding::TOKENIZER_FILE);
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::ModelUnavailable(format!("load tokenizer {}: {e}", tokenizer_path.display()))
        })?;

        let clip_config = clip::ClipConfig::vit_base_patch32();
        log::info!(
            "CLIP encoder ready: model={}, dims={}, dtype={:?}",
            config::embedding::EMBEDDING_MODEL_NAME,
            config::embedding::EMBEDDING_DIMS,
            dtype
        );

        Ok(Self {
            model,
            tokenizer: Some(tokenizer),
            device: device.clone(),
            dtype,
            image_size: clip_config.image_size,
            pretrained: true,
        })
    }

    /// Degraded mode: architecture only, default-initialized parameters, and
    /// hash-based token ids instead of BPE. Kept non-fatal so the service can
    /// come up and report itself unhealthy rather than crash-loop.
    fn load_default(device: &Device) -> Result<Self, Error> {
        let clip_config = clip::ClipConfig::vit_base_patch32();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = ClipModel::new(vb, &clip_config)
            .map_err(|e| Error::ModelUnavailable(format!("build CLIP model: {e}")))?;

        Ok(Self {
            model,
            tokenizer: None,
            device: device.clone(),
            dtype: DType::F32,
            image_size: clip_config.image_size,
            pretrained: false,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor, Error> {
        let size = self.image_size;
        let resized = image
            .resize_to_fill(
                size as u32,
                size as u32,
                image::imageops::FilterType::Triangle,
            )
            .to_rgb8();
        let pixels = Tensor::from_vec(resized.into_raw(), (size, size, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(2.0 / 255.0, -1.0)?
            .to_dtype(self.dtype)?;
        Ok(pixels)
    }

    fn token_ids(&self, text: &str) -> Result<Vec<u32>, Error> {
        let context = config::embedding::CONTEXT_TOKENS;
        match &self.tokenizer {
            Some(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, true)
                    .map_err(|e| Error::ModelUnavailable(format!("tokenize: {e}")))?;
                let eot = tokenizer
                    .get_vocab(true)
                    .get(config::embedding::EOT_TOKEN)
                    .copied()
                    .unwrap_or(config::embedding::FALLBACK_EOT_ID);

                let mut ids = encoding.get_ids().to_vec();
                if ids.len() > context {
                    // The text tower pools from the end-of-text position, so
                    // truncation must keep it as the final token.
                    ids.truncate(context);
                    ids[context - 1] = eot;
                }
                while ids.len() < context {
                    ids.push(eot);
                }
                Ok(ids)
            }
            None => Ok(hashed_token_ids(text, context)),
        }
    }

    /// Pull the projected features out, verify dimensionality, normalize.
    fn project(&self, features: Tensor) -> Result<Vec<f32>, Error> {
        let v: Vec<f32> = features.to_dtype(DType::F32)?.squeeze(0)?.to_vec1()?;
        if v.len() != config::embedding::EMBEDDING_DIMS {
            return Err(Error::ModelUnavailable(format!(
                "unexpected embedding dims: got {}, expected {}",
                v.len(),
                config::embedding::EMBEDDING_DIMS
            )));
        }
        Ok(l2_normalize(&v))
    }
}

impl Encoder for ClipEncoder {
    fn dimension(&self) -> usize {
        config::embedding::EMBEDDING_DIMS
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>, Error> {
        let pixels = self.preprocess(image)?.unsqueeze(0)?;
        let features = self.model.get_image_features(&pixels)?;
        self.project(features)
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, Error> {
        let ids = self.token_ids(text)?;
        let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let features = self.model.get_text_features(&input)?;
        self.project(features)
    }

    fn pretrained(&self) -> bool {
        self.pretrained
    }
}

fn build_model(weights: &Path, dtype: DType, device: &Device) -> Result<ClipModel, Error> {
    let clip_config = clip::ClipConfig::vit_base_patch32();
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights.to_path_buf()], dtype, device)
            .map_err(|e| {
                Error::ModelUnavailable(format!("load weights {}: {e}", weights.display()))
            })?
    };
    ClipModel::new(vb, &clip_config)
        .map_err(|e| Error::ModelUnavailable(format!("build CLIP model: {e}")))
}

/// Under a declared memory ceiling: cap numeric parallelism to one thread
/// before the first tensor op spins up the global pool. The f16 parameter
/// preference is handled at load time; the CPU device has no accelerator
/// cache to flush.
fn apply_memory_ceiling(ceiling_mb: u64) {
    std::env::set_var("RAYON_NUM_THREADS", "1");
    log::info!(
        "memory ceiling {} MB declared: single-threaded inference, f16 parameters preferred",
        ceiling_mb
    );
}

/// Degraded-mode tokenization when no pretrained tokenizer is present:
/// stable per-word hashes into the CLIP vocab range, padded with end-of-text.
fn hashed_token_ids(text: &str, context: usize) -> Vec<u32> {
    let mut ids: Vec<u32> = text
        .split_whitespace()
        .take(context)
        .map(|word| {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            (hasher.finish() % config::embedding::VOCAB_SIZE as u64) as u32
        })
        .collect();
    while ids.len() < context {
        ids.push(config::embedding::FALLBACK_EOT_ID);
    }
    ids
}

/// Scale to unit Euclidean length; zero vectors stay zero rather than
/// propagating NaNs into store distances.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm.is_finite() && norm > 1e-10 {
        v.iter().map(|x| x / norm).collect()
    } else {
        vec![0.0; v.len()]
    }
}
