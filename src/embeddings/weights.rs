// weights.rs — Local model weights resolution with optional SHA256 gating.
//
// Downloading is the deployment's job (a separate retry-with-backoff CLI);
// this module only decides which already-present directory to load from.
// "Nothing resolves" is a valid outcome: the engine then starts degraded
// with default-initialized weights.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};

use crate::config;

/// Resolve the model directory, first match wins:
/// explicit config path → DECORMATE_MODEL_DIR → the container deployment
/// path → the legacy CHECKPOINT variable. A candidate counts only if it
/// holds both model.safetensors and tokenizer.json, and (when
/// DECORMATE_MODEL_SHA256 is set) the weights hash matches.
pub fn resolve_model_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_from(explicit, &|name| std::env::var(name).ok())
}

fn resolve_from(
    explicit: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    let expected_sha = env(config::embedding::MODEL_SHA256_ENV);

    let candidates: Vec<(PathBuf, &str)> = [
        explicit.map(|p| (p.to_path_buf(), "explicit configuration")),
        env(config::embedding::MODEL_DIR_ENV).map(|p| (PathBuf::from(p), "environment")),
        Some((
            PathBuf::from(config::embedding::DEPLOY_MODEL_DIR),
            "deployment path",
        )),
        env(config::embedding::LEGACY_CHECKPOINT_ENV).map(|raw| {
            // The legacy variable pointed at the checkpoint file itself.
            let p = PathBuf::from(raw);
            let dir = if p.is_file() {
                p.parent().map(Path::to_path_buf).unwrap_or(p)
            } else {
                p
            };
            (dir, "legacy checkpoint variable")
        }),
    ]
    .into_iter()
    .flatten()
    .collect();

    for (dir, source) in candidates {
        if !model_files_exist(&dir) {
            log::debug!("no usable model files at {} ({source})", dir.display());
            continue;
        }
        if let Some(expected) = expected_sha.as_deref() {
            let weights = dir.join(config::embedding::WEIGHTS_FILE);
            match verify_checksum(&weights, expected) {
                Ok(true) => {}
                Ok(false) => {
                    log::error!(
                        "weights checksum mismatch at {} ({source}); skipping candidate",
                        weights.display()
                    );
                    continue;
                }
                Err(e) => {
                    log::error!("cannot verify weights at {}: {e:#}", weights.display());
                    continue;
                }
            }
        }
        log::info!("using model weights from {} ({source})", dir.display());
        return Some(dir);
    }

    None
}

/// Both required model files present?
pub fn model_files_exist(dir: &Path) -> bool {
    dir.join(config::embedding::WEIGHTS_FILE).exists()
        && dir.join(config::embedding::TOKENIZER_FILE).exists()
}

/// Streamed SHA256 comparison against a hex digest (weights run to hundreds
/// of MB; never buffer them whole).
fn verify_checksum(path: &Path, expected_sha256: &str) -> anyhow::Result<bool> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("read {}", path.display()))?;
    let actual = hex::encode(hasher.finalize());
    Ok(actual.eq_ignore_ascii_case(expected_sha256))
}
