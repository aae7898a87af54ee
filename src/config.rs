// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

pub mod logging {
    pub const LOG_DIR_ENV: &str = "DECORMATE_LOG_DIR";
    pub const LOG_DIR_REL: &str = ".decormate/logs";
    pub const LOG_FILE_NAME: &str = "search_core.log";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod embedding {
    // CLIP ViT-B/32: 512-dim joint image/text embedding space.
    pub const EMBEDDING_DIMS: usize = 512;
    pub const EMBEDDING_MODEL_NAME: &str = "clip-vit-base-patch32";

    // CLIP text context window (BPE tokens, including specials).
    pub const CONTEXT_TOKENS: usize = 77;

    // CLIP BPE vocabulary. The end-of-text id doubles as the pad id; the
    // fallback constant covers tokenizer files that drop the special-token map.
    pub const VOCAB_SIZE: usize = 49408;
    pub const EOT_TOKEN: &str = "<|endoftext|>";
    pub const FALLBACK_EOT_ID: u32 = 49407;

    // Files a usable local model directory must contain.
    pub const WEIGHTS_FILE: &str = "model.safetensors";
    pub const TOKENIZER_FILE: &str = "tokenizer.json";

    // Weights directory resolution, in order: explicit config, environment,
    // the container deployment path, then the legacy checkpoint variable the
    // first deployments used.
    pub const MODEL_DIR_ENV: &str = "DECORMATE_MODEL_DIR";
    pub const DEPLOY_MODEL_DIR: &str = "/app/models/clip-vit-base-patch32";
    pub const LEGACY_CHECKPOINT_ENV: &str = "CHECKPOINT";

    // Optional integrity gate for deployment-provided weights.
    pub const MODEL_SHA256_ENV: &str = "DECORMATE_MODEL_SHA256";

    // Memory-constrained deployments declare their ceiling here; the engine
    // responds with single-threaded inference and f16 parameters.
    pub const MEMORY_CEILING_ENV: &str = "DECORMATE_MEMORY_CEILING_MB";

    // Opt-in emergency mode: serve labeled random unit vectors when the model
    // cannot load. Never enabled by default.
    pub const DIAGNOSTIC_ENV: &str = "DECORMATE_DIAGNOSTIC_EMBEDDINGS";
}

pub mod store {
    pub const INDEX_HOST_ENV: &str = "DECORMATE_INDEX_HOST";
    pub const API_KEY_ENV: &str = "DECORMATE_API_KEY";
    pub const INDEX_NAME_ENV: &str = "DECORMATE_INDEX_NAME";
    pub const DEFAULT_INDEX_NAME: &str = "decormate";

    // Hard cap on query fan-out regardless of what the caller asks for.
    pub const MAX_QUERY_LIMIT: usize = 20;

    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    // How much of an error response body we carry into error messages/logs.
    pub const ERROR_BODY_SNIPPET_BYTES: usize = 256;
}

pub mod indexer {
    // Recognized image extensions for query classification (case-insensitive).
    pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
}
