use std::fmt;

pub type Result<T> = core::result::Result<T, GenError>;

/// Which decode call of a generation run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Prefill,
    Step,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Prefill => f.write_str("prefill"),
            DecodeStage::Step => f.write_str("step"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GenError {
    #[error("failed to load model from {0}")]
    ModelLoadFailed(String),
    #[error("failed to create context")]
    ContextCreateFailed,
    #[error("tokenize overflow: input too large to size")]
    EncodeOverflow,
    #[error("tokenization failed")]
    EncodeFailed,
    #[error("detokenize sizing call returned {0}, expected a non-positive size")]
    DecodeSizingFailed(i32),
    #[error("failed to detokenize")]
    DecodeFailed,
    #[error("fatal {stage} decode error (code {code})")]
    Decode { stage: DecodeStage, code: i32 },
    #[error("batch capacity {capacity} exceeded")]
    BatchCapacity { capacity: usize },
    #[error("no logits available at output index {0}")]
    Logits(i32),
    #[error("config: {0}")]
    Config(String),
    #[error("llama backend is already initialised in this process")]
    BackendUnavailable,
    #[error("writing output: {0}")]
    Output(String),
}

pub mod config {
    use serde::Deserialize;
    use std::env;
    use std::path::{Path, PathBuf};

    use crate::{GenError, Result};

    /// Seed value meaning "pick a fresh seed from the OS".
    pub const DEFAULT_SEED: u32 = u32::MAX;

    pub const DEFAULT_USER_MESSAGE: &str = "Zeig mir jeden Patienten der in Q4 einen Termin hatte";

    const DEFAULT_POLICY: &str = concat!(
        "Heutiges Datum: 7. November 2025",
        " Du bist ein SQL Query ersteller welcher ausschließlichh dafür gemacht ist, SQL queries zu erstellen welche direkt",
        " gegen eine postgresql datenbank abgefeuert werden."
    );

    const DEFAULT_SCHEMA: &str =
        "BEGIN TABLE INFO: Produkte (id, name) = id -> id des Produktes, name -> Name des Produktes";

    /// Text placed in the system segment of the prompt: a policy preamble
    /// followed directly by the schema block.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(default)]
    pub struct SystemContext {
        pub policy: String,
        pub schema: String,
    }

    impl Default for SystemContext {
        fn default() -> Self {
            Self { policy: DEFAULT_POLICY.to_string(), schema: DEFAULT_SCHEMA.to_string() }
        }
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(default)]
    pub struct GenConfig {
        pub model_path: PathBuf,
        pub context_length: u32,
        pub batch_capacity: u32,
        pub temperature: f32,
        pub seed: u32,
        pub max_tokens: Option<usize>,
        pub gpu_layers: Option<u32>,
        pub user_message: String,
        pub system: SystemContext,
    }

    impl Default for GenConfig {
        fn default() -> Self {
            Self {
                model_path: PathBuf::from("llama.gguf"),
                context_length: 2048 * 4,
                batch_capacity: 512 * 4,
                temperature: 0.01,
                seed: DEFAULT_SEED,
                max_tokens: None,
                gpu_layers: None,
                user_message: DEFAULT_USER_MESSAGE.to_string(),
                system: SystemContext::default(),
            }
        }
    }

    impl GenConfig {
        /// `TEXTGEN_CONFIG` points at a YAML file; without it, defaults are
        /// patched from the individual `TEXTGEN_*` variables.
        pub fn load() -> Result<Self> {
            if let Ok(path) = env::var("TEXTGEN_CONFIG") {
                return Self::from_file(path);
            }
            let mut cfg = Self::default();
            if let Ok(path) = env::var("TEXTGEN_MODEL") { cfg.model_path = PathBuf::from(path); }
            if let Some(v) = parsed_var("TEXTGEN_CONTEXT_LENGTH")? { cfg.context_length = v; }
            if let Some(v) = parsed_var("TEXTGEN_BATCH_CAPACITY")? { cfg.batch_capacity = v; }
            if let Some(v) = parsed_var("TEXTGEN_TEMPERATURE")? { cfg.temperature = v; }
            if let Some(v) = parsed_var("TEXTGEN_SEED")? { cfg.seed = v; }
            if let Some(v) = parsed_var("TEXTGEN_MAX_TOKENS")? { cfg.max_tokens = Some(v); }
            if let Some(v) = parsed_var("TEXTGEN_GPU_LAYERS")? { cfg.gpu_layers = Some(v); }
            Ok(cfg)
        }

        pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .map_err(|e| GenError::Config(format!("{}: {}", path.display(), e)))?;
            Self::from_yaml_str(&text)
        }

        pub fn from_yaml_str(text: &str) -> Result<Self> {
            serde_yaml::from_str(text).map_err(|e| GenError::Config(e.to_string()))
        }
    }

    fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
        match env::var(name) {
            Ok(v) => v
                .parse()
                .map(Some)
                .map_err(|_| GenError::Config(format!("{name}: cannot parse {v:?}"))),
            Err(_) => Ok(None),
        }
    }
}
