// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

/// Model identifier used when neither the CLI, the environment nor a config file names one
pub const DEFAULT_MODEL_ID: &str = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";

/// File name of the exported graph inside the output directory
pub const DEFAULT_GRAPH_FILE: &str = "tinyllama-q8.onnx";

/// Tokenizer directory inside the output directory
pub const DEFAULT_TOKENIZER_DIR: &str = "tokenizer";

/// Scratch directory the exporter writes into
pub const DEFAULT_SCRATCH_DIR: &str = "_tmp_onnx";

/// Prefix of every environment override (`AIDM_MODEL_ID`, `AIDM_OUTPUT_DIR`, ...)
pub const ENV_PREFIX: &str = "AIDM";

/// Size of the read buffer used when hashing the exported graph
pub const HASH_CHUNK_SIZE: usize = 8192;

/// Which model to export
#[derive(Debug, Deserialize, Clone)]
pub struct ModelSettings {
    /// Hub repository id (`org/name`) or local checkpoint directory
    pub id: String,
    /// Hub revision (branch, tag or commit)
    pub revision: String,
}

/// Where the artifacts land
#[derive(Debug, Deserialize, Clone)]
pub struct OutputSettings {
    /// Root output directory
    pub dir: PathBuf,
    /// File name of the exported graph inside `dir`
    pub graph: String,
    /// Name of the tokenizer directory inside `dir`
    pub tokenizer: String,
    /// Name of the scratch directory the exporter writes into
    pub scratch: String,
}

/// Exporter backend selection
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExporterBackend {
    /// Run `optimum-cli export onnx` against the checkpoint
    Optimum,
    /// Collect ONNX files already published alongside the checkpoint
    Prebuilt,
}

/// Configuration for the graph exporter
#[derive(Debug, Deserialize, Clone)]
pub struct ExportSettings {
    /// Backend used to produce the ONNX graph
    pub backend: ExporterBackend,
    /// Executable invoked by the optimum backend
    pub program: String,
    /// Task passed to the optimum exporter
    pub task: String,
}

/// Configuration for the best-effort quantize step
#[derive(Debug, Deserialize, Clone)]
pub struct QuantizeSettings {
    /// Whether to attempt int8 quantization at all
    pub enabled: bool,
    /// Python interpreter that has `onnxruntime` installed
    pub python: String,
}

/// Configuration for the model hub client
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    /// Resolve files from the local hub cache only
    pub offline: bool,
    /// Custom hub cache directory
    pub cache: Option<PathBuf>,
    /// Access token; `HF_TOKEN` is used when absent
    pub token: Option<String>,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Directory for the rolling log file
    pub dir: PathBuf,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub model: ModelSettings,
    pub output: OutputSettings,
    pub export: ExportSettings,
    pub quantize: QuantizeSettings,
    pub hub: HubSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads settings from the process environment.
    ///
    /// Sources in order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with AIDM_
    /// 2. The explicit `config_file`, or `config/local.toml` when none is given
    /// 3. `config/default.toml` if present
    /// 4. Built-in defaults
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(config_file, None)
    }

    /// Same as [`Settings::load`], but reads environment overrides from `env`
    /// instead of the process environment when it is given.
    pub fn from_sources(
        config_file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");

        let default_config = config_dir.join("default.toml");
        let default_config_path = default_config.to_string_lossy();

        let mut builder = Config::builder()
            .set_default("model.id", DEFAULT_MODEL_ID)?
            .set_default("model.revision", "main")?
            .set_default("output.dir", "models")?
            .set_default("output.graph", DEFAULT_GRAPH_FILE)?
            .set_default("output.tokenizer", DEFAULT_TOKENIZER_DIR)?
            .set_default("output.scratch", DEFAULT_SCRATCH_DIR)?
            .set_default("export.backend", "optimum")?
            .set_default("export.program", "optimum-cli")?
            .set_default("export.task", "text-generation-with-past")?
            .set_default("quantize.enabled", true)?
            .set_default("quantize.python", "python3")?
            .set_default("hub.offline", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.dir", "logs")?
            .add_source(File::with_name(&default_config_path).required(false));

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path)),
            None => {
                let local_config = config_dir.join("local.toml");
                let local_config_path = local_config.to_string_lossy();
                builder.add_source(File::with_name(&local_config_path).required(false))
            }
        };

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("_")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.id.trim().is_empty() {
            return Err(ConfigError::Message("model id must not be empty".to_string()));
        }

        for (key, value) in [
            ("output.graph", &self.output.graph),
            ("output.tokenizer", &self.output.tokenizer),
            ("output.scratch", &self.output.scratch),
        ] {
            if value.is_empty() || value.contains(['/', '\\']) {
                return Err(ConfigError::Message(format!(
                    "{} must be a plain file name, got: {:?}",
                    key, value
                )));
            }
        }

        // The graph and its neighbours must not collide
        if self.output.graph == self.output.tokenizer || self.output.graph == self.output.scratch {
            return Err(ConfigError::Message(
                "output.graph must differ from output.tokenizer and output.scratch".to_string()
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(
                format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level)
            )),
        }
    }
}

/// Everything the export pipeline needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub model_id: String,
    pub out_dir: PathBuf,
    pub graph_file: String,
    pub tokenizer_dir: String,
    pub scratch_dir: String,
    pub chunk_size: usize,
    pub quantize: bool,
}

impl ExportConfig {
    /// Config with the stock file layout under `out_dir`.
    pub fn new(model_id: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_id: model_id.into(),
            out_dir: out_dir.into(),
            graph_file: DEFAULT_GRAPH_FILE.to_string(),
            tokenizer_dir: DEFAULT_TOKENIZER_DIR.to_string(),
            scratch_dir: DEFAULT_SCRATCH_DIR.to_string(),
            chunk_size: HASH_CHUNK_SIZE,
            quantize: true,
        }
    }

    pub fn graph_path(&self) -> PathBuf {
        self.out_dir.join(&self.graph_file)
    }

    pub fn sidecar_path(&self) -> PathBuf {
        crate::checksum::sidecar_path(&self.graph_path())
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.out_dir.join(&self.tokenizer_dir)
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.out_dir.join(&self.scratch_dir)
    }
}

impl From<&Settings> for ExportConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            model_id: settings.model.id.clone(),
            out_dir: settings.output.dir.clone(),
            graph_file: settings.output.graph.clone(),
            tokenizer_dir: settings.output.tokenizer.clone(),
            scratch_dir: settings.output.scratch.clone(),
            chunk_size: HASH_CHUNK_SIZE,
            quantize: settings.quantize.enabled,
        }
    }
}
