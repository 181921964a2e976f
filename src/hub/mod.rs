//! # Model Hub Module
//!
//! Resolves a model identifier into the two handles the export needs: the
//! tokenizer and a causal-LM checkpoint description.
//!
//! Identifiers are either a local checkpoint directory or a Hugging Face Hub
//! repository id (`org/name`). Hub files are fetched into the shared hub
//! cache through `hf-hub`; in offline mode they are only looked up there.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

mod hf;
mod model_config;

pub use hf::{validate_repo_id, HfHub, HubClient};
pub use model_config::ModelConfig;

use crate::tokenizer::TokenizerBundle;

/// Files every checkpoint must provide
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Tokenizer files carried along when the checkpoint has them
pub const TOKENIZER_COMPANIONS: &[&str] = &["tokenizer_config.json", "special_tokens_map.json"];

/// Errors raised while resolving a model
#[derive(Debug)]
pub enum HubError {
    /// The identifier is neither a directory nor an `org/name` repo id
    InvalidModelId(String),
    /// A required file is absent from the checkpoint
    MissingFile { model: String, file: String },
    /// Offline mode and the file is not in the hub cache
    NotCached { model: String, file: String },
    /// The hub client failed (network, auth, 404, ...)
    Download { model: String, message: String },
    /// The checkpoint is not something we can export as a causal LM
    Incompatible(String),
    /// config.json could not be parsed
    Config(String),
    /// tokenizer.json could not be loaded
    Tokenizer(String),
    /// Wraps std::io::Error for file operations
    IoError(std::io::Error),
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HubError::InvalidModelId(id) => write!(
                f, "Invalid model id {:?}: expected an existing directory or 'org/name'", id
            ),
            HubError::MissingFile { model, file } => write!(f, "{} has no {}", model, file),
            HubError::NotCached { model, file } => {
                write!(f, "{} for {} is not in the local hub cache", file, model)
            }
            HubError::Download { model, message } => {
                write!(f, "Hub request for {} failed: {}", model, message)
            }
            HubError::Incompatible(msg) => write!(f, "Incompatible checkpoint: {}", msg),
            HubError::Config(msg) => write!(f, "Failed to parse config.json: {}", msg),
            HubError::Tokenizer(msg) => write!(f, "Failed to load tokenizer: {}", msg),
            HubError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for HubError {}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::IoError(err)
    }
}

/// Where the checkpoint lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLocation {
    /// A checkpoint directory on disk
    Local { dir: PathBuf },
    /// A hub repository
    Hub {
        repo_id: String,
        revision: String,
        /// Cache snapshot directory the fetched files were stored in
        snapshot_dir: PathBuf,
        /// Repository listing; empty when resolved offline
        files: Vec<String>,
        offline: bool,
    },
}

/// Handle to a causal language model checkpoint
#[derive(Debug, Clone)]
pub struct CausalLm {
    pub config: ModelConfig,
    pub location: ModelLocation,
}

impl CausalLm {
    /// Argument that identifies the checkpoint to external tools.
    pub fn source_arg(&self) -> String {
        match &self.location {
            ModelLocation::Local { dir } => dir.display().to_string(),
            ModelLocation::Hub { repo_id, .. } => repo_id.clone(),
        }
    }
}

/// Result of a successful load
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model_id: String,
    pub model: CausalLm,
    pub tokenizer: TokenizerBundle,
}

/// Anything that can resolve a model identifier into tokenizer + model handles
pub trait ModelHub {
    fn load(&self, model_id: &str) -> Result<LoadedModel, HubError>;
}

/// Returns true when `files` contains something a graph can be exported from.
pub fn has_weights(files: &[String]) -> bool {
    files.iter().any(|f| {
        f.ends_with(".safetensors") || f.ends_with(".bin") || f.ends_with(".onnx")
    })
}
