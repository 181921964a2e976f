//! Command line interface for aidm-export
//!
//! Every flag is optional. A flag that is given wins over the environment,
//! which wins over config files and built-in defaults.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{ExporterBackend, Settings};

/// Export a causal language model to a single ONNX graph with tokenizer and SHA-256 sidecar
#[derive(Parser, Debug)]
#[command(name = "aidm-export")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Hub model id or local checkpoint directory [env: AIDM_MODEL_ID]
    #[arg(long)]
    pub model: Option<String>,

    /// Output directory [default: models]
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// How to obtain the ONNX graph
    #[arg(long, value_enum)]
    pub exporter: Option<ExporterBackend>,

    /// Hub revision (branch, tag or commit)
    #[arg(long)]
    pub revision: Option<String>,

    /// Only use files already in the local hub cache
    #[arg(long)]
    pub offline: bool,

    /// Skip the int8 quantization attempt
    #[arg(long)]
    pub no_quantize: bool,

    /// Extra TOML config file (replaces config/local.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Check an existing graph against its .sha256 sidecar instead of exporting
    #[arg(long)]
    pub verify: bool,
}

impl Cli {
    /// Layers the given flags on top of loaded settings.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(model) = &self.model {
            settings.model.id = model.clone();
        }
        if let Some(out) = &self.out {
            settings.output.dir = out.clone();
        }
        if let Some(backend) = self.exporter {
            settings.export.backend = backend;
        }
        if let Some(revision) = &self.revision {
            settings.model.revision = revision.clone();
        }
        if self.offline {
            settings.hub.offline = true;
        }
        if self.no_quantize {
            settings.quantize.enabled = false;
        }
        settings
    }
}
