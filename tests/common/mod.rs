//! Test doubles for the pipeline collaborators

#![allow(dead_code)]

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aidm_export::export::{ExportError, ExportedGraph, GraphExporter};
use aidm_export::hub::{CausalLm, HubError, LoadedModel, ModelConfig, ModelHub, ModelLocation};
use aidm_export::quantize::{QuantizeError, Quantizer};
use aidm_export::tokenizer::TokenizerBundle;
use tokenizers::Tokenizer;

pub const TOKENIZER_JSON: &str = r#"{
    "version": "1.0", "truncation": null, "padding": null, "added_tokens": [],
    "normalizer": null, "pre_tokenizer": null, "post_processor": null, "decoder": null,
    "model": { "type": "WordLevel", "vocab": { "[UNK]": 0, "hello": 1, "world": 2 }, "unk_token": "[UNK]" }
}"#;

pub fn loaded_model(model_id: &str) -> LoadedModel {
    LoadedModel {
        model_id: model_id.to_string(),
        model: CausalLm {
            config: ModelConfig::from_value(serde_json::json!({
                "model_type": "llama",
                "architectures": ["LlamaForCausalLM"]
            }))
            .unwrap(),
            location: ModelLocation::Local { dir: PathBuf::from("/nonexistent/ckpt") },
        },
        tokenizer: TokenizerBundle::new(Tokenizer::from_str(TOKENIZER_JSON).unwrap()),
    }
}

/// Hub that either hands out a fixed model or refuses every id
pub struct FakeHub {
    pub fail: bool,
}

impl ModelHub for FakeHub {
    fn load(&self, model_id: &str) -> Result<LoadedModel, HubError> {
        if self.fail {
            return Err(HubError::Download {
                model: model_id.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(loaded_model(model_id))
    }
}

/// Exporter that writes the given (relative path, contents) pairs into the work dir
pub struct FakeExporter {
    pub files: Vec<(String, Vec<u8>)>,
    pub fail: bool,
    /// Set once `export` has been called
    pub ran: Cell<bool>,
}

impl FakeExporter {
    pub fn writing(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files.iter().map(|(n, b)| (n.to_string(), b.to_vec())).collect(),
            fail: false,
            ran: Cell::new(false),
        }
    }

    pub fn failing() -> Self {
        Self {
            files: vec![("partial.onnx".to_string(), b"half".to_vec())],
            fail: true,
            ran: Cell::new(false),
        }
    }
}

impl GraphExporter for FakeExporter {
    fn name(&self) -> &str {
        "fake"
    }

    fn export(&self, _model: &LoadedModel, work_dir: &Path) -> Result<(), ExportError> {
        self.ran.set(true);
        for (name, bytes) in &self.files {
            let path = work_dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)?;
        }
        if self.fail {
            return Err(ExportError::ExporterFailed {
                program: "fake".to_string(),
                status: Some(1),
                stderr: "unsupported operator".to_string(),
            });
        }
        Ok(())
    }
}

/// Quantizer stand-ins
pub enum FakeQuantizer {
    /// Keeps the first half of the graph bytes and folds external data into it
    Halve,
    /// Fails without touching anything
    Fail,
    /// Deletes the graph and reports success
    DeleteGraph,
}

impl Quantizer for FakeQuantizer {
    fn name(&self) -> &str {
        "fake-int8"
    }

    fn quantize(&self, graph: &ExportedGraph) -> Result<Vec<PathBuf>, QuantizeError> {
        match self {
            FakeQuantizer::Halve => {
                let mut bytes = fs::read(&graph.path)?;
                bytes.truncate(bytes.len() / 2);
                fs::write(&graph.path, bytes)?;
                for companion in &graph.companions {
                    fs::remove_file(companion)?;
                }
                Ok(Vec::new())
            }
            FakeQuantizer::Fail => Err(QuantizeError::Failed("no kernel for MatMul".to_string())),
            FakeQuantizer::DeleteGraph => {
                fs::remove_file(&graph.path)?;
                Ok(graph.companions.clone())
            }
        }
    }
}
