use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use serde_json::Value;
use super::HubError;

/// The parts of a transformers `config.json` the export cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// `model_type`, e.g. "llama"
    pub model_type: String,
    /// `architectures`, e.g. ["LlamaForCausalLM"]
    pub architectures: Vec<String>,
    /// The whole document, for exporters that need more
    pub raw: Value,
}

impl ModelConfig {
    pub fn from_file(path: &Path) -> Result<Self, HubError> {
        let file = File::open(path)?;
        let value: Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| HubError::Config(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(raw: Value) -> Result<Self, HubError> {
        let object = raw
            .as_object()
            .ok_or_else(|| HubError::Config("top level is not an object".to_string()))?;

        let model_type = object
            .get("model_type")
            .and_then(Value::as_str)
            .ok_or_else(|| HubError::Config("missing model_type".to_string()))?
            .to_string();

        let architectures = object
            .get("architectures")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { model_type, architectures, raw })
    }

    /// Whether any declared architecture is a causal language model head.
    pub fn is_causal_lm(&self) -> bool {
        self.architectures
            .iter()
            .any(|a| a.ends_with("ForCausalLM") || a.ends_with("LMHeadModel"))
    }

    /// Fails with [`HubError::Incompatible`] unless this is a causal LM.
    pub fn ensure_causal_lm(&self) -> Result<(), HubError> {
        if self.is_causal_lm() {
            Ok(())
        } else if self.architectures.is_empty() {
            Err(HubError::Incompatible(format!(
                "config.json for model_type {:?} declares no architectures",
                self.model_type
            )))
        } else {
            Err(HubError::Incompatible(format!(
                "{} is not a causal language model",
                self.architectures.join(", ")
            )))
        }
    }
}
