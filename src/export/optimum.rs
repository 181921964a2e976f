use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::{output_tail, ExportError, GraphExporter};
use crate::hub::{HubClient, LoadedModel, ModelLocation};

/// Exports through `optimum-cli export onnx`.
///
/// `command` may carry leading arguments, e.g.
/// `python3 -m optimum.commands.optimum_cli`.
#[derive(Debug, Clone)]
pub struct OptimumCliExporter {
    program: String,
    leading_args: Vec<String>,
    task: String,
    /// Hub cache the load step used, handed on as `HF_HUB_CACHE`
    hub_cache: Option<PathBuf>,
    /// Resolved access token, handed on as `HF_TOKEN`
    hub_token: Option<String>,
}

impl OptimumCliExporter {
    pub fn new(command: &str, task: impl Into<String>) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "optimum-cli".to_string());
        Self {
            program,
            leading_args: parts.collect(),
            task: task.into(),
            hub_cache: None,
            hub_token: None,
        }
    }

    /// Makes the exporter resolve hub files the same way `client` does.
    pub fn with_hub(mut self, client: &HubClient) -> Self {
        self.hub_cache = client.cache_dir.clone();
        self.hub_token = client.token.clone();
        self
    }

    fn build_command(&self, model: &LoadedModel, work_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(["export", "onnx", "--model"])
            .arg(model.model.source_arg())
            .arg("--task")
            .arg(&self.task);

        if let ModelLocation::Hub { revision, offline, .. } = &model.model.location {
            // Graph and tokenizer must come from the same commit
            command.arg("--revision").arg(revision);
            if *offline {
                command.env("HF_HUB_OFFLINE", "1");
            }
            if let Some(cache) = &self.hub_cache {
                command.env("HF_HUB_CACHE", cache);
            }
            if let Some(token) = &self.hub_token {
                command.env("HF_TOKEN", token);
            }
        }

        command.arg(work_dir);
        command
    }
}

impl GraphExporter for OptimumCliExporter {
    fn name(&self) -> &str {
        "optimum"
    }

    fn export(&self, model: &LoadedModel, work_dir: &Path) -> Result<(), ExportError> {
        let mut command = self.build_command(model, work_dir);
        info!("Running {:?}", command);

        let output = command.output().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ExportError::ExporterUnavailable { program: self.program.clone() }
            }
            _ => ExportError::IoError(e),
        })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("optimum: {}", line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(ExportError::ExporterFailed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: output_tail(&output.stderr, 20),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{CausalLm, ModelConfig};
    use crate::tokenizer::TokenizerBundle;
    use std::fs;
    use std::str::FromStr;
    use tokenizers::Tokenizer;

    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0", "truncation": null, "padding": null, "added_tokens": [],
        "normalizer": null, "pre_tokenizer": null, "post_processor": null, "decoder": null,
        "model": { "type": "WordLevel", "vocab": { "[UNK]": 0 }, "unk_token": "[UNK]" }
    }"#;

    fn loaded(dir: &Path) -> LoadedModel {
        LoadedModel {
            model_id: dir.display().to_string(),
            model: CausalLm {
                config: ModelConfig::from_value(serde_json::json!({
                    "model_type": "llama",
                    "architectures": ["LlamaForCausalLM"]
                })).unwrap(),
                location: ModelLocation::Local { dir: dir.to_path_buf() },
            },
            tokenizer: TokenizerBundle::new(Tokenizer::from_str(TOKENIZER_JSON).unwrap()),
        }
    }

    #[test]
    fn test_command_line() {
        let exporter = OptimumCliExporter::new("python3 -m optimum.commands.optimum_cli", "text-generation");
        let model = loaded(Path::new("/ckpt"));
        let command = exporter.build_command(&model, Path::new("/out/_tmp_onnx"));

        assert_eq!(command.get_program(), "python3");
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-m", "optimum.commands.optimum_cli",
                "export", "onnx", "--model", "/ckpt",
                "--task", "text-generation",
                "/out/_tmp_onnx",
            ]
        );
    }

    #[test]
    fn test_hub_model_forwards_revision_cache_and_token() {
        let client = HubClient {
            cache_dir: Some(PathBuf::from("/data/hf-cache")),
            token: Some("hf_secret".to_string()),
            revision: "v2".to_string(),
            offline: true,
        };
        let exporter = OptimumCliExporter::new("optimum-cli", "text-generation-with-past").with_hub(&client);

        let mut model = loaded(Path::new("/unused"));
        model.model.location = ModelLocation::Hub {
            repo_id: "acme/tiny".to_string(),
            revision: "v2".to_string(),
            snapshot_dir: PathBuf::from("/data/hf-cache/snapshot"),
            files: Vec::new(),
            offline: true,
        };
        let command = exporter.build_command(&model, Path::new("/out/_tmp_onnx"));

        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "export", "onnx", "--model", "acme/tiny",
                "--task", "text-generation-with-past",
                "--revision", "v2",
                "/out/_tmp_onnx",
            ]
        );

        let envs: Vec<(String, String)> = command
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into_owned(), v?.to_string_lossy().into_owned())))
            .collect();
        assert!(envs.contains(&("HF_HUB_OFFLINE".to_string(), "1".to_string())));
        assert!(envs.contains(&("HF_HUB_CACHE".to_string(), "/data/hf-cache".to_string())));
        assert!(envs.contains(&("HF_TOKEN".to_string(), "hf_secret".to_string())));
    }

    #[test]
    fn test_local_model_sets_no_hub_environment() {
        let client = HubClient {
            cache_dir: Some(PathBuf::from("/data/hf-cache")),
            token: Some("hf_secret".to_string()),
            revision: "main".to_string(),
            offline: false,
        };
        let exporter = OptimumCliExporter::new("optimum-cli", "text-generation").with_hub(&client);
        let command = exporter.build_command(&loaded(Path::new("/ckpt")), Path::new("/out/_tmp_onnx"));

        assert_eq!(command.get_envs().count(), 0);
        assert!(!command.get_args().any(|a| a == "--revision"));
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = OptimumCliExporter::new("aidm-no-such-exporter-binary", "text-generation");

        let result = exporter.export(&loaded(dir.path()), &dir.path().join("work"));
        match result {
            Err(ExportError::ExporterUnavailable { program }) => {
                assert_eq!(program, "aidm-no-such-exporter-binary")
            }
            other => panic!("expected ExporterUnavailable, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_script_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();

        let ok_script = dir.path().join("ok.sh");
        fs::write(&ok_script, "for last; do :; done\nmkdir -p \"$last\"\nprintf graph > \"$last/model.onnx\"\n").unwrap();
        let exporter = OptimumCliExporter::new(&format!("sh {}", ok_script.display()), "text-generation");
        let work = dir.path().join("work");
        exporter.export(&loaded(dir.path()), &work).unwrap();
        assert_eq!(fs::read_to_string(work.join("model.onnx")).unwrap(), "graph");

        let bad_script = dir.path().join("bad.sh");
        fs::write(&bad_script, "echo 'unsupported architecture' >&2\nexit 3\n").unwrap();
        let exporter = OptimumCliExporter::new(&format!("sh {}", bad_script.display()), "text-generation");
        match exporter.export(&loaded(dir.path()), &PathBuf::from("unused")) {
            Err(ExportError::ExporterFailed { status, stderr, .. }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "unsupported architecture");
            }
            other => panic!("expected ExporterFailed, got {:?}", other),
        }
    }
}
