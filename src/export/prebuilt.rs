use std::fs;
use std::path::Path;
use tracing::info;

use super::{is_graph_artifact, walk_files, ExportError, GraphExporter};
use crate::hub::{HubClient, LoadedModel, ModelLocation};

/// Uses ONNX graphs that were published together with the checkpoint
/// (e.g. an `onnx/` folder in the hub repository) instead of converting.
#[derive(Debug, Clone)]
pub struct PrebuiltOnnxExporter {
    client: HubClient,
}

impl PrebuiltOnnxExporter {
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }
}

/// Copies every graph artifact below `source` into `work_dir`, keeping
/// relative paths. Returns how many files were copied.
fn copy_graph_artifacts(source: &Path, work_dir: &Path) -> Result<usize, ExportError> {
    let mut copied = 0;
    for path in walk_files(source)? {
        let Ok(relative) = path.strip_prefix(source) else {
            continue;
        };
        if !is_graph_artifact(&relative.to_string_lossy()) {
            continue;
        }
        let destination = work_dir.join(relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&path, &destination)?;
        copied += 1;
    }
    Ok(copied)
}

impl GraphExporter for PrebuiltOnnxExporter {
    fn name(&self) -> &str {
        "prebuilt"
    }

    fn export(&self, model: &LoadedModel, work_dir: &Path) -> Result<(), ExportError> {
        fs::create_dir_all(work_dir)?;

        let copied = match &model.model.location {
            ModelLocation::Local { dir } => copy_graph_artifacts(dir, work_dir)?,
            ModelLocation::Hub { snapshot_dir, files, offline, .. } if *offline || files.is_empty() => {
                copy_graph_artifacts(snapshot_dir, work_dir)?
            }
            ModelLocation::Hub { repo_id, files, .. } => {
                let mut copied = 0;
                for file in files.iter().filter(|f| is_graph_artifact(f)) {
                    let cached = self.client.fetch(repo_id, file)?;
                    let destination = work_dir.join(file);
                    if let Some(parent) = destination.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(&cached, &destination)?;
                    copied += 1;
                }
                copied
            }
        };

        info!("Collected {} published graph file(s) for {}", copied, model.model_id);
        Ok(())
    }
}
