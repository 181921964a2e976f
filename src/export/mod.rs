//! # Graph Export Module
//!
//! Turns a loaded checkpoint into a single ONNX file at a fixed location.
//!
//! An exporter writes whatever it produces into a scratch directory. The
//! largest `*.onnx` file found there is taken as the exported graph, copied
//! to the output path together with its external-data companion, and the
//! scratch directory is removed.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod optimum;
mod prebuilt;

pub use optimum::OptimumCliExporter;
pub use prebuilt::PrebuiltOnnxExporter;

use crate::hub::{HubError, LoadedModel};

/// Errors raised while producing the graph file
#[derive(Debug)]
pub enum ExportError {
    /// The external exporter could not be started
    ExporterUnavailable { program: String },
    /// The external exporter ran and failed
    ExporterFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    /// Fetching published graph files failed
    Hub(HubError),
    /// The exporter finished without leaving a graph behind
    NoGraphProduced(PathBuf),
    /// Wraps std::io::Error for file operations
    IoError(io::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExportError::ExporterUnavailable { program } => {
                write!(f, "Exporter {:?} could not be started (is it installed and on PATH?)", program)
            }
            ExportError::ExporterFailed { program, status, stderr } => {
                match status {
                    Some(code) => write!(f, "{} exited with status {}", program, code)?,
                    None => write!(f, "{} was terminated by a signal", program)?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr)?;
                }
                Ok(())
            }
            ExportError::Hub(e) => write!(f, "{}", e),
            ExportError::NoGraphProduced(dir) => {
                write!(f, "No ONNX files exported into {}", dir.display())
            }
            ExportError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for ExportError {}

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::IoError(err)
    }
}

impl From<HubError> for ExportError {
    fn from(err: HubError) -> Self {
        ExportError::Hub(err)
    }
}

/// Anything that can write ONNX graph files for a loaded model into a directory
pub trait GraphExporter {
    /// Short name used in logs and the summary
    fn name(&self) -> &str;

    /// Writes the exported graph file(s) somewhere below `work_dir`.
    fn export(&self, model: &LoadedModel, work_dir: &Path) -> Result<(), ExportError>;
}

/// Where the exported graph ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedGraph {
    /// Final location of the graph
    pub path: PathBuf,
    /// File name the exporter gave it
    pub source_name: String,
    /// Size in bytes
    pub size: u64,
    /// External-data files copied next to it
    pub companions: Vec<PathBuf>,
}

/// All regular files below `dir`, recursively, in sorted path order.
///
/// Symlinks are followed, which matters for hub cache snapshots.
pub fn walk_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Whether `name` is an ONNX graph or one of its external-data files.
pub fn is_graph_artifact(name: &str) -> bool {
    name.ends_with(".onnx") || name.ends_with(".onnx_data") || name.ends_with(".onnx.data")
}

/// Every `*.onnx` file below `dir` with its size.
pub fn find_graph_files(dir: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let mut graphs = Vec::new();
    for path in walk_files(dir)? {
        if path.extension().is_some_and(|ext| ext == "onnx") {
            let size = fs::metadata(&path)?.len();
            graphs.push((path, size));
        }
    }
    Ok(graphs)
}

/// The largest candidate; on equal sizes the earliest one wins.
pub fn select_largest(candidates: &[(PathBuf, u64)]) -> Option<&(PathBuf, u64)> {
    candidates.iter().fold(None, |best, candidate| match best {
        Some(current) if current.1 >= candidate.1 => Some(current),
        _ => Some(candidate),
    })
}

/// External-data files the exporter left next to `graph`.
pub fn external_data_for(graph: &Path) -> Vec<PathBuf> {
    let Some(name) = graph.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    [format!("{}_data", name), format!("{}.data", name)]
        .into_iter()
        .map(|candidate| graph.with_file_name(candidate))
        .filter(|path| path.is_file())
        .collect()
}

/// Picks the exported graph in `scratch` and copies it to `target`.
pub fn finalize_export(scratch: &Path, target: &Path) -> Result<ExportedGraph, ExportError> {
    let candidates = find_graph_files(scratch)?;
    debug!("Exporter produced {} graph file(s)", candidates.len());

    let (source, size) = select_largest(&candidates)
        .cloned()
        .ok_or_else(|| ExportError::NoGraphProduced(scratch.to_path_buf()))?;

    if candidates.len() > 1 {
        info!(
            "Multiple graph files exported, using the largest: {} ({} bytes)",
            source.display(),
            size
        );
    }

    fs::copy(&source, target)?;

    // The graph refers to its external data by the original file name
    let mut companions = Vec::new();
    if let Some(target_dir) = target.parent() {
        for data in external_data_for(&source) {
            if let Some(name) = data.file_name() {
                let destination = target_dir.join(name);
                fs::copy(&data, &destination)?;
                companions.push(destination);
            }
        }
    }

    Ok(ExportedGraph {
        path: target.to_path_buf(),
        source_name: source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size,
        companions,
    })
}

/// Removes the scratch directory, ignoring failures.
pub fn remove_scratch(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!("Could not remove scratch directory {}: {}", dir.display(), e);
        }
    }
}

/// Last `max_lines` non-empty lines of an external tool's output.
pub(crate) fn output_tail(output: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
