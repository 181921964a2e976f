use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::export::{output_tail, walk_files, ExportedGraph};

/// Inline script handed to the interpreter:
/// `<script> <source> <destination> <external data: 1|0>`
const QUANTIZE_SCRIPT: &str = "\
import sys
from onnxruntime.quantization import QuantType, quantize_dynamic
quantize_dynamic(
    sys.argv[1],
    sys.argv[2],
    weight_type=QuantType.QInt8,
    use_external_data_format=sys.argv[3] == '1',
)
";

/// Errors raised by a quantization attempt
#[derive(Debug)]
pub enum QuantizeError {
    /// The interpreter or its quantization package is missing
    Unavailable(String),
    /// The quantizer ran and failed
    Failed(String),
    /// Wraps std::io::Error for file operations
    IoError(io::Error),
}

impl fmt::Display for QuantizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QuantizeError::Unavailable(msg) => write!(f, "Quantizer unavailable: {}", msg),
            QuantizeError::Failed(msg) => write!(f, "Quantization failed: {}", msg),
            QuantizeError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for QuantizeError {}

impl From<io::Error> for QuantizeError {
    fn from(err: io::Error) -> Self {
        QuantizeError::IoError(err)
    }
}

/// Rewrites a graph file in place with reduced precision
pub trait Quantizer {
    fn name(&self) -> &str;

    /// Rewrites `graph.path` in place and returns the external-data files
    /// the rewritten graph refers to.
    fn quantize(&self, graph: &ExportedGraph) -> Result<Vec<PathBuf>, QuantizeError>;
}

/// Leaves the graph untouched
#[derive(Debug, Clone, Default)]
pub struct NoopQuantizer;

impl Quantizer for NoopQuantizer {
    fn name(&self) -> &str {
        "none"
    }

    fn quantize(&self, graph: &ExportedGraph) -> Result<Vec<PathBuf>, QuantizeError> {
        Ok(graph.companions.clone())
    }
}

/// Dynamic int8 weight quantization through onnxruntime's Python tooling.
///
/// The result is written into a staging directory next to the graph, under
/// the graph's own file name so that external-data references resolve once
/// moved. Nothing in the output directory changes unless the tool succeeds.
#[derive(Debug, Clone)]
pub struct OrtDynamicQuantizer {
    program: String,
    leading_args: Vec<String>,
}

impl OrtDynamicQuantizer {
    pub fn new(python: &str) -> Self {
        let mut parts = python.split_whitespace().map(str::to_string);
        Self {
            program: parts.next().unwrap_or_else(|| "python3".to_string()),
            leading_args: parts.collect(),
        }
    }

    fn staging_dir(graph: &Path) -> PathBuf {
        let mut name = OsString::from(graph.as_os_str());
        name.push(".int8.tmp");
        PathBuf::from(name)
    }

    fn run(&self, graph: &ExportedGraph, staged: &Path) -> Result<(), QuantizeError> {
        let external = if graph.companions.is_empty() { "0" } else { "1" };

        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("-c")
            .arg(QUANTIZE_SCRIPT)
            .arg(&graph.path)
            .arg(staged)
            .arg(external)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => QuantizeError::Unavailable(format!("{} not found", self.program)),
                _ => QuantizeError::IoError(e),
            })?;

        if !output.status.success() {
            let stderr = output_tail(&output.stderr, 5);
            return Err(if stderr.contains("ModuleNotFoundError") {
                QuantizeError::Unavailable(stderr)
            } else {
                QuantizeError::Failed(stderr)
            });
        }
        if !staged.is_file() {
            return Err(QuantizeError::Failed("quantizer produced no output".to_string()));
        }
        Ok(())
    }

    /// Moves the staged graph and its data files into place and drops the
    /// full-precision data files nothing refers to anymore.
    fn install(graph: &ExportedGraph, staging: &Path, staged: &Path) -> Result<Vec<PathBuf>, QuantizeError> {
        let target_dir = graph.path.parent().unwrap_or_else(|| Path::new("."));

        let mut data_files = Vec::new();
        for path in walk_files(staging)? {
            if path != staged {
                if let Some(name) = path.file_name() {
                    data_files.push((path.clone(), target_dir.join(name)));
                }
            }
        }

        fs::rename(staged, &graph.path)?;
        let mut companions = Vec::with_capacity(data_files.len());
        for (from, to) in data_files {
            fs::rename(&from, &to)?;
            companions.push(to);
        }

        for stale in graph.companions.iter().filter(|c| !companions.contains(c)) {
            if let Err(e) = fs::remove_file(stale) {
                debug!("Could not remove {}: {}", stale.display(), e);
            }
        }
        Ok(companions)
    }
}

impl Quantizer for OrtDynamicQuantizer {
    fn name(&self) -> &str {
        "onnxruntime-int8"
    }

    fn quantize(&self, graph: &ExportedGraph) -> Result<Vec<PathBuf>, QuantizeError> {
        let file_name = graph
            .path
            .file_name()
            .ok_or_else(|| QuantizeError::Failed(format!("{} has no file name", graph.path.display())))?;
        let staging = Self::staging_dir(&graph.path);
        let staged = staging.join(file_name);

        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let result = self
            .run(graph, &staged)
            .and_then(|_| Self::install(graph, &staging, &staged));
        let _ = fs::remove_dir_all(&staging);

        let companions = result?;
        debug!("Quantized {} in place ({} data file(s))", graph.path.display(), companions.len());
        Ok(companions)
    }
}
