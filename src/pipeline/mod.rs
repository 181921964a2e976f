//! # Export Pipeline
//!
//! Runs the export as a fixed sequence of steps:
//!
//! prepare → load → export → quantize → save tokenizer → checksum
//!
//! Every step returns a `Result`. The driver classifies failures by
//! [`Severity`]: fatal ones stop the run with exit code 1, reported ones print
//! a warning and continue, silent ones are only logged.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::checksum::{self, ChecksumError};
use crate::config::ExportConfig;
use crate::display;
use crate::export::{self, ExportError, ExportedGraph, GraphExporter};
use crate::hub::{HubError, LoadedModel, ModelHub};
use crate::quantize::{QuantizeError, Quantizer};
use crate::tokenizer::TokenizerError;

/// Exit code of a successful run
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code of a run that hit a fatal failure
pub const EXIT_FAILURE: u8 = 1;

/// How a step failure affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stop, exit 1
    Fatal,
    /// Warn and continue
    Reported,
    /// Continue without telling the user
    Silent,
}

/// A failed pipeline step
#[derive(Debug)]
pub enum PipelineError {
    Prepare { dir: PathBuf, source: io::Error },
    Load { model_id: String, source: HubError },
    Export(ExportError),
    Quantize(QuantizeError),
    Tokenizer(TokenizerError),
    Checksum { path: PathBuf, source: ChecksumError },
}

impl PipelineError {
    pub fn severity(&self) -> Severity {
        match self {
            PipelineError::Prepare { .. }
            | PipelineError::Load { .. }
            | PipelineError::Export(_)
            | PipelineError::Checksum { .. } => Severity::Fatal,
            PipelineError::Tokenizer(_) => Severity::Reported,
            PipelineError::Quantize(_) => Severity::Silent,
        }
    }

    /// What the user can do about it, if anything useful can be said
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            PipelineError::Load { .. } => {
                Some("Ensure you have offline weights available for this model.")
            }
            PipelineError::Export(_) => Some(
                "You can export manually or install compatible optimum/onnxruntime versions.",
            ),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineError::Prepare { dir, source } => {
                write!(f, "Failed to create output directory {}: {}", dir.display(), source)
            }
            PipelineError::Load { model_id, source } => {
                write!(f, "Failed to load model/tokenizer {}: {}", model_id, source)
            }
            PipelineError::Export(e) => write!(f, "ONNX export failed: {}", e),
            PipelineError::Quantize(e) => write!(f, "{}", e),
            PipelineError::Tokenizer(e) => write!(f, "Failed to save tokenizer: {}", e),
            PipelineError::Checksum { path, source } => {
                write!(f, "Failed to checksum {}: {}", path.display(), source)
            }
        }
    }
}

impl Error for PipelineError {}

/// What happened to the quantize step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantizeOutcome {
    /// Turned off by configuration
    Disabled,
    /// The graph was rewritten by the named quantizer
    Applied(String),
    /// The attempt failed; the exported graph is kept as is
    Skipped(String),
}

/// Outcome of one pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    pub model_id: String,
    pub exporter: String,
    pub graph: Option<ExportedGraph>,
    pub quantize: QuantizeOutcome,
    pub tokenizer_dir: Option<PathBuf>,
    pub digest: Option<String>,
    pub sidecar: Option<PathBuf>,
    /// Non-fatal problems that were reported to the user
    pub warnings: Vec<String>,
    /// The fatal failure that ended the run
    pub failure: Option<PipelineError>,
}

impl PipelineReport {
    fn new(model_id: &str, exporter: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            exporter: exporter.to_string(),
            graph: None,
            quantize: QuantizeOutcome::Disabled,
            tokenizer_dir: None,
            digest: None,
            sidecar: None,
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn exit_code(&self) -> u8 {
        if self.succeeded() { EXIT_SUCCESS } else { EXIT_FAILURE }
    }
}

/// The export pipeline with its collaborators
pub struct ExportPipeline<'a> {
    config: &'a ExportConfig,
    hub: &'a dyn ModelHub,
    exporter: &'a dyn GraphExporter,
    quantizer: &'a dyn Quantizer,
}

impl<'a> ExportPipeline<'a> {
    pub fn new(
        config: &'a ExportConfig,
        hub: &'a dyn ModelHub,
        exporter: &'a dyn GraphExporter,
        quantizer: &'a dyn Quantizer,
    ) -> Self {
        Self { config, hub, exporter, quantizer }
    }

    /// Runs every step in order and reports what happened.
    pub fn run(&self) -> PipelineReport {
        let mut report = PipelineReport::new(&self.config.model_id, self.exporter.name());
        info!("Exporting {} into {}", self.config.model_id, self.config.out_dir.display());

        if let Err(e) = self.prepare() {
            if self.handle(&mut report, e).is_break() {
                return report;
            }
        }

        let loaded = match self.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                let _ = self.handle(&mut report, e);
                return report;
            }
        };

        let mut graph = match self.export(&loaded) {
            Ok(graph) => graph,
            Err(e) => {
                let _ = self.handle(&mut report, e);
                return report;
            }
        };

        match self.quantize(&mut graph) {
            Ok(outcome) => report.quantize = outcome,
            Err(e) => {
                report.quantize = QuantizeOutcome::Skipped(e.to_string());
                if self.handle(&mut report, e).is_break() {
                    return report;
                }
            }
        }
        let graph_path = graph.path.clone();
        report.graph = Some(graph);

        match self.save_tokenizer(&loaded) {
            Ok(dir) => report.tokenizer_dir = Some(dir),
            Err(e) => {
                if self.handle(&mut report, e).is_break() {
                    return report;
                }
            }
        }

        match self.checksum(&graph_path) {
            Ok((digest, sidecar)) => {
                report.digest = Some(digest);
                report.sidecar = Some(sidecar);
            }
            Err(e) => {
                let _ = self.handle(&mut report, e);
                return report;
            }
        }

        info!("Export of {} finished", self.config.model_id);
        report
    }

    /// Applies the severity policy to a failed step.
    fn handle(&self, report: &mut PipelineReport, err: PipelineError) -> ControlFlow<()> {
        match err.severity() {
            Severity::Fatal => {
                error!("{}", err);
                display::warn(&err.to_string(), err.hint());
                report.failure = Some(err);
                ControlFlow::Break(())
            }
            Severity::Reported => {
                warn!("{}", err);
                display::warn(&err.to_string(), err.hint());
                report.warnings.push(err.to_string());
                ControlFlow::Continue(())
            }
            Severity::Silent => {
                debug!("Ignoring: {}", err);
                ControlFlow::Continue(())
            }
        }
    }

    fn prepare(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.config.out_dir).map_err(|source| PipelineError::Prepare {
            dir: self.config.out_dir.clone(),
            source,
        })
    }

    fn load(&self) -> Result<LoadedModel, PipelineError> {
        let spinner = display::spinner(format!("Loading {}...", self.config.model_id));
        let result = self.hub.load(&self.config.model_id);
        spinner.finish_and_clear();

        let loaded = result.map_err(|source| PipelineError::Load {
            model_id: self.config.model_id.clone(),
            source,
        })?;
        info!(
            "Loaded {} ({}, tokenizer vocab {})",
            loaded.model_id,
            loaded.model.config.model_type,
            loaded.tokenizer.vocab_size()
        );
        Ok(loaded)
    }

    fn export(&self, loaded: &LoadedModel) -> Result<ExportedGraph, PipelineError> {
        let scratch = self.config.scratch_path();

        // Leftovers from an interrupted run would compete for "largest"
        export::remove_scratch(&scratch);

        let spinner = display::spinner(format!("Exporting with {}...", self.exporter.name()));
        let result = fs::create_dir_all(&scratch)
            .map_err(ExportError::from)
            .and_then(|_| self.exporter.export(loaded, &scratch))
            .and_then(|_| export::finalize_export(&scratch, &self.config.graph_path()));
        spinner.finish_and_clear();

        export::remove_scratch(&scratch);

        let graph = result.map_err(PipelineError::Export)?;
        info!("Exported graph {} -> {} ({} bytes)", graph.source_name, graph.path.display(), graph.size);
        Ok(graph)
    }

    fn quantize(&self, graph: &mut ExportedGraph) -> Result<QuantizeOutcome, PipelineError> {
        if !self.config.quantize {
            return Ok(QuantizeOutcome::Disabled);
        }
        graph.companions = self.quantizer.quantize(graph).map_err(PipelineError::Quantize)?;
        if let Ok(meta) = fs::metadata(&graph.path) {
            graph.size = meta.len();
        }
        Ok(QuantizeOutcome::Applied(self.quantizer.name().to_string()))
    }

    fn save_tokenizer(&self, loaded: &LoadedModel) -> Result<PathBuf, PipelineError> {
        let dir = self.config.tokenizer_path();
        let written = loaded.tokenizer.save(&dir).map_err(PipelineError::Tokenizer)?;
        debug!("Wrote {} tokenizer file(s) to {}", written.len(), dir.display());
        Ok(dir)
    }

    fn checksum(&self, graph: &Path) -> Result<(String, PathBuf), PipelineError> {
        let wrap = |source| PipelineError::Checksum { path: graph.to_path_buf(), source };

        let total = fs::metadata(graph).map(|m| m.len()).unwrap_or(0);
        let progress = display::byte_progress(total, "sha256");
        let digest = checksum::sha256_file_with(graph, self.config.chunk_size, |n| {
            progress.inc(n as u64)
        });
        progress.finish_and_clear();

        let digest = digest.map_err(wrap)?;
        let sidecar = checksum::write_sidecar(graph, &digest).map_err(wrap)?;
        info!("SHA256 {} written to {}", digest, sidecar.display());
        Ok((digest, sidecar))
    }
}
