use clap::Parser;
use colored::*;
use std::process::ExitCode;
use tracing::{error, info};

use aidm_export::checksum;
use aidm_export::cli::Cli;
use aidm_export::config::{ExportConfig, ExporterBackend, Settings};
use aidm_export::display;
use aidm_export::export::{GraphExporter, OptimumCliExporter, PrebuiltOnnxExporter};
use aidm_export::hub::{HfHub, HubClient};
use aidm_export::logging;
use aidm_export::pipeline::{ExportPipeline, EXIT_FAILURE, EXIT_SUCCESS};
use aidm_export::quantize::{NoopQuantizer, OrtDynamicQuantizer, Quantizer};

/// `--verify`: recompute the graph digest and compare it to the sidecar.
fn verify(config: &ExportConfig) -> u8 {
    let graph = config.graph_path();
    match checksum::verify(&graph, config.chunk_size) {
        Ok(verification) => {
            display::print_verification(&graph, &verification);
            if verification.matches() {
                info!("Verified {}", graph.display());
                EXIT_SUCCESS
            } else {
                error!("Digest mismatch for {}", graph.display());
                EXIT_FAILURE
            }
        }
        Err(e) => {
            error!("Verification of {} failed: {}", graph.display(), e);
            display::warn(&format!("Cannot verify {}: {}", graph.display(), e), None);
            EXIT_FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let settings = cli.apply(Settings::load(cli.config.as_deref())?);
    let _guard = logging::init(&settings.logging);

    info!("aidm-export starting up...");
    info!("Settings loaded: model={}, out={}", settings.model.id, settings.output.dir.display());

    let config = ExportConfig::from(&settings);
    if cli.verify {
        return Ok(verify(&config));
    }

    let client = HubClient::from_settings(&settings.hub, &settings.model.revision);
    let hub = HfHub::new(client.clone());

    let exporter: Box<dyn GraphExporter> = match settings.export.backend {
        ExporterBackend::Optimum => Box::new(OptimumCliExporter::new(
            &settings.export.program,
            settings.export.task.clone(),
        ).with_hub(&client)),
        ExporterBackend::Prebuilt => Box::new(PrebuiltOnnxExporter::new(client)),
    };

    let quantizer: Box<dyn Quantizer> = if settings.quantize.enabled {
        Box::new(OrtDynamicQuantizer::new(&settings.quantize.python))
    } else {
        Box::new(NoopQuantizer)
    };

    println!("{}", format!("Exporting {}", config.model_id).bright_blue());
    let report = ExportPipeline::new(&config, &hub, exporter.as_ref(), quantizer.as_ref()).run();
    display::print_report(&report);

    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            display::warn(&format!("{:#}", e), None);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
