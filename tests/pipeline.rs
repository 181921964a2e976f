mod common;

use std::fs;

use aidm_export::checksum;
use aidm_export::config::ExportConfig;
use aidm_export::pipeline::{ExportPipeline, PipelineError, QuantizeOutcome, EXIT_FAILURE, EXIT_SUCCESS};
use aidm_export::quantize::NoopQuantizer;
use common::{FakeExporter, FakeHub, FakeQuantizer};

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

fn config(out: &std::path::Path) -> ExportConfig {
    ExportConfig::new("acme/tiny-chat", out)
}

#[test]
fn test_successful_export_writes_all_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir.path().join("models"));
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"onnx graph bytes")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert!(report.succeeded());
    assert_eq!(report.exit_code(), EXIT_SUCCESS);
    assert_eq!(fs::read(config.graph_path()).unwrap(), b"onnx graph bytes");

    let sidecar = fs::read_to_string(config.sidecar_path()).unwrap();
    assert_eq!(sidecar.len(), 65);
    assert!(sidecar.ends_with('\n'));
    let digest = report.digest.unwrap();
    assert_eq!(sidecar.trim_end(), digest);
    assert_eq!(digest, checksum::sha256_file(&config.graph_path(), 8192).unwrap());

    assert!(config.tokenizer_path().join("tokenizer.json").is_file());
    assert!(!config.scratch_path().exists());
    assert_eq!(report.quantize, QuantizeOutcome::Applied("none".to_string()));
    assert!(report.warnings.is_empty());
}

#[test]
fn test_empty_graph_has_known_digest() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert_eq!(report.digest.as_deref(), Some(EMPTY_SHA256));
    assert_eq!(
        fs::read_to_string(config.sidecar_path()).unwrap(),
        format!("{}\n", EMPTY_SHA256)
    );
}

#[test]
fn test_rerun_overwrites_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };

    let first = FakeExporter::writing(&[("model.onnx", b"first")]);
    ExportPipeline::new(&config, &hub, &first, &NoopQuantizer).run();
    fs::write(config.tokenizer_path().join("stale.txt"), b"old").unwrap();

    let second = FakeExporter::writing(&[("model.onnx", b"second run")]);
    let report = ExportPipeline::new(&config, &hub, &second, &NoopQuantizer).run();

    assert!(report.succeeded());
    assert_eq!(fs::read(config.graph_path()).unwrap(), b"second run");
    assert!(!config.tokenizer_path().join("stale.txt").exists());
    let verification = checksum::verify(&config.graph_path(), 8192).unwrap();
    assert!(verification.matches());
}

#[test]
fn test_load_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: true };
    let exporter = FakeExporter::writing(&[("model.onnx", b"graph")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert_eq!(report.exit_code(), EXIT_FAILURE);
    assert!(matches!(report.failure, Some(PipelineError::Load { .. })));
    assert!(!config.graph_path().exists());
    assert!(!config.sidecar_path().exists());
    assert!(!config.tokenizer_path().exists());
}

#[test]
fn test_export_failure_is_fatal_and_cleans_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };

    let report = ExportPipeline::new(&config, &hub, &FakeExporter::failing(), &NoopQuantizer).run();

    assert_eq!(report.exit_code(), EXIT_FAILURE);
    assert!(matches!(report.failure, Some(PipelineError::Export(_))));
    assert!(!config.graph_path().exists());
    assert!(!config.sidecar_path().exists());
    assert!(!config.scratch_path().exists());
}

#[test]
fn test_no_graph_produced_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("config.json", b"{}")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert_eq!(report.exit_code(), EXIT_FAILURE);
    assert!(!config.sidecar_path().exists());
    assert!(!config.scratch_path().exists());
}

#[test]
fn test_largest_graph_is_selected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[
        ("decoder_model.onnx", b"small"),
        ("decoder_with_past_model.onnx", b"the biggest graph"),
        ("nested/encoder.onnx", b"medium!"),
    ]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert!(report.succeeded());
    assert_eq!(fs::read(config.graph_path()).unwrap(), b"the biggest graph");
    assert_eq!(report.graph.unwrap().source_name, "decoder_with_past_model.onnx");
}

#[test]
fn test_tokenizer_failure_is_reported_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    fs::write(config.tokenizer_path(), b"not a directory").unwrap();
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"graph")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert_eq!(report.exit_code(), EXIT_SUCCESS);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.tokenizer_dir.is_none());
    assert!(config.sidecar_path().is_file());
}

#[test]
fn test_quantize_failure_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"full precision graph")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &FakeQuantizer::Fail).run();

    assert_eq!(report.exit_code(), EXIT_SUCCESS);
    assert!(report.warnings.is_empty());
    assert!(matches!(report.quantize, QuantizeOutcome::Skipped(_)));
    assert_eq!(fs::read(config.graph_path()).unwrap(), b"full precision graph");
}

#[test]
fn test_checksum_covers_quantized_graph() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"0123456789")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &FakeQuantizer::Halve).run();

    assert_eq!(report.quantize, QuantizeOutcome::Applied("fake-int8".to_string()));
    assert_eq!(fs::read(config.graph_path()).unwrap(), b"01234");
    assert!(checksum::verify(&config.graph_path(), 8192).unwrap().matches());
}

#[test]
fn test_quantize_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.quantize = false;
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"0123456789")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &FakeQuantizer::Halve).run();

    assert_eq!(report.quantize, QuantizeOutcome::Disabled);
    assert_eq!(fs::read(config.graph_path()).unwrap(), b"0123456789");
}

#[test]
fn test_unusable_output_dir_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("models");
    fs::write(&out, b"a file where the output dir should be").unwrap();
    let config = config(&out);
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"graph")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    assert_eq!(report.exit_code(), EXIT_FAILURE);
    assert!(matches!(report.failure, Some(PipelineError::Prepare { .. })));
    assert!(!exporter.ran.get());
    assert!(report.graph.is_none());
}

#[test]
fn test_checksum_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[("model.onnx", b"graph")]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &FakeQuantizer::DeleteGraph).run();

    assert_eq!(report.exit_code(), EXIT_FAILURE);
    assert!(matches!(report.failure, Some(PipelineError::Checksum { .. })));
    assert!(report.digest.is_none());
    assert!(!config.sidecar_path().exists());
}

#[test]
fn test_quantized_graph_reports_current_companions() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[
        ("model.onnx", b"0123456789"),
        ("model.onnx_data", b"fp32 weights"),
    ]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &FakeQuantizer::Halve).run();

    assert!(report.succeeded());
    let graph = report.graph.unwrap();
    assert!(graph.companions.is_empty());
    assert_eq!(graph.size, 5);
    assert!(!dir.path().join("model.onnx_data").exists());
}

#[test]
fn test_external_data_kept_without_quantization() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let hub = FakeHub { fail: false };
    let exporter = FakeExporter::writing(&[
        ("model.onnx", b"0123456789"),
        ("model.onnx_data", b"fp32 weights"),
    ]);

    let report = ExportPipeline::new(&config, &hub, &exporter, &NoopQuantizer).run();

    let graph = report.graph.unwrap();
    assert_eq!(graph.companions, vec![dir.path().join("model.onnx_data")]);
    assert_eq!(fs::read(dir.path().join("model.onnx_data")).unwrap(), b"fp32 weights");
}
