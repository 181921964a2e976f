use std::time::Duration;
use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};

use crate::checksum::Verification;
use crate::pipeline::{PipelineReport, QuantizeOutcome};

/// Prints a warning in the `[WARN]` style, with an optional indented hint.
pub fn warn(message: &str, hint: Option<&str>) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), message);
    if let Some(hint) = hint {
        eprintln!("       {}", hint.bright_black());
    }
}

/// Spinner for steps with no measurable progress.
pub fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {wide_msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    pb
}

/// Byte counter for streaming work over a file of `total` bytes.
pub fn byte_progress(total: u64, prefix: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_prefix(prefix);
    pb
}

/// Human readable byte size
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

fn header(label: &str) -> Cell {
    Cell::new(label).fg(comfy_table::Color::Cyan).add_attribute(Attribute::Bold)
}

/// Table of the artifacts a successful run produced.
pub fn summary_table(report: &PipelineReport) -> Table {
    let mut table = Table::new();
    table
        .set_header(vec![header("Artifact"), header("Location"), header("Details")])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    if let Some(graph) = &report.graph {
        table.add_row(vec![
            Cell::new("Graph").fg(comfy_table::Color::Yellow),
            Cell::new(graph.path.display()).fg(comfy_table::Color::Green),
            Cell::new(format!("{} from {} ({})", format_size(graph.size), graph.source_name, report.exporter))
                .fg(comfy_table::Color::Blue),
        ]);
        for companion in &graph.companions {
            table.add_row(vec![
                Cell::new("External data").fg(comfy_table::Color::Yellow),
                Cell::new(companion.display()).fg(comfy_table::Color::Green),
                Cell::new(""),
            ]);
        }
    }

    let quantization = match &report.quantize {
        QuantizeOutcome::Disabled => "disabled".to_string(),
        QuantizeOutcome::Applied(name) => format!("int8 via {}", name),
        QuantizeOutcome::Skipped(_) => "skipped".to_string(),
    };
    table.add_row(vec![
        Cell::new("Quantization").fg(comfy_table::Color::Yellow),
        Cell::new(""),
        Cell::new(quantization).fg(comfy_table::Color::Magenta),
    ]);

    if let (Some(sidecar), Some(digest)) = (&report.sidecar, &report.digest) {
        table.add_row(vec![
            Cell::new("SHA256").fg(comfy_table::Color::Yellow),
            Cell::new(sidecar.display()).fg(comfy_table::Color::Green),
            Cell::new(digest).fg(comfy_table::Color::DarkGrey),
        ]);
    }

    match &report.tokenizer_dir {
        Some(dir) => table.add_row(vec![
            Cell::new("Tokenizer").fg(comfy_table::Color::Yellow),
            Cell::new(dir.display()).fg(comfy_table::Color::Green),
            Cell::new("saved").set_alignment(CellAlignment::Center),
        ]),
        None => table.add_row(vec![
            Cell::new("Tokenizer").fg(comfy_table::Color::Yellow),
            Cell::new(""),
            Cell::new("not saved").fg(comfy_table::Color::Red).set_alignment(CellAlignment::Center),
        ]),
    };

    table
}

/// Final console output of a run.
pub fn print_report(report: &PipelineReport) {
    if !report.succeeded() {
        // The failure itself was already printed when it happened
        println!("{}", format!("Export of {} failed", report.model_id).red());
        return;
    }

    println!("\n{}", summary_table(report));
    if let Some(graph) = &report.graph {
        println!("{} {}", "OK - Exported:".bright_green(), graph.path.display());
    }
    if let Some(digest) = &report.digest {
        println!("SHA256: {}", digest);
    }
    if let Some(dir) = &report.tokenizer_dir {
        println!("Tokenizer saved at: {}", dir.display());
    }
    if !report.warnings.is_empty() {
        println!(
            "{}",
            format!(
                "Finished with {} warning{}",
                report.warnings.len(),
                if report.warnings.len() == 1 { "" } else { "s" }
            ).yellow()
        );
    }
}

/// Console output of `--verify`.
pub fn print_verification(path: &std::path::Path, verification: &Verification) {
    if verification.matches() {
        println!("{} {}", "OK".bright_green(), path.display());
        println!("SHA256: {}", verification.actual);
    } else {
        println!("{} {}", "MISMATCH".red().bold(), path.display());
        println!("  expected: {}", verification.expected);
        println!("  actual:   {}", verification.actual);
    }
}
