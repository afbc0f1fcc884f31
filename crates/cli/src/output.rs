//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use podcheck_core::{RunResult, TestOutcome};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Render a run's outcomes.
pub fn print_results(result: &RunResult, format: OutputFormat) {
    match format {
        OutputFormat::Table => print_table(result),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
        }
    }
}

fn print_table(result: &RunResult) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["Test", "Result", "Attempts", "Duration", "Error"]);
    for outcome in &result.results {
        table.add_row(vec![
            outcome.name.clone(),
            status_label(outcome),
            outcome.attempts.to_string(),
            format!("{} ms", outcome.duration_ms),
            outcome.error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");

    let summary = format!(
        "{} total, {} passed, {} failed, {} skipped",
        result.total, result.passed, result.failed, result.skipped
    );
    if result.failed > 0 {
        print_error(&summary);
    } else {
        print_success(&summary);
    }
}

fn status_label(outcome: &TestOutcome) -> String {
    if outcome.skipped {
        "SKIP".yellow().to_string()
    } else if outcome.passed {
        "PASS".green().to_string()
    } else {
        "FAIL".red().to_string()
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, passed: bool, skipped: bool) -> TestOutcome {
        TestOutcome {
            name: name.to_string(),
            passed,
            error: (!passed && !skipped).then(|| "expectation failed".to_string()),
            duration_ms: 12,
            attempts: u32::from(!skipped),
            skipped,
        }
    }

    #[test]
    fn status_labels_cover_all_states() {
        assert!(status_label(&outcome("a", true, false)).contains("PASS"));
        assert!(status_label(&outcome("b", false, false)).contains("FAIL"));
        assert!(status_label(&outcome("c", false, true)).contains("SKIP"));
    }

    #[test]
    fn results_render_in_both_formats() {
        let result = RunResult {
            total: 2,
            passed: 1,
            failed: 1,
            skipped: 0,
            results: vec![outcome("a", true, false), outcome("b", false, false)],
        };
        print_results(&result, OutputFormat::Table);
        print_results(&result, OutputFormat::Json);
    }
}
