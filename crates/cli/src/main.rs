//! podcheck CLI - Main Entry Point
//!
//! Loads a YAML file of test definitions, runs them sequentially, renders
//! the outcomes, and exits non-zero when any test failed.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use podcheck_core::{spec, Kubectl, TestRunner};

mod output;

/// podcheck - declarative tests for HTTP endpoints, commands, and Kubernetes
#[derive(Parser)]
#[command(name = "podcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML file with one test definition or an ordered list
    file: PathBuf,

    /// Seed a variable before the run (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Write the captured variable snapshot to this file as JSON
    #[arg(long, value_name = "PATH")]
    export_vars: Option<PathBuf>,

    /// kubectl binary to use
    #[arg(long, default_value = "kubectl", env = "PODCHECK_KUBECTL")]
    kubectl_bin: String,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let definitions = spec::from_file(&cli.file)
        .with_context(|| format!("failed to load {}", cli.file.display()))?;

    let mut runner = TestRunner::with_kubectl(Kubectl::with_binary(&cli.kubectl_bin));
    for entry in &cli.vars {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("--var '{entry}' is not NAME=VALUE"))?;
        runner.vars_mut().set(name, value);
    }

    let result = runner.run_all(&definitions).await;
    output::print_results(&result, cli.format);

    if let Some(path) = &cli.export_vars {
        let snapshot = runner.variable_snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        output::print_info(&format!(
            "wrote {} captured variable(s) to {}",
            snapshot.len(),
            path.display()
        ));
    }

    if result.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
