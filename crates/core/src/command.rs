//! Command execution strategies
//!
//! Runs a shell command locally or inside a pod. Each invocation gets its
//! own environment snapshot derived from the variable store at call time;
//! an `export` inside one command therefore never leaks into the next one.

use serde_json::Value;
use std::process::Stdio;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::kubectl::Kubectl;
use crate::spec::{CommandTest, PodSource, Source};
use crate::vars::VariableStore;

/// Captured result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Parsed stdout, when `parseJson` was requested and parsing succeeded.
    pub json: Option<Value>,
    /// The parse failure, recorded instead of raised.
    pub json_parse_error: Option<String>,
}

/// Execute a command test against its source.
pub async fn execute(
    test: &CommandTest,
    source: &Source,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<CommandOutput> {
    let mut output = match source {
        Source::Local(_) => run_local(test, vars).await?,
        Source::Pod(pod) => run_in_pod(test, pod, vars, kubectl).await?,
    };

    if test.parse_json {
        match serde_json::from_str(output.stdout.trim()) {
            Ok(value) => output.json = Some(value),
            Err(e) => output.json_parse_error = Some(e.to_string()),
        }
    }

    Ok(output)
}

async fn run_local(test: &CommandTest, vars: &VariableStore) -> Result<CommandOutput> {
    let (shell, flag) = local_shell(test);
    debug!(%shell, cmd = %test.cmd, "running local command");

    let mut command = tokio::process::Command::new(shell);
    command
        .arg(flag)
        .arg(&test.cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (name, value) in vars.snapshot() {
        command.env(name, value);
    }
    for (name, value) in &test.env {
        command.env(name, vars.interpolate(value));
    }
    if let Some(dir) = &test.working_dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .map_err(|e| Error::Transport(format!("failed to spawn '{}': {e}", test.cmd)))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
        json: None,
        json_parse_error: None,
    })
}

fn local_shell(test: &CommandTest) -> (String, &'static str) {
    match &test.shell {
        Some(shell) => (shell.clone(), "-c"),
        #[cfg(windows)]
        None => ("cmd".to_string(), "/C"),
        #[cfg(not(windows))]
        None => ("sh".to_string(), "-c"),
    }
}

async fn run_in_pod(
    test: &CommandTest,
    pod: &PodSource,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<CommandOutput> {
    let pod_name = kubectl.resolve_pod_name(&pod.selector).await?;
    let script = build_pod_script(test, vars);

    debug!(%pod_name, "running command via exec");
    let output = kubectl
        .exec(&pod.selector, &pod_name, pod.container.as_deref(), &script)
        .await?;

    Ok(CommandOutput {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        json: None,
        json_parse_error: None,
    })
}

/// Build the in-pod script: optional `cd`, exported variables as
/// single-quoted assignments, then the command with stderr folded into
/// stdout.
fn build_pod_script(test: &CommandTest, vars: &VariableStore) -> String {
    let mut script = String::new();
    if let Some(dir) = &test.working_dir {
        script.push_str(&format!("cd {} && ", shell_quote(&dir.to_string_lossy())));
    }
    // Snapshot of the store at call time; exports die with the subprocess.
    for (name, value) in vars.iter() {
        if !is_valid_var_name(name) {
            warn!(name = %name, "skipping captured variable with a non-exportable name");
            continue;
        }
        script.push_str(&format!("export {name}={} && ", shell_quote(value)));
    }
    for (name, value) in &test.env {
        if !is_valid_var_name(name) {
            warn!(name = %name, "skipping env entry with a non-exportable name");
            continue;
        }
        script.push_str(&format!(
            "export {name}={} && ",
            shell_quote(&vars.interpolate(value))
        ));
    }
    script.push_str(&format!("{} 2>&1", test.cmd));
    script
}

/// Single-quote a string for safe inlining in a shell word, escaping inner
/// single quotes with the POSIX `'\''` idiom.
pub(crate) fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
