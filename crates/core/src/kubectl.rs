//! kubectl subprocess boundary
//!
//! All cluster interaction goes through the kubectl binary; its JSON output
//! is the only contract. The binary must be present and authenticated.

use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::spec::Selector;

/// How long to wait for a port-forward tunnel to report readiness.
pub const FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between SIGTERM and a forceful kill of a tunnel process.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Captured output of a kubectl invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Thin wrapper around the kubectl binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

impl Kubectl {
    pub fn new() -> Self {
        Self {
            binary: std::env::var("PODCHECK_KUBECTL").unwrap_or_else(|_| "kubectl".to_string()),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    fn scope_args(namespace: Option<&str>, context: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(namespace) = namespace {
            args.push("-n".to_string());
            args.push(namespace.to_string());
        }
        if let Some(context) = context {
            args.push("--context".to_string());
            args.push(context.to_string());
        }
        args
    }

    async fn run(&self, args: &[String]) -> Result<ExecOutput> {
        debug!(binary = %self.binary, ?args, "invoking kubectl");
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Kubectl(format!("failed to spawn {}: {e}", self.binary)))?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Fetch the resource a selector addresses as parsed JSON. Selecting by
    /// labels resolves to the first match; multiple matches are a warning,
    /// not an error.
    pub async fn get_resource(&self, selector: &Selector) -> Result<Value> {
        let mut args = vec!["get".to_string(), selector.kind.to_ascii_lowercase()];
        let by_labels = selector.metadata.name.is_none();
        if let Some(name) = &selector.metadata.name {
            args.push(name.clone());
        } else {
            args.push("-l".to_string());
            args.push(selector.label_selector());
        }
        args.extend(Self::scope_args(
            selector.metadata.namespace.as_deref(),
            selector.context.as_deref(),
        ));
        args.push("-o".to_string());
        args.push("json".to_string());

        let output = self.run(&args).await?;
        if !output.success() {
            return Err(Error::Kubectl(format!(
                "get {} failed: {}",
                selector.describe(),
                output.stderr.trim()
            )));
        }

        let parsed: Value = serde_json::from_str(&output.stdout).map_err(|e| {
            Error::Kubectl(format!("get {} returned invalid JSON: {e}", selector.describe()))
        })?;

        if !by_labels {
            return Ok(parsed);
        }

        let items = parsed
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::Kubectl(format!("get {} returned no item list", selector.describe()))
            })?;
        match items.len() {
            0 => Err(Error::Kubectl(format!("no resource matches {}", selector.describe()))),
            1 => Ok(items[0].clone()),
            n => {
                warn!(
                    selector = %selector.describe(),
                    matches = n,
                    "label selector matches more than one resource; using the first"
                );
                Ok(items[0].clone())
            }
        }
    }

    /// Resolve the selector to a concrete pod name. Direct for pod kinds
    /// selected by name; first match for label selectors (a transient race
    /// when no pod matches yet).
    pub async fn resolve_pod_name(&self, selector: &Selector) -> Result<String> {
        if selector.is_pod_kind() {
            if let Some(name) = &selector.metadata.name {
                return Ok(name.clone());
            }
        }
        if selector.metadata.labels.is_empty() {
            return Err(Error::Kubectl(format!(
                "cannot resolve a pod from {}; select pods by name or by labels",
                selector.describe()
            )));
        }

        let pods = Selector {
            kind: "pod".to_string(),
            metadata: crate::spec::SelectorMetadata {
                namespace: selector.metadata.namespace.clone(),
                name: None,
                labels: selector.metadata.labels.clone(),
            },
            context: selector.context.clone(),
        };
        let pod = self.get_resource(&pods).await?;
        pod.get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Kubectl(format!("pod matching {} has no name", selector.describe()))
            })
    }

    /// Run a shell script inside a pod container via `kubectl exec`.
    pub async fn exec(
        &self,
        selector: &Selector,
        pod_name: &str,
        container: Option<&str>,
        script: &str,
    ) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string(), pod_name.to_string()];
        args.extend(Self::scope_args(
            selector.metadata.namespace.as_deref(),
            selector.context.as_deref(),
        ));
        if let Some(container) = container {
            args.push("-c".to_string());
            args.push(container.to_string());
        }
        args.push("--".to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(script.to_string());
        self.run(&args).await
    }

    /// Run a command in an ephemeral debug container attached to a pod.
    pub async fn debug(
        &self,
        selector: &Selector,
        pod_name: &str,
        image: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let mut args = vec!["debug".to_string(), pod_name.to_string()];
        args.extend(Self::scope_args(
            selector.metadata.namespace.as_deref(),
            selector.context.as_deref(),
        ));
        args.push(format!("--image={image}"));
        args.push("--quiet".to_string());
        args.push("--attach".to_string());
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        self.run(&args).await
    }

    /// Spawn a background `kubectl port-forward` tunnel. The caller must
    /// await [`PortForward::wait_ready`] before use and call
    /// [`PortForward::stop`] on every exit path.
    pub fn port_forward(
        &self,
        selector: &Selector,
        target: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<PortForward> {
        let mut args = vec![
            "port-forward".to_string(),
            target.to_string(),
            format!("{local_port}:{remote_port}"),
        ];
        args.extend(Self::scope_args(
            selector.metadata.namespace.as_deref(),
            selector.context.as_deref(),
        ));

        debug!(%target, local_port, remote_port, "spawning port-forward");
        let mut cmd = self.command();
        cmd.args(&args).kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| Error::Kubectl(format!("failed to spawn {} port-forward: {e}", self.binary)))?;

        Ok(PortForward {
            child,
            target: target.to_string(),
            local_port,
        })
    }
}

/// Handle to a background port-forward tunnel.
pub struct PortForward {
    child: Child,
    target: String,
    pub local_port: u16,
}

impl PortForward {
    /// Wait for the forwarding-ready line on stdout or stderr, up to the
    /// given deadline. Early process exit is a transport error.
    pub async fn wait_ready(&mut self, ready_timeout: Duration) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<String>(16);

        if let Some(stdout) = self.child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = self.child.stderr.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let deadline = tokio::time::Instant::now() + ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, rx.recv()).await {
                Ok(Some(line)) => {
                    debug!(%line, "port-forward output");
                    if line.contains("Forwarding from") {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    return Err(Error::Transport(format!(
                        "port-forward to {} exited before becoming ready",
                        self.target
                    )));
                }
                Err(_) => {
                    return Err(Error::Transport(format!(
                        "port-forward to {} did not become ready within {}s",
                        self.target,
                        ready_timeout.as_secs()
                    )));
                }
            }
        }
    }

    /// Terminate the tunnel: SIGTERM, a short grace period, then a forceful
    /// kill. Failures are logged, never escalated, so they cannot mask the
    /// owning test's result.
    pub async fn stop(mut self) {
        #[cfg(unix)]
        if let Some(id) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
            match timeout(STOP_GRACE, self.child.wait()).await {
                Ok(_) => return,
                Err(_) => warn!(target = %self.target, "port-forward ignored SIGTERM; killing"),
            }
        }
        if let Err(e) = self.child.kill().await {
            warn!(target = %self.target, error = %e, "failed to kill port-forward");
        }
    }
}
