//! Test runner: dispatch and orchestration
//!
//! One definition executes as a boolean-or-error call; a batch executes
//! sequentially, fail-fast, with per-test retries and aggregate counts.
//! The runner owns the variable store and threads it through every step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::command;
use crate::diff;
use crate::error::Result;
use crate::expect;
use crate::extract::{self, CaptureSource};
use crate::http;
use crate::kubectl::Kubectl;
use crate::spec::{TestDefinition, TestKind};
use crate::vars::VariableStore;
use crate::wait;

/// Pause between retry attempts of one definition.
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Outcome of a single definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub skipped: bool,
}

/// Aggregate result of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<TestOutcome>,
}

/// Executes test definitions and owns the cross-step variable store.
pub struct TestRunner {
    kubectl: Kubectl,
    vars: VariableStore,
    retry_pause: Duration,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_kubectl(Kubectl::new())
    }

    pub fn with_kubectl(kubectl: Kubectl) -> Self {
        Self {
            kubectl,
            vars: VariableStore::new(),
            retry_pause: RETRY_PAUSE,
        }
    }

    /// Shorten the retry pause, for tests.
    #[cfg(test)]
    pub(crate) fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn vars(&self) -> &VariableStore {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VariableStore {
        &mut self.vars
    }

    /// Snapshot of the captured variables, for export collaborators.
    pub fn variable_snapshot(&self) -> BTreeMap<String, String> {
        self.vars.snapshot()
    }

    pub fn clear_variables(&mut self) {
        self.vars.clear();
    }

    /// Execute one definition: run, validate, capture. A single attempt;
    /// retry policy lives in [`TestRunner::run_all`].
    pub async fn execute(&mut self, definition: &TestDefinition) -> Result<()> {
        match &definition.kind {
            TestKind::Http(test) => {
                let response =
                    http::execute(test, &definition.source, &self.vars, &self.kubectl).await?;
                if let Some(expectations) = &definition.expect {
                    expect::validate_http(expectations, &response)?;
                }
                if !definition.set_vars.is_empty() {
                    extract::run(
                        &definition.set_vars,
                        &CaptureSource::Http(&response),
                        &mut self.vars,
                    )?;
                }
                Ok(())
            }
            TestKind::Command(test) => {
                let output =
                    command::execute(test, &definition.source, &self.vars, &self.kubectl).await?;
                if let Some(expectations) = &definition.expect {
                    expect::validate_command(expectations, &output)?;
                }
                if !definition.set_vars.is_empty() {
                    extract::run(
                        &definition.set_vars,
                        &CaptureSource::Command(&output),
                        &mut self.vars,
                    )?;
                }
                Ok(())
            }
            TestKind::Wait(test) => {
                let outcome = wait::execute(test, &self.kubectl).await?;
                if !definition.set_vars.is_empty() {
                    extract::run(
                        &definition.set_vars,
                        &CaptureSource::Wait {
                            value: outcome.extracted.as_deref(),
                        },
                        &mut self.vars,
                    )?;
                }
                Ok(())
            }
            TestKind::BodyComparison(test) => {
                diff::execute(test, &self.vars, &self.kubectl).await
            }
        }
    }

    /// Run a batch sequentially. The first definition whose final attempt
    /// fails stops the run; everything after it is reported skipped and
    /// never executed.
    pub async fn run_all(&mut self, definitions: &[TestDefinition]) -> RunResult {
        let mut results = Vec::with_capacity(definitions.len());
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut halted = false;

        info!("running {} test(s)...", definitions.len());

        for definition in definitions {
            if halted {
                skipped += 1;
                results.push(TestOutcome {
                    name: definition.label(),
                    passed: false,
                    error: None,
                    duration_ms: 0,
                    attempts: 0,
                    skipped: true,
                });
                continue;
            }

            let outcome = self.run_with_retries(definition).await;
            if outcome.passed {
                passed += 1;
                info!("✓ {} ({} ms)", outcome.name, outcome.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    outcome.name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                halted = true;
            }
            results.push(outcome);
        }

        info!(
            "test results: {} passed, {} failed, {} skipped",
            passed, failed, skipped
        );

        RunResult {
            total: definitions.len(),
            passed,
            failed,
            skipped,
            results,
        }
    }

    async fn run_with_retries(&mut self, definition: &TestDefinition) -> TestOutcome {
        let name = definition.label();
        let start = Instant::now();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts <= definition.retries {
            attempts += 1;
            match self.execute(definition).await {
                Ok(()) => {
                    return TestOutcome {
                        name,
                        passed: true,
                        error: None,
                        duration_ms: start.elapsed().as_millis() as u64,
                        attempts,
                        skipped: false,
                    }
                }
                Err(e) => {
                    if e.is_config() {
                        // Configuration errors are never retried.
                        last_error = Some(e);
                        break;
                    }
                    if attempts <= definition.retries {
                        warn!(
                            "attempt {}/{} of '{}' failed: {}; retrying",
                            attempts,
                            definition.retries + 1,
                            name,
                            e
                        );
                        tokio::time::sleep(self.retry_pause).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        TestOutcome {
            name,
            passed: false,
            error: last_error.map(|e| e.to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
            attempts,
            skipped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::from_yaml;

    fn runner() -> TestRunner {
        TestRunner::new().with_retry_pause(Duration::from_millis(1))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fail_fast_skips_the_remainder() {
        let yaml = r#"
- name: first
  command:
    cmd: "true"
  expect:
    exitCode: 0
- name: second
  command:
    cmd: "false"
  expect:
    exitCode: 0
- name: third
  command:
    cmd: "true"
  expect:
    exitCode: 0
- name: fourth
  command:
    cmd: "true"
  expect:
    exitCode: 0
"#;
        let definitions = from_yaml(yaml).unwrap();
        let result = runner().run_all(&definitions).await;

        assert_eq!(result.total, 4);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 2);
        assert!(result.results[0].passed);
        assert!(!result.results[1].passed);
        for outcome in &result.results[2..] {
            assert!(outcome.skipped);
            assert_eq!(outcome.attempts, 0);
            assert!(outcome.error.is_none());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn retry_accounting() {
        let always_fails = from_yaml(
            r#"
name: flappy
command:
  cmd: "false"
expect:
  exitCode: 0
retries: 2
"#,
        )
        .unwrap();
        let result = runner().run_all(&always_fails).await;
        assert_eq!(result.results[0].attempts, 3);
        assert!(!result.results[0].passed);

        let succeeds = from_yaml(
            r#"
name: steady
command:
  cmd: "true"
expect:
  exitCode: 0
retries: 5
"#,
        )
        .unwrap();
        let result = runner().run_all(&succeeds).await;
        assert_eq!(result.results[0].attempts, 1);
        assert!(result.results[0].passed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let definitions = from_yaml(
            r#"
name: bad-capture
command:
  cmd: echo hi
expect:
  exitCode: 0
setVars:
  H:
    header: X-Nope
retries: 4
"#,
        )
        .unwrap();
        let result = runner().run_all(&definitions).await;
        assert_eq!(result.results[0].attempts, 1);
        let message = result.results[0].error.as_deref().unwrap();
        assert!(message.contains("cannot capture"), "{message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captured_values_flow_into_later_steps() {
        let yaml = r#"
- name: produce
  command:
    cmd: echo '{"id": 42}'
    parseJson: true
  expect:
    exitCode: 0
  setVars:
    ITEM_ID:
      jsonPath: "$.id"
- name: consume
  command:
    cmd: test "$ITEM_ID" = "42"
  expect:
    exitCode: 0
"#;
        let definitions = from_yaml(yaml).unwrap();
        let mut runner = runner();
        let result = runner.run_all(&definitions).await;
        assert_eq!(result.failed, 0, "{:?}", result.results);
        assert_eq!(runner.vars().get("ITEM_ID"), Some("42"));

        runner.clear_variables();
        assert!(runner.variable_snapshot().is_empty());
    }
}
