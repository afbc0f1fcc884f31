//! Body diff comparison
//!
//! Executes two independently-sourced HTTP requests, strips volatile paths
//! from both bodies, deep-compares them, and renders a grouped report on
//! mismatch. Array-element differences collapse under their containing
//! array's entry.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::compare::deep_equal;
use crate::error::{Error, Result};
use crate::http;
use crate::jsonpath::JsonPath;
use crate::kubectl::Kubectl;
use crate::spec::{BodyComparisonTest, ComparisonRequest, Source};
use crate::vars::VariableStore;

/// Run a body comparison test. `Ok` means the bodies agree after path
/// removal; a mismatch raises an expectation failure carrying the report.
pub async fn execute(
    test: &BodyComparisonTest,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<()> {
    let first = fetch(&test.first, vars, kubectl).await?;
    if let Some(delay) = test.delay_seconds {
        debug!(delay, "delaying before the second request");
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
    let second = fetch(&test.second, vars, kubectl).await?;

    match (first.json, second.json) {
        (Some(first), Some(second)) => compare_parsed(first, second, &test.remove_json_paths),
        _ => {
            // At least one body is not JSON; fall back to text equality.
            if first.body == second.body {
                Ok(())
            } else {
                Err(Error::Expectation(format!(
                    "response bodies differ and are not JSON ({} vs {} bytes)",
                    first.body.len(),
                    second.body.len()
                )))
            }
        }
    }
}

async fn fetch(
    request: &ComparisonRequest,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<http::HttpResponse> {
    let source = request.source.clone().unwrap_or_else(Source::default);
    source.validate()?;
    http::execute(&request.request, &source, vars, kubectl).await
}

/// Strip the configured paths from both documents, then deep-compare.
pub(crate) fn compare_parsed(
    mut first: Value,
    mut second: Value,
    remove_paths: &[String],
) -> Result<()> {
    for path in remove_paths {
        let parsed = JsonPath::parse(path)?;
        parsed.remove(&mut first);
        parsed.remove(&mut second);
    }

    if deep_equal(&first, &second) {
        return Ok(());
    }

    let mut entries = Vec::new();
    diff_values("$", &first, &second, &mut entries);
    Err(Error::Expectation(render_report(&entries)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone)]
struct DiffEntry {
    path: String,
    /// Containing array path, for grouped rendering.
    container: Option<String>,
    kind: DiffKind,
    first: Option<Value>,
    second: Option<Value>,
}

fn diff_values(path: &str, first: &Value, second: &Value, entries: &mut Vec<DiffEntry>) {
    match (first, second) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, value) in a {
                let child = format!("{path}.{key}");
                match b.get(key) {
                    Some(other) => diff_values(&child, value, other, entries),
                    None => entries.push(DiffEntry {
                        path: child,
                        container: None,
                        kind: DiffKind::Removed,
                        first: Some(value.clone()),
                        second: None,
                    }),
                }
            }
            for (key, value) in b {
                if !a.contains_key(key) {
                    entries.push(DiffEntry {
                        path: format!("{path}.{key}"),
                        container: None,
                        kind: DiffKind::Added,
                        first: None,
                        second: Some(value.clone()),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let shared = a.len().min(b.len());
            for index in 0..shared {
                let child = format!("{path}[{index}]");
                if !deep_equal(&a[index], &b[index]) {
                    entries.push(DiffEntry {
                        path: child,
                        container: Some(path.to_string()),
                        kind: DiffKind::Changed,
                        first: Some(a[index].clone()),
                        second: Some(b[index].clone()),
                    });
                }
            }
            for (index, value) in a.iter().enumerate().skip(shared) {
                entries.push(DiffEntry {
                    path: format!("{path}[{index}]"),
                    container: Some(path.to_string()),
                    kind: DiffKind::Removed,
                    first: Some(value.clone()),
                    second: None,
                });
            }
            for (index, value) in b.iter().enumerate().skip(shared) {
                entries.push(DiffEntry {
                    path: format!("{path}[{index}]"),
                    container: Some(path.to_string()),
                    kind: DiffKind::Added,
                    first: None,
                    second: Some(value.clone()),
                });
            }
        }
        _ if deep_equal(first, second) => {}
        _ => entries.push(DiffEntry {
            path: path.to_string(),
            container: None,
            kind: DiffKind::Changed,
            first: Some(first.clone()),
            second: Some(second.clone()),
        }),
    }
}

/// Human-readable report grouped by path; array-element entries render
/// indented under their containing array.
fn render_report(entries: &[DiffEntry]) -> String {
    let mut lines = vec![format!("bodies differ in {} place(s):", entries.len())];
    let mut last_container: Option<&str> = None;

    for entry in entries {
        match &entry.container {
            Some(container) => {
                if last_container != Some(container.as_str()) {
                    lines.push(format!("  {container} (array):"));
                    last_container = Some(container.as_str());
                }
                lines.push(format!("    {}", describe_entry(entry, true)));
            }
            None => {
                last_container = None;
                lines.push(format!("  {}", describe_entry(entry, false)));
            }
        }
    }

    lines.join("\n")
}

fn describe_entry(entry: &DiffEntry, in_container: bool) -> String {
    let location = if in_container {
        // Inside a grouped array, show only the element suffix.
        entry
            .path
            .rfind('[')
            .map(|at| entry.path[at..].to_string())
            .unwrap_or_else(|| entry.path.clone())
    } else {
        entry.path.clone()
    };
    match entry.kind {
        DiffKind::Added => format!(
            "{location} added: {}",
            entry.second.as_ref().map(Value::to_string).unwrap_or_default()
        ),
        DiffKind::Removed => format!(
            "{location} removed: {}",
            entry.first.as_ref().map(Value::to_string).unwrap_or_default()
        ),
        DiffKind::Changed => format!(
            "{location} changed: {} -> {}",
            entry.first.as_ref().map(Value::to_string).unwrap_or_default(),
            entry.second.as_ref().map(Value::to_string).unwrap_or_default()
        ),
    }
}
