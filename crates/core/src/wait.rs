//! Wait poller
//!
//! Bounded-retry polling state machine: fetch the target resource, extract
//! a value by path, check it against an optional expectation, and either
//! return on the first satisfying observation or give up on the deadline or
//! the retry ceiling. Fetch failures are transient and loop back to
//! polling.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::compare::{compare, render_value};
use crate::error::{Error, Result};
use crate::jsonpath::JsonPath;
use crate::kubectl::Kubectl;
use crate::spec::WaitTest;

/// A satisfied wait: the value the configured path extracted (if any) and
/// how many observations it took.
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    pub extracted: Option<String>,
    pub attempts: u32,
}

enum Observation {
    Satisfied(Option<String>),
    NotYet(String),
    Fatal(Error),
}

/// Poll the resource the test's selector addresses.
pub async fn execute(test: &WaitTest, kubectl: &Kubectl) -> Result<WaitOutcome> {
    poll(test, || kubectl.get_resource(&test.selector)).await
}

/// The poller itself, generic over the fetch so the state machine is
/// testable without a cluster.
pub(crate) async fn poll<F, Fut>(test: &WaitTest, mut fetch: F) -> Result<WaitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(test.timeout_seconds);
    let interval = Duration::from_secs(test.interval_seconds);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match observe(test, fetch().await) {
            Observation::Satisfied(extracted) => {
                debug!(attempts, "wait condition satisfied");
                return Ok(WaitOutcome { extracted, attempts });
            }
            Observation::Fatal(error) => return Err(error),
            Observation::NotYet(reason) => {
                debug!(attempts, %reason, "wait condition not yet satisfied");
            }
        }

        if let Some(max_retries) = test.max_retries {
            if attempts > max_retries {
                return Err(Error::RetriesExhausted {
                    attempts,
                    what: describe(test),
                });
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::WaitTimeout {
                seconds: test.timeout_seconds,
                what: describe(test),
            });
        }

        tokio::time::sleep(interval).await;

        if tokio::time::Instant::now() >= deadline {
            return Err(Error::WaitTimeout {
                seconds: test.timeout_seconds,
                what: describe(test),
            });
        }
    }
}

fn observe(test: &WaitTest, fetched: Result<Value>) -> Observation {
    let resource = match fetched {
        Ok(resource) => resource,
        // Transient: the resource may simply not exist yet.
        Err(error) => return Observation::NotYet(format!("fetch failed: {error}")),
    };

    let Some(path) = &test.json_path else {
        // Without a path the check degrades to "resource exists".
        return Observation::Satisfied(None);
    };

    let value = match select_with_fallback(path, &resource) {
        Ok(value) => value,
        Err(error) => return Observation::Fatal(error),
    };
    let Some(value) = value else {
        return Observation::NotYet(format!("'{path}' has no match yet"));
    };
    if value.is_null() {
        return Observation::NotYet(format!("'{path}' is null"));
    }

    let text = render_value(value);
    match &test.json_path_expectation {
        None if text.is_empty() => Observation::NotYet(format!("'{path}' is empty")),
        None => Observation::Satisfied(Some(text)),
        Some(expectation) => match compare(Some(value), expectation) {
            Ok(()) => Observation::Satisfied(Some(text)),
            Err(error) if error.is_config() => Observation::Fatal(error),
            // A comparator mismatch means "not yet", not failure.
            Err(error) => Observation::NotYet(error.to_string()),
        },
    }
}

/// Evaluate the configured path, falling back to a `$.`-prefixed variant
/// for paths written without the root marker.
fn select_with_fallback<'a>(path: &str, resource: &'a Value) -> Result<Option<&'a Value>> {
    let primary = JsonPath::parse(path);
    if let Ok(parsed) = &primary {
        if let Some(value) = parsed.select(resource).first().copied() {
            return Ok(Some(value));
        }
    }
    if !path.trim_start().starts_with('$') {
        let prefixed = format!("$.{}", path.trim_start().trim_start_matches('.'));
        if let Ok(parsed) = JsonPath::parse(&prefixed) {
            if let Some(value) = parsed.select(resource).first().copied() {
                return Ok(Some(value));
            }
            return Ok(None);
        }
    }
    match primary {
        Ok(_) => Ok(None),
        Err(error) => Err(error),
    }
}

fn describe(test: &WaitTest) -> String {
    let mut what = test.selector.describe();
    if let Some(path) = &test.json_path {
        what.push_str(&format!(" at '{path}'"));
    }
    if let Some(expectation) = &test.json_path_expectation {
        what.push_str(&format!(
            " to {} {}",
            expectation.comparator,
            expectation
                .value
                .as_ref()
                .map(render_value)
                .unwrap_or_default()
        ));
    }
    what
}
