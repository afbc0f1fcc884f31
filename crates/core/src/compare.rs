//! Comparator engine
//!
//! Evaluates one [`Comparison`] against an observed value. Deterministic and
//! side-effect free; negation applies to the final boolean, after the raw
//! comparator result.

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::spec::{Comparator, Comparison};

/// Evaluate a comparison against an observed value. `None` means the value
/// was absent, which only `exists` (and negated comparators) can accept.
pub fn compare(actual: Option<&Value>, comparison: &Comparison) -> Result<()> {
    let raw = raw_result(actual, comparison)?;
    let passed = if comparison.negate { !raw } else { raw };
    trace!(
        comparator = comparison.comparator.as_str(),
        negate = comparison.negate,
        passed,
        "comparison evaluated"
    );
    if passed {
        return Ok(());
    }
    Err(Error::Expectation(failure_message(actual, comparison)))
}

fn raw_result(actual: Option<&Value>, comparison: &Comparison) -> Result<bool> {
    if comparison.comparator == Comparator::Exists {
        return Ok(matches!(actual, Some(value) if !value.is_null()));
    }

    let expected = comparison.value.as_ref().ok_or_else(|| {
        Error::InvalidDefinition(format!(
            "comparator '{}' requires a value",
            comparison.comparator
        ))
    })?;

    let Some(actual) = actual else {
        return Ok(false);
    };

    match comparison.comparator {
        Comparator::Exists => unreachable!("handled above"),
        Comparator::Equals => Ok(deep_equal(actual, expected)),
        Comparator::Contains => {
            let haystack = render_value(actual);
            let needle = render_value(expected);
            if comparison.matchword {
                let pattern = format!(r"\b{}\b", regex::escape(&needle));
                let re = Regex::new(&pattern).map_err(|source| Error::InvalidRegex {
                    pattern,
                    source,
                })?;
                Ok(re.is_match(&haystack))
            } else {
                Ok(haystack.contains(&needle))
            }
        }
        Comparator::Matches => {
            let pattern = render_value(expected);
            let re = Regex::new(&pattern).map_err(|source| Error::InvalidRegex {
                pattern,
                source,
            })?;
            Ok(re.is_match(&render_value(actual)))
        }
        Comparator::GreaterThan | Comparator::LessThan => {
            let left = as_f64(actual).ok_or_else(|| {
                Error::Expectation(format!(
                    "cannot compare non-numeric value {} with '{}'",
                    render_value(actual),
                    comparison.comparator
                ))
            })?;
            let right = as_f64(expected).ok_or_else(|| {
                Error::Expectation(format!(
                    "cannot compare against non-numeric value {} with '{}'",
                    render_value(expected),
                    comparison.comparator
                ))
            })?;
            Ok(match comparison.comparator {
                Comparator::GreaterThan => left > right,
                _ => left < right,
            })
        }
    }
}

/// Structural deep equality: arrays element-wise and length-equal, mappings
/// by key set and recursive values, numbers by numeric value. An array never
/// equals a non-array.
pub(crate) fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| deep_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| deep_equal(value, other)))
        }
        _ => a == b,
    }
}

/// Textual rendering: strings pass through, everything else is canonically
/// JSON-serialized.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn failure_message(actual: Option<&Value>, comparison: &Comparison) -> String {
    let negation = if comparison.negate { "not " } else { "" };
    let observed = actual.map_or_else(|| "<absent>".to_string(), render_value);
    match (&comparison.comparator, &comparison.value) {
        (Comparator::Exists, _) => {
            format!("expected value to {negation}exist, observed {observed}")
        }
        (comparator, Some(expected)) => format!(
            "expected {negation}{comparator} {}, observed {observed}",
            render_value(expected)
        ),
        (comparator, None) => format!("expected {negation}{comparator}, observed {observed}"),
    }
}
