//! Value extraction ("setVars")
//!
//! Runs only after a passing validation. Rules apply in document order;
//! the first failing rule aborts the rest of its block, and values already
//! published by earlier rules stay published. That is a documented
//! limitation, not a transactional guarantee.

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::command::CommandOutput;
use crate::compare::render_value;
use crate::error::{Error, Result};
use crate::http::HttpResponse;
use crate::jsonpath::JsonPath;
use crate::spec::{ExtractionRule, RegexRule, RegexSource, SetVars};
use crate::vars::VariableStore;

/// The result a capture block reads from, by test kind.
pub enum CaptureSource<'a> {
    Http(&'a HttpResponse),
    Command(&'a CommandOutput),
    Wait { value: Option<&'a str> },
}

impl CaptureSource<'_> {
    fn kind_name(&self) -> &'static str {
        match self {
            CaptureSource::Http(_) => "http",
            CaptureSource::Command(_) => "command",
            CaptureSource::Wait { .. } => "wait",
        }
    }
}

/// Apply a capture block, publishing each extracted value into the store.
pub fn run(rules: &SetVars, source: &CaptureSource<'_>, vars: &mut VariableStore) -> Result<()> {
    for (name, rule) in rules.iter() {
        let value = extract_one(rule, source)?;
        vars.set(name, &value);
        debug!(name = %name, rule = rule.name(), "published captured value");
    }
    Ok(())
}

fn extract_one(rule: &ExtractionRule, source: &CaptureSource<'_>) -> Result<String> {
    let invalid = || Error::InvalidCaptureSource {
        rule: rule.name(),
        kind: source.kind_name(),
    };

    match (rule, source) {
        (ExtractionRule::JsonPath(path), CaptureSource::Http(response)) => {
            let body = response.json.as_ref().ok_or_else(|| {
                Error::Extraction(format!(
                    "jsonPath '{path}' needs a JSON response body, got {} bytes of non-JSON",
                    response.body.len()
                ))
            })?;
            select_path(path, body)
        }
        (ExtractionRule::JsonPath(path), CaptureSource::Command(output)) => {
            let json = output.json.as_ref().ok_or_else(|| {
                Error::Extraction(format!(
                    "jsonPath '{path}' needs parseJson on the command test{}",
                    output
                        .json_parse_error
                        .as_ref()
                        .map(|e| format!(" (stdout did not parse: {e})"))
                        .unwrap_or_default()
                ))
            })?;
            select_path(path, json)
        }

        (ExtractionRule::Header(name), CaptureSource::Http(response)) => response
            .header(name)
            .map(str::to_string)
            .ok_or_else(|| Error::Extraction(format!("header '{name}' not present in response"))),

        (ExtractionRule::StatusCode, CaptureSource::Http(response)) => {
            Ok(response.status.to_string())
        }
        (ExtractionRule::Body, CaptureSource::Http(response)) => Ok(response.body.clone()),

        (ExtractionRule::Stdout, CaptureSource::Command(output)) => Ok(output.stdout.clone()),
        (ExtractionRule::Stderr, CaptureSource::Command(output)) => Ok(output.stderr.clone()),
        (ExtractionRule::ExitCode, CaptureSource::Command(output)) => {
            Ok(output.exit_code.to_string())
        }

        (ExtractionRule::Value, CaptureSource::Wait { value }) => value
            .map(str::to_string)
            .ok_or_else(|| Error::Extraction("wait test produced no extracted value".to_string())),

        (ExtractionRule::Regex(rule), CaptureSource::Http(response)) => {
            if matches!(rule.source, Some(RegexSource::Stdout) | Some(RegexSource::Stderr)) {
                return Err(Error::Extraction(
                    "regex source stdout/stderr is not valid for an http test".to_string(),
                ));
            }
            apply_regex(rule, &response.body)
        }
        (ExtractionRule::Regex(rule), CaptureSource::Command(output)) => {
            let text = match rule.source {
                Some(RegexSource::Stderr) => &output.stderr,
                Some(RegexSource::Body) => {
                    return Err(Error::Extraction(
                        "regex source body is not valid for a command test".to_string(),
                    ))
                }
                _ => &output.stdout,
            };
            apply_regex(rule, text)
        }

        _ => Err(invalid()),
    }
}

/// Exactly one match yields the scalar; several yield the serialized match
/// array; none is fatal.
fn select_path(path: &str, document: &Value) -> Result<String> {
    let parsed = JsonPath::parse(path)?;
    let matches = parsed.select(document);
    match matches.as_slice() {
        [] => Err(Error::NoResults(path.to_string())),
        [single] => Ok(render_value(single)),
        many => Ok(serde_json::to_string(&many.iter().copied().collect::<Vec<_>>())?),
    }
}

fn apply_regex(rule: &RegexRule, text: &str) -> Result<String> {
    let re = Regex::new(&rule.pattern).map_err(|source| Error::InvalidRegex {
        pattern: rule.pattern.clone(),
        source,
    })?;
    let captures = re
        .captures(text)
        .ok_or_else(|| Error::Extraction(format!("regex '{}' did not match", rule.pattern)))?;
    let group = rule.group.unwrap_or(1);
    captures
        .get(group)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            Error::Extraction(format!(
                "regex '{}' has no capture group {group}",
                rule.pattern
            ))
        })
}
