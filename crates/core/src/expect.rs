//! Expectation-set evaluation
//!
//! Applies an `expect` block to an HTTP response or command output, leaf by
//! leaf, through the comparator engine. The first failing leaf wins and its
//! message is prefixed with the field it belongs to.

use serde_json::Value;

use crate::command::CommandOutput;
use crate::compare::compare;
use crate::error::{Error, Result};
use crate::http::HttpResponse;
use crate::jsonpath::JsonPath;
use crate::spec::{Comparator, Comparison, Expect, JsonPathExpectation};

/// Validate an HTTP response against an expect block.
pub fn validate_http(expect: &Expect, response: &HttpResponse) -> Result<()> {
    if let Some(expectation) = &expect.status_code {
        let comparison = expectation.to_comparison(Comparator::Equals);
        compare(Some(&Value::from(response.status)), &comparison)
            .map_err(|e| in_field("statusCode", e))?;
    }

    let body = Value::String(response.body.clone());
    if let Some(expectation) = &expect.body_contains {
        let comparison = expectation.to_comparison(Comparator::Contains);
        compare(Some(&body), &comparison).map_err(|e| in_field("bodyContains", e))?;
    }
    if let Some(expectation) = &expect.body_regex {
        let comparison = expectation.to_comparison(Comparator::Matches);
        compare(Some(&body), &comparison).map_err(|e| in_field("bodyRegex", e))?;
    }

    for entry in &expect.body_json_path {
        let document = response.json.as_ref().ok_or_else(|| {
            Error::Expectation(format!(
                "bodyJsonPath '{}': response body is not JSON",
                entry.path
            ))
        })?;
        check_json_path(entry, document).map_err(|e| in_field("bodyJsonPath", e))?;
    }

    for header in &expect.headers {
        let actual = header.name.as_str();
        let value = response.header(actual).map(|v| Value::String(v.to_string()));
        compare(value.as_ref(), &header.comparison)
            .map_err(|e| in_field(&format!("header '{}'", header.name), e))?;
    }

    Ok(())
}

/// Validate a command output against an expect block.
pub fn validate_command(expect: &Expect, output: &CommandOutput) -> Result<()> {
    if let Some(expectation) = &expect.exit_code {
        let comparison = expectation.to_comparison(Comparator::Equals);
        compare(Some(&Value::from(output.exit_code)), &comparison)
            .map_err(|e| in_field("exitCode", e))?;
    }
    if let Some(expectation) = &expect.stdout {
        let comparison = expectation.to_comparison(Comparator::Equals);
        compare(Some(&Value::String(output.stdout.trim().to_string())), &comparison)
            .map_err(|e| in_field("stdout", e))?;
    }
    if let Some(expectation) = &expect.stderr {
        let comparison = expectation.to_comparison(Comparator::Equals);
        compare(Some(&Value::String(output.stderr.trim().to_string())), &comparison)
            .map_err(|e| in_field("stderr", e))?;
    }

    for entry in &expect.json_path {
        let document = output.json.as_ref().ok_or_else(|| {
            Error::Expectation(format!(
                "jsonPath '{}': command stdout was not parsed as JSON{}",
                entry.path,
                output
                    .json_parse_error
                    .as_ref()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_else(|| "; set parseJson".to_string())
            ))
        })?;
        check_json_path(entry, document).map_err(|e| in_field("jsonPath", e))?;
    }

    Ok(())
}

/// Evaluate one path expectation: absent paths compare as absent values, a
/// unique match compares directly, several matches compare as the array.
pub(crate) fn check_json_path(entry: &JsonPathExpectation, document: &Value) -> Result<()> {
    let path = JsonPath::parse(&entry.path)?;
    let matches = path.select(document);
    apply_to_matches(&matches, &entry.comparison).map_err(|e| match e {
        Error::Expectation(message) => Error::Expectation(format!("'{}': {message}", entry.path)),
        other => other,
    })
}

fn apply_to_matches(matches: &[&Value], comparison: &Comparison) -> Result<()> {
    match matches {
        [] => compare(None, comparison),
        [single] => compare(Some(*single), comparison),
        many => {
            let array = Value::Array(many.iter().map(|v| (*v).clone()).collect());
            compare(Some(&array), comparison)
        }
    }
}

fn in_field(field: &str, error: Error) -> Error {
    match error {
        Error::Expectation(message) => Error::Expectation(format!("{field}: {message}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Expectation, HeaderExpectation};
    use serde_json::json;

    fn response() -> HttpResponse {
        HttpResponse::new(
            200,
            vec![("Content-Type".to_string(), "application/json".to_string())],
            r#"{"status": "ready", "replicas": 3}"#.to_string(),
        )
    }

    fn output(stdout: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            json: serde_json::from_str(stdout.trim()).ok(),
            json_parse_error: None,
        }
    }

    #[test]
    fn http_expectations_pass_together() {
        let expect = Expect {
            status_code: Some(Expectation::Literal(json!(200))),
            body_contains: Some(Expectation::Literal(json!("ready"))),
            body_regex: Some(Expectation::Literal(json!(r#""replicas":\s*3"#))),
            body_json_path: vec![JsonPathExpectation {
                path: "$.status".to_string(),
                comparison: Comparison::new(Comparator::Equals, json!("ready")),
            }],
            headers: vec![HeaderExpectation {
                name: "content-type".to_string(),
                comparison: Comparison::new(Comparator::Contains, json!("json")),
            }],
            ..Default::default()
        };
        validate_http(&expect, &response()).unwrap();
    }

    #[test]
    fn status_code_mismatch_names_the_field() {
        let expect = Expect {
            status_code: Some(Expectation::Literal(json!(404))),
            ..Default::default()
        };
        let err = validate_http(&expect, &response()).unwrap_err();
        assert!(err.to_string().contains("statusCode"), "{err}");
    }

    #[test]
    fn missing_header_fails_unless_negated_exists() {
        let mut expect = Expect {
            headers: vec![HeaderExpectation {
                name: "X-Missing".to_string(),
                comparison: Comparison {
                    comparator: Comparator::Exists,
                    value: None,
                    negate: false,
                    matchword: false,
                },
            }],
            ..Default::default()
        };
        assert!(validate_http(&expect, &response()).is_err());

        expect.headers[0].comparison.negate = true;
        validate_http(&expect, &response()).unwrap();
    }

    #[test]
    fn command_expectations_cover_streams_and_paths() {
        let expect = Expect {
            exit_code: Some(Expectation::Literal(json!(0))),
            stdout: Some(Expectation::Full(Comparison::new(
                Comparator::Contains,
                json!("\"phase\""),
            ))),
            json_path: vec![JsonPathExpectation {
                path: "$.phase".to_string(),
                comparison: Comparison::new(Comparator::Equals, json!("Running")),
            }],
            ..Default::default()
        };
        validate_command(&expect, &output(r#"{"phase": "Running"}"#, 0)).unwrap();
    }

    #[test]
    fn stdout_shorthand_compares_trimmed_equality() {
        let expect = Expect {
            stdout: Some(Expectation::Literal(json!("done"))),
            ..Default::default()
        };
        validate_command(&expect, &output("done\n", 0)).unwrap();
        assert!(validate_command(&expect, &output("done but more\n", 0)).is_err());
    }

    #[test]
    fn json_path_expectation_on_unparsed_stdout_fails() {
        let expect = Expect {
            json_path: vec![JsonPathExpectation {
                path: "$.x".to_string(),
                comparison: Comparison::new(Comparator::Exists, json!(null)),
            }],
            ..Default::default()
        };
        let mut out = output("not json", 0);
        out.json = None;
        let err = validate_command(&expect, &out).unwrap_err();
        assert!(err.to_string().contains("parseJson"), "{err}");
    }

    #[test]
    fn multiple_path_matches_compare_as_an_array() {
        let entry = JsonPathExpectation {
            path: "$.items[*].id".to_string(),
            comparison: Comparison::new(Comparator::Equals, json!([1, 2])),
        };
        check_json_path(&entry, &json!({"items": [{"id": 1}, {"id": 2}]})).unwrap();
    }
}
