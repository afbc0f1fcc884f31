//! Ephemeral debug-container strategy
//!
//! The default pod transport: generate a small Python request program,
//! run it in a debug container attached to the target pod (sharing its
//! network namespace), and parse the sentinel-framed JSON response object
//! out of the attached output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::{HttpResponse, HttpTransport, PreparedRequest};
use crate::kubectl::Kubectl;
use crate::spec::PodSource;

const RESPONSE_START: &str = "HTTP_RESPONSE_START";
const RESPONSE_END: &str = "HTTP_RESPONSE_END";
const DEFAULT_IMAGE: &str = "python:3-alpine";

pub struct DebugContainerTransport<'a> {
    pub kubectl: &'a Kubectl,
    pub pod: &'a PodSource,
}

#[async_trait]
impl HttpTransport for DebugContainerTransport<'_> {
    async fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse> {
        let pod_name = self.kubectl.resolve_pod_name(&self.pod.selector).await?;
        let script = build_request_script(request)?;
        let image = request.image.as_deref().unwrap_or(DEFAULT_IMAGE);

        debug!(%pod_name, image, "running request in debug container");
        let output = self
            .kubectl
            .debug(
                &self.pod.selector,
                &pod_name,
                image,
                &["python3".to_string(), "-c".to_string(), script],
            )
            .await?;

        extract_response_block(&output.stdout).ok_or_else(|| {
            Error::Transport(format!(
                "debug container on {pod_name} produced no response block; stderr: {}",
                output.stderr.trim()
            ))
        })
    }
}

/// Payload embedded into the generated program.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPayload<'a> {
    method: &'a str,
    url: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
    body: Option<&'a str>,
    skip_ssl_verification: bool,
    timeout_seconds: u64,
}

/// Shape the generated program prints between the sentinels.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptResponse {
    status_code: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: String,
}

/// Generate the Python request program. The payload is double-encoded so it
/// can sit inside the program as a plain string literal.
fn build_request_script(request: &PreparedRequest) -> Result<String> {
    let payload = RequestPayload {
        method: &request.method,
        url: &request.url,
        headers: request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect(),
        body: request.body.as_deref(),
        skip_ssl_verification: request.skip_ssl_verification,
        timeout_seconds: request.timeout.as_secs(),
    };
    let literal = serde_json::to_string(&serde_json::to_string(&payload)?)?;

    Ok(format!(
        r#"
import json, ssl, urllib.error, urllib.request

spec = json.loads({literal})
ctx = ssl.create_default_context()
if spec["skipSslVerification"]:
    ctx.check_hostname = False
    ctx.verify_mode = ssl.CERT_NONE

req = urllib.request.Request(spec["url"], method=spec["method"])
for name, value in spec["headers"].items():
    req.add_header(name, value)
data = spec["body"].encode() if spec["body"] is not None else None

try:
    resp = urllib.request.urlopen(req, data=data, context=ctx, timeout=spec["timeoutSeconds"])
except urllib.error.HTTPError as err:
    resp = err

result = {{
    "statusCode": resp.getcode(),
    "headers": dict(resp.headers.items()),
    "body": resp.read().decode(errors="replace"),
}}
print("{RESPONSE_START}")
print(json.dumps(result))
print("{RESPONSE_END}")
"#
    ))
}

/// Pull the sentinel-framed response object out of the attached output.
fn extract_response_block(stdout: &str) -> Option<HttpResponse> {
    let start = stdout.find(RESPONSE_START)? + RESPONSE_START.len();
    let end = stdout[start..].find(RESPONSE_END)? + start;
    let block = stdout[start..end].trim();
    let parsed: ScriptResponse = serde_json::from_str(block).ok()?;
    Some(HttpResponse::new(
        parsed.status_code,
        parsed.headers.into_iter().collect(),
        parsed.body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> PreparedRequest {
        PreparedRequest {
            method: "POST".to_string(),
            url: "http://localhost:8080/api".to_string(),
            headers: vec![("X-Trace".to_string(), "abc".to_string())],
            body: Some(r#"{"q": "it's"}"#.to_string()),
            skip_ssl_verification: true,
            max_redirects: 0,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            timeout: Duration::from_secs(10),
            image: None,
        }
    }

    #[test]
    fn script_embeds_the_request_and_sentinels() {
        let script = build_request_script(&request()).unwrap();
        assert!(script.contains(RESPONSE_START));
        assert!(script.contains(RESPONSE_END));
        assert!(script.contains("urllib.request"));
        // The payload travels as one embedded string literal.
        assert!(script.contains(r#"\"method\":\"POST\""#), "{script}");
        assert!(script.contains(r#"X-Trace"#));
    }

    #[test]
    fn response_block_is_extracted_from_noisy_output() {
        let stdout = format!(
            "Defaulting debug container name to debugger-abc12.\n{RESPONSE_START}\n{}\n{RESPONSE_END}\ntrailing noise",
            r#"{"statusCode": 503, "headers": {"Retry-After": "5"}, "body": "busy"}"#
        );
        let response = extract_response_block(&stdout).unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.header("retry-after"), Some("5"));
        assert_eq!(response.body, "busy");
    }

    #[test]
    fn missing_or_garbled_block_yields_none() {
        assert!(extract_response_block("no markers at all").is_none());
        let garbled = format!("{RESPONSE_START}\nnot json\n{RESPONSE_END}");
        assert!(extract_response_block(&garbled).is_none());
        let unterminated = format!("{RESPONSE_START}\n{{}}");
        assert!(extract_response_block(&unterminated).is_none());
    }
}
