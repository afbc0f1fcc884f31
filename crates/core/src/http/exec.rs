//! exec + curl strategy
//!
//! Shells a curl invocation through `kubectl exec` in an existing container.
//! curl's `-i` output carries the status line and headers; a `-w` sentinel
//! footer delimits the body. When the process fails the response is still
//! reconstructed best-effort from whatever arrived, so validation can run
//! against the error response.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::command::shell_quote;
use crate::error::Result;
use crate::http::{HttpResponse, HttpTransport, PreparedRequest};
use crate::kubectl::Kubectl;
use crate::spec::PodSource;

const RESPONSE_FOOTER: &str = "PODCHECK_CURL_DONE";

pub struct ExecCurlTransport<'a> {
    pub kubectl: &'a Kubectl,
    pub pod: &'a PodSource,
}

#[async_trait]
impl HttpTransport for ExecCurlTransport<'_> {
    async fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse> {
        let pod_name = self.kubectl.resolve_pod_name(&self.pod.selector).await?;
        let curl = build_curl_command(request);

        debug!(%pod_name, "running curl via exec");
        let output = self
            .kubectl
            .exec(
                &self.pod.selector,
                &pod_name,
                self.pod.container.as_deref(),
                &curl,
            )
            .await?;

        if !output.success() {
            warn!(
                %pod_name,
                exit_code = output.exit_code,
                "curl exec failed; reconstructing response from partial output"
            );
        }

        match parse_curl_output(&output.stdout) {
            Some(response) => Ok(response),
            None => Ok(HttpResponse::new(
                0,
                vec![],
                format!("{}{}", output.stdout, output.stderr).trim().to_string(),
            )),
        }
    }
}

fn build_curl_command(request: &PreparedRequest) -> String {
    let mut parts = vec![
        "curl".to_string(),
        "-sS".to_string(),
        "-i".to_string(),
        "-X".to_string(),
        request.method.clone(),
    ];
    if request.skip_ssl_verification {
        parts.push("-k".to_string());
    }
    if request.max_redirects > 0 {
        parts.push("-L".to_string());
        parts.push("--max-redirs".to_string());
        parts.push(request.max_redirects.to_string());
    }
    parts.push("--max-time".to_string());
    parts.push(request.timeout.as_secs().to_string());
    for (name, value) in &request.headers {
        parts.push("-H".to_string());
        parts.push(shell_quote(&format!("{name}: {value}")));
    }
    if let Some(body) = &request.body {
        parts.push("--data".to_string());
        parts.push(shell_quote(body));
    }
    parts.push("-w".to_string());
    parts.push(shell_quote(&format!("\n{RESPONSE_FOOTER}")));
    parts.push(shell_quote(&request.url));
    parts.join(" ")
}

/// Parse curl `-i` output: status line, header block, blank line, body up to
/// the sentinel footer. Interim 1xx header blocks are skipped.
fn parse_curl_output(stdout: &str) -> Option<HttpResponse> {
    let mut rest = stdout;
    loop {
        let (status, after_status) = parse_status_line(rest)?;
        let (headers, after_headers) = parse_header_block(after_status);

        // Another status line follows an interim response.
        if (100..200).contains(&status) && after_headers.trim_start().starts_with("HTTP/") {
            rest = after_headers.trim_start_matches(['\r', '\n']);
            continue;
        }

        let body = match after_headers.find(RESPONSE_FOOTER) {
            Some(end) => &after_headers[..end],
            None => after_headers,
        };
        let body = body.strip_suffix('\n').unwrap_or(body);
        let body = body.strip_suffix('\r').unwrap_or(body);
        return Some(HttpResponse::new(status, headers, body.to_string()));
    }
}

fn parse_status_line(text: &str) -> Option<(u16, &str)> {
    let line_end = text.find('\n')?;
    let line = text[..line_end].trim_end_matches('\r');
    if !line.starts_with("HTTP/") {
        return None;
    }
    let status = line.split_whitespace().nth(1)?.parse().ok()?;
    Some((status, &text[line_end + 1..]))
}

fn parse_header_block(text: &str) -> (Vec<(String, String)>, &str) {
    let mut headers = Vec::new();
    let mut rest = text;
    while let Some(line_end) = rest.find('\n') {
        let line = rest[..line_end].trim_end_matches('\r');
        rest = &rest[line_end + 1..];
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    (headers, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> PreparedRequest {
        PreparedRequest {
            method: "POST".to_string(),
            url: "https://localhost:8443/api".to_string(),
            headers: vec![("X-Token".to_string(), "it's a secret".to_string())],
            body: Some(r#"{"name": "o'brien"}"#.to_string()),
            skip_ssl_verification: true,
            max_redirects: 0,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            timeout: Duration::from_secs(30),
            image: None,
        }
    }

    #[test]
    fn curl_command_quotes_headers_and_body() {
        let command = build_curl_command(&request());
        assert!(command.starts_with("curl -sS -i -X POST -k"), "{command}");
        assert!(command.contains(r#"'X-Token: it'\''s a secret'"#), "{command}");
        assert!(command.contains(r#"'{"name": "o'\''brien"}'"#), "{command}");
        assert!(command.contains(RESPONSE_FOOTER));
        assert!(command.ends_with("'https://localhost:8443/api'"), "{command}");
    }

    #[test]
    fn parses_status_headers_and_body() {
        let stdout = format!(
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nX-Request-Id: r-1\r\n\r\n{{\"ok\":true}}\n{RESPONSE_FOOTER}"
        );
        let response = parse_curl_output(&stdout).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body, "{\"ok\":true}");
        assert!(response.json.is_some());
    }

    #[test]
    fn skips_interim_continue_blocks() {
        let stdout = format!(
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok\n{RESPONSE_FOOTER}"
        );
        let response = parse_curl_output(&stdout).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "ok");
    }

    #[test]
    fn garbage_output_yields_none() {
        assert!(parse_curl_output("curl: (7) Failed to connect\n").is_none());
        assert!(parse_curl_output("").is_none());
    }

    #[test]
    fn body_survives_missing_footer() {
        let stdout = "HTTP/1.1 502 Bad Gateway\r\n\r\npartial bo";
        let response = parse_curl_output(stdout).unwrap();
        assert_eq!(response.status, 502);
        assert_eq!(response.body, "partial bo");
    }
}
