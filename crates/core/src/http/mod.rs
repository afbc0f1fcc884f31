//! HTTP execution strategies
//!
//! One request can travel four ways: directly from this process, through an
//! ephemeral debug container, through `kubectl exec` + curl, or through a
//! local port-forward tunnel. The strategy is invisible past this module:
//! every transport returns the same [`HttpResponse`].

pub mod debug;
pub mod exec;
pub mod forward;
pub mod local;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::kubectl::Kubectl;
use crate::spec::{HttpTest, PortRef, Selector, Source};
use crate::vars::VariableStore;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The uniform response shape all transports produce.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: String,
    /// Parsed body, when the body parses as JSON.
    pub json: Option<Value>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: String) -> Self {
        let json = serde_json::from_str(body.trim()).ok();
        Self { status, headers, body, json }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// A request after preprocessing: variables interpolated, defaults applied,
/// url fully resolved.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub skip_ssl_verification: bool,
    pub max_redirects: u32,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub timeout: Duration,
    /// Debug-container image override.
    pub image: Option<String>,
}

/// One way of reaching the target process with an HTTP request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse>;
}

/// Execute an http test against its source: preprocess, pick the transport,
/// run.
pub async fn execute(
    test: &HttpTest,
    source: &Source,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<HttpResponse> {
    let request = prepare(test, source, vars, kubectl).await?;
    let transport = select_transport(source, kubectl);
    debug!(method = %request.method, url = %request.url, "executing http request");
    transport.execute(&request).await
}

/// The transport decision table: local sources call directly; pod sources
/// pick exec, port-forward, or the default debug-container strategy by
/// their hints.
pub fn select_transport<'a>(
    source: &'a Source,
    kubectl: &'a Kubectl,
) -> Box<dyn HttpTransport + 'a> {
    match source {
        Source::Local(_) => Box::new(local::LocalTransport),
        Source::Pod(pod) if pod.use_pod_exec => Box::new(exec::ExecCurlTransport { kubectl, pod }),
        Source::Pod(pod) if pod.use_port_forward => {
            Box::new(forward::PortForwardTransport { kubectl, pod })
        }
        Source::Pod(pod) => Box::new(debug::DebugContainerTransport { kubectl, pod }),
    }
}

/// Interpolate variables, apply defaults, and resolve the target url.
pub async fn prepare(
    test: &HttpTest,
    source: &Source,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<PreparedRequest> {
    let method = test
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_ascii_uppercase();

    let base = resolve_base_url(test, source, vars, kubectl).await?;
    let url = if test.url.is_some() {
        // An explicit url stands alone unless a path was also given.
        match &test.path {
            Some(path) => join_url(&base, path),
            None => base,
        }
    } else {
        join_url(&base, test.path.as_deref().unwrap_or("/"))
    };

    let headers = test
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), vars.interpolate(value)))
        .collect();

    let body = test.body.as_ref().map(|value| match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    });

    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
        skip_ssl_verification: test.skip_ssl_verification,
        max_redirects: test.max_redirects,
        client_cert: test.client_cert.clone(),
        client_key: test.client_key.clone(),
        ca_cert: test.ca_cert.clone(),
        timeout: test
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT),
        image: test.image.clone(),
    })
}

async fn resolve_base_url(
    test: &HttpTest,
    source: &Source,
    vars: &VariableStore,
    kubectl: &Kubectl,
) -> Result<String> {
    if let Some(url) = &test.url {
        return Ok(vars.interpolate(url));
    }

    let scheme = test.scheme.as_deref().unwrap_or("http");
    match source {
        Source::Local(local) => {
            let selector = local.selector.as_ref().ok_or_else(|| {
                Error::InvalidDefinition(
                    "http test needs a url, or a local source with a Service selector".into(),
                )
            })?;
            if !selector.kind.eq_ignore_ascii_case("service") {
                return Err(Error::InvalidDefinition(format!(
                    "url auto-discovery needs a Service selector, got {}",
                    selector.kind
                )));
            }
            let service = kubectl.get_resource(selector).await?;
            service_base_url(&service, scheme, test.port.as_ref(), selector)
        }
        Source::Pod(_) => {
            // In-cluster strategies reach the pod on its own loopback.
            let port = match &test.port {
                Some(PortRef::Number(port)) => *port,
                Some(PortRef::Name(name)) => {
                    return Err(Error::InvalidDefinition(format!(
                        "named port '{name}' requires url auto-discovery through a Service selector"
                    )))
                }
                None => 80,
            };
            Ok(format!("{scheme}://localhost:{port}"))
        }
    }
}

/// Compose `scheme://ip:port` from a Service's load-balancer ingress status.
fn service_base_url(
    service: &Value,
    scheme: &str,
    port: Option<&PortRef>,
    selector: &Selector,
) -> Result<String> {
    let ingress = service
        .pointer("/status/loadBalancer/ingress/0")
        .ok_or_else(|| {
            Error::Kubectl(format!(
                "{} has no load-balancer ingress to discover a url from",
                selector.describe()
            ))
        })?;
    let host = ingress
        .get("ip")
        .or_else(|| ingress.get("hostname"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::Kubectl(format!(
                "{} ingress entry has neither ip nor hostname",
                selector.describe()
            ))
        })?;

    let ports = service
        .pointer("/spec/ports")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let resolved = match port {
        Some(PortRef::Number(number)) => Some(u32::from(*number)),
        Some(PortRef::Name(name)) => ports
            .iter()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|entry| entry.get("port"))
            .and_then(Value::as_u64)
            .map(|p| p as u32),
        None => ports
            .first()
            .and_then(|entry| entry.get("port"))
            .and_then(Value::as_u64)
            .map(|p| p as u32),
    };
    let resolved = resolved.ok_or_else(|| {
        Error::Kubectl(format!("{} has no resolvable port", selector.describe()))
    })?;

    Ok(format!("{scheme}://{host}:{resolved}"))
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{LocalSource, SelectorMetadata};
    use serde_json::json;

    fn local_source() -> Source {
        Source::Local(LocalSource::default())
    }

    #[tokio::test]
    async fn prepare_applies_defaults_and_interpolation() {
        let mut vars = VariableStore::new();
        vars.set("HOST", "api.example.com");
        vars.set("TOKEN", "s3cret");

        let test = HttpTest {
            url: Some("https://$HOST".to_string()),
            path: Some("/v1/items".to_string()),
            headers: std::collections::BTreeMap::from([(
                "Authorization".to_string(),
                "Bearer ${TOKEN}".to_string(),
            )]),
            ..Default::default()
        };
        let request = prepare(&test, &local_source(), &vars, &Kubectl::new())
            .await
            .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "https://api.example.com/v1/items");
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer s3cret".to_string())]
        );
        assert_eq!(request.timeout, DEFAULT_TIMEOUT);
        assert_eq!(request.max_redirects, 0);
    }

    #[tokio::test]
    async fn prepare_leaves_bare_url_untouched() {
        let test = HttpTest {
            url: Some("http://localhost:8080/ready".to_string()),
            ..Default::default()
        };
        let request = prepare(&test, &local_source(), &VariableStore::new(), &Kubectl::new())
            .await
            .unwrap();
        assert_eq!(request.url, "http://localhost:8080/ready");
    }

    #[tokio::test]
    async fn prepare_requires_url_or_service_selector() {
        let test = HttpTest::default();
        let err = prepare(&test, &local_source(), &VariableStore::new(), &Kubectl::new())
            .await
            .unwrap_err();
        assert!(err.is_config(), "{err}");
    }

    #[tokio::test]
    async fn pod_sources_default_to_loopback() {
        let source = Source::Pod(crate::spec::PodSource {
            selector: Selector {
                kind: "Pod".to_string(),
                metadata: SelectorMetadata {
                    namespace: None,
                    name: Some("web-0".to_string()),
                    labels: Default::default(),
                },
                context: None,
            },
            container: None,
            use_port_forward: false,
            use_pod_exec: false,
        });
        let test = HttpTest {
            port: Some(PortRef::Number(8080)),
            path: Some("/health".to_string()),
            ..Default::default()
        };
        let request = prepare(&test, &source, &VariableStore::new(), &Kubectl::new())
            .await
            .unwrap();
        assert_eq!(request.url, "http://localhost:8080/health");
    }

    #[test]
    fn service_discovery_resolves_ingress_and_ports() {
        let service = json!({
            "spec": {"ports": [
                {"name": "http", "port": 80},
                {"name": "metrics", "port": 9100},
            ]},
            "status": {"loadBalancer": {"ingress": [{"ip": "203.0.113.7"}]}}
        });
        let selector = Selector {
            kind: "Service".to_string(),
            metadata: SelectorMetadata {
                namespace: Some("default".to_string()),
                name: Some("web".to_string()),
                labels: Default::default(),
            },
            context: None,
        };

        // First port when unspecified.
        let url = service_base_url(&service, "http", None, &selector).unwrap();
        assert_eq!(url, "http://203.0.113.7:80");

        // By name.
        let by_name = PortRef::Name("metrics".to_string());
        let url = service_base_url(&service, "http", Some(&by_name), &selector).unwrap();
        assert_eq!(url, "http://203.0.113.7:9100");

        // Explicit number wins even when absent from the port list.
        let by_number = PortRef::Number(8443);
        let url = service_base_url(&service, "https", Some(&by_number), &selector).unwrap();
        assert_eq!(url, "https://203.0.113.7:8443");
    }

    #[test]
    fn service_discovery_requires_an_ingress() {
        let service = json!({"spec": {"ports": [{"port": 80}]}, "status": {}});
        let selector = Selector {
            kind: "Service".to_string(),
            metadata: SelectorMetadata {
                namespace: None,
                name: Some("web".to_string()),
                labels: Default::default(),
            },
            context: None,
        };
        let err = service_base_url(&service, "http", None, &selector).unwrap_err();
        assert!(err.to_string().contains("load-balancer ingress"), "{err}");
    }

    #[test]
    fn response_parses_json_bodies_and_headers_case_insensitively() {
        let response = HttpResponse::new(
            200,
            vec![("Content-Type".to_string(), "application/json".to_string())],
            r#"{"id": 42}"#.to_string(),
        );
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/json"));
        assert!(response.header("x-missing").is_none());
        assert_eq!(response.json, Some(json!({"id": 42})));

        let plain = HttpResponse::new(200, vec![], "not json".to_string());
        assert!(plain.json.is_none());
    }
}
