//! port-forward strategy
//!
//! Opens a local tunnel to the target, rewrites the request at
//! `localhost:<local-port>`, and delegates to the direct strategy. The
//! tunnel is torn down on every exit path; teardown failures are logged so
//! they never mask the test result.

use tracing::debug;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::http::local::LocalTransport;
use crate::http::{HttpResponse, HttpTransport, PreparedRequest};
use crate::kubectl::{Kubectl, FORWARD_READY_TIMEOUT};
use crate::spec::{PodSource, Selector};

pub struct PortForwardTransport<'a> {
    pub kubectl: &'a Kubectl,
    pub pod: &'a PodSource,
}

#[async_trait]
impl HttpTransport for PortForwardTransport<'_> {
    async fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse> {
        let target = resolve_forward_target(self.kubectl, &self.pod.selector).await?;

        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| Error::Transport(format!("invalid url '{}': {e}", request.url)))?;
        let remote_port = url
            .port()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
        let local_port = find_free_port()?;

        let mut forward =
            self.kubectl
                .port_forward(&self.pod.selector, &target, local_port, remote_port)?;

        let result = match forward.wait_ready(FORWARD_READY_TIMEOUT).await {
            Ok(()) => {
                let local_request = rewrite_to_local(request, &url, local_port)?;
                debug!(%target, local_port, "tunnel ready; calling through it");
                LocalTransport.execute(&local_request).await
            }
            Err(e) => Err(e),
        };

        forward.stop().await;
        result
    }
}

/// What `kubectl port-forward` should be pointed at: a pod name for pod
/// kinds (label-resolved if needed), `kind/name` for anything else named.
async fn resolve_forward_target(kubectl: &Kubectl, selector: &Selector) -> Result<String> {
    match &selector.metadata.name {
        Some(name) if !selector.is_pod_kind() => {
            Ok(format!("{}/{}", selector.kind.to_ascii_lowercase(), name))
        }
        _ => kubectl.resolve_pod_name(selector).await,
    }
}

fn rewrite_to_local(
    request: &PreparedRequest,
    url: &reqwest::Url,
    local_port: u16,
) -> Result<PreparedRequest> {
    let mut local_url = url.clone();
    local_url
        .set_host(Some("localhost"))
        .map_err(|e| Error::Transport(format!("cannot rewrite url host: {e}")))?;
    local_url
        .set_port(Some(local_port))
        .map_err(|_| Error::Transport("cannot rewrite url port".to_string()))?;

    let mut local_request = request.clone();
    local_request.url = local_url.to_string();
    Ok(local_request)
}

fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SelectorMetadata;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn free_ports_are_above_the_reserved_range() {
        let port = find_free_port().unwrap();
        assert!(port > 1024);
    }

    #[tokio::test]
    async fn named_non_pod_targets_use_kind_slash_name() {
        let kubectl = Kubectl::with_binary("false");
        let selector = Selector {
            kind: "Service".to_string(),
            metadata: SelectorMetadata {
                namespace: None,
                name: Some("web".to_string()),
                labels: BTreeMap::new(),
            },
            context: None,
        };
        let target = resolve_forward_target(&kubectl, &selector).await.unwrap();
        assert_eq!(target, "service/web");
    }

    #[tokio::test]
    async fn named_pod_targets_use_the_bare_name() {
        let kubectl = Kubectl::with_binary("false");
        let selector = Selector {
            kind: "Pod".to_string(),
            metadata: SelectorMetadata {
                namespace: None,
                name: Some("web-0".to_string()),
                labels: BTreeMap::new(),
            },
            context: None,
        };
        let target = resolve_forward_target(&kubectl, &selector).await.unwrap();
        assert_eq!(target, "web-0");
    }

    #[test]
    fn rewrite_points_at_the_local_tunnel() {
        let request = PreparedRequest {
            method: "GET".to_string(),
            url: "https://web.default.svc:8443/api/v1?x=1".to_string(),
            headers: vec![],
            body: None,
            skip_ssl_verification: true,
            max_redirects: 0,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            timeout: Duration::from_secs(5),
            image: None,
        };
        let url = reqwest::Url::parse(&request.url).unwrap();
        let rewritten = rewrite_to_local(&request, &url, 5100).unwrap();
        assert_eq!(rewritten.url, "https://localhost:5100/api/v1?x=1");
    }
}
