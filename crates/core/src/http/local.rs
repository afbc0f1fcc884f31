//! Direct HTTP strategy
//!
//! Calls the target from this process. Non-2xx statuses are returned, never
//! raised; interpreting them is the validation layer's job.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Certificate, Identity, Method};

use crate::error::{Error, Result};
use crate::http::{HttpResponse, HttpTransport, PreparedRequest};

pub struct LocalTransport;

#[async_trait]
impl HttpTransport for LocalTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse> {
        let client = build_client(request)?;

        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            Error::InvalidDefinition(format!("invalid http method '{}'", request.method))
        })?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse::new(status, headers, body))
    }
}

fn build_client(request: &PreparedRequest) -> Result<reqwest::Client> {
    let redirect = if request.max_redirects == 0 {
        Policy::none()
    } else {
        Policy::limited(request.max_redirects as usize)
    };

    let mut builder = reqwest::Client::builder()
        .timeout(request.timeout)
        .redirect(redirect)
        .danger_accept_invalid_certs(request.skip_ssl_verification);

    if let Some(ca) = &request.ca_cert {
        let pem = std::fs::read(ca)?;
        builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
    }
    if let (Some(cert), Some(key)) = (&request.client_cert, &request.client_key) {
        // rustls wants the chain and key in one PEM bundle.
        let mut pem = std::fs::read(cert)?;
        pem.extend(std::fs::read(key)?);
        builder = builder.identity(Identity::from_pem(&pem)?);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(url: &str) -> PreparedRequest {
        PreparedRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: vec![],
            body: None,
            skip_ssl_verification: false,
            max_redirects: 0,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            timeout: Duration::from_secs(1),
            image: None,
        }
    }

    #[test]
    fn client_builds_with_defaults() {
        assert!(build_client(&request("http://localhost")).is_ok());
    }

    #[test]
    fn missing_tls_material_is_an_io_error() {
        let mut req = request("https://localhost");
        req.ca_cert = Some("/nonexistent/ca.pem".into());
        let err = build_client(&req).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
    }

    #[tokio::test]
    async fn invalid_method_is_a_config_error() {
        let mut req = request("http://localhost");
        req.method = "GET SOMETHING".to_string();
        let err = LocalTransport.execute(&req).await.unwrap_err();
        assert!(err.is_config(), "{err}");
    }
}
