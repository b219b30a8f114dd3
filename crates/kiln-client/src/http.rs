//! Authenticated HTTP transport to the control-plane API.

use std::path::PathBuf;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Identity, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::types::{Envelope, ResponseKind};

/// Client credential for the control plane.
///
/// The control plane accepts either certificate-based mutual TLS or a
/// pre-established trust token, depending on deployment. Both strategies
/// are first-class; callers pick one in configuration.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Certificate-based mutual TLS (PEM-encoded cert and key files).
    ClientCertificate { cert: PathBuf, key: PathBuf },

    /// Bearer trust token sent on every request.
    TrustToken { token: String },
}

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Verify the server certificate. Control planes commonly run with
    /// self-signed certificates, in which case this is turned off and
    /// trust rests on the client credential.
    pub verify_tls: bool,

    pub credentials: Credentials,
}

/// Authenticated transport to the control-plane REST API.
///
/// Issues method/endpoint/payload requests and returns the parsed
/// response envelope, or a typed error: [`ClientError::Transport`] for
/// connection/TLS failures, [`ClientError::Api`] for structured non-2xx
/// responses with the server message carried verbatim.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// Build a client from connection settings.
    ///
    /// Reads credential material from disk; no network traffic happens
    /// until the first request.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        match &config.credentials {
            Credentials::ClientCertificate { cert, key } => {
                let mut pem = std::fs::read(cert).map_err(|e| {
                    ClientError::Credentials(format!(
                        "cannot read client certificate {}: {e}",
                        cert.display()
                    ))
                })?;
                let key_pem = std::fs::read(key).map_err(|e| {
                    ClientError::Credentials(format!(
                        "cannot read client key {}: {e}",
                        key.display()
                    ))
                })?;
                pem.extend_from_slice(&key_pem);

                let identity = Identity::from_pem(&pem)
                    .map_err(|e| ClientError::Credentials(format!("invalid identity: {e}")))?;
                builder = builder.identity(identity);
            }
            Credentials::TrustToken { token } => {
                let mut headers = HeaderMap::new();
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| ClientError::Credentials(format!("invalid token: {e}")))?;
                headers.insert(AUTHORIZATION, value);
                builder = builder.default_headers(headers);
            }
        }

        let http = builder.build()?;

        Ok(Self {
            http,
            base: format!("https://{}:{}", config.host, config.port),
        })
    }

    /// Issue a request and parse the response envelope.
    pub async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Envelope> {
        self.request(method, path, &[], body).await
    }

    /// Issue a request with query parameters.
    ///
    /// Query values are percent-encoded by the HTTP layer, which is what
    /// lets arbitrary filesystem paths ride in the `path` parameter of
    /// the file endpoints.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Envelope> {
        debug!(%method, path, "control-plane request");

        let mut req = self
            .http
            .request(method, format!("{}{}", self.base, path))
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        parse_envelope(status, &bytes)
    }

    /// Upload raw bytes to an endpoint (file push).
    pub async fn post_bytes(
        &self,
        path: &str,
        query: &[(&str, &str)],
        content: Vec<u8>,
    ) -> Result<Envelope> {
        debug!(path, bytes = content.len(), "control-plane upload");

        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        parse_envelope(status, &bytes)
    }

    /// Fetch a raw resource (captured command output logs).
    pub async fn get_raw(&self, path: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }
}

/// Turn an HTTP status plus body into an envelope or a typed API error.
fn parse_envelope(status: StatusCode, body: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Non-JSON bodies on error statuses still deserve a typed error
            // with whatever the server said.
            if !status.is_success() {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(body).into_owned(),
                });
            }
            return Err(ClientError::Protocol(format!(
                "unparseable response envelope: {e}"
            )));
        }
    };

    if envelope.kind == ResponseKind::Error || !status.is_success() {
        let code = if envelope.error_code != 0 {
            envelope.error_code
        } else {
            status.as_u16()
        };
        return Err(ClientError::Api {
            status: code,
            message: envelope.error,
        });
    }

    Ok(envelope)
}
