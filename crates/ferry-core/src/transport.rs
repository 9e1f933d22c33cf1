//! Authenticated HTTP boundary.
//!
//! All engine logic talks to the platform through the [`Transport`] trait;
//! [`HttpTransport`] is the production implementation and owns bearer-token
//! acquisition plus cookie continuity across the calls of one run.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::AuthConfig;
use crate::endpoints::Endpoint;
use crate::error::DistributionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// Request body shapes the engine needs.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Xml(String),
    /// Multipart form with one file part plus optional text fields.
    FileUpload {
        path: PathBuf,
        file_name: String,
        fields: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub accept: Option<&'static str>,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            accept: None,
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body).context("response body is not valid JSON")
    }
}

/// Authenticated request/response boundary to the platform.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Re-acquire the bearer token. Long runs call this before the final
    /// advisory steps since the original token may have expired.
    async fn refresh_auth(&self) -> Result<()> {
        Ok(())
    }
}

/// Server credentials in their two supported forms.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { username: String, password: String },
    Client { client_id: String, client_secret: String },
}

impl Credentials {
    pub fn from_config(auth: &AuthConfig) -> Result<Self> {
        match (
            &auth.username,
            &auth.password,
            &auth.client_id,
            &auth.client_secret,
        ) {
            (Some(username), Some(password), None, None) => Ok(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None, Some(client_id), Some(client_secret)) => Ok(Credentials::Client {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(DistributionError::Config(
                "auth requires username/password or client_id/client_secret".into(),
            )
            .into()),
        }
    }
}

/// Production transport over reqwest: persistent cookie jar for session
/// continuity, bearer token attached to every call once acquired.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Exchange the configured credentials for a bearer token.
    pub async fn acquire_token(&self) -> Result<()> {
        let (endpoint, response) = match &self.credentials {
            Credentials::Basic { username, password } => {
                let endpoint = Endpoint::AuthToken;
                let response = self
                    .client
                    .post(endpoint.url(&self.base_url))
                    .basic_auth(username, Some(password))
                    .send()
                    .await
                    .context("token request failed")?;
                (endpoint, response)
            }
            Credentials::Client {
                client_id,
                client_secret,
            } => {
                let endpoint = Endpoint::OauthToken;
                let response = self
                    .client
                    .post(endpoint.url(&self.base_url))
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                    ])
                    .send()
                    .await
                    .context("token request failed")?;
                (endpoint, response)
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(DistributionError::UnexpectedStatus {
                operation: "token exchange",
                status,
            }
            .into());
        }

        let payload: Value = response
            .json()
            .await
            .context("token response is not valid JSON")?;
        let key = endpoint
            .envelope_key()
            .expect("token endpoints carry an envelope key");
        let token = payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or(DistributionError::MissingResponseField {
                operation: "token exchange",
                field: "token",
            })?
            .to_string();

        *self.token.write().await = Some(token);
        debug!("bearer token acquired");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);

        if let Some(token) = self.token.read().await.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(accept) = request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Xml(xml) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/xml")
                .body(xml),
            RequestBody::FileUpload {
                path,
                file_name,
                fields,
            } => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read upload file: {}", path.display()))?;
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/octet-stream")
                    .context("invalid upload mime type")?;
                let mut form = reqwest::multipart::Form::new().part("file", part);
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                builder.multipart(form)
            }
        };

        let url = request.url.clone();
        let response = builder
            .send()
            .await
            .with_context(|| format!("{} {} failed", request.method.as_str(), url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;

        debug!(method = request.method.as_str(), %url, status, "request complete");
        Ok(TransportResponse { status, body })
    }

    async fn refresh_auth(&self) -> Result<()> {
        self.acquire_token().await
    }
}

/// Extract the payload under an endpoint's envelope key from a JSON body.
pub fn unwrap_envelope(endpoint: Endpoint, payload: &Value) -> Result<Value> {
    match endpoint.envelope_key() {
        Some(key) => match payload.get(key) {
            Some(inner) => Ok(inner.clone()),
            None => bail!("response missing envelope key '{key}'"),
        },
        None => Ok(payload.clone()),
    }
}
