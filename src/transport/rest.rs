use super::{Envelope, Params, Transport, TransportError};
use crate::config::TransportConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// reqwest-backed transport.
///
/// Relative URLs are joined onto `base_url`. Default headers (auth) live on
/// the client and are sent with every request; they can only be changed
/// through the client itself, never through a model.
pub struct RestClient {
    http_client: Client,
    base_url: String,
    headers: RwLock<BTreeMap<String, String>>,
}

impl RestClient {
    /// Create a client for `base_url` with a 30 second timeout.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::from_config(&TransportConfig {
            base_url: base_url.to_string(),
            ..TransportConfig::default()
        })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("mojo-model/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: RwLock::new(
                config
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        })
    }

    /// Set a header sent with every subsequent request.
    pub fn set_header(&self, name: &str, value: &str) {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove_header(&self, name: &str) {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn set_auth_token(&self, token: &str) {
        self.set_header("Authorization", &format!("Bearer {}", token));
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: &Params,
        body: Option<&Value>,
    ) -> Result<Envelope, TransportError> {
        let target = self.resolve(url);
        debug!(method = %method, url = %target, "Sending request");

        let mut request = self
            .http_client
            .request(method, &target)
            .query(&query_pairs(params));

        let headers: Vec<(String, String)> = self
            .headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in headers {
            request = request.header(name, value);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(data) => data,
                Err(e) if status.is_success() => return Err(TransportError::Decode(e.to_string())),
                Err(_) => Value::String(text),
            }
        };

        let message = if status.is_success() {
            None
        } else {
            Some(
                data.get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!(
                            "{} {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Error")
                        )
                    }),
            )
        };

        Ok(Envelope {
            success: status.is_success(),
            status: status.as_u16(),
            errors: data.get("errors").cloned(),
            message,
            data,
        })
    }
}

/// Flatten params into string query pairs. Nulls are dropped; nested values
/// are sent as their JSON text.
fn query_pairs(params: &Params) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[async_trait]
impl Transport for RestClient {
    async fn get(
        &self,
        url: &str,
        params: &Params,
        signal: CancellationToken,
    ) -> Result<Envelope, TransportError> {
        tokio::select! {
            biased;
            _ = signal.cancelled() => Err(TransportError::Aborted),
            result = self.send(Method::GET, url, params, None) => result,
        }
    }

    async fn post(
        &self,
        url: &str,
        body: &Value,
        params: &Params,
    ) -> Result<Envelope, TransportError> {
        self.send(Method::POST, url, params, Some(body)).await
    }

    async fn put(
        &self,
        url: &str,
        body: &Value,
        params: &Params,
    ) -> Result<Envelope, TransportError> {
        self.send(Method::PUT, url, params, Some(body)).await
    }

    async fn delete(&self, url: &str, params: &Params) -> Result<Envelope, TransportError> {
        self.send(Method::DELETE, url, params, None).await
    }
}
