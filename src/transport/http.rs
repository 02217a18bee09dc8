//! HTTP detection endpoint client
//!
//! `POST {endpoint}/api/process-frame` with a multipart form carrying one
//! `frame` part (`frame.jpg`, `image/jpeg`). A 2xx answer carries the
//! annotated image; errors carry a JSON body with an `error` field.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

use super::{FrameProcessor, TransportError};
use crate::error::{AppError, Result};
use crate::video::SampledFrame;

const PROCESS_PATH: &str = "/api/process-frame";
const HEALTH_PATH: &str = "/api/health";
/// Longest error body excerpt kept in a [`TransportError::Status`]
const MAX_ERROR_MESSAGE: usize = 200;

/// HTTP processor configuration
#[derive(Debug, Clone)]
pub struct HttpProcessorConfig {
    /// Base URL of the detection backend, e.g. `http://localhost:5000`
    pub endpoint: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
}

impl Default for HttpProcessorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Detection backend reached over HTTP
pub struct HttpFrameProcessor {
    client: reqwest::Client,
    process_url: String,
    health_url: String,
}

impl HttpFrameProcessor {
    pub fn new(config: &HttpProcessorConfig) -> Result<Self> {
        let base = config.endpoint.trim_end_matches('/');
        if base.is_empty() {
            return Err(AppError::Config("detection endpoint is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            process_url: format!("{}{}", base, PROCESS_PATH),
            health_url: format!("{}{}", base, HEALTH_PATH),
        })
    }

    pub fn process_url(&self) -> &str {
        &self.process_url
    }

    /// Probe the backend health endpoint
    pub async fn health(&self) -> std::result::Result<(), TransportError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.bytes().await.unwrap_or_default();
            Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }
}

#[async_trait]
impl FrameProcessor for HttpFrameProcessor {
    async fn process(&self, frame: SampledFrame) -> std::result::Result<Bytes, TransportError> {
        let part = Part::bytes(frame.data.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let form = Form::new().part("frame", part);

        let response = self
            .client
            .post(&self.process_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ref ct) = content_type {
            if !ct.starts_with("image/") {
                return Err(TransportError::InvalidResponse(format!(
                    "unexpected content type {}",
                    ct
                )));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if body.is_empty() {
            return Err(TransportError::InvalidResponse("empty body".to_string()));
        }

        debug!("Frame #{} processed ({} bytes)", frame.sequence, body.len());
        Ok(body)
    }
}

/// Extract a readable message from an error body
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "no body".to_string();
    }
    text.chars().take(MAX_ERROR_MESSAGE).collect()
}
