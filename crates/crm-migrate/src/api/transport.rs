//! Transport to the destination CRM's REST API.
//!
//! [`CrmTransport`] is the seam every client goes through: the production
//! [`HttpTransport`] speaks bearer-authenticated JSON over HTTPS, tests swap
//! in a scripted implementation.

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::retry::CallError;
use crate::config::ApiConfig;
use crate::error::Result;

/// A file to upload through the file manager endpoint.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Extra multipart text fields (e.g. `folderId`, `options`).
    pub fields: Vec<(String, String)>,
}

/// Issue single remote calls. No retry happens at this level.
#[async_trait]
pub trait CrmTransport: Send + Sync {
    /// POST a JSON body to `path` and return the decoded JSON response.
    async fn post_json(&self, path: &str, body: &Value) -> std::result::Result<Value, CallError>;

    /// POST a multipart file upload to `path`.
    async fn post_file(&self, path: &str, upload: &FileUpload)
        -> std::result::Result<Value, CallError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    /// Build a transport from the API settings.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.private_app_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn into_json(response: reqwest::Response) -> std::result::Result<Value, CallError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::status(status.as_u16(), body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| CallError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CrmTransport for HttpTransport {
    async fn post_json(&self, path: &str, body: &Value) -> std::result::Result<Value, CallError> {
        debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        Self::into_json(response).await
    }

    async fn post_file(
        &self,
        path: &str,
        upload: &FileUpload,
    ) -> std::result::Result<Value, CallError> {
        debug!("POST {} ({})", path, upload.file_name);
        let part =
            multipart::Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone());
        let mut form = multipart::Form::new()
            .part("file", part)
            .text("fileName", upload.file_name.clone());
        for (name, value) in &upload.fields {
            form = form.text(name.clone(), value.clone());
        }

        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        Self::into_json(response).await
    }
}
