//! Scripted transport for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

use crate::api::{CallError, CrmTransport, FileUpload};
use crate::config::Config;
use std::path::Path;

type Handler = dyn Fn(&str, &Value) -> Result<Value, CallError> + Send + Sync;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub path: String,
    pub body: Value,
}

/// Answers every request from a closure and records what was sent.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
    uploads: Mutex<Vec<FileUpload>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded JSON calls whose path contains `fragment`.
    pub fn calls_to(&self, fragment: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.path.contains(fragment))
            .collect()
    }

    pub fn uploads(&self) -> Vec<FileUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrmTransport for ScriptedTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, CallError> {
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            body: body.clone(),
        });
        (self.handler)(path, body)
    }

    async fn post_file(&self, path: &str, upload: &FileUpload) -> Result<Value, CallError> {
        self.uploads.lock().unwrap().push(upload.clone());
        (self.handler)(path, &json!({ "fileName": upload.file_name }))
    }
}

/// Answer a membership search by echoing one record per requested value
/// that `known` accepts, with ids produced by `id_for`.
pub(crate) fn search_response<K, I>(body: &Value, known: K, id_for: I) -> Value
where
    K: Fn(&str) -> bool,
    I: Fn(&str) -> String,
{
    let filter = &body["filterGroups"][0]["filters"][0];
    let property = filter["propertyName"].as_str().unwrap_or_default();
    let results: Vec<Value> = filter["values"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .filter(|v| known(v))
                .map(|v| json!({"id": id_for(v), "properties": {property: v}}))
                .collect()
        })
        .unwrap_or_default();
    json!({ "results": results })
}

/// A complete configuration rooted at `root`, with throttling disabled.
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.api.private_app_key = "pat-test".to_string();
    config.api.throttle_ms = 0;
    config.objects.company_ext_id = "company_ext".to_string();
    config.objects.contact_ext_id = "contact_ext".to_string();
    config.objects.deal_ext_id = "deal_ext".to_string();
    config.objects.note_ext_id = "note_ext".to_string();
    config.deals.company_column = Some("AccountId".to_string());
    config.deals.contact_column = Some("ContactId".to_string());
    config.transform.source_column = Some("Email__c".to_string());
    config.transform.target_column = Some("email".to_string());
    config.paths.data_dir = root.join("data");
    config.paths.files_dir = root.join("files");
    config.paths.logs_dir = root.join("logs");
    config
}
