//! File manager calls used by the file migration: folder creation and
//! single-file uploads. Each call is its own unit of work.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use super::retry::{CallError, RetryPolicy, UnitOutcome};
use super::transport::{CrmTransport, FileUpload};
use super::Throttle;
use crate::runlog::RunLog;

const FOLDERS_PATH: &str = "/files/v3/folders";
const FILES_PATH: &str = "/files/v3/files";

/// Uploaded files are never public.
const UPLOAD_OPTIONS: &str = r#"{ "access": "PRIVATE" }"#;

pub struct FileManagerClient {
    transport: Arc<dyn CrmTransport>,
    retry: RetryPolicy,
    throttle: Throttle,
}

/// Read an `id` that may come back as a string or a number.
fn id_of(value: &Value) -> Result<String, CallError> {
    match value.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(CallError::Decode("response has no id".to_string())),
    }
}

impl FileManagerClient {
    pub fn new(transport: Arc<dyn CrmTransport>, retry: RetryPolicy, throttle: Throttle) -> Self {
        Self {
            transport,
            retry,
            throttle,
        }
    }

    /// Create folder `name` under `parent_path`, returning its id.
    pub async fn create_folder(
        &self,
        name: &str,
        parent_path: &str,
        log: &mut RunLog,
    ) -> Option<String> {
        let body = json!({ "name": name, "parentPath": parent_path });
        let unit = format!("folder {}", name);
        let transport = &self.transport;
        let body = &body;
        let outcome = self
            .retry
            .execute(&unit, log, || async move {
                let response = transport.post_json(FOLDERS_PATH, body).await?;
                id_of(&response)
            })
            .await;
        self.throttle.pause().await;

        match outcome {
            UnitOutcome::Success(id) => {
                log.info(format!("Created folder {}", name));
                Some(id)
            }
            UnitOutcome::Dropped { .. } => None,
        }
    }

    /// Upload the file at `path` into `folder_id`, returning the file id.
    pub async fn upload_file(&self, path: &Path, folder_id: &str, log: &mut RunLog) -> Option<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log.error(format!("Error reading file {}: {}", path.display(), e));
                return None;
            }
        };

        let upload = FileUpload {
            file_name: file_name.clone(),
            bytes,
            fields: vec![
                ("folderId".to_string(), folder_id.to_string()),
                ("options".to_string(), UPLOAD_OPTIONS.to_string()),
            ],
        };
        let unit = format!("file {}", file_name);
        let transport = &self.transport;
        let upload = &upload;
        let outcome = self
            .retry
            .execute(&unit, log, || async move {
                let response = transport.post_file(FILES_PATH, upload).await?;
                id_of(&response)
            })
            .await;
        self.throttle.pause().await;

        match outcome {
            UnitOutcome::Success(id) => {
                log.info(format!("Uploaded file {}", file_name));
                Some(id)
            }
            UnitOutcome::Dropped { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[tokio::test(start_paused = true)]
    async fn test_create_folder_returns_id() {
        let transport = Arc::new(ScriptedTransport::new(|_, body| {
            Ok(json!({"id": 9001, "name": body["name"].clone()}))
        }));
        let client = FileManagerClient::new(transport.clone(), RetryPolicy::new(), Throttle::none());
        let mut log = RunLog::new();

        let id = client
            .create_folder("006A", "/Migrated Files/deals", &mut log)
            .await;

        assert_eq!(id.as_deref(), Some("9001"));
        let calls = transport.calls();
        assert_eq!(calls[0].path, FOLDERS_PATH);
        assert_eq!(calls[0].body["parentPath"], "/Migrated Files/deals");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_sends_folder_and_private_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(json!({"id": "f-1"}))));
        let client = FileManagerClient::new(transport.clone(), RetryPolicy::new(), Throttle::none());
        let mut log = RunLog::new();

        let id = client.upload_file(&path, "9001", &mut log).await;

        assert_eq!(id.as_deref(), Some("f-1"));
        let uploads = transport.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "contract.pdf");
        assert_eq!(uploads[0].bytes, b"%PDF-1.4".to_vec());
        assert!(uploads[0]
            .fields
            .contains(&("folderId".to_string(), "9001".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_id_is_dropped() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(json!({"name": "x"}))));
        let client = FileManagerClient::new(transport.clone(), RetryPolicy::new(), Throttle::none());
        let mut log = RunLog::new();

        let id = client.create_folder("x", "/Migrated Files/deals", &mut log).await;

        assert!(id.is_none());
        assert_eq!(transport.calls().len(), 1);
    }
}
