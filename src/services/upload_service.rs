// src/services/upload_service.rs
use crate::config::UploadConfig;
use crate::errors::RedesignError;
use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use reqwest::Client;
use serde::Deserialize;

pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024;
pub const MAX_FILE_COUNT: usize = 1;
pub const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];

/// Checks an incoming file against the upload limits.
pub fn validate_upload(content_type: &str, size: usize) -> Result<(), RedesignError> {
    if !ACCEPTED_MIME_TYPES.contains(&content_type) {
        return Err(RedesignError::Validation(format!(
            "Unsupported file type '{}'; expected one of {}",
            content_type,
            ACCEPTED_MIME_TYPES.join(", ")
        )));
    }
    if size == 0 {
        return Err(RedesignError::Validation("File is empty".to_string()));
    }
    if size > MAX_FILE_SIZE {
        return Err(RedesignError::Validation(format!(
            "File is {} bytes; the limit is {} bytes",
            size, MAX_FILE_SIZE
        )));
    }
    Ok(())
}

/// Stores a file somewhere publicly reachable and returns its URL.
#[async_trait]
pub trait FileHost: Send + Sync {
    async fn host(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, RedesignError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_url: String,
}

/// Upload.io binary upload API.
pub struct UploadIoService {
    client: Client,
    api_base: String,
    api_key: String,
    account_id: String,
}

impl UploadIoService {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            account_id: config.account_id.clone(),
        }
    }
}

#[async_trait]
impl FileHost for UploadIoService {
    async fn host(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, RedesignError> {
        let size = data.len();
        let response = self
            .client
            .post(format!(
                "{}/v2/accounts/{}/uploads/binary",
                self.api_base, self.account_id
            ))
            .bearer_auth(&self.api_key)
            .header("Content-Type", content_type)
            .query(&[("originalFileName", file_name)])
            .body(data)
            .send()
            .await
            .map_err(|e| RedesignError::Upload(format!("Upload request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RedesignError::Upload(format!(
                "Upload service returned {}: {}",
                status, error_text
            )));
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| {
                RedesignError::Serialization(format!("Failed to parse upload response: {}", e))
            })?;

        info!("Hosted {} ({} bytes) at {}", file_name, size, uploaded.file_url);
        Ok(uploaded.file_url)
    }
}
