// src/client.rs
//! Client side of the redesign flow: upload a photo, ask for a redesign,
//! save the result under a descriptive name.

use crate::config::{DELIVERY_CDN_HOST, UPLOAD_CDN_HOST};
use crate::errors::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RedesignError};
use crate::handlers::check_image_origin;
use crate::models::{GenerationRequest, PredictionResult, UploadedFile};
use crate::naming::compose_name;
use crate::services::downloader;
use crate::services::upload_service::validate_upload;
use log::info;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Style {
    Room { room_type: String, theme: String },
    Building { building_type: String, theme: String },
}

impl Style {
    /// (type, theme) as used for the download name.
    pub fn tags(&self) -> (&str, &str) {
        match self {
            Style::Room { room_type, theme } => (room_type.as_str(), theme.as_str()),
            Style::Building { building_type, theme } => (building_type.as_str(), theme.as_str()),
        }
    }
}

/// State of one redesign, from upload to download.
#[derive(Debug, Clone)]
pub struct RedesignSession {
    pub style: Style,
    pub hosted_url: Option<String>,
    pub original_file_name: Option<String>,
    pub predicted_image_url: Option<String>,
    pub predicted_image_loaded: bool,
}

impl RedesignSession {
    pub fn new(style: Style) -> Self {
        Self {
            style,
            hosted_url: None,
            original_file_name: None,
            predicted_image_url: None,
            predicted_image_loaded: false,
        }
    }

    pub fn accept_upload(&mut self, uploaded: UploadedFile) {
        self.hosted_url = Some(uploaded.hosted_url);
        self.original_file_name = Some(uploaded.original_file_name);
    }

    pub fn set_prediction(&mut self, url: String) {
        self.predicted_image_url = Some(url);
        self.predicted_image_loaded = false;
    }

    pub fn mark_loaded(&mut self) {
        self.predicted_image_loaded = self.predicted_image_url.is_some();
    }

    /// Clears everything derived from the current upload; the style stays.
    pub fn reset(&mut self) {
        self.hosted_url = None;
        self.original_file_name = None;
        self.predicted_image_url = None;
        self.predicted_image_loaded = false;
    }

    pub fn generation_request(&self) -> Option<GenerationRequest> {
        let image_url = self.hosted_url.clone()?;
        let mut request = GenerationRequest {
            image_url,
            ..Default::default()
        };
        match &self.style {
            Style::Room { room_type, theme } => {
                request.room_type = Some(room_type.clone());
                request.room_theme = Some(theme.clone());
            }
            Style::Building { building_type, theme } => {
                request.building_type = Some(building_type.clone());
                request.building_theme = Some(theme.clone());
            }
        }
        Some(request)
    }

    /// File name for saving the result, e.g. `photo-modern-living-room.jpg`.
    pub fn download_name(&self) -> Option<String> {
        let original = self.original_file_name.as_deref()?;
        let (type_tag, theme_tag) = self.style.tags();
        if type_tag.is_empty() || theme_tag.is_empty() {
            return None;
        }
        Some(compose_name(original, type_tag, theme_tag))
    }
}

/// MIME type inferred from a file extension, for the accepted image types.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

pub struct RedesignClient {
    client: Client,
    server: String,
    allowed_result_hosts: Vec<String>,
}

impl RedesignClient {
    pub fn new(server: &str) -> Self {
        Self {
            client: Client::new(),
            server: server.trim_end_matches('/').to_string(),
            allowed_result_hosts: vec![UPLOAD_CDN_HOST.to_string(), DELIVERY_CDN_HOST.to_string()],
        }
    }

    pub fn with_allowed_result_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_result_hosts = hosts;
        self
    }

    async fn error_from(response: Response) -> RedesignError {
        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            return RedesignError::RateLimited {
                limit: header(RATE_LIMIT_LIMIT_HEADER),
                remaining: header(RATE_LIMIT_REMAINING_HEADER),
            };
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("server returned {}", status));

        match status {
            StatusCode::BAD_REQUEST => RedesignError::Validation(message),
            StatusCode::GATEWAY_TIMEOUT => RedesignError::GenerationFailed(message),
            _ => RedesignError::Network(message),
        }
    }

    /// Checks the file locally, then sends it through the server's safety gate.
    pub async fn upload(&self, path: &Path) -> Result<UploadedFile, RedesignError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RedesignError::Validation(format!("Invalid file path {}", path.display()))
            })?
            .to_string();
        let mime = mime_for_path(path).ok_or_else(|| {
            RedesignError::Validation(format!("{} is not a JPEG or PNG image", file_name))
        })?;

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| {
                RedesignError::Validation(format!("Cannot read {}: {}", path.display(), e))
            })?;
        validate_upload(mime, data.len())?;

        let part = Part::bytes(data)
            .file_name(file_name.clone())
            .mime_str(mime)
            .map_err(|e| RedesignError::Validation(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/upload", self.server))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RedesignError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let uploaded: UploadedFile = response
            .json()
            .await
            .map_err(|e| RedesignError::Serialization(e.to_string()))?;
        info!("Uploaded {} as {}", file_name, uploaded.hosted_url);
        Ok(uploaded)
    }

    pub async fn predict(&self, request: &GenerationRequest) -> Result<String, RedesignError> {
        let response = self
            .client
            .post(format!("{}/predict", self.server))
            .json(request)
            .send()
            .await
            .map_err(|e| RedesignError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let result: PredictionResult = response
            .json()
            .await
            .map_err(|e| RedesignError::Serialization(e.to_string()))?;
        if result.predicted_image_url.is_empty() {
            return Err(RedesignError::GenerationFailed(
                "No predicted image found. Try Again!".to_string(),
            ));
        }
        Ok(result.predicted_image_url)
    }

    pub async fn download_result(
        &self,
        session: &RedesignSession,
        dir: &Path,
    ) -> Result<PathBuf, RedesignError> {
        let missing =
            || RedesignError::Validation("No predicted image found. Try Again!".to_string());
        let url = session.predicted_image_url.as_deref().ok_or_else(missing)?;
        let name = session.download_name().ok_or_else(missing)?;

        check_image_origin(url, &self.allowed_result_hosts)?;
        downloader::download(&self.client, url, &name, dir).await
    }

    /// Upload, redesign, download. The session ends up holding the result.
    pub async fn run(
        &self,
        session: &mut RedesignSession,
        image: &Path,
        out_dir: &Path,
    ) -> Result<PathBuf, RedesignError> {
        session.reset();
        let uploaded = self.upload(image).await?;
        session.accept_upload(uploaded);

        let request = session
            .generation_request()
            .ok_or_else(|| RedesignError::Validation("No uploaded image".to_string()))?;
        let url = self.predict(&request).await?;
        session.set_prediction(url);

        let path = self.download_result(session, out_dir).await?;
        session.mark_loaded();
        Ok(path)
    }
}
