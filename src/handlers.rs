// src/handlers.rs
use crate::config::Enforcement;
use crate::errors::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RedesignError};
use crate::models::*;
use crate::services::upload_service::{MAX_FILE_COUNT, MAX_FILE_SIZE, validate_upload};
use crate::AppState;
use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, web};
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use log::{info, warn};
use reqwest::Url;
use std::net::SocketAddr;

pub const NSFW_REJECTION_MESSAGE: &str =
    "Detected a NSFW image. If this was a mistake, please contact the site owner.";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/upload", web::post().to(upload_image))
        .route("/predict", web::post().to(predict))
        .route("/restore", web::post().to(predict))
        .route("/health", web::get().to(health_check));
}

/// Client address used as the rate limit key, without the port.
///
/// `Forwarded` / `X-Forwarded-For` are client-controlled, so they are only
/// read when the service is configured to sit behind a trusted proxy.
fn client_ip(req: &HttpRequest, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let info = req.connection_info();
        let addr = info.realip_remote_addr().unwrap_or("unknown");
        return addr
            .parse::<SocketAddr>()
            .map(|sa| sa.ip().to_string())
            .unwrap_or_else(|_| addr.to_string());
    }
    req.peer_addr()
        .map(|sa| sa.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Only https URLs on one of the configured hosts are passed upstream.
pub fn check_image_origin(url: &str, allowed_hosts: &[String]) -> Result<(), RedesignError> {
    let parsed = Url::parse(url)
        .map_err(|e| RedesignError::Validation(format!("imageUrl is not a valid URL: {}", e)))?;

    let host = parsed.host_str().unwrap_or_default();
    if parsed.scheme() != "https" || !allowed_hosts.iter().any(|h| h == host) {
        return Err(RedesignError::Validation(format!(
            "imageUrl must be an https URL on one of: {}",
            allowed_hosts.join(", ")
        )));
    }
    Ok(())
}

pub async fn upload_image(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, RedesignError> {
    let mut upload: Option<(String, String, Bytes)> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| RedesignError::Validation(format!("Malformed upload: {}", e)))?
    {
        let Some(filename) = field.content_disposition().get_filename().map(str::to_string) else {
            continue;
        };
        if upload.is_some() {
            return Err(RedesignError::Validation(format!(
                "At most {} file may be uploaded at a time",
                MAX_FILE_COUNT
            )));
        }

        let content_type = field
            .content_type()
            .map(|ct| ct.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut image_data = BytesMut::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| RedesignError::Validation(format!("Malformed upload: {}", e)))?
        {
            if image_data.len() + chunk.len() > MAX_FILE_SIZE {
                return Err(RedesignError::Validation(format!(
                    "File exceeds the {} MiB limit",
                    MAX_FILE_SIZE / (1024 * 1024)
                )));
            }
            image_data.extend_from_slice(&chunk);
        }

        upload = Some((filename, content_type, image_data.freeze()));
    }

    let (filename, content_type, image_data) =
        upload.ok_or_else(|| RedesignError::Validation("No file provided".to_string()))?;
    validate_upload(&content_type, image_data.len())?;

    if !data.classifier.is_safe_image(&image_data).await {
        warn!("Blocked upload of {}: classified as NSFW", filename);
        info!(target: "analytics", "event=nsfw-image-blocked file={}", filename);
        return Err(RedesignError::UnsafeImage(NSFW_REJECTION_MESSAGE.to_string()));
    }

    let hosted_url = data
        .file_host
        .host(&filename, &content_type, image_data)
        .await?;

    Ok(HttpResponse::Ok().json(UploadedFile {
        hosted_url,
        original_file_name: filename,
        uploaded_at: chrono::Utc::now(),
    }))
}

pub async fn predict(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<GenerationRequest>,
) -> Result<HttpResponse, RedesignError> {
    let request = body.into_inner();
    check_image_origin(&request.image_url, &data.allowed_image_hosts)?;
    if request.style_tags().is_none() {
        return Err(RedesignError::Validation(
            "Either roomType or buildingType must be provided".to_string(),
        ));
    }

    let ip = client_ip(&req, data.trust_proxy_headers);
    let outcome = data.rate_limiter.check_and_consume(&ip).await?;
    if !outcome.allowed {
        info!("Rate limit hit for {}", ip);
        return Err(RedesignError::RateLimited {
            limit: outcome.limit,
            remaining: outcome.remaining,
        });
    }

    let predicted_image_url = data.generation.generate(&request).await?;

    let mut response = HttpResponse::Ok();
    if data.rate_limiter.enforcement() == Enforcement::Enabled {
        response
            .insert_header((RATE_LIMIT_LIMIT_HEADER, outcome.limit.to_string()))
            .insert_header((RATE_LIMIT_REMAINING_HEADER, outcome.remaining.to_string()));
    }
    Ok(response.json(PredictionResult { predicted_image_url }))
}

pub async fn health_check(data: web::Data<AppState>) -> HttpResponse {
    let rate_limiting = match data.rate_limiter.enforcement() {
        Enforcement::Enabled => "enabled",
        Enforcement::Disabled => "disabled",
    };
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "redesigner",
        "version": env!("CARGO_PKG_VERSION"),
        "rateLimiting": rate_limiting
    }))
}
