// src/errors.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-RateLimit-Limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-RateLimit-Remaining";

#[derive(Error, Debug)]
pub enum RedesignError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    UnsafeImage(String),

    #[error("Too many uploads recently. Try again in a few minutes.")]
    RateLimited { limit: u64, remaining: u64 },

    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    #[error("Image generation timed out after {attempts} status checks")]
    GenerationTimeout { attempts: u32 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to download image: {0}")]
    DownloadFailed(String),
}

impl From<redis::RedisError> for RedesignError {
    fn from(e: redis::RedisError) -> Self {
        RedesignError::Redis(e.to_string())
    }
}

impl RedesignError {
    fn label(&self) -> &'static str {
        match self {
            RedesignError::Validation(_) => "Validation error",
            RedesignError::UnsafeImage(_) => "Unsafe image",
            RedesignError::RateLimited { .. } => "Rate limit exceeded",
            RedesignError::GenerationFailed(_) => "Generation failed",
            RedesignError::GenerationTimeout { .. } => "Generation timed out",
            RedesignError::Network(_) => "Upstream service error",
            RedesignError::ModelLoad(_) => "Safety model unavailable",
            RedesignError::Classification(_) => "Classification error",
            RedesignError::Upload(_) => "Upload service error",
            RedesignError::Redis(_) => "Database error",
            RedesignError::Serialization(_) => "Data processing error",
            RedesignError::Config(_) => "Configuration error",
            RedesignError::DownloadFailed(_) => "Download failed",
        }
    }
}

impl ResponseError for RedesignError {
    fn status_code(&self) -> StatusCode {
        match self {
            RedesignError::Validation(_) | RedesignError::UnsafeImage(_) => StatusCode::BAD_REQUEST,
            RedesignError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RedesignError::GenerationFailed(_)
            | RedesignError::Network(_)
            | RedesignError::Upload(_)
            | RedesignError::DownloadFailed(_) => StatusCode::BAD_GATEWAY,
            RedesignError::GenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RedesignError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            RedesignError::Classification(_)
            | RedesignError::Redis(_)
            | RedesignError::Serialization(_)
            | RedesignError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());

        if let RedesignError::RateLimited { limit, remaining } = self {
            builder
                .insert_header((RATE_LIMIT_LIMIT_HEADER, limit.to_string()))
                .insert_header((RATE_LIMIT_REMAINING_HEADER, remaining.to_string()));
        }

        builder.json(serde_json::json!({
            "error": self.label(),
            "message": self.to_string()
        }))
    }
}
