// src/services/mod.rs
pub mod downloader;
pub mod rate_limiter;
pub mod replicate_service;
pub mod safety_classifier;
pub mod upload_service;

pub use rate_limiter::RateLimiter;
pub use replicate_service::GenerationService;
pub use safety_classifier::SafetyClassifier;
pub use upload_service::{FileHost, UploadIoService};
