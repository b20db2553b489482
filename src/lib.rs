// src/lib.rs
use std::sync::Arc;

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod naming;
pub mod services;

use crate::services::{FileHost, GenerationService, RateLimiter, SafetyClassifier};

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub generation: Arc<GenerationService>,
    pub classifier: Arc<SafetyClassifier>,
    pub file_host: Arc<dyn FileHost>,
    pub allowed_image_hosts: Arc<Vec<String>>,
    pub trust_proxy_headers: bool,
}
