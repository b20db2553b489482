// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use log::{error, info};
use std::sync::Arc;

use redesigner::AppState;
use redesigner::config::Config;
use redesigner::handlers;
use redesigner::services::safety_classifier::RemoteModelLoader;
use redesigner::services::{GenerationService, RateLimiter, SafetyClassifier, UploadIoService};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Redesigner service...");

    let config = Config::from_env().map_err(|e| {
        error!("{}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    // Initialize services
    let rate_limiter = RateLimiter::from_config(&config.rate_limit)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let generation = GenerationService::from_config(&config.replicate)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let classifier = Arc::new(SafetyClassifier::new(Arc::new(RemoteModelLoader::new(
        config.nsfw_model_url.clone(),
    ))));
    classifier.preload();

    let app_state = AppState {
        rate_limiter: Arc::new(rate_limiter),
        generation: Arc::new(generation),
        classifier,
        file_host: Arc::new(UploadIoService::new(&config.upload)),
        allowed_image_hosts: Arc::new(config.allowed_image_hosts.clone()),
        trust_proxy_headers: config.trust_proxy_headers,
    };

    let bind = config.bind_address();
    info!("Starting HTTP server on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind(bind)?
    .run()
    .await
}
