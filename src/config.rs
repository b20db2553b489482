// src/config.rs
use crate::errors::RedesignError;
use std::env;
use std::time::Duration;

pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com";
pub const DEFAULT_MODEL_VERSION: &str =
    "435061a1b5a4c1e26740464bf786efdfa9cb3a3ac488595a2de23e143fdb0117";
pub const DEFAULT_UPLOAD_API_BASE: &str = "https://api.upload.io";
pub const DEFAULT_NSFW_MODEL_URL: &str = "https://www.redesigner.io/model/nsfw.onnx";
pub const UPLOAD_CDN_HOST: &str = "upcdn.io";
pub const DELIVERY_CDN_HOST: &str = "replicate.delivery";

/// Whether the rate limiter gate is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    Enabled,
    Disabled,
}

impl Enforcement {
    fn parse(value: &str) -> Result<Self, RedesignError> {
        match value.trim().to_lowercase().as_str() {
            "enabled" | "true" | "on" => Ok(Enforcement::Enabled),
            "disabled" | "false" | "off" => Ok(Enforcement::Disabled),
            other => Err(RedesignError::Config(format!(
                "RATE_LIMIT_ENFORCEMENT must be 'enabled' or 'disabled', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enforcement: Enforcement,
    pub redis_url: Option<String>,
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enforcement: Enforcement::Disabled,
            redis_url: None,
            max_requests: 5,
            window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_base: String,
    pub api_token: String,
    pub model_version: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub api_base: String,
    pub api_key: String,
    pub account_id: String,
}

/// Service configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub replicate: ReplicateConfig,
    pub upload: UploadConfig,
    pub rate_limit: RateLimitConfig,
    pub nsfw_model_url: String,
    pub allowed_image_hosts: Vec<String>,
    pub trust_proxy_headers: bool,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                         |
    /// |------------------------------|---------------------------------|
    /// | `HOST`                       | `0.0.0.0`                       |
    /// | `PORT`                       | `8080`                          |
    /// | `REPLICATE_API_TOKEN`        | required                        |
    /// | `REPLICATE_API_BASE`         | `https://api.replicate.com`     |
    /// | `REPLICATE_MODEL_VERSION`    | pinned ControlNet version       |
    /// | `REPLICATE_POLL_INTERVAL_MS` | `1000`                          |
    /// | `REPLICATE_MAX_POLLS`        | `300`                           |
    /// | `UPLOAD_IO_API_KEY`          | required                        |
    /// | `UPLOAD_IO_ACCOUNT_ID`       | derived from the API key        |
    /// | `RATE_LIMIT_REDIS_URL`       | unset (limiter disabled)        |
    /// | `RATE_LIMIT_ENFORCEMENT`     | `enabled` iff a Redis URL is set|
    /// | `NSFW_MODEL_URL`             | hosted model                    |
    /// | `ALLOWED_IMAGE_HOSTS`        | `upcdn.io,replicate.delivery`   |
    /// | `TRUST_PROXY_HEADERS`        | `false`                         |
    pub fn from_env() -> Result<Self, RedesignError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_var("PORT", 8080u16)?;

        let replicate = ReplicateConfig {
            api_base: env::var("REPLICATE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_REPLICATE_API_BASE.into()),
            api_token: require_var("REPLICATE_API_TOKEN")?,
            model_version: env::var("REPLICATE_MODEL_VERSION")
                .unwrap_or_else(|_| DEFAULT_MODEL_VERSION.into()),
            poll_interval: Duration::from_millis(parse_var("REPLICATE_POLL_INTERVAL_MS", 1000u64)?),
            max_polls: parse_var("REPLICATE_MAX_POLLS", 300u32)?,
        };

        let api_key = require_var("UPLOAD_IO_API_KEY")?;
        let account_id = match env::var("UPLOAD_IO_ACCOUNT_ID") {
            Ok(id) => id,
            Err(_) => account_id_from_key(&api_key)?,
        };
        let upload = UploadConfig {
            api_base: env::var("UPLOAD_IO_API_BASE")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_API_BASE.into()),
            api_key,
            account_id,
        };

        let redis_url = env::var("RATE_LIMIT_REDIS_URL").ok().filter(|u| !u.is_empty());
        let enforcement = match env::var("RATE_LIMIT_ENFORCEMENT") {
            Ok(v) => Enforcement::parse(&v)?,
            Err(_) if redis_url.is_some() => Enforcement::Enabled,
            Err(_) => Enforcement::Disabled,
        };
        let rate_limit = RateLimitConfig {
            enforcement,
            redis_url,
            ..RateLimitConfig::default()
        };

        let allowed_image_hosts = env::var("ALLOWED_IMAGE_HOSTS")
            .unwrap_or_else(|_| format!("{},{}", UPLOAD_CDN_HOST, DELIVERY_CDN_HOST))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Self {
            host,
            port,
            replicate,
            upload,
            rate_limit,
            nsfw_model_url: env::var("NSFW_MODEL_URL")
                .unwrap_or_else(|_| DEFAULT_NSFW_MODEL_URL.into()),
            allowed_image_hosts,
            trust_proxy_headers: parse_var("TRUST_PROXY_HEADERS", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RedesignError> {
        if self.replicate.max_polls == 0 {
            return Err(RedesignError::Config(
                "REPLICATE_MAX_POLLS must be greater than 0".into(),
            ));
        }
        if self.allowed_image_hosts.is_empty() {
            return Err(RedesignError::Config(
                "ALLOWED_IMAGE_HOSTS must name at least one host".into(),
            ));
        }
        if self.rate_limit.enforcement == Enforcement::Enabled
            && self.rate_limit.redis_url.is_none()
        {
            return Err(RedesignError::Config(
                "RATE_LIMIT_ENFORCEMENT=enabled requires RATE_LIMIT_REDIS_URL".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

fn require_var(name: &str) -> Result<String, RedesignError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RedesignError::Config(format!("{} must be set", name)))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, RedesignError> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| RedesignError::Config(format!("{} has an invalid value: '{}'", name, v))),
        Err(_) => Ok(default),
    }
}

/// Upload.io keys look like `public_W142hJk...`; the account id is the
/// first seven characters after the prefix.
pub fn account_id_from_key(api_key: &str) -> Result<String, RedesignError> {
    api_key
        .split_once('_')
        .map(|(_, rest)| rest)
        .filter(|rest| rest.len() >= 7)
        .and_then(|rest| rest.get(..7))
        .map(str::to_string)
        .ok_or_else(|| {
            RedesignError::Config(
                "UPLOAD_IO_API_KEY is malformed; set UPLOAD_IO_ACCOUNT_ID explicitly".into(),
            )
        })
}
