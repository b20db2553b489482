// src/services/replicate_service.rs
use crate::config::ReplicateConfig;
use crate::errors::RedesignError;
use crate::models::*;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub const GAMING_ROOM: &str = "Gaming Room";
pub const GAMING_ROOM_PROMPT: &str =
    "a room for gaming with gaming computers, gaming consoles, and gaming chairs";
pub const POSITIVE_PROMPT: &str = "best quality, extremely detailed, photo from Pinterest, interior, cinematic photo, ultra-detailed, ultra-realistic, award-winning";
pub const NEGATIVE_PROMPT: &str = "longbody, lowres, bad anatomy, bad hands, missing fingers, extra digit, fewer digits, cropped, worst quality, low quality";
pub const MISSING_OUTPUT_PLACEHOLDER: &str = "Failed to generate image";

/// Index of the final image in a succeeded job's `output`; the model emits
/// its control map first.
const FINAL_OUTPUT_INDEX: usize = 1;

/// The remote synthesis API, as far as the orchestrator needs it.
#[async_trait]
pub trait PredictionBackend: Send + Sync {
    async fn create_prediction(&self, body: &CreatePrediction) -> Result<Prediction, RedesignError>;
    async fn get_prediction(&self, id: &str) -> Result<Prediction, RedesignError>;
}

pub struct ReplicateClient {
    client: Client,
    api_base: String,
    api_token: String,
}

impl ReplicateClient {
    pub fn new(api_base: &str, api_token: String) -> Result<Self, RedesignError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RedesignError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    async fn read_prediction(
        &self,
        response: reqwest::Response,
    ) -> Result<Prediction, RedesignError> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RedesignError::Network(format!(
                "Replicate returned {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| {
                RedesignError::Serialization(format!("Failed to parse Replicate response: {}", e))
            })
    }
}

#[async_trait]
impl PredictionBackend for ReplicateClient {
    async fn create_prediction(
        &self,
        body: &CreatePrediction,
    ) -> Result<Prediction, RedesignError> {
        let response = self
            .client
            .post(format!("{}/v1/predictions", self.api_base))
            .header("Authorization", format!("Token {}", self.api_token))
            .json(body)
            .send()
            .await
            .map_err(|e| RedesignError::Network(format!("Replicate request failed: {}", e)))?;

        self.read_prediction(response).await
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction, RedesignError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.api_base, id))
            .header("Authorization", format!("Token {}", self.api_token))
            .send()
            .await
            .map_err(|e| RedesignError::Network(format!("Replicate request failed: {}", e)))?;

        self.read_prediction(response).await
    }
}

/// How often and how long to wait on a job.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 300,
        }
    }
}

/// Builds the text prompt for a request.
///
/// Room style wins when present; "Gaming Room" has its own fixed prompt.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let lower = |s: &Option<String>| s.as_deref().unwrap_or("").to_lowercase();

    match request.room_type.as_deref() {
        Some(GAMING_ROOM) => GAMING_ROOM_PROMPT.to_string(),
        Some(room) if !room.is_empty() => {
            format!("a {} {}", lower(&request.room_theme), room.to_lowercase())
        }
        _ => format!(
            "a {} {} ",
            lower(&request.building_theme),
            lower(&request.building_type)
        ),
    }
}

/// Submits one generation job and waits for it to finish.
pub struct GenerationService {
    backend: Arc<dyn PredictionBackend>,
    model_version: String,
    policy: PollPolicy,
}

impl GenerationService {
    pub fn new(
        backend: Arc<dyn PredictionBackend>,
        model_version: String,
        policy: PollPolicy,
    ) -> Self {
        Self {
            backend,
            model_version,
            policy,
        }
    }

    pub fn from_config(config: &ReplicateConfig) -> Result<Self, RedesignError> {
        let client = ReplicateClient::new(&config.api_base, config.api_token.clone())?;
        Ok(Self::new(
            Arc::new(client),
            config.model_version.clone(),
            PollPolicy {
                interval: config.poll_interval,
                max_attempts: config.max_polls,
            },
        ))
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, RedesignError> {
        let body = CreatePrediction {
            version: self.model_version.clone(),
            input: PredictionInput {
                image: request.image_url.clone(),
                prompt: build_prompt(request),
                a_prompt: POSITIVE_PROMPT.to_string(),
                n_prompt: NEGATIVE_PROMPT.to_string(),
            },
        };

        let created = self.backend.create_prediction(&body).await?;
        info!("Prediction {} created for prompt '{}'", created.id, body.input.prompt);

        let output = self.wait_for_output(&created.id).await?;
        let url = output
            .get(FINAL_OUTPUT_INDEX)
            .cloned()
            .unwrap_or_else(|| {
                warn!("Prediction {} succeeded with {} outputs", created.id, output.len());
                MISSING_OUTPUT_PLACEHOLDER.to_string()
            });

        info!("Prediction {} finished: {}", created.id, url);
        Ok(url)
    }

    async fn wait_for_output(&self, id: &str) -> Result<Vec<String>, RedesignError> {
        for attempt in 1..=self.policy.max_attempts {
            let prediction = self.backend.get_prediction(id).await?;
            debug!("Prediction {} poll #{}: {:?}", id, attempt, prediction.status);

            match prediction.status {
                PredictionStatus::Succeeded => return Ok(prediction.output.unwrap_or_default()),
                PredictionStatus::Failed | PredictionStatus::Canceled => {
                    let reason = prediction
                        .error
                        .map(|e| match e {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| {
                            format!("prediction {} ended as {:?}", id, prediction.status)
                        });
                    return Err(RedesignError::GenerationFailed(reason));
                }
                _ => {
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.interval).await;
                    }
                }
            }
        }

        warn!("Prediction {} did not finish after {} polls", id, self.policy.max_attempts);
        Err(RedesignError::GenerationTimeout {
            attempts: self.policy.max_attempts,
        })
    }
}
