// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /predict`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_theme: Option<String>,
}

impl GenerationRequest {
    /// The (type, theme) pair that drives the style, room first.
    pub fn style_tags(&self) -> Option<(&str, &str)> {
        fn pick<'a>(
            ty: &'a Option<String>,
            theme: &'a Option<String>,
        ) -> Option<(&'a str, &'a str)> {
            ty.as_deref()
                .filter(|t| !t.is_empty())
                .map(|t| (t, theme.as_deref().unwrap_or("")))
        }
        pick(&self.room_type, &self.room_theme)
            .or_else(|| pick(&self.building_type, &self.building_theme))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub predicted_image_url: String,
}

/// Remote job status as reported by the synthesis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<Vec<String>>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionInput {
    pub image: String,
    pub prompt: String,
    pub a_prompt: String,
    pub n_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrediction {
    pub version: String,
    pub input: PredictionInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationPrediction {
    pub class_name: String,
    pub probability: f32,
}

impl ClassificationPrediction {
    pub fn new(class_name: impl Into<String>, probability: f32) -> Self {
        Self {
            class_name: class_name.into(),
            probability,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub hosted_url: String,
    pub original_file_name: String,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
}
