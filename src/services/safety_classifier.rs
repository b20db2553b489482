// src/services/safety_classifier.rs
//! NSFW screening for uploaded images.
//!
//! The model is loaded once, in the background, and every classification
//! waits for that load to settle. A model that failed to load stays failed
//! and every image is then treated as unsafe.

use crate::errors::RedesignError;
use crate::models::ClassificationPrediction;
use async_trait::async_trait;
use image::imageops::FilterType;
use log::{error, info, warn};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use reqwest::Client;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Output order of the NSFW model.
pub const NSFW_LABELS: [&str; 5] = ["Drawing", "Hentai", "Neutral", "Porn", "Sexy"];
pub const UNSAFE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_TOP_K: usize = 5;
const SAFETY_TOP_K: usize = 3;
const INPUT_SIZE: u32 = 224;

#[async_trait]
pub trait ClassificationModel: Send + Sync {
    async fn classify(
        &self,
        image: &[u8],
        top_k: usize,
    ) -> Result<Vec<ClassificationPrediction>, RedesignError>;
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ClassificationModel>, RedesignError>;
}

/// Decision rule: unsafe when Porn or Hentai is above the threshold.
/// Categories missing from the predictions count as zero.
pub fn is_safe(predictions: &[ClassificationPrediction]) -> bool {
    let probability = |label: &str| {
        predictions
            .iter()
            .find(|p| p.class_name == label)
            .map(|p| p.probability)
            .unwrap_or(0.0)
    };

    !(probability("Porn") > UNSAFE_THRESHOLD || probability("Hentai") > UNSAFE_THRESHOLD)
}

/// Pairs raw scores with labels, highest first, keeping `top_k`.
pub fn rank_scores(scores: &[f32], top_k: usize) -> Vec<ClassificationPrediction> {
    let mut ranked: Vec<ClassificationPrediction> = NSFW_LABELS
        .iter()
        .zip(scores)
        .map(|(label, &p)| ClassificationPrediction::new(*label, p))
        .collect();
    ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    ranked.truncate(top_k);
    ranked
}

/// Decodes an image into the model's NHWC `[1, 224, 224, 3]` input in `[0, 1]`.
pub fn preprocess(image: &[u8]) -> Result<Array4<f32>, RedesignError> {
    let img = image::load_from_memory(image)
        .map_err(|e| RedesignError::Validation(format!("Invalid image format: {}", e)))?;
    let rgb = img
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();

    let side = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, side, side, 3));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            input[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(input)
}

fn session_error(e: impl std::fmt::Display) -> RedesignError {
    RedesignError::ModelLoad(format!("Failed to build ONNX session: {}", e))
}

/// The pretrained NSFW network, run through ONNX Runtime on CPU.
pub struct OnnxNsfwModel {
    session: Arc<Mutex<Session>>,
    input_name: String,
}

impl OnnxNsfwModel {
    pub fn from_bytes(model: &[u8]) -> Result<Self, RedesignError> {
        let session = Session::builder()
            .map_err(session_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(session_error)?
            .with_intra_threads(2)
            .map_err(session_error)?
            .commit_from_memory(model)
            .map_err(session_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "input".to_string());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
        })
    }

    fn run(
        session: &Mutex<Session>,
        input_name: &str,
        input: Array4<f32>,
    ) -> Result<Vec<f32>, RedesignError> {
        let mut session = session
            .lock()
            .map_err(|_| RedesignError::Classification("ONNX session lock poisoned".into()))?;

        let input_value = Value::from_array(input)
            .map_err(|e| {
                RedesignError::Classification(format!("Failed to create input tensor: {}", e))
            })?;

        let outputs = session
            .run(ort::inputs![input_name => input_value])
            .map_err(|e| RedesignError::Classification(format!("NSFW inference failed: {}", e)))?;

        let scores = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| {
                RedesignError::Classification(format!("Failed to extract output tensor: {}", e))
            })?;

        Ok(scores.iter().copied().collect())
    }
}

#[async_trait]
impl ClassificationModel for OnnxNsfwModel {
    async fn classify(
        &self,
        image: &[u8],
        top_k: usize,
    ) -> Result<Vec<ClassificationPrediction>, RedesignError> {
        let input = preprocess(image)?;
        let session = Arc::clone(&self.session);
        let input_name = self.input_name.clone();

        let scores = tokio::task::spawn_blocking(move || Self::run(&session, &input_name, input))
            .await
            .map_err(|e| RedesignError::Classification(format!("Inference task failed: {}", e)))??;

        if scores.len() != NSFW_LABELS.len() {
            return Err(RedesignError::Classification(format!(
                "Expected {} scores, model returned {}",
                NSFW_LABELS.len(),
                scores.len()
            )));
        }
        Ok(rank_scores(&scores, top_k))
    }
}

/// Fetches model weights from an `http(s)` URL or a local path.
pub struct RemoteModelLoader {
    client: Client,
    location: String,
}

impl RemoteModelLoader {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            location: location.into(),
        }
    }

    async fn fetch(&self) -> Result<Vec<u8>, RedesignError> {
        if self.location.starts_with("http://") || self.location.starts_with("https://") {
            let response = self
                .client
                .get(&self.location)
                .send()
                .await
                .map_err(|e| RedesignError::ModelLoad(format!("Model download failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(RedesignError::ModelLoad(format!(
                    "Model download returned {}",
                    response.status()
                )));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| RedesignError::ModelLoad(format!("Model download failed: {}", e)))?;
            Ok(bytes.to_vec())
        } else {
            let path = self.location.trim_start_matches("file://");
            tokio::fs::read(path)
                .await
                .map_err(|e| {
                    RedesignError::ModelLoad(format!("Failed to read model {}: {}", path, e))
                })
        }
    }
}

#[async_trait]
impl ModelLoader for RemoteModelLoader {
    async fn load(&self) -> Result<Arc<dyn ClassificationModel>, RedesignError> {
        info!("Loading NSFW model from {}", self.location);
        let bytes = self.fetch().await?;

        let model = tokio::task::spawn_blocking(move || OnnxNsfwModel::from_bytes(&bytes))
            .await
            .map_err(|e| RedesignError::ModelLoad(format!("Model load task failed: {}", e)))??;

        Ok(Arc::new(model))
    }
}

pub struct SafetyClassifier {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Option<Arc<dyn ClassificationModel>>>,
}

impl SafetyClassifier {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
        }
    }

    /// Starts loading the model in the background.
    pub fn preload(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.ready().await;
        });
    }

    /// Waits for the single model load to finish.
    pub async fn ready(&self) -> Result<Arc<dyn ClassificationModel>, RedesignError> {
        let model = self
            .model
            .get_or_init(|| async {
                match self.loader.load().await {
                    Ok(model) => {
                        info!("NSFW model ready");
                        Some(model)
                    }
                    Err(e) => {
                        error!("NSFW model failed to load: {}", e);
                        None
                    }
                }
            })
            .await;

        model
            .clone()
            .ok_or_else(|| RedesignError::ModelLoad("NSFW model is unavailable".into()))
    }

    pub async fn classify(
        &self,
        image: &[u8],
        top_k: usize,
    ) -> Result<Vec<ClassificationPrediction>, RedesignError> {
        let model = self.ready().await?;
        model.classify(image, top_k).await
    }

    /// Never fails: any load or inference problem rejects the image.
    pub async fn is_safe_image(&self, image: &[u8]) -> bool {
        match self.classify(image, SAFETY_TOP_K).await {
            Ok(predictions) => is_safe(&predictions),
            Err(e) => {
                warn!("Safety check failed, rejecting image: {}", e);
                false
            }
        }
    }
}
