//! Black-box detection / recognition engine interfaces.
//!
//! The pipeline never implements the computer-vision numerics itself; it
//! drives engine instances through these traits. Engines are configured with
//! a string-keyed parameter map so backends can expose whatever knobs they
//! have (accuracy, model variant, threshold, sensitivity).

use std::collections::HashMap;

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::package::Region;

/// String-keyed engine configuration, e.g. `accuracy`, `model`, `threshold`.
pub type EngineParams = HashMap<String, String>;

/// Detection model variant selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    Ssd,
    Yolo,
}

impl DetectionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionModel::Ssd => "ssd",
            DetectionModel::Yolo => "yolo",
        }
    }
}

/// A person known to the recognizer, mapped to a tag id by the face store
/// through its attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub attributes: HashMap<String, String>,
}

impl Identity {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            attributes: HashMap::new(),
        }
    }
}

/// Outcome of recognizing one face crop.
#[derive(Debug, Clone, Default)]
pub struct RecognitionResult {
    /// None when no known identity passed the acceptance threshold.
    pub identity: Option<Identity>,
    pub confidence: f32,
}

impl RecognitionResult {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn recognized(identity: Identity, confidence: f32) -> Self {
        Self {
            identity: Some(identity),
            confidence,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.identity.is_none()
    }
}

/// One confirmed face crop used to train the recognizer.
pub struct TrainingSample {
    pub identity_id: i64,
    pub image: DynamicImage,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine backend unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Face detection capability. Implementations are not assumed to be
/// thread-safe across instances of the same backend; each worker owns its own
/// instance.
pub trait FaceDetector: Send {
    /// Detect candidate face regions in the coordinate space of the
    /// supplied image.
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Region>>;

    /// Apply configuration; takes effect on the next `detect` call.
    fn set_parameters(&mut self, params: &EngineParams);
}

/// Face recognition and training capability.
pub trait FaceRecognizer: Send {
    /// Recognize one identity per crop, in input order.
    fn recognize(&mut self, crops: &[DynamicImage]) -> Result<Vec<RecognitionResult>>;

    /// Absorb the given samples into the recognizer model.
    fn train(&mut self, samples: &[TrainingSample]) -> Result<()>;

    /// Apply configuration; takes effect on the next call.
    fn set_parameters(&mut self, params: &EngineParams);
}

/// Factory handed to the pipeline. Every call must yield an independent
/// engine instance so parallel workers never share mutable engine state; any
/// construction-time global locking is the provider's concern.
pub trait EngineProvider: Send + Sync {
    fn create_detector(&self) -> Result<Box<dyn FaceDetector>>;
    fn create_recognizer(&self) -> Result<Box<dyn FaceRecognizer>>;
}

/// Build the parameter map broadcast to detectors on an accuracy/model change.
pub fn detection_params(accuracy: f64, model: DetectionModel) -> EngineParams {
    let mut params = EngineParams::new();
    params.insert("accuracy".into(), format!("{accuracy}"));
    params.insert("model".into(), model.as_str().into());
    params
}

/// Build the parameter map broadcast to recognizers on a threshold change.
pub fn recognition_params(threshold: f64) -> EngineParams {
    let mut params = EngineParams::new();
    params.insert("threshold".into(), format!("{threshold}"));
    params
}
