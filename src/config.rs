use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::DetectionModel;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub flow: FlowConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
}

/// Flow-control limits for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Ceiling on packages concurrently inside the pipeline; submissions
    /// beyond it are delayed and released one-for-one as packages complete.
    #[serde(default = "default_max_packages_on_road")]
    pub max_packages_on_road: usize,

    /// Ceiling on decoded previews the loader may buffer ahead of slower
    /// downstream stages. Decoded images are memory-heavy.
    #[serde(default = "default_loader_sent_out_limit")]
    pub loader_sent_out_limit: usize,

    /// Number of parallel detector instances. Detector state is memory-heavy,
    /// so this stays small regardless of core count.
    #[serde(default = "default_parallel_detectors")]
    pub parallel_detectors: usize,

    /// OS scheduling priority hint for worker threads. Currently advisory
    /// only; std::thread exposes no portable way to apply it.
    #[serde(default)]
    pub thread_priority: ThreadPriority,
}

fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_max_packages_on_road() -> usize {
    30
}

fn default_loader_sent_out_limit() -> usize {
    hardware_threads().min(4)
}

fn default_parallel_detectors() -> usize {
    hardware_threads().min(3)
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_packages_on_road: default_max_packages_on_road(),
            loader_sent_out_limit: default_loader_sent_out_limit(),
            parallel_detectors: default_parallel_detectors(),
            thread_priority: ThreadPriority::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,

    #[serde(default = "default_model")]
    pub model: DetectionModel,

    /// Long-edge cap for preview decoding. Detection quality plateaus above
    /// this size while memory and latency keep growing.
    #[serde(default = "default_preview_size")]
    pub preview_size: u32,
}

fn default_accuracy() -> f64 {
    0.7
}

fn default_model() -> DetectionModel {
    DetectionModel::Ssd
}

fn default_preview_size() -> u32 {
    2000
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            accuracy: default_accuracy(),
            model: default_model(),
            preview_size: default_preview_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Similarity acceptance threshold; results below it count as unknown.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.6
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_cache_path")]
    pub path: PathBuf,
}

fn default_thumb_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("faceflow/thumbnails")
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            path: default_thumb_cache_path(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
