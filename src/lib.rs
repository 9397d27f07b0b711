//! Multi-threaded face management pipeline for photo collections.
//!
//! A [`pipeline::FacePipeline`] is assembled from pluggable stages (scan-state
//! filter, preview loader, detector, recognizer, database writer, trainer,
//! benchmarkers), each running on its own thread and connected by FIFO
//! channels. Detection and recognition engines are supplied by the caller
//! through the [`engine`] traits; persistence goes through the [`store`]
//! traits, with a bundled SQLite implementation.

pub mod config;
pub mod engine;
pub mod filter;
pub mod imageio;
pub mod logging;
pub mod package;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod workers;

pub use config::Config;
pub use engine::{
    DetectionModel, EngineProvider, FaceDetector, FaceRecognizer, Identity, RecognitionResult,
};
pub use filter::FilterMode;
pub use package::{FaceKind, FaceRecord, FaceRoles, ItemInfo, PackageFace, Region, WorkPackage};
pub use pipeline::{FacePipeline, PipelineEvent};
pub use store::{FaceStore, SqliteFaceStore, ThumbnailStore};
pub use workers::WriteMode;
