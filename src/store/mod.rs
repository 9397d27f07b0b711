//! Persistence seams for the pipeline: face records, scan markers, tag
//! mapping and per-face thumbnails.
//!
//! The pipeline only ever talks to these traits. The SQLite implementation
//! lives in [`sqlite`]; higher-level editing operations (merging fresh
//! detections, confirming, manual adds) in [`editor`].

pub mod editor;
pub mod sqlite;
pub mod thumbs;

use std::path::Path;

use anyhow::Result;
use image::DynamicImage;

use crate::engine::Identity;
use crate::package::{FaceKind, FaceRecord, Region};

pub use editor::FaceEditor;
pub use sqlite::SqliteFaceStore;
pub use thumbs::FsThumbnailStore;

/// Face-record persistence. Implementations provide their own locking; the
/// pipeline calls these from several worker threads without extra
/// synchronization.
pub trait FaceStore: Send + Sync {
    /// Whether the item carries the face-scanned marker.
    fn has_been_scanned(&self, item_id: i64) -> Result<bool>;

    fn mark_as_scanned(&self, item_id: i64) -> Result<()>;

    fn faces_for_item(&self, item_id: i64) -> Result<Vec<FaceRecord>>;

    fn unconfirmed_faces(&self, item_id: i64) -> Result<Vec<FaceRecord>>;

    fn confirmed_faces(&self, item_id: i64) -> Result<Vec<FaceRecord>>;

    fn faces_for_training(&self, item_id: i64) -> Result<Vec<FaceRecord>>;

    fn add_face(&self, record: &FaceRecord) -> Result<()>;

    fn remove_face(&self, record: &FaceRecord) -> Result<()>;

    /// Remove every face of the item whose kind is in `kinds`. Used by the
    /// overwrite write modes before fresh results are stored.
    fn remove_faces_of_kind(&self, item_id: i64, kinds: &[FaceKind]) -> Result<()>;

    /// Replace one record with another (re-tag, move, confirm).
    fn update_face(&self, old: &FaceRecord, new: &FaceRecord) -> Result<()>;

    /// The tag standing in for "somebody, but nobody we know".
    fn unknown_person_tag(&self) -> Result<i64>;

    /// Resolve a recognized identity to a tag, creating a suggested-person
    /// tag when none is mapped yet. `None` resolves to the unknown-person tag.
    fn tag_for_identity(&self, identity: Option<&Identity>) -> Result<i64>;

    /// Recognizer-side identity for a tag, allocated on first use.
    fn identity_for_tag(&self, tag_id: i64) -> Result<i64>;
}

/// Per-face crop storage, keyed by the item's file path and the region. Used
/// both for recognition input when no full image is cached and for display.
pub trait ThumbnailStore: Send + Sync {
    fn store_detail(&self, file_path: &Path, region: &Region, detail: &DynamicImage) -> Result<()>;

    fn load_detail(&self, file_path: &Path, region: &Region) -> Result<Option<DynamicImage>>;
}
