//! Higher-level face editing on top of [`FaceStore`]: merging fresh
//! detections with existing records, confirming, manual adds and removals,
//! and per-face thumbnail storage.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;

use super::{FaceStore, ThumbnailStore};
use crate::engine::RecognitionResult;
use crate::imageio;
use crate::package::{FaceKind, FaceRecord, Region};

pub struct FaceEditor {
    store: Arc<dyn FaceStore>,
}

impl FaceEditor {
    pub fn new(store: Arc<dyn FaceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FaceStore> {
        &self.store
    }

    /// The record a confirmation will produce, without touching the store.
    pub fn confirmed_entry(
        record: &FaceRecord,
        tag_id: Option<i64>,
        region: Option<Region>,
    ) -> FaceRecord {
        FaceRecord {
            item_id: record.item_id,
            tag_id: tag_id.unwrap_or(record.tag_id),
            region: region.filter(|r| r.is_valid()).unwrap_or(record.region),
            kind: FaceKind::ConfirmedName,
        }
    }

    /// Persist fresh detection/recognition results as unconfirmed records,
    /// merging with whatever the item already carries.
    ///
    /// Precedence rules: a confirmed face is never overwritten (it blocks any
    /// overlap above 0.25 of the smaller area); an unnamed old face always
    /// yields to a fresh detection; an unconfirmed face yields to a newer
    /// named detection above 0.5 overlap; an unnamed new face is dropped when
    /// a named face already covers the spot.
    pub fn write_unconfirmed_results(
        &self,
        item_id: i64,
        detected: &[Region],
        results: &[RecognitionResult],
    ) -> Result<Vec<FaceRecord>> {
        let current = self.store.faces_for_item(item_id)?;
        let mut added = Vec::new();

        for (i, region) in detected.iter().enumerate() {
            let identity = results.get(i).and_then(|r| r.identity.as_ref());
            let tag_id = self.store.tag_for_identity(identity)?;
            let kind = if identity.is_some() {
                FaceKind::UnconfirmedName
            } else {
                FaceKind::UnknownName
            };
            let candidate = FaceRecord::new(item_id, tag_id, *region, kind);

            let overlapping: Vec<&FaceRecord> = current
                .iter()
                .filter(|old| {
                    let min_overlap = if old.kind.is_confirmed() { 0.25 } else { 0.5 };
                    old.region.intersects(region, min_overlap)
                })
                .collect();

            let mut keep = true;
            for old in &overlapping {
                match old.kind {
                    FaceKind::UnknownName => {
                        // A stale unnamed face always yields to a fresh
                        // detection; it is removed below.
                    }
                    FaceKind::UnconfirmedName => {
                        if kind == FaceKind::UnknownName {
                            // The old face has a name, the new one does not.
                            keep = false;
                            break;
                        }
                        if old.tag_id == candidate.tag_id
                            && old.region.intersects(region, 1.0)
                        {
                            // Same person, old region contains the new one:
                            // the smaller detection adds nothing.
                            keep = false;
                            break;
                        }
                        // Otherwise the newer recognition wins; the old
                        // entry is removed below.
                    }
                    FaceKind::ConfirmedName | FaceKind::FaceForTraining => {
                        keep = false;
                        break;
                    }
                }
            }

            if keep {
                for old in overlapping {
                    if !old.kind.is_confirmed() {
                        self.store.remove_face(old)?;
                    }
                }
                self.store.add_face(&candidate)?;
                added.push(candidate);
            }
        }

        Ok(added)
    }

    pub fn confirm(
        &self,
        record: &FaceRecord,
        tag_id: Option<i64>,
        region: Option<Region>,
    ) -> Result<FaceRecord> {
        let confirmed = Self::confirmed_entry(record, tag_id, region);
        self.store.update_face(record, &confirmed)?;
        Ok(confirmed)
    }

    /// Create a brand-new, user-supplied face. The tag defaults to the
    /// unknown person when none is assigned yet.
    pub fn add_manually(
        &self,
        item_id: i64,
        tag_id: Option<i64>,
        region: Region,
    ) -> Result<FaceRecord> {
        let tag_id = match tag_id {
            Some(id) if id > 0 => id,
            _ => self.store.unknown_person_tag()?,
        };
        let record = FaceRecord::new(item_id, tag_id, region, FaceKind::UnconfirmedName);
        self.store.add_face(&record)?;
        Ok(record)
    }

    pub fn change_region(&self, record: &FaceRecord, region: Region) -> Result<FaceRecord> {
        let moved = FaceRecord { region, ..record.clone() };
        self.store.update_face(record, &moved)?;
        Ok(moved)
    }

    pub fn change_tag(&self, record: &FaceRecord, tag_id: i64) -> Result<FaceRecord> {
        let retagged = FaceRecord { tag_id, ..record.clone() };
        self.store.update_face(record, &retagged)?;
        Ok(retagged)
    }

    pub fn remove(&self, record: &FaceRecord) -> Result<()> {
        self.store.remove_face(record)
    }

    /// Update an existing record with a recognition suggestion.
    pub fn update_suggestion(
        &self,
        record: &FaceRecord,
        result: &RecognitionResult,
    ) -> Result<FaceRecord> {
        let tag_id = self.store.tag_for_identity(result.identity.as_ref())?;
        let suggested = FaceRecord {
            tag_id,
            kind: FaceKind::UnconfirmedName,
            ..record.clone()
        };
        self.store.update_face(record, &suggested)?;
        Ok(suggested)
    }

    /// Store per-face crops for both the exact region and the display
    /// rectangle. Thumbnail failures are logged, never fatal.
    pub fn store_thumbnails(
        &self,
        thumbs: &dyn ThumbnailStore,
        file_path: &Path,
        records: &[FaceRecord],
        image: &DynamicImage,
        original_size: Option<(u32, u32)>,
    ) {
        for record in records {
            for rect in [record.region, record.region.display_rect()] {
                let mapped = imageio::map_to_image(&rect, original_size, image);
                match imageio::crop_region(image, &mapped) {
                    Ok(detail) => {
                        if let Err(e) = thumbs.store_detail(file_path, &rect, &detail) {
                            tracing::warn!(
                                path = %file_path.display(),
                                error = %e,
                                "Failed to store face thumbnail"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %file_path.display(),
                            error = %e,
                            "Failed to crop face thumbnail"
                        );
                    }
                }
            }
        }
    }
}
