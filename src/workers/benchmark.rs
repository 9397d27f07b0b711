//! Accuracy benchmarking stages.
//!
//! Both benchmarkers replace the database writer at the end of a pipeline:
//! the filter preloads the already-tagged faces as ground truth, the engine
//! stages produce fresh results, and the benchmarker scores one against the
//! other without writing anything back.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::package::{Region, WorkPackage};
use crate::store::FaceStore;
use crate::workers::Worker;

/// Two regions count as the same face when their overlap reaches this IoU.
const MATCH_IOU: f64 = 0.75;

#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectionStats {
    pub images: u64,
    pub true_positives: u64,
    pub false_negatives: u64,
    pub false_positives: u64,
    /// Images with no faces where nothing was detected.
    pub true_negatives: u64,
}

impl DetectionStats {
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn report(&self) -> String {
        format!(
            "Detection benchmark: {} images, {} true positives, {} false negatives, \
             {} false positives, {} true negatives; recall {:.3}, precision {:.3}",
            self.images,
            self.true_positives,
            self.false_negatives,
            self.false_positives,
            self.true_negatives,
            self.recall(),
            self.precision(),
        )
    }

    /// Machine-readable form of the counters, for dumping alongside a run.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Scores detector output against ground-truth regions loaded from the store.
pub struct DetectionBenchmarker {
    stats: Arc<Mutex<DetectionStats>>,
}

impl DetectionBenchmarker {
    pub fn new(stats: Arc<Mutex<DetectionStats>>) -> Self {
        Self { stats }
    }
}

impl Worker for DetectionBenchmarker {
    fn name(&self) -> &'static str {
        "detection-benchmark"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        let truth: Vec<Region> = package
            .faces
            .iter()
            .filter_map(|f| f.record.as_ref().map(|r| r.region))
            .collect();
        let detected = &package.detected_regions;

        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.images += 1;

        if truth.is_empty() && detected.is_empty() {
            stats.true_negatives += 1;
        } else {
            let hit = truth
                .iter()
                .filter(|g| detected.iter().any(|d| g.iou(d) >= MATCH_IOU))
                .count() as u64;
            let matched_detections = detected
                .iter()
                .filter(|d| truth.iter().any(|g| g.iou(d) >= MATCH_IOU))
                .count() as u64;

            stats.true_positives += hit;
            stats.false_negatives += truth.len() as u64 - hit;
            stats.false_positives += detected.len() as u64 - matched_detections;
        }
        drop(stats);

        package.flags.mark_written();
        package
    }

    fn deactivate(&mut self) {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!("{}", stats.report());
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RecognitionStats {
    pub faces: u64,
    pub correct: u64,
    /// Known face, but the recognizer produced no identity.
    pub not_recognized: u64,
    /// Known face matched to the wrong identity.
    pub wrong: u64,
    /// (correct, total) per ground-truth tag.
    pub by_tag: std::collections::HashMap<i64, (u64, u64)>,
}

impl RecognitionStats {
    pub fn error_rate(&self) -> f64 {
        ratio(self.not_recognized + self.wrong, self.faces)
    }

    pub fn report(&self) -> String {
        format!(
            "Recognition benchmark: {} faces, {} correct, {} not recognized, \
             {} wrongly recognized; error rate {:.3}",
            self.faces,
            self.correct,
            self.not_recognized,
            self.wrong,
            self.error_rate(),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Scores recognizer suggestions against the tags the faces already carry.
/// Ground-truth identities come from the store's tag/identity mapping, so the
/// benchmark must run against the store the recognizer was trained from.
pub struct RecognitionBenchmarker {
    store: Arc<dyn FaceStore>,
    stats: Arc<Mutex<RecognitionStats>>,
}

impl RecognitionBenchmarker {
    pub fn new(
        store: Arc<dyn FaceStore>,
        stats: Arc<Mutex<RecognitionStats>>,
    ) -> Self {
        Self { store, stats }
    }
}

impl Worker for RecognitionBenchmarker {
    fn name(&self) -> &'static str {
        "recognition-benchmark"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());

        for (face, result) in package.faces.iter().zip(&package.recognition_results) {
            let Some(record) = &face.record else { continue };
            stats.faces += 1;

            let expected = match self.store.identity_for_tag(record.tag_id) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(tag = record.tag_id, error = %e, "identity lookup failed");
                    continue;
                }
            };
            let hit = match &result.identity {
                None => {
                    stats.not_recognized += 1;
                    false
                }
                Some(identity) if identity.id == expected => {
                    stats.correct += 1;
                    true
                }
                Some(_) => {
                    stats.wrong += 1;
                    false
                }
            };
            let tag_score = stats.by_tag.entry(record.tag_id).or_default();
            tag_score.1 += 1;
            if hit {
                tag_score.0 += 1;
            }
        }
        drop(stats);

        package.flags.mark_written();
        package
    }

    fn deactivate(&mut self) {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!("{}", stats.report());
    }
}
