use crate::engine::{detection_params, FaceDetector};
use crate::package::WorkPackage;
use crate::workers::{SettingsChange, Worker};

/// Runs a face detection engine over the loaded preview and stores the
/// resulting regions in original-image coordinates.
pub struct DetectionWorker {
    detector: Box<dyn FaceDetector>,
}

impl DetectionWorker {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self { detector }
    }
}

impl Worker for DetectionWorker {
    fn name(&self) -> &'static str {
        "detector"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        if let Some(image) = package.image.as_ref() {
            match self.detector.detect(image) {
                Ok(regions) => {
                    // The engine reports coordinates in the preview's space;
                    // everything downstream works in original coordinates.
                    let (iw, ih) = (image.width(), image.height());
                    let scale = match package.original_size {
                        Some((ow, oh)) if iw > 0 && ih > 0 && (ow, oh) != (iw, ih) => {
                            Some((ow as f64 / iw as f64, oh as f64 / ih as f64))
                        }
                        _ => None,
                    };
                    package.detected_regions = regions
                        .into_iter()
                        .map(|r| match scale {
                            Some((sx, sy)) => r.scaled(sx, sy),
                            None => r,
                        })
                        .filter(|r| r.is_valid())
                        .collect();
                    tracing::debug!(
                        item = package.item_id(),
                        faces = package.detected_regions.len(),
                        "detection finished"
                    );
                }
                Err(e) => {
                    tracing::warn!(item = package.item_id(), error = %e, "face detection failed");
                }
            }
        }
        package.flags.mark_detected();
        package
    }

    fn apply_settings(&mut self, change: &SettingsChange) {
        if let SettingsChange::Detection { accuracy, model } = change {
            self.detector.set_parameters(&detection_params(*accuracy, *model));
        }
    }
}
