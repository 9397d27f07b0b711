use image::DynamicImage;

use crate::engine::{recognition_params, FaceRecognizer, RecognitionResult};
use crate::package::{FaceRoles, WorkPackage};
use crate::retriever::ItemRetriever;
use crate::workers::{SettingsChange, Worker};

/// Matches face crops against known identities.
///
/// Handles two package shapes: freshly detected regions from the scan flow
/// (cropped from the in-memory preview), and database-loaded faces flagged
/// for re-recognition (crops fetched through the [`ItemRetriever`]). In both
/// cases `recognition_results` ends up positionally aligned with the inputs:
/// `detected_regions` for the scan flow, the faces carrying the recognition
/// role otherwise.
pub struct RecognitionWorker {
    recognizer: Box<dyn FaceRecognizer>,
    retriever: ItemRetriever,
}

impl RecognitionWorker {
    pub fn new(recognizer: Box<dyn FaceRecognizer>, retriever: ItemRetriever) -> Self {
        Self {
            recognizer,
            retriever,
        }
    }

    fn recognize_crops(
        &mut self,
        item: i64,
        crops: Vec<Option<DynamicImage>>,
    ) -> Vec<RecognitionResult> {
        let present: Vec<DynamicImage> = crops.iter().filter_map(|c| c.clone()).collect();
        let mut recognized = match self.recognizer.recognize(&present) {
            Ok(results) => results.into_iter(),
            Err(e) => {
                tracing::warn!(item, error = %e, "face recognition failed");
                return Vec::new();
            }
        };

        // Missing crops keep their slot as "unknown" so alignment holds.
        crops
            .iter()
            .map(|crop| match crop {
                Some(_) => recognized.next().unwrap_or_default(),
                None => RecognitionResult::unknown(),
            })
            .collect()
    }
}

impl Worker for RecognitionWorker {
    fn name(&self) -> &'static str {
        "recognizer"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        let rerecognize: Vec<_> = package
            .faces
            .iter()
            .filter(|f| f.roles.contains(FaceRoles::FOR_RECOGNITION))
            .filter_map(|f| f.effective_region())
            .collect();

        if !rerecognize.is_empty() {
            let crops = self.retriever.crops(&package, &rerecognize);
            package.recognition_results = self.recognize_crops(package.item_id(), crops);
        } else if !package.detected_regions.is_empty() {
            let regions = package.detected_regions.clone();
            let crops = self.retriever.crops(&package, &regions);
            package.recognition_results = self.recognize_crops(package.item_id(), crops);
        }

        package.flags.mark_recognized();
        package
    }

    fn apply_settings(&mut self, change: &SettingsChange) {
        if let SettingsChange::RecognitionThreshold(threshold) = change {
            self.recognizer
                .set_parameters(&recognition_params(*threshold));
        }
    }
}
