use std::sync::Arc;

use crate::engine::{FaceRecognizer, TrainingSample};
use crate::package::{FaceKind, FaceListOps, FaceRoles, WorkPackage};
use crate::retriever::ItemRetriever;
use crate::store::FaceStore;
use crate::workers::Worker;

/// Feeds confirmed face crops into the recognizer model.
///
/// Runs after the database writer so confirmations are already persisted
/// when their crops are absorbed. Transient training-only records are
/// deleted once consumed; confirmed records stay untouched.
pub struct TrainerWorker {
    recognizer: Box<dyn FaceRecognizer>,
    retriever: ItemRetriever,
    store: Arc<dyn FaceStore>,
}

impl TrainerWorker {
    pub fn new(
        recognizer: Box<dyn FaceRecognizer>,
        retriever: ItemRetriever,
        store: Arc<dyn FaceStore>,
    ) -> Self {
        Self {
            recognizer,
            retriever,
            store,
        }
    }
}

impl Worker for TrainerWorker {
    fn name(&self) -> &'static str {
        "trainer"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        let records: Vec<_> = package
            .faces
            .iter()
            .filter(|f| f.roles.contains(FaceRoles::FOR_TRAINING))
            .filter_map(|f| f.record.clone())
            .collect();
        if records.is_empty() {
            return package;
        }

        let regions: Vec<_> = records.iter().map(|r| r.region).collect();
        let crops = self.retriever.crops(&package, &regions);

        let mut samples = Vec::new();
        for (record, crop) in records.iter().zip(crops) {
            let Some(image) = crop else {
                tracing::warn!(
                    item = record.item_id,
                    tag = record.tag_id,
                    "no crop available for training, skipping face"
                );
                continue;
            };
            match self.store.identity_for_tag(record.tag_id) {
                Ok(identity_id) => samples.push(TrainingSample {
                    identity_id,
                    image,
                }),
                Err(e) => {
                    tracing::error!(tag = record.tag_id, error = %e, "identity lookup failed");
                }
            }
        }

        if !samples.is_empty() {
            if let Err(e) = self.recognizer.train(&samples) {
                tracing::error!(item = package.item_id(), error = %e, "recognizer training failed");
            }
        }

        // Training-only records are one-shot; drop them now that their crops
        // are absorbed.
        for record in &records {
            if record.kind == FaceKind::FaceForTraining {
                if let Err(e) = self.store.remove_face(record) {
                    tracing::error!(item = record.item_id, error = %e, "failed to drop training record");
                }
            }
        }

        package
            .faces
            .replace_role(FaceRoles::FOR_TRAINING, FaceRoles::TRAINED);
        package
    }
}
