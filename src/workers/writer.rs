use std::sync::Arc;

use crate::package::{FaceKind, FaceRoles, PackageFace, WorkPackage};
use crate::store::{FaceEditor, ThumbnailStore};
use crate::workers::Worker;

/// How scan results are reconciled with records already in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Merge fresh detections with existing records.
    #[default]
    NormalWrite,
    /// Drop unconfirmed records of the item before writing.
    OverwriteUnconfirmed,
    /// Drop every face record of the item before writing.
    OverwriteAll,
}

/// Terminal persistence stage. Handles both package shapes: scan results
/// (detected regions plus recognition suggestions) and database-driven face
/// operations (confirmation, editing, re-recognition suggestions).
///
/// Store failures are logged and never fail the package; the item still
/// completes so the batch accounting stays correct.
pub struct DatabaseWriter {
    mode: WriteMode,
    editor: FaceEditor,
    thumbs: Arc<dyn ThumbnailStore>,
}

impl DatabaseWriter {
    pub fn new(mode: WriteMode, editor: FaceEditor, thumbs: Arc<dyn ThumbnailStore>) -> Self {
        Self {
            mode,
            editor,
            thumbs,
        }
    }

    fn write_scan_results(&self, package: &mut WorkPackage) {
        let item_id = package.item_id();

        let overwrite_kinds: &[FaceKind] = match self.mode {
            WriteMode::NormalWrite => &[],
            WriteMode::OverwriteUnconfirmed => {
                &[FaceKind::UnknownName, FaceKind::UnconfirmedName]
            }
            WriteMode::OverwriteAll => &[
                FaceKind::UnknownName,
                FaceKind::UnconfirmedName,
                FaceKind::ConfirmedName,
                FaceKind::FaceForTraining,
            ],
        };
        if !overwrite_kinds.is_empty() {
            if let Err(e) = self.editor.store().remove_faces_of_kind(item_id, overwrite_kinds) {
                tracing::error!(item = item_id, error = %e, "failed to clear previous faces");
            }
        }

        // The marker is written regardless of whether anything was found, or
        // even decodable; the item must not be rescanned next time.
        if let Err(e) = self.editor.store().mark_as_scanned(item_id) {
            tracing::error!(item = item_id, error = %e, "failed to store scan marker");
        }

        if package.detected_regions.is_empty() {
            return;
        }

        match self.editor.write_unconfirmed_results(
            item_id,
            &package.detected_regions,
            &package.recognition_results,
        ) {
            Ok(records) => {
                if let Some(image) = &package.image {
                    self.editor.store_thumbnails(
                        self.thumbs.as_ref(),
                        &package.info.file_path,
                        &records,
                        image,
                        package.original_size,
                    );
                }
                package.faces.extend(records.into_iter().map(|record| {
                    let mut face = PackageFace::from_record(record);
                    face.roles.insert(FaceRoles::DETECTED_FROM_IMAGE);
                    face
                }));
            }
            Err(e) => {
                tracing::error!(item = item_id, error = %e, "failed to store scan results");
            }
        }
    }

    fn write_face_operations(&self, package: &mut WorkPackage) {
        let item_id = package.item_id();
        let mut suggestions = package.recognition_results.iter();

        for face in &mut package.faces {
            if face.roles.contains(FaceRoles::FOR_RECOGNITION) {
                // Results are aligned with the recognition-flagged faces.
                let Some(result) = suggestions.next() else { break };
                if let Some(record) = &face.record {
                    match self.editor.update_suggestion(record, result) {
                        Ok(updated) => face.record = Some(updated),
                        Err(e) => {
                            tracing::error!(item = item_id, error = %e, "failed to store suggestion")
                        }
                    }
                }
                face.roles.remove(FaceRoles::FOR_RECOGNITION);
            } else if face.roles.contains(FaceRoles::FOR_CONFIRMATION) {
                if let Some(record) = &face.record {
                    match self
                        .editor
                        .confirm(record, face.assigned_tag_id, face.assigned_region)
                    {
                        Ok(confirmed) => face.record = Some(confirmed),
                        Err(e) => {
                            tracing::error!(item = item_id, error = %e, "failed to confirm face")
                        }
                    }
                }
                face.roles.replace(
                    FaceRoles::FOR_CONFIRMATION,
                    FaceRoles::CONFIRMED | FaceRoles::FOR_TRAINING,
                );
            } else if face.roles.contains(FaceRoles::FOR_EDITING) {
                self.apply_edit(item_id, face);
                face.roles.replace(FaceRoles::FOR_EDITING, FaceRoles::EDITED);
            }
        }
    }

    fn apply_edit(&self, item_id: i64, face: &mut PackageFace) {
        let assigned_region = face.assigned_region.filter(|r| r.is_valid());
        let assigned_tag = face.assigned_tag_id.filter(|t| *t > 0);

        let outcome = match (&face.record, assigned_region, assigned_tag) {
            // No existing record: a valid region means a manual add.
            (None, Some(region), tag) => self.editor.add_manually(item_id, tag, region).map(Some),
            (Some(record), Some(region), _) => self.editor.change_region(record, region).map(Some),
            (Some(record), None, Some(tag)) => self.editor.change_tag(record, tag).map(Some),
            // Nothing assigned: the edit is a removal.
            (Some(record), None, None) => self.editor.remove(record).map(|_| None),
            (None, None, _) => Ok(None),
        };

        match outcome {
            Ok(Some(record)) => face.record = Some(record),
            Ok(None) => face.record = None,
            Err(e) => tracing::error!(item = item_id, error = %e, "failed to apply face edit"),
        }
    }
}

impl Worker for DatabaseWriter {
    fn name(&self) -> &'static str {
        "database-writer"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        if package.faces.is_empty() && package.flags.detected() {
            self.write_scan_results(&mut package);
        } else {
            self.write_face_operations(&mut package);
        }
        package.flags.mark_written();
        package
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Identity, RecognitionResult};
    use crate::package::{FaceRecord, ItemInfo, PackageFace, Region};
    use crate::store::{FaceStore, FsThumbnailStore, SqliteFaceStore};
    use image::{DynamicImage, RgbImage};

    fn writer_with_store(mode: WriteMode) -> (DatabaseWriter, Arc<SqliteFaceStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteFaceStore::open_in_memory().unwrap());
        let thumbs = Arc::new(FsThumbnailStore::new(dir.path().to_path_buf()));
        let writer = DatabaseWriter::new(mode, FaceEditor::new(store.clone()), thumbs);
        (writer, store, dir)
    }

    fn scanned_package(item_id: i64, regions: Vec<Region>) -> Box<WorkPackage> {
        let mut package = Box::new(WorkPackage::new(ItemInfo::new(item_id, "/p.jpg")));
        package.image = Some(DynamicImage::ImageRgb8(RgbImage::new(500, 500)));
        package.original_size = Some((500, 500));
        package.detected_regions = regions;
        package.flags.mark_preview_loaded();
        package.flags.mark_detected();
        package.flags.mark_recognized();
        package
    }

    #[test]
    fn test_scan_results_stored_and_marked() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::NormalWrite);
        let package = scanned_package(1, vec![Region::new(10, 10, 80, 80)]);
        let package = writer.process(package);

        assert!(store.has_been_scanned(1).unwrap());
        assert_eq!(store.faces_for_item(1).unwrap().len(), 1);
        assert_eq!(package.faces.len(), 1);
        assert!(package.faces[0]
            .roles
            .contains(FaceRoles::DETECTED_FROM_IMAGE));
        assert!(package.flags.written());
    }

    #[test]
    fn test_empty_scan_still_writes_marker() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::NormalWrite);
        let package = writer.process(scanned_package(2, vec![]));

        assert!(store.has_been_scanned(2).unwrap());
        assert!(store.faces_for_item(2).unwrap().is_empty());
        assert!(package.faces.is_empty());
    }

    #[test]
    fn test_overwrite_unconfirmed_clears_old_results() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::OverwriteUnconfirmed);
        store
            .add_face(&FaceRecord::new(
                3,
                store.unknown_person_tag().unwrap(),
                Region::new(300, 300, 50, 50),
                FaceKind::UnknownName,
            ))
            .unwrap();
        store
            .add_face(&FaceRecord::new(
                3,
                9,
                Region::new(400, 400, 50, 50),
                FaceKind::ConfirmedName,
            ))
            .unwrap();

        writer.process(scanned_package(3, vec![Region::new(10, 10, 80, 80)]));

        let records = store.faces_for_item(3).unwrap();
        // Old unconfirmed face gone, confirmed face kept, new detection added.
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.kind == FaceKind::ConfirmedName));
        assert!(records
            .iter()
            .any(|r| r.region == Region::new(10, 10, 80, 80)));
    }

    #[test]
    fn test_confirmation_updates_record_and_roles() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::NormalWrite);
        let record = FaceRecord::new(
            4,
            store.unknown_person_tag().unwrap(),
            Region::new(20, 20, 60, 60),
            FaceKind::UnknownName,
        );
        store.add_face(&record).unwrap();

        let mut face = PackageFace::from_record(record);
        face.assigned_tag_id = Some(42);
        face.roles.insert(FaceRoles::FOR_CONFIRMATION);
        let package = writer.process(Box::new(WorkPackage::with_face(
            ItemInfo::new(4, "/p.jpg"),
            face,
        )));

        let stored = store.confirmed_faces(4).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].tag_id, 42);
        let face = &package.faces[0];
        assert!(face.roles.contains(FaceRoles::CONFIRMED));
        assert!(face.roles.contains(FaceRoles::FOR_TRAINING));
        assert!(!face.roles.contains(FaceRoles::FOR_CONFIRMATION));
        assert_eq!(face.record.as_ref().unwrap().tag_id, 42);
    }

    #[test]
    fn test_suggestion_written_for_recognized_face() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::NormalWrite);
        let record = FaceRecord::new(
            5,
            store.unknown_person_tag().unwrap(),
            Region::new(20, 20, 60, 60),
            FaceKind::UnknownName,
        );
        store.add_face(&record).unwrap();

        let mut face = PackageFace::from_record(record);
        face.roles.insert(FaceRoles::FOR_RECOGNITION);
        let mut package = Box::new(WorkPackage::with_face(ItemInfo::new(5, "/p.jpg"), face));
        package.recognition_results =
            vec![RecognitionResult::recognized(Identity::new(7), 0.95)];

        let package = writer.process(package);

        let stored = store.unconfirmed_faces(5).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, FaceKind::UnconfirmedName);
        assert!(!package.faces[0].roles.contains(FaceRoles::FOR_RECOGNITION));
    }

    #[test]
    fn test_edit_without_assignment_removes_face() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::NormalWrite);
        let record = FaceRecord::new(
            6,
            store.unknown_person_tag().unwrap(),
            Region::new(20, 20, 60, 60),
            FaceKind::UnknownName,
        );
        store.add_face(&record).unwrap();

        let mut face = PackageFace::from_record(record);
        face.roles.insert(FaceRoles::FOR_EDITING);
        let package = writer.process(Box::new(WorkPackage::with_face(
            ItemInfo::new(6, "/p.jpg"),
            face,
        )));

        assert!(store.faces_for_item(6).unwrap().is_empty());
        assert!(package.faces[0].record.is_none());
        assert!(package.faces[0].roles.contains(FaceRoles::EDITED));
    }

    #[test]
    fn test_manual_add_defaults_to_unknown_tag() {
        let (mut writer, store, _dir) = writer_with_store(WriteMode::NormalWrite);

        let mut face = PackageFace::default();
        face.assigned_region = Some(Region::new(5, 5, 30, 30));
        face.roles.insert(FaceRoles::FOR_EDITING);
        let package = writer.process(Box::new(WorkPackage::with_face(
            ItemInfo::new(7, "/p.jpg"),
            face,
        )));

        let stored = store.faces_for_item(7).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].tag_id, store.unknown_person_tag().unwrap());
        assert_eq!(
            package.faces[0].record.as_ref().unwrap().region,
            Region::new(5, 5, 30, 30)
        );
    }
}
