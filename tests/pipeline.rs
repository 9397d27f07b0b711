//! End-to-end pipeline tests with mock engines and a temporary store.

use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::{DynamicImage, RgbImage};

use faceflow::engine::{
    EngineParams, EngineProvider, FaceDetector, FaceRecognizer, Identity, RecognitionResult,
    TrainingSample,
};
use faceflow::store::{FaceStore, FsThumbnailStore, SqliteFaceStore};
use faceflow::{
    Config, FaceKind, FacePipeline, FilterMode, FaceRecord, ItemInfo, PipelineEvent, Region,
    WriteMode,
};

struct MockDetector(Vec<Region>);

impl FaceDetector for MockDetector {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Region>> {
        Ok(self.0.clone())
    }

    fn set_parameters(&mut self, _params: &EngineParams) {}
}

struct MockRecognizer(Option<i64>);

impl FaceRecognizer for MockRecognizer {
    fn recognize(&mut self, crops: &[DynamicImage]) -> Result<Vec<RecognitionResult>> {
        Ok(crops
            .iter()
            .map(|_| match self.0 {
                Some(id) => RecognitionResult::recognized(Identity::new(id), 0.9),
                None => RecognitionResult::unknown(),
            })
            .collect())
    }

    fn train(&mut self, _samples: &[TrainingSample]) -> Result<()> {
        Ok(())
    }

    fn set_parameters(&mut self, _params: &EngineParams) {}
}

/// Detector that holds every package long enough for a batch to pile up
/// behind the admission ceiling.
struct SlowDetector {
    regions: Vec<Region>,
    delay: Duration,
}

impl FaceDetector for SlowDetector {
    fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Region>> {
        std::thread::sleep(self.delay);
        Ok(self.regions.clone())
    }

    fn set_parameters(&mut self, _params: &EngineParams) {}
}

struct MockProvider {
    regions: Vec<Region>,
    identity: Option<i64>,
}

impl EngineProvider for MockProvider {
    fn create_detector(&self) -> Result<Box<dyn FaceDetector>> {
        Ok(Box::new(MockDetector(self.regions.clone())))
    }

    fn create_recognizer(&self) -> Result<Box<dyn FaceRecognizer>> {
        Ok(Box::new(MockRecognizer(self.identity)))
    }
}

struct SlowProvider {
    regions: Vec<Region>,
    delay: Duration,
}

impl EngineProvider for SlowProvider {
    fn create_detector(&self) -> Result<Box<dyn FaceDetector>> {
        Ok(Box::new(SlowDetector {
            regions: self.regions.clone(),
            delay: self.delay,
        }))
    }

    fn create_recognizer(&self) -> Result<Box<dyn FaceRecognizer>> {
        Ok(Box::new(MockRecognizer(None)))
    }
}

struct Fixture {
    pipeline: FacePipeline,
    store: Arc<SqliteFaceStore>,
    events: Receiver<PipelineEvent>,
    #[allow(dead_code)]
    dir: tempfile::TempDir,
}

fn fixture(regions: Vec<Region>, identity: Option<i64>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFaceStore::open(dir.path().join("faces.db")).unwrap());
    let thumbs = Arc::new(FsThumbnailStore::new(dir.path().join("thumbs")));
    let provider = Arc::new(MockProvider { regions, identity });

    let pipeline = FacePipeline::new(Config::default(), store.clone(), thumbs, provider);
    let (tx, rx) = channel();
    pipeline.set_event_sender(tx);

    Fixture {
        pipeline,
        store,
        events: rx,
        dir,
    }
}

fn write_png(path: &std::path::Path, w: u32, h: u32) {
    DynamicImage::ImageRgb8(RgbImage::new(w, h)).save(path).unwrap();
}

/// Collect events until `Finished` arrives or the timeout elapses.
fn collect_until_finished(rx: &Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut events = Vec::new();
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO);
        match rx.recv_timeout(remaining) {
            Ok(event) => {
                let finished = event == PipelineEvent::Finished;
                events.push(event);
                if finished {
                    return events;
                }
            }
            Err(_) => panic!("pipeline did not finish; events so far: {events:?}"),
        }
    }
}

fn processed_ids(events: &[PipelineEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Processed { item_id } => Some(*item_id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_undecodable_file_is_marked_scanned() {
    let mut fx = fixture(vec![Region::new(10, 10, 40, 40)], None);
    fx.pipeline
        .plug_database_filter(FilterMode::ScanAll)
        .plug_face_preview_loader()
        .plug_face_detector()
        .plug_database_writer(WriteMode::NormalWrite);

    let missing = fx.dir.path().join("not-an-image.jpg");
    std::fs::write(&missing, b"definitely not image data").unwrap();
    assert!(fx.pipeline.process_item(&ItemInfo::new(1, missing)));

    let events = collect_until_finished(&fx.events);
    assert_eq!(processed_ids(&events), vec![1]);
    assert!(fx.store.has_been_scanned(1).unwrap());
    assert!(fx.store.faces_for_item(1).unwrap().is_empty());
    assert!(fx.pipeline.has_finished());
}

#[test]
fn test_rerecognition_batch_skips_items_without_faces() {
    let mut fx = fixture(vec![], Some(42));
    let unconfirmed = Region::new(20, 20, 60, 60);
    for item in [1, 2, 4] {
        fx.store
            .add_face(&FaceRecord::new(
                item,
                fx.store.unknown_person_tag().unwrap(),
                unconfirmed,
                FaceKind::UnknownName,
            ))
            .unwrap();
    }

    fx.pipeline
        .plug_rerecognizing_database_filter()
        .plug_face_recognizer()
        .plug_database_writer(WriteMode::NormalWrite);

    let infos: Vec<ItemInfo> = (1..=5)
        .map(|id| ItemInfo::new(id, fx.dir.path().join(format!("{id}.jpg"))))
        .collect();
    assert_eq!(fx.pipeline.process_batch(&infos), 5);

    let events = collect_until_finished(&fx.events);

    let mut processed = processed_ids(&events);
    processed.sort();
    assert_eq!(processed, vec![1, 2, 4]);

    let skipped: Vec<i64> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Skipped(infos) => Some(infos.iter().map(|i| i.id)),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.contains(&3) && skipped.contains(&5));
    assert!(fx.pipeline.has_finished());
}

#[test]
fn test_parallel_scan_processes_each_item_once() {
    let mut fx = fixture(vec![Region::new(5, 5, 30, 30)], None);
    fx.pipeline
        .plug_face_preview_loader()
        .plug_parallel_face_detectors()
        .plug_database_writer(WriteMode::NormalWrite);

    let infos: Vec<ItemInfo> = (1..=10)
        .map(|id| {
            let path = fx.dir.path().join(format!("img-{id}.png"));
            write_png(&path, 64, 64);
            ItemInfo::new(id, path)
        })
        .collect();
    assert_eq!(fx.pipeline.process_batch(&infos), 10);

    let events = collect_until_finished(&fx.events);
    let mut processed = processed_ids(&events);
    processed.sort();
    assert_eq!(processed, (1..=10).collect::<Vec<_>>());

    for id in 1..=10 {
        assert!(fx.store.has_been_scanned(id).unwrap());
        assert_eq!(fx.store.faces_for_item(id).unwrap().len(), 1);
    }
}

#[test]
fn test_supplied_image_skips_preview_load() {
    let mut fx = fixture(vec![Region::new(8, 8, 24, 24)], None);
    fx.pipeline
        .plug_face_preview_loader()
        .plug_face_detector()
        .plug_database_writer(WriteMode::NormalWrite);

    // The path on disk does not exist, so faces can only come from the
    // image handed in with the submission.
    let info = ItemInfo::new(5, fx.dir.path().join("never-written.png"));
    let image = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
    assert!(fx.pipeline.process_item_with_image(&info, image));

    let events = collect_until_finished(&fx.events);
    assert_eq!(processed_ids(&events), vec![5]);
    assert!(fx.store.has_been_scanned(5).unwrap());
    assert_eq!(fx.store.faces_for_item(5).unwrap().len(), 1);
}

#[test]
fn test_packages_on_road_never_exceed_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFaceStore::open(dir.path().join("faces.db")).unwrap());
    let thumbs = Arc::new(FsThumbnailStore::new(dir.path().join("thumbs")));
    let provider = Arc::new(SlowProvider {
        regions: vec![Region::new(5, 5, 20, 20)],
        delay: Duration::from_millis(30),
    });

    let mut config = Config::default();
    config.flow.max_packages_on_road = 2;
    let mut pipeline = FacePipeline::new(config, store.clone(), thumbs, provider);
    let (tx, rx) = channel();
    pipeline.set_event_sender(tx);
    pipeline
        .plug_face_preview_loader()
        .plug_face_detector()
        .plug_database_writer(WriteMode::NormalWrite);

    let infos: Vec<ItemInfo> = (1..=10)
        .map(|id| {
            let path = dir.path().join(format!("crowd-{id}.png"));
            write_png(&path, 48, 48);
            ItemInfo::new(id, path)
        })
        .collect();
    assert_eq!(pipeline.process_batch(&infos), 10);

    let events = collect_until_finished(&rx);

    // Admissions past the ceiling must wait for a completion, one for one.
    let mut in_flight = 0usize;
    let mut peak = 0;
    for event in &events {
        match event {
            PipelineEvent::ProcessingStarted { .. } => {
                in_flight += 1;
                peak = peak.max(in_flight);
            }
            PipelineEvent::Processed { .. } => in_flight = in_flight.saturating_sub(1),
            _ => {}
        }
    }
    assert_eq!(peak, 2, "events: {events:?}");

    let mut processed = processed_ids(&events);
    processed.sort();
    assert_eq!(processed, (1..=10).collect::<Vec<_>>());
    for id in 1..=10 {
        assert!(store.has_been_scanned(id).unwrap());
    }
}

#[test]
fn test_add_manually_matches_persisted_record() {
    let mut fx = fixture(vec![], None);
    fx.pipeline.plug_database_editor();

    let path = fx.dir.path().join("portrait.png");
    write_png(&path, 128, 128);
    let info = ItemInfo::new(7, path);

    let returned = fx
        .pipeline
        .add_manually(&info, Region::new(30, 30, 50, 50))
        .unwrap();
    collect_until_finished(&fx.events);

    let stored = fx.store.faces_for_item(7).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], returned);
}

#[test]
fn test_confirm_round_trip() {
    let mut fx = fixture(vec![], None);
    fx.pipeline.plug_database_editor();

    let region = Region::new(10, 10, 80, 80);
    let unknown = fx.store.unknown_person_tag().unwrap();
    let record = FaceRecord::new(9, unknown, region, FaceKind::UnknownName);
    fx.store.add_face(&record).unwrap();

    let path = fx.dir.path().join("group.png");
    write_png(&path, 256, 256);
    let info = ItemInfo::new(9, path);

    let returned = fx.pipeline.confirm(&info, &record, Some(77), None);
    collect_until_finished(&fx.events);

    assert_eq!(returned.tag_id, 77);
    assert_eq!(returned.kind, FaceKind::ConfirmedName);
    let stored = fx.store.confirmed_faces(9).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], returned);
}

#[test]
fn test_cancel_leaves_pipeline_reusable() {
    let mut fx = fixture(vec![], None);
    fx.pipeline
        .plug_face_preview_loader()
        .plug_face_detector()
        .plug_database_writer(WriteMode::NormalWrite);

    let infos: Vec<ItemInfo> = (1..=50)
        .map(|id| ItemInfo::new(id, fx.dir.path().join(format!("gone-{id}.png"))))
        .collect();
    fx.pipeline.process_batch(&infos);
    fx.pipeline.cancel();
    assert!(fx.pipeline.has_finished());

    // Give the stage threads a moment to drain their discarded queues.
    std::thread::sleep(Duration::from_millis(300));

    // A fresh submission after the cancel still runs to completion.
    let path = fx.dir.path().join("after-cancel.png");
    write_png(&path, 64, 64);
    assert!(fx.pipeline.process_item(&ItemInfo::new(100, path)));

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO);
        match fx.events.recv_timeout(remaining) {
            Ok(PipelineEvent::Processed { item_id: 100 }) => break,
            Ok(_) => continue,
            Err(_) => panic!("item submitted after cancel was never processed"),
        }
    }
    assert!(fx.store.has_been_scanned(100).unwrap());
}
