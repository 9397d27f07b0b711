//! Pipeline controller: assembles plugged stages into a running chain of
//! worker threads and owns batch accounting, flow control and shutdown.
//!
//! A pipeline is configured once through the `plug_*` methods, then started
//! lazily on the first submission. A supervisor thread listens on a control
//! channel for completed packages and filter outcomes; it enforces the
//! packages-on-the-road ceiling, releases delayed packages one-for-one,
//! emits progress events and detects batch completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::Result;
use image::DynamicImage;

use crate::config::Config;
use crate::engine::{detection_params, recognition_params, DetectionModel, EngineProvider};
use crate::filter::{FilterMode, ScanStateFilter};
use crate::package::{FaceKind, FaceRecord, FaceRoles, ItemInfo, PackageFace, Region, WorkPackage};
use crate::retriever::ItemRetriever;
use crate::store::{FaceEditor, FaceStore, ThumbnailStore};
use crate::workers::{
    spawn_parallel_stages, spawn_stage, DatabaseWriter, DetectionBenchmarker, DetectionStats,
    DetectionWorker, FlowGate, PackageSink, PreviewLoader, RecognitionBenchmarker,
    RecognitionStats, RecognitionWorker, SettingsChange, StageHandle, StageMsg, TrainerWorker,
    WriteMode,
};

/// Notifications the pipeline emits to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The pipeline is about to spin up its threads.
    Scheduled,
    /// All stage threads are running.
    Started,
    /// A package entered the first stage.
    ProcessingStarted { item_id: i64 },
    /// A package left the last stage.
    Processed { item_id: i64 },
    Progress { processed: usize, total: usize },
    /// Items the scan-state filter decided not to process.
    Skipped(Vec<ItemInfo>),
    /// The current batch has drained completely.
    Finished,
}

/// Messages on the supervisor's control channel.
pub enum ControlMsg {
    /// A package completed the whole stage chain.
    Done(Box<WorkPackage>),
    /// Classification outcome for a drained filter batch.
    Filtered {
        packages: Vec<Box<WorkPackage>>,
        skipped: Vec<ItemInfo>,
    },
    Stop,
}

type EventSender = Arc<Mutex<Option<Sender<PipelineEvent>>>>;

fn emit(events: &EventSender, event: PipelineEvent) {
    let guard = events.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(tx) = guard.as_ref() {
        let _ = tx.send(event);
    }
}

/// Batch accounting shared between the controller and the supervisor.
#[derive(Default)]
struct FlowState {
    /// Packages dispatched into the stage chain and not yet completed.
    packages_on_road: usize,
    /// Items handed to the filter and not yet classified.
    infos_for_filtering: usize,
    /// Packages held back because the ceiling was reached.
    delayed: VecDeque<Box<WorkPackage>>,
    processed: usize,
    total: usize,
    running: bool,
}

impl FlowState {
    fn drained(&self) -> bool {
        self.packages_on_road == 0 && self.infos_for_filtering == 0 && self.delayed.is_empty()
    }
}

/// Admit a package to the first stage, or park it when the ceiling is hit.
fn dispatch(
    flow: &Mutex<FlowState>,
    entry: &Sender<StageMsg>,
    events: &EventSender,
    ceiling: usize,
    package: Box<WorkPackage>,
) {
    let item_id = package.item_id();
    {
        let mut flow = flow.lock().unwrap_or_else(|e| e.into_inner());
        if flow.packages_on_road >= ceiling {
            flow.delayed.push_back(package);
            return;
        }
        flow.packages_on_road += 1;
    }
    emit(events, PipelineEvent::ProcessingStarted { item_id });
    let _ = entry.send(StageMsg::Package(package));
}

struct Supervisor {
    flow: Arc<Mutex<FlowState>>,
    entry: Sender<StageMsg>,
    gate: Arc<FlowGate>,
    events: EventSender,
    ceiling: usize,
}

impl Supervisor {
    fn run(self, rx: mpsc::Receiver<ControlMsg>) {
        while let Ok(msg) = rx.recv() {
            match msg {
                ControlMsg::Done(package) => self.package_done(package),
                ControlMsg::Filtered { packages, skipped } => {
                    self.filter_outcome(packages, skipped)
                }
                ControlMsg::Stop => break,
            }
        }
    }

    fn package_done(&self, package: Box<WorkPackage>) {
        self.gate.release();

        let (item_id, progress, next) = {
            let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
            if !flow.running {
                // Straggler completing after a cancel; accounting was reset.
                return;
            }
            flow.packages_on_road = flow.packages_on_road.saturating_sub(1);
            flow.processed += 1;
            let next = flow.delayed.pop_front();
            if next.is_some() {
                flow.packages_on_road += 1;
            }
            (package.item_id(), (flow.processed, flow.total), next)
        };

        emit(&self.events, PipelineEvent::Processed { item_id });
        emit(
            &self.events,
            PipelineEvent::Progress {
                processed: progress.0,
                total: progress.1,
            },
        );

        if let Some(delayed) = next {
            emit(
                &self.events,
                PipelineEvent::ProcessingStarted {
                    item_id: delayed.item_id(),
                },
            );
            let _ = self.entry.send(StageMsg::Package(delayed));
        }

        self.check_finished();
    }

    fn filter_outcome(&self, packages: Vec<Box<WorkPackage>>, skipped: Vec<ItemInfo>) {
        {
            let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
            flow.infos_for_filtering = flow
                .infos_for_filtering
                .saturating_sub(packages.len() + skipped.len());
            flow.total = flow.total.saturating_sub(skipped.len());
        }
        if !skipped.is_empty() {
            emit(&self.events, PipelineEvent::Skipped(skipped));
        }
        for package in packages {
            dispatch(&self.flow, &self.entry, &self.events, self.ceiling, package);
        }
        self.check_finished();
    }

    fn check_finished(&self) {
        let finished = {
            let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
            if flow.running && flow.drained() {
                flow.running = false;
                flow.processed = 0;
                flow.total = 0;
                true
            } else {
                false
            }
        };
        if finished {
            emit(&self.events, PipelineEvent::Finished);
        }
    }
}

/// Stage set recorded by the `plug_*` calls.
#[derive(Default)]
struct Plugs {
    filter: Option<FilterMode>,
    filter_tasks: FaceRoles,
    preview_loader: bool,
    detector: bool,
    parallel_detectors: bool,
    recognizer: bool,
    detection_benchmark: bool,
    recognition_benchmark: bool,
    writer: Option<WriteMode>,
    trainer: bool,
}

struct Runtime {
    stages: Vec<StageHandle>,
    entry: Sender<StageMsg>,
    control_tx: Sender<ControlMsg>,
    supervisor: Option<JoinHandle<()>>,
    filter: Option<ScanStateFilter>,
    detection_stats: Option<Arc<Mutex<DetectionStats>>>,
    recognition_stats: Option<Arc<Mutex<RecognitionStats>>>,
}

/// The assembled face-management pipeline.
pub struct FacePipeline {
    config: Config,
    store: Arc<dyn FaceStore>,
    thumbs: Arc<dyn ThumbnailStore>,
    provider: Arc<dyn EngineProvider>,
    plugs: Plugs,
    runtime: Option<Runtime>,
    flow: Arc<Mutex<FlowState>>,
    gate: Arc<FlowGate>,
    cancelled: Arc<AtomicBool>,
    events: EventSender,
}

impl FacePipeline {
    pub fn new(
        config: Config,
        store: Arc<dyn FaceStore>,
        thumbs: Arc<dyn ThumbnailStore>,
        provider: Arc<dyn EngineProvider>,
    ) -> Self {
        let gate = Arc::new(FlowGate::new(config.flow.loader_sent_out_limit));
        Self {
            config,
            store,
            thumbs,
            provider,
            plugs: Plugs::default(),
            runtime: None,
            flow: Arc::new(Mutex::new(FlowState::default())),
            gate,
            cancelled: Arc::new(AtomicBool::new(false)),
            events: Arc::new(Mutex::new(None)),
        }
    }

    /// Receive [`PipelineEvent`]s; may be set or replaced at any time.
    pub fn set_event_sender(&self, sender: Sender<PipelineEvent>) {
        let mut guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(sender);
    }

    // --- plugging -----------------------------------------------------

    pub fn plug_database_filter(&mut self, mode: FilterMode) -> &mut Self {
        self.plugs.filter = Some(mode);
        self
    }

    /// Filter preset for suggesting names on existing unconfirmed faces.
    pub fn plug_rerecognizing_database_filter(&mut self) -> &mut Self {
        self.plugs.filter = Some(FilterMode::ReadUnconfirmedFaces);
        self.plugs.filter_tasks = FaceRoles::FOR_RECOGNITION;
        self
    }

    /// Filter preset for re-feeding confirmed faces to the trainer.
    pub fn plug_retraining_database_filter(&mut self) -> &mut Self {
        self.plugs.filter = Some(FilterMode::ReadConfirmedFaces);
        self.plugs.filter_tasks = FaceRoles::FOR_TRAINING;
        self
    }

    pub fn plug_face_preview_loader(&mut self) -> &mut Self {
        self.plugs.preview_loader = true;
        self
    }

    pub fn plug_face_detector(&mut self) -> &mut Self {
        self.plugs.detector = true;
        self
    }

    /// Like [`plug_face_detector`](Self::plug_face_detector), but fans out
    /// over several detector instances when the host has the cores for it.
    pub fn plug_parallel_face_detectors(&mut self) -> &mut Self {
        self.plugs.detector = true;
        self.plugs.parallel_detectors = true;
        self
    }

    pub fn plug_face_recognizer(&mut self) -> &mut Self {
        self.plugs.recognizer = true;
        self
    }

    pub fn plug_database_writer(&mut self, mode: WriteMode) -> &mut Self {
        self.plugs.writer = Some(mode);
        self
    }

    /// Writer preset for interactive face editing.
    pub fn plug_database_editor(&mut self) -> &mut Self {
        self.plugs.writer = Some(WriteMode::NormalWrite);
        self
    }

    pub fn plug_trainer(&mut self) -> &mut Self {
        self.plugs.trainer = true;
        self
    }

    pub fn plug_detection_benchmarker(&mut self) -> &mut Self {
        self.plugs.detection_benchmark = true;
        self
    }

    pub fn plug_recognition_benchmarker(&mut self) -> &mut Self {
        self.plugs.recognition_benchmark = true;
        self
    }

    // --- lifecycle ----------------------------------------------------

    fn retriever(&self) -> ItemRetriever {
        ItemRetriever::new(
            self.thumbs.clone(),
            self.config.detection.preview_size,
            self.cancelled.clone(),
        )
    }

    fn stage_sink(stage: &StageHandle) -> PackageSink {
        let tx = stage.input();
        Arc::new(move |package| {
            let _ = tx.send(StageMsg::Package(package));
        })
    }

    /// Spawn stage threads, supervisor and filter. Idempotent.
    fn ensure_started(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Ok(());
        }

        emit(&self.events, PipelineEvent::Scheduled);
        tracing::info!("starting face pipeline");

        let (control_tx, control_rx) = mpsc::channel::<ControlMsg>();
        let done_tx = control_tx.clone();
        let mut sink: PackageSink = Arc::new(move |package| {
            let _ = done_tx.send(ControlMsg::Done(package));
        });

        // Stages are built back to front so each one can feed the next.
        let mut stages: Vec<StageHandle> = Vec::new();
        let push = |stage: StageHandle, stages: &mut Vec<StageHandle>| -> PackageSink {
            let next = Self::stage_sink(&stage);
            stages.push(stage);
            next
        };

        if self.plugs.trainer {
            let worker = TrainerWorker::new(
                self.provider.create_recognizer()?,
                self.retriever(),
                self.store.clone(),
            );
            let stage = spawn_stage(worker, self.cancelled.clone(), sink)?;
            sink = push(stage, &mut stages);
        }

        if let Some(mode) = self.plugs.writer {
            let worker = DatabaseWriter::new(
                mode,
                FaceEditor::new(self.store.clone()),
                self.thumbs.clone(),
            );
            let stage = spawn_stage(worker, self.cancelled.clone(), sink)?;
            sink = push(stage, &mut stages);
        }

        let mut recognition_stats = None;
        if self.plugs.recognition_benchmark {
            let stats = Arc::new(Mutex::new(RecognitionStats::default()));
            let worker = RecognitionBenchmarker::new(self.store.clone(), stats.clone());
            recognition_stats = Some(stats);
            let stage = spawn_stage(worker, self.cancelled.clone(), sink)?;
            sink = push(stage, &mut stages);
        }

        let mut detection_stats = None;
        if self.plugs.detection_benchmark {
            let stats = Arc::new(Mutex::new(DetectionStats::default()));
            let worker = DetectionBenchmarker::new(stats.clone());
            detection_stats = Some(stats);
            let stage = spawn_stage(worker, self.cancelled.clone(), sink)?;
            sink = push(stage, &mut stages);
        }

        if self.plugs.recognizer {
            let mut recognizer = self.provider.create_recognizer()?;
            recognizer.set_parameters(&recognition_params(self.config.recognition.threshold));
            let worker = RecognitionWorker::new(recognizer, self.retriever());
            let stage = spawn_stage(worker, self.cancelled.clone(), sink)?;
            sink = push(stage, &mut stages);
        }

        if self.plugs.detector {
            let params = detection_params(
                self.config.detection.accuracy,
                self.config.detection.model,
            );
            let instances = if self.plugs.parallel_detectors {
                self.config.flow.parallel_detectors.max(1)
            } else {
                1
            };
            let stage = if instances > 1 {
                let mut workers = Vec::with_capacity(instances);
                for _ in 0..instances {
                    let mut detector = self.provider.create_detector()?;
                    detector.set_parameters(&params);
                    workers.push(DetectionWorker::new(detector));
                }
                tracing::info!(instances, "running parallel face detection");
                spawn_parallel_stages(workers, self.cancelled.clone(), sink)?
            } else {
                let mut detector = self.provider.create_detector()?;
                detector.set_parameters(&params);
                spawn_stage(DetectionWorker::new(detector), self.cancelled.clone(), sink)?
            };
            sink = push(stage, &mut stages);
        }

        if self.plugs.preview_loader {
            let worker =
                PreviewLoader::new(self.config.detection.preview_size, self.gate.clone());
            let stage = spawn_stage(worker, self.cancelled.clone(), sink)?;
            sink = push(stage, &mut stages);
        }
        drop(sink);

        let entry = stages
            .last()
            .map(StageHandle::input)
            .unwrap_or_else(|| {
                // Degenerate pipeline with no stages: complete immediately.
                let (tx, rx) = mpsc::channel::<StageMsg>();
                let done = control_tx.clone();
                let _ = std::thread::Builder::new()
                    .name("faceflow-passthrough".into())
                    .spawn(move || {
                        while let Ok(StageMsg::Package(p)) = rx.recv() {
                            let _ = done.send(ControlMsg::Done(p));
                        }
                    });
                tx
            });

        let supervisor = Supervisor {
            flow: self.flow.clone(),
            entry: entry.clone(),
            gate: self.gate.clone(),
            events: self.events.clone(),
            ceiling: self.config.flow.max_packages_on_road.max(1),
        };
        let supervisor = std::thread::Builder::new()
            .name("faceflow-supervisor".into())
            .spawn(move || supervisor.run(control_rx))?;

        let filter = match self.plugs.filter {
            Some(mode) => Some(ScanStateFilter::spawn(
                self.store.clone(),
                mode,
                self.plugs.filter_tasks,
                control_tx.clone(),
            )?),
            None => None,
        };

        self.runtime = Some(Runtime {
            stages,
            entry,
            control_tx,
            supervisor: Some(supervisor),
            filter,
            detection_stats,
            recognition_stats,
        });

        emit(&self.events, PipelineEvent::Started);
        Ok(())
    }

    /// Reset cancel state and mark a batch as running before admission.
    fn begin_submission(&mut self, items: usize) {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            self.gate.reset();
        }
        let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
        flow.running = true;
        flow.total += items;
    }

    // --- submission ---------------------------------------------------

    /// Queue one item for scanning. Returns false when the item cannot be
    /// processed or the pipeline failed to start.
    pub fn process_item(&mut self, info: &ItemInfo) -> bool {
        if !info.has_file_path() {
            tracing::warn!(item = info.id, "item has no file path, refusing to process");
            return false;
        }
        if let Err(e) = self.ensure_started() {
            tracing::error!(error = %e, "pipeline failed to start");
            return false;
        }

        self.begin_submission(1);
        let runtime = self.runtime.as_ref().unwrap();
        match &runtime.filter {
            Some(filter) => {
                let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
                flow.infos_for_filtering += 1;
                drop(flow);
                filter.enqueue(info.clone());
            }
            None => dispatch(
                &self.flow,
                &runtime.entry,
                &self.events,
                self.config.flow.max_packages_on_road.max(1),
                Box::new(WorkPackage::new(info.clone())),
            ),
        }
        true
    }

    /// Queue one item together with an already-decoded image. The package
    /// skips the preview load and goes straight past the scan-state filter,
    /// since the caller decided to process it.
    pub fn process_item_with_image(&mut self, info: &ItemInfo, image: DynamicImage) -> bool {
        if !info.has_file_path() {
            tracing::warn!(item = info.id, "item has no file path, refusing to process");
            return false;
        }
        if let Err(e) = self.ensure_started() {
            tracing::error!(error = %e, "pipeline failed to start");
            return false;
        }

        self.begin_submission(1);
        let runtime = self.runtime.as_ref().unwrap();
        let mut package = Box::new(WorkPackage::new(info.clone()));
        package.original_size = Some((image.width(), image.height()));
        package.image = Some(image);
        dispatch(
            &self.flow,
            &runtime.entry,
            &self.events,
            self.config.flow.max_packages_on_road.max(1),
            package,
        );
        true
    }

    /// Queue a batch; returns how many items were accepted.
    pub fn process_batch(&mut self, infos: &[ItemInfo]) -> usize {
        let valid: Vec<ItemInfo> = infos
            .iter()
            .filter(|i| {
                if i.has_file_path() {
                    true
                } else {
                    tracing::warn!(item = i.id, "item has no file path, dropping from batch");
                    false
                }
            })
            .cloned()
            .collect();
        if valid.is_empty() {
            return 0;
        }
        if let Err(e) = self.ensure_started() {
            tracing::error!(error = %e, "pipeline failed to start");
            return 0;
        }

        let count = valid.len();
        self.begin_submission(count);
        let runtime = self.runtime.as_ref().unwrap();
        match &runtime.filter {
            Some(filter) => {
                let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
                flow.infos_for_filtering += count;
                drop(flow);
                filter.enqueue_batch(valid);
            }
            None => {
                for info in valid {
                    dispatch(
                        &self.flow,
                        &runtime.entry,
                        &self.events,
                        self.config.flow.max_packages_on_road.max(1),
                        Box::new(WorkPackage::new(info)),
                    );
                }
            }
        }
        count
    }

    /// Dispatch a single-face package directly, bypassing the filter.
    fn submit_face(&mut self, info: &ItemInfo, face: PackageFace) -> bool {
        if let Err(e) = self.ensure_started() {
            tracing::error!(error = %e, "pipeline failed to start");
            return false;
        }
        self.begin_submission(1);
        let runtime = self.runtime.as_ref().unwrap();
        dispatch(
            &self.flow,
            &runtime.entry,
            &self.events,
            self.config.flow.max_packages_on_road.max(1),
            Box::new(WorkPackage::with_face(info.clone(), face)),
        );
        true
    }

    // --- face operations ----------------------------------------------

    /// Confirm a face suggestion. The returned record describes the state the
    /// store will reach once the package passes the writer.
    pub fn confirm(
        &mut self,
        info: &ItemInfo,
        record: &FaceRecord,
        tag_id: Option<i64>,
        region: Option<Region>,
    ) -> FaceRecord {
        let confirmed = FaceEditor::confirmed_entry(record, tag_id, region);
        let face = PackageFace {
            record: Some(record.clone()),
            assigned_tag_id: tag_id,
            assigned_region: region,
            roles: FaceRoles::FOR_CONFIRMATION,
        };
        self.submit_face(info, face);
        confirmed
    }

    /// Add a face the user drew by hand. The record (unknown person,
    /// unconfirmed) is returned up front and written asynchronously.
    pub fn add_manually(&mut self, info: &ItemInfo, region: Region) -> Result<FaceRecord> {
        let tag_id = self.store.unknown_person_tag()?;
        let entry = FaceRecord::new(info.id, tag_id, region, FaceKind::UnconfirmedName);
        let face = PackageFace {
            record: None,
            assigned_tag_id: Some(tag_id),
            assigned_region: Some(region),
            roles: FaceRoles::FOR_EDITING,
        };
        self.submit_face(info, face);
        Ok(entry)
    }

    pub fn edit_region(
        &mut self,
        info: &ItemInfo,
        record: &FaceRecord,
        region: Region,
    ) -> FaceRecord {
        let face = PackageFace {
            record: Some(record.clone()),
            assigned_tag_id: None,
            assigned_region: Some(region),
            roles: FaceRoles::FOR_EDITING,
        };
        self.submit_face(info, face);
        FaceRecord {
            region,
            ..record.clone()
        }
    }

    pub fn edit_tag(&mut self, info: &ItemInfo, record: &FaceRecord, tag_id: i64) -> FaceRecord {
        let face = PackageFace {
            record: Some(record.clone()),
            assigned_tag_id: Some(tag_id),
            assigned_region: None,
            roles: FaceRoles::FOR_EDITING,
        };
        self.submit_face(info, face);
        FaceRecord {
            tag_id,
            ..record.clone()
        }
    }

    pub fn remove(&mut self, info: &ItemInfo, record: &FaceRecord) {
        let face = PackageFace {
            record: Some(record.clone()),
            assigned_tag_id: None,
            assigned_region: None,
            roles: FaceRoles::FOR_EDITING,
        };
        self.submit_face(info, face);
    }

    /// Feed already-confirmed records to the trainer stage.
    pub fn train_faces(&mut self, info: &ItemInfo, records: &[FaceRecord]) -> bool {
        if records.is_empty() {
            return false;
        }
        if let Err(e) = self.ensure_started() {
            tracing::error!(error = %e, "pipeline failed to start");
            return false;
        }
        self.begin_submission(1);
        let runtime = self.runtime.as_ref().unwrap();
        let package = WorkPackage::with_faces(
            info.clone(),
            records.to_vec(),
            FaceRoles::FOR_TRAINING,
        );
        dispatch(
            &self.flow,
            &runtime.entry,
            &self.events,
            self.config.flow.max_packages_on_road.max(1),
            Box::new(package),
        );
        true
    }

    // --- configuration ------------------------------------------------

    pub fn set_accuracy_and_model(&mut self, accuracy: f64, model: DetectionModel) {
        self.config.detection.accuracy = accuracy;
        self.config.detection.model = model;
        self.broadcast(SettingsChange::Detection { accuracy, model });
    }

    pub fn set_recognition_threshold(&mut self, threshold: f64) {
        self.config.recognition.threshold = threshold;
        self.broadcast(SettingsChange::RecognitionThreshold(threshold));
    }

    fn broadcast(&self, change: SettingsChange) {
        if let Some(runtime) = &self.runtime {
            for stage in &runtime.stages {
                stage.send_settings(change.clone());
            }
        }
    }

    // --- status -------------------------------------------------------

    pub fn has_finished(&self) -> bool {
        let flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
        !flow.running
    }

    /// Current benchmark report, if a benchmarker is plugged.
    pub fn benchmark_result(&self) -> Option<String> {
        let runtime = self.runtime.as_ref()?;
        if let Some(stats) = &runtime.detection_stats {
            return Some(stats.lock().unwrap_or_else(|e| e.into_inner()).report());
        }
        if let Some(stats) = &runtime.recognition_stats {
            return Some(stats.lock().unwrap_or_else(|e| e.into_inner()).report());
        }
        None
    }

    // --- shutdown -----------------------------------------------------

    /// Abort the current batch. Queued packages are discarded; packages
    /// mid-stage finish their current stage and are then dropped from the
    /// accounting. The pipeline stays usable for a new batch.
    pub fn cancel(&mut self) {
        tracing::info!("cancelling face pipeline batch");
        self.cancelled.store(true, Ordering::SeqCst);
        self.gate.open();
        if let Some(runtime) = &self.runtime {
            if let Some(filter) = &runtime.filter {
                filter.clear();
            }
        }
        let mut flow = self.flow.lock().unwrap_or_else(|e| e.into_inner());
        flow.delayed.clear();
        flow.packages_on_road = 0;
        flow.infos_for_filtering = 0;
        flow.processed = 0;
        flow.total = 0;
        flow.running = false;
    }

    /// Cancel, then stop and join every thread. The pipeline cannot be
    /// restarted afterwards without new submissions re-plugging it.
    pub fn shut_down(&mut self) {
        if self.runtime.is_none() {
            return;
        }
        self.cancel();

        if let Some(mut runtime) = self.runtime.take() {
            if let Some(mut filter) = runtime.filter.take() {
                filter.stop();
            }
            for stage in &runtime.stages {
                stage.stop();
            }
            for stage in &mut runtime.stages {
                stage.join();
            }
            let _ = runtime.control_tx.send(ControlMsg::Stop);
            if let Some(join) = runtime.supervisor.take() {
                let _ = join.join();
            }
        }
        tracing::info!("face pipeline shut down");
    }
}

impl Drop for FacePipeline {
    fn drop(&mut self) {
        self.shut_down();
    }
}
