//! Pipeline stages and the thread/channel machinery that runs them.
//!
//! Every stage owns a dedicated thread fed by a FIFO channel. Settings
//! changes travel through the same channel as packages, so a change takes
//! effect exactly on the packages submitted after it, never the ones
//! already queued or in flight.

pub mod benchmark;
pub mod detection;
pub mod parallel;
pub mod preview;
pub mod recognition;
pub mod trainer;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use anyhow::Result;

use crate::engine::DetectionModel;
use crate::package::WorkPackage;

pub use benchmark::{DetectionBenchmarker, DetectionStats, RecognitionBenchmarker, RecognitionStats};
pub use detection::DetectionWorker;
pub use parallel::spawn_parallel_stages;
pub use preview::PreviewLoader;
pub use recognition::RecognitionWorker;
pub use trainer::TrainerWorker;
pub use writer::{DatabaseWriter, WriteMode};

/// Runtime configuration broadcast to every plugged stage; stages ignore
/// variants that do not concern them.
#[derive(Debug, Clone)]
pub enum SettingsChange {
    Detection { accuracy: f64, model: DetectionModel },
    RecognitionThreshold(f64),
}

/// Messages on a stage's inbound queue.
pub enum StageMsg {
    Package(Box<WorkPackage>),
    Settings(SettingsChange),
    Stop,
}

/// Where a stage delivers its processed packages: the next stage's queue, or
/// the controller's completion channel after the terminal stage.
pub type PackageSink = Arc<dyn Fn(Box<WorkPackage>) + Send + Sync>;

/// One pipeline step. Implementations run on their own thread; `process`
/// may block as long as it likes.
pub trait Worker: Send + 'static {
    fn name(&self) -> &'static str;

    /// Consume a package, perform this stage's work, hand the package on.
    fn process(&mut self, package: Box<WorkPackage>) -> Box<WorkPackage>;

    /// Apply a queued configuration change; effective for later packages.
    fn apply_settings(&mut self, _change: &SettingsChange) {}

    /// Called once when the stage shuts down.
    fn deactivate(&mut self) {}
}

/// Handle to a running stage thread.
pub struct StageHandle {
    tx: Sender<StageMsg>,
    joins: Vec<JoinHandle<()>>,
}

impl StageHandle {
    pub fn send_package(&self, package: Box<WorkPackage>) {
        let _ = self.tx.send(StageMsg::Package(package));
    }

    /// A clonable handle to the stage's inbound queue.
    pub fn input(&self) -> Sender<StageMsg> {
        self.tx.clone()
    }

    pub fn send_settings(&self, change: SettingsChange) {
        let _ = self.tx.send(StageMsg::Settings(change));
    }

    /// Ask the stage thread(s) to exit once the queue position is reached.
    pub fn stop(&self) {
        let _ = self.tx.send(StageMsg::Stop);
    }

    pub fn join(&mut self) {
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }

    pub(crate) fn from_parts(tx: Sender<StageMsg>, joins: Vec<JoinHandle<()>>) -> Self {
        Self { tx, joins }
    }
}

/// Spawn a stage thread around a worker. Queued packages are discarded while
/// the shared cancel flag is set; in-progress work always runs to completion
/// of its stage.
pub fn spawn_stage<W: Worker>(
    mut worker: W,
    cancelled: Arc<AtomicBool>,
    out: PackageSink,
) -> Result<StageHandle> {
    let (tx, rx) = mpsc::channel::<StageMsg>();
    let name = worker.name();

    let join = std::thread::Builder::new()
        .name(format!("faceflow-{name}"))
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    StageMsg::Package(package) => {
                        if cancelled.load(Ordering::SeqCst) {
                            continue;
                        }
                        out(worker.process(package));
                    }
                    StageMsg::Settings(change) => worker.apply_settings(&change),
                    StageMsg::Stop => break,
                }
            }
            worker.deactivate();
        })?;

    Ok(StageHandle::from_parts(tx, vec![join]))
}

/// Admission gate bounding how many memory-heavy packages one stage may have
/// sent downstream without the pipeline completing them yet.
pub struct FlowGate {
    limit: usize,
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    sent_out: usize,
    open: bool,
}

impl FlowGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    /// Block until a slot is free, then claim it. Returns immediately when
    /// the gate has been opened by a cancel.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.sent_out >= self.limit && !state.open {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.sent_out += 1;
    }

    /// Give a slot back once the package has left the pipeline.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sent_out = state.sent_out.saturating_sub(1);
        self.cond.notify_one();
    }

    /// Wake any blocked acquirer and stop admission control; used on cancel
    /// so the loader thread cannot stay parked forever.
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.open = true;
        self.cond.notify_all();
    }

    /// Re-arm after a cancel, before a new batch starts.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sent_out = 0;
        state.open = false;
    }

    #[cfg(test)]
    pub fn sent_out(&self) -> usize {
        self.state.lock().unwrap().sent_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ItemInfo;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    struct CountingWorker {
        seen_threshold: f64,
        log: Sender<(i64, f64)>,
    }

    impl Worker for CountingWorker {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn process(&mut self, package: Box<WorkPackage>) -> Box<WorkPackage> {
            let _ = self.log.send((package.item_id(), self.seen_threshold));
            package
        }

        fn apply_settings(&mut self, change: &SettingsChange) {
            if let SettingsChange::RecognitionThreshold(t) = change {
                self.seen_threshold = *t;
            }
        }
    }

    fn package(id: i64) -> Box<WorkPackage> {
        Box::new(WorkPackage::new(ItemInfo::new(id, "/p.jpg")))
    }

    #[test]
    fn test_settings_apply_to_later_packages_only() {
        let (log_tx, log_rx) = channel();
        let (out_tx, out_rx) = channel();
        let out: PackageSink = Arc::new(move |pkg| {
            let _ = out_tx.send(pkg);
        });

        let worker = CountingWorker {
            seen_threshold: 0.5,
            log: log_tx,
        };
        let mut handle =
            spawn_stage(worker, Arc::new(AtomicBool::new(false)), out).unwrap();

        handle.send_package(package(1));
        handle.send_settings(SettingsChange::RecognitionThreshold(0.9));
        handle.send_package(package(2));
        handle.stop();
        handle.join();

        // Package 1 was queued before the settings change, package 2 after.
        assert_eq!(log_rx.recv().unwrap(), (1, 0.5));
        assert_eq!(log_rx.recv().unwrap(), (2, 0.9));
        assert_eq!(out_rx.try_iter().count(), 2);
    }

    #[test]
    fn test_cancel_discards_queued_packages() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = channel();
        let out: PackageSink = Arc::new(move |pkg| {
            let _ = out_tx.send(pkg);
        });
        let (log_tx, _log_rx) = channel();

        let mut handle = spawn_stage(
            CountingWorker {
                seen_threshold: 0.0,
                log: log_tx,
            },
            cancelled.clone(),
            out,
        )
        .unwrap();

        cancelled.store(true, Ordering::SeqCst);
        handle.send_package(package(1));
        handle.send_package(package(2));
        handle.stop();
        handle.join();

        assert_eq!(out_rx.try_iter().count(), 0);
    }

    #[test]
    fn test_flow_gate_blocks_at_limit() {
        let gate = Arc::new(FlowGate::new(2));
        gate.acquire();
        gate.acquire();
        assert_eq!(gate.sent_out(), 2);

        let gate2 = gate.clone();
        let t = std::thread::spawn(move || {
            gate2.acquire();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!t.is_finished());

        gate.release();
        t.join().unwrap();
        assert_eq!(gate.sent_out(), 2);
    }

    #[test]
    fn test_flow_gate_open_unblocks() {
        let gate = Arc::new(FlowGate::new(1));
        gate.acquire();
        let gate2 = gate.clone();
        let t = std::thread::spawn(move || gate2.acquire());
        std::thread::sleep(Duration::from_millis(20));
        gate.open();
        t.join().unwrap();
    }
}
