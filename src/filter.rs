//! Scan-state filter: decides off the main thread which queued items need
//! pipeline work at all.
//!
//! Database lookups per item are cheap but not free; running them on a
//! dedicated thread keeps batch submission non-blocking. Outcomes are
//! reported to the pipeline controller, which dispatches the surviving
//! packages and announces the skipped items.

use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use anyhow::Result;

use crate::package::{FaceRoles, ItemInfo, WorkPackage};
use crate::pipeline::ControlMsg;
use crate::store::FaceStore;

/// Which items the filter lets through, and with what preloaded faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Every item passes, empty-handed.
    ScanAll,
    /// Items with a scan marker are dropped.
    SkipAlreadyScanned,
    /// Items pass only if they carry unconfirmed faces, preloaded.
    ReadUnconfirmedFaces,
    /// Items pass only if they carry faces queued for training, preloaded.
    ReadFacesForTraining,
    /// Items pass only if they carry confirmed faces, preloaded.
    ReadConfirmedFaces,
}

struct FilterQueue {
    items: VecDeque<ItemInfo>,
    stop: bool,
}

/// Background classifier feeding the pipeline controller.
pub struct ScanStateFilter {
    queue: Arc<(Mutex<FilterQueue>, Condvar)>,
    join: Option<JoinHandle<()>>,
}

impl ScanStateFilter {
    pub fn spawn(
        store: Arc<dyn FaceStore>,
        mode: FilterMode,
        tasks: FaceRoles,
        control: Sender<ControlMsg>,
    ) -> Result<Self> {
        let queue = Arc::new((
            Mutex::new(FilterQueue {
                items: VecDeque::new(),
                stop: false,
            }),
            Condvar::new(),
        ));

        let thread_queue = queue.clone();
        let join = std::thread::Builder::new()
            .name("faceflow-filter".into())
            .spawn(move || {
                run(thread_queue, store, mode, tasks, control);
            })?;

        Ok(Self {
            queue,
            join: Some(join),
        })
    }

    pub fn enqueue(&self, info: ItemInfo) {
        let (lock, cond) = &*self.queue;
        let mut queue = lock.lock().unwrap_or_else(|e| e.into_inner());
        queue.items.push_back(info);
        cond.notify_one();
    }

    pub fn enqueue_batch(&self, infos: Vec<ItemInfo>) {
        let (lock, cond) = &*self.queue;
        let mut queue = lock.lock().unwrap_or_else(|e| e.into_inner());
        queue.items.extend(infos);
        cond.notify_one();
    }

    /// Drop everything still waiting for classification.
    pub fn clear(&self) {
        let (lock, _) = &*self.queue;
        let mut queue = lock.lock().unwrap_or_else(|e| e.into_inner());
        queue.items.clear();
    }

    pub fn stop(&mut self) {
        let (lock, cond) = &*self.queue;
        {
            let mut queue = lock.lock().unwrap_or_else(|e| e.into_inner());
            queue.stop = true;
            cond.notify_one();
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ScanStateFilter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    queue: Arc<(Mutex<FilterQueue>, Condvar)>,
    store: Arc<dyn FaceStore>,
    mode: FilterMode,
    tasks: FaceRoles,
    control: Sender<ControlMsg>,
) {
    let (lock, cond) = &*queue;
    loop {
        let batch: Vec<ItemInfo> = {
            let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            while guard.items.is_empty() && !guard.stop {
                guard = cond.wait(guard).unwrap_or_else(|e| e.into_inner());
            }
            if guard.stop && guard.items.is_empty() {
                return;
            }
            guard.items.drain(..).collect()
        };

        let mut packages = Vec::new();
        let mut skipped = Vec::new();
        for info in batch {
            match classify(store.as_ref(), mode, tasks, &info) {
                Some(package) => packages.push(package),
                None => skipped.push(info),
            }
        }

        if control
            .send(ControlMsg::Filtered { packages, skipped })
            .is_err()
        {
            // Controller gone; nothing left to report to.
            return;
        }
    }
}

fn classify(
    store: &dyn FaceStore,
    mode: FilterMode,
    tasks: FaceRoles,
    info: &ItemInfo,
) -> Option<Box<WorkPackage>> {
    match mode {
        FilterMode::ScanAll => Some(Box::new(WorkPackage::new(info.clone()))),
        FilterMode::SkipAlreadyScanned => match store.has_been_scanned(info.id) {
            Ok(true) => None,
            Ok(false) => Some(Box::new(WorkPackage::new(info.clone()))),
            Err(e) => {
                tracing::warn!(item = info.id, error = %e, "scan marker lookup failed, skipping item");
                None
            }
        },
        FilterMode::ReadUnconfirmedFaces
        | FilterMode::ReadFacesForTraining
        | FilterMode::ReadConfirmedFaces => {
            let records = match mode {
                FilterMode::ReadUnconfirmedFaces => store.unconfirmed_faces(info.id),
                FilterMode::ReadFacesForTraining => store.faces_for_training(info.id),
                _ => store.confirmed_faces(info.id),
            };
            match records {
                Ok(records) if records.is_empty() => None,
                Ok(records) => {
                    let roles = FaceRoles::READ_FROM_DATABASE | tasks;
                    Some(Box::new(WorkPackage::with_faces(
                        info.clone(),
                        records,
                        roles,
                    )))
                }
                Err(e) => {
                    tracing::warn!(item = info.id, error = %e, "face lookup failed, skipping item");
                    None
                }
            }
        }
    }
}
