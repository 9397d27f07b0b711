use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Result;

use crate::workers::{spawn_stage, PackageSink, StageHandle, StageMsg, Worker};

/// Fan a single stage position out over several identical worker threads.
///
/// A lightweight dispatcher thread round-robins packages across the child
/// stages and broadcasts settings changes to all of them; every child
/// delivers into the same downstream sink. Per-package FIFO ordering is
/// deliberately given up here in exchange for throughput, so this belongs
/// only at positions where later stages do not depend on arrival order.
pub fn spawn_parallel_stages<W: Worker>(
    workers: Vec<W>,
    cancelled: Arc<AtomicBool>,
    out: PackageSink,
) -> Result<StageHandle> {
    debug_assert!(!workers.is_empty());

    let mut children = Vec::with_capacity(workers.len());
    for worker in workers {
        children.push(spawn_stage(worker, cancelled.clone(), out.clone())?);
    }

    let (tx, rx) = mpsc::channel::<StageMsg>();
    let join = std::thread::Builder::new()
        .name("faceflow-dispatch".into())
        .spawn(move || {
            let mut next = 0usize;
            while let Ok(msg) = rx.recv() {
                match msg {
                    StageMsg::Package(package) => {
                        children[next].send_package(package);
                        next = (next + 1) % children.len();
                    }
                    StageMsg::Settings(change) => {
                        for child in &children {
                            child.send_settings(change.clone());
                        }
                    }
                    StageMsg::Stop => break,
                }
            }
            for child in &children {
                child.stop();
            }
            for child in &mut children {
                child.join();
            }
        })?;

    Ok(StageHandle::from_parts(tx, vec![join]))
}
