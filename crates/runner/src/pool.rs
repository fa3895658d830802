#![forbid(unsafe_code)]

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::scheduler::Scheduler;
use crate::transport::{Clock, LlmTransport};
use bw_storage::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub passes: u64,
    pub committed_turns: u64,
    pub failed_turns: u64,
}

/// N scheduler threads over one storage directory. Each worker owns its own
/// SQLite connection; claims keep them off each other's conversations.
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<Result<WorkerSummary, EngineError>>>,
}

fn run_worker(
    worker_id: String,
    storage_dir: PathBuf,
    orchestrator: Orchestrator,
    stop: Arc<AtomicBool>,
) -> Result<WorkerSummary, EngineError> {
    let mut store = SqliteStore::open(&storage_dir)?;
    let poll = Duration::from_millis(orchestrator.config().poll_ms);
    let scheduler = Scheduler::new(orchestrator, worker_id.clone());
    let mut summary = WorkerSummary {
        worker_id,
        ..WorkerSummary::default()
    };

    while !stop.load(Ordering::Relaxed) {
        let report = scheduler.run_pass(&mut store)?;
        summary.passes += 1;
        for turn in &report.turns {
            match turn {
                TurnOutcome::Committed { .. } => summary.committed_turns += 1,
                TurnOutcome::Failed { .. } => summary.failed_turns += 1,
                TurnOutcome::Deferred { .. } | TurnOutcome::Abandoned { .. } => {}
            }
        }
        if report.is_terminal() {
            info!(worker = %summary.worker_id, advance = ?report.advance, "worker stopping");
            break;
        }
        if !report.made_progress() {
            std::thread::sleep(poll);
        }
    }
    Ok(summary)
}

impl WorkerPool {
    pub fn spawn(config: &EngineConfig, transport: Arc<dyn LlmTransport>, clock: Arc<dyn Clock>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let orchestrator = Orchestrator::new(config.clone(), transport, clock);
        let config = orchestrator.config();
        let handles = (0..config.workers)
            .map(|index| {
                let worker_id = format!("worker-{index}");
                let storage_dir = config.storage_dir.clone();
                let orchestrator = orchestrator.clone();
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || run_worker(worker_id, storage_dir, orchestrator, stop))
            })
            .collect();
        info!(workers = config.workers, storage_dir = %config.storage_dir.display(), "worker pool started");
        Self { stop, handles }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker. The first worker error is returned after all
    /// threads have exited.
    pub fn join(self) -> Result<Vec<WorkerSummary>, EngineError> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        let mut first_error = None;
        for (index, handle) in self.handles.into_iter().enumerate() {
            let result = handle
                .join()
                .unwrap_or(Err(EngineError::WorkerPanicked(index)));
            match result {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    warn!(worker = index, error = %err, "worker exited with an error");
                    self.stop.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(summaries),
        }
    }
}
