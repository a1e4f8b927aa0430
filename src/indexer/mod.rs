use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::model::types::CatalogDocument;
use crate::registry::FilePointer;
use crate::search::tantivy::CatalogIndex;

/// Documents staged before each index commit.
pub const BATCH_LIMIT: usize = 500;

/// Builds the index document for one pointer.
pub trait DocumentSource: Send + Sync {
    fn build(&self, pointer: &FilePointer) -> Result<CatalogDocument>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Point-in-time copy of the job's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexStatus {
    pub running: bool,
    pub phase: JobPhase,
    pub processed: usize,
    pub ok: usize,
    pub error: usize,
    pub total: usize,
    pub log: Vec<String>,
    pub batches_committed: usize,
}

impl ReindexStatus {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReindexError {
    #[error("Reindex already started")]
    AlreadyRunning,
    #[error("Reindex in progress, try again once it finishes")]
    Busy,
}

/// The process-wide reindex job. At most one scan runs at a time; progress is
/// polled through [`ReindexJob::status`].
pub struct ReindexJob {
    batch_limit: usize,
    state: Mutex<ReindexStatus>,
    cancel: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ReindexJob {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears `running` if the scan thread panics before reaching a terminal phase.
struct ScanGuard<'a>(&'a ReindexJob);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let mut state = self.0.state.lock();
        if state.running {
            tracing::warn!("reindex scan panicked");
            state.running = false;
            state.phase = JobPhase::Cancelled;
        }
    }
}

impl ReindexJob {
    pub fn new() -> Self {
        Self::with_batch_limit(BATCH_LIMIT)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
            state: Mutex::new(ReindexStatus::default()),
            cancel: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Reset counters and scan `items` on a background thread. Returns as soon
    /// as the scan is launched.
    pub fn start(
        self: &Arc<Self>,
        items: Vec<Arc<FilePointer>>,
        source: Arc<dyn DocumentSource>,
        index: Arc<dyn CatalogIndex>,
    ) -> Result<(), ReindexError> {
        {
            let mut state = self.state.lock();
            if state.running {
                return Err(ReindexError::AlreadyRunning);
            }
            *state = ReindexStatus {
                running: true,
                phase: JobPhase::Running,
                total: items.len(),
                ..Default::default()
            };
            self.cancel.store(false, Ordering::SeqCst);
        }
        tracing::info!(total = items.len(), batch_limit = self.batch_limit, "reindex_start");

        let job = Arc::clone(self);
        let handle = thread::spawn(move || {
            let _guard = ScanGuard(&job);
            job.scan(&items, source.as_ref(), index.as_ref());
        });
        // A previous scan has already finished; its handle is only for `wait`.
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Ask the running scan to stop before its next item.
    pub fn cancel(&self) -> bool {
        let running = self.state.lock().running;
        if running {
            self.cancel.store(true, Ordering::SeqCst);
        }
        running
    }

    pub fn status(&self) -> ReindexStatus {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Block until the current scan (if any) has finished.
    pub fn wait(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!("reindex thread panicked");
        }
    }

    /// Run `f` only while no scan is running; starting a scan waits until `f`
    /// returns.
    pub fn while_idle<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReindexError> {
        let state = self.state.lock();
        if state.running {
            return Err(ReindexError::Busy);
        }
        let out = f();
        drop(state);
        Ok(out)
    }

    fn push_log(&self, line: String) {
        self.state.lock().log.push(line);
    }

    fn log_percent(&self) {
        let mut state = self.state.lock();
        if state.total != 0 {
            let line = format!("{:.1}% done", state.percent());
            state.log.push(line);
        }
    }

    fn scan(&self, items: &[Arc<FilePointer>], source: &dyn DocumentSource, index: &dyn CatalogIndex) {
        let mut batch: Vec<CatalogDocument> = Vec::with_capacity(self.batch_limit.min(items.len()));
        let mut cancelled = false;

        for pointer in items {
            if self.cancel.load(Ordering::SeqCst) {
                self.push_log("Cancelled".to_string());
                cancelled = true;
                break;
            }

            match source.build(pointer) {
                Ok(doc) => {
                    batch.push(doc);
                    let mut state = self.state.lock();
                    state.ok += 1;
                    state.processed += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %pointer.key, hash = %pointer.hash, error = %format!("{e:#}"), "reindex_item_failed");
                    let mut state = self.state.lock();
                    state.error += 1;
                    state.processed += 1;
                    state.log.push(format!("{}: {e:#}", pointer.key));
                }
            }

            if batch.len() >= self.batch_limit {
                self.push_log(format!("Processing batch of {} files", batch.len()));
                if self.commit(index, &batch) {
                    self.log_percent();
                }
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.push_log(format!("Processing final batch of {} files", batch.len()));
            if self.commit(index, &batch) {
                if cancelled {
                    self.log_percent();
                } else {
                    self.push_log("100% done!".to_string());
                }
            }
        }

        // Terminal phase and `running` flip under one lock.
        let mut state = self.state.lock();
        state.running = false;
        state.phase = if cancelled {
            JobPhase::Cancelled
        } else {
            JobPhase::Completed
        };
        tracing::info!(
            processed = state.processed,
            ok = state.ok,
            error = state.error,
            batches = state.batches_committed,
            cancelled,
            "reindex_finished"
        );
    }

    /// Commit one batch; failures are logged and the scan carries on.
    fn commit(&self, index: &dyn CatalogIndex, batch: &[CatalogDocument]) -> bool {
        match index.commit_batch(batch) {
            Ok(()) => {
                self.state.lock().batches_committed += 1;
                tracing::debug!(docs = batch.len(), "reindex_batch_committed");
                true
            }
            Err(e) => {
                tracing::warn!(docs = batch.len(), error = %format!("{e:#}"), "reindex_batch_failed");
                self.push_log(format!("Error: {e:#}"));
                false
            }
        }
    }
}
