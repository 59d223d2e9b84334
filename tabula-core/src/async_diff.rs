//! Tree diff on a background thread.
//!
//! The worker walks both trees and pushes events into a bounded channel;
//! the consumer pulls batches with a timeout. A full channel blocks the
//! worker, so memory stays bounded by `buffer_size` events.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::DiffConfig;
use crate::diff::{DiffEvent, DiffStats, TreeDiff};
use crate::error::{Error, Result, StoreError};
use crate::tree::Tree;

pub struct AsyncDiffer {
    rx: Option<Receiver<Result<DiffEvent>>>,
    worker: Option<JoinHandle<DiffStats>>,
    cancel: CancelToken,
    done: bool,
}

impl AsyncDiffer {
    /// Start diffing `old` against `new`.
    pub fn start(old: Tree, new: Tree, config: &DiffConfig) -> Self {
        let (tx, rx) = mpsc::sync_channel(config.buffer_size.max(1));
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let worker = thread::spawn(move || {
            let mut diff = match TreeDiff::new(&old, &new, Some(token)) {
                Ok(diff) => diff,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return DiffStats::default();
                }
            };
            for event in diff.by_ref() {
                let failed = event.is_err();
                // the receiver is gone once the consumer closes
                if tx.send(event).is_err() || failed {
                    break;
                }
            }
            let stats = diff.stats();
            log::debug!(
                "diff worker finished: {} entries compared, {} subtrees skipped",
                stats.entries_compared,
                stats.subtrees_skipped
            );
            stats
        });

        AsyncDiffer {
            rx: Some(rx),
            worker: Some(worker),
            cancel,
            done: false,
        }
    }

    /// Wait up to `timeout` for the next event, then take whatever else is
    /// already buffered, up to `max` events in total.
    ///
    /// An empty batch means either a timeout while the worker is still
    /// running or the end of the diff; [`is_done`](Self::is_done) tells them
    /// apart. A worker error is returned once and ends the diff.
    pub fn get_diffs(&mut self, max: usize, timeout: Duration) -> Result<Vec<DiffEvent>> {
        let mut batch = Vec::new();
        let Some(rx) = &self.rx else {
            return Ok(batch);
        };
        if self.done || max == 0 {
            return Ok(batch);
        }

        let first = match rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(batch),
            Err(RecvTimeoutError::Disconnected) => {
                self.done = true;
                return Ok(batch);
            }
        };
        match first {
            Ok(event) => batch.push(event),
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        }

        while batch.len() < max {
            match rx.try_recv() {
                Ok(Ok(event)) => batch.push(event),
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.done = true;
                    break;
                }
            }
        }
        Ok(batch)
    }

    /// True once every event has been handed out.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Stop the worker and wait for it.
    pub fn close(&mut self) -> Result<DiffStats> {
        self.cancel.cancel();
        // unblocks a worker waiting on a full channel
        self.rx = None;
        self.done = true;
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::Store(StoreError::Other("diff worker panicked".into()))),
            None => Ok(DiffStats::default()),
        }
    }
}

impl Drop for AsyncDiffer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
