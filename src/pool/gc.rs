// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Reclaims streamed buffers that nobody has looked at for a while.
//!
//! Collection runs on whichever thread calls
//! [`crate::pool::SamplePool::trigger_garbage_collection`] and never blocks.
//! The reclaimed buffers are freed later on the collector's own thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use super::data::{FileData, FileStatus, StreamBuffer};
use super::file_id::FileId;
use super::PoolError;
use crate::semaphore::RealtimeSemaphore;

struct CollectorState {
    /// Files that finished streaming and may be reclaimed.
    last_used: Vec<FileId>,
    /// Reclaimed buffers waiting to be freed.
    garbage: Vec<Arc<StreamBuffer>>,
}

pub(crate) struct GarbageCollector {
    state: Mutex<CollectorState>,
    semaphore: RealtimeSemaphore,
    capacity: usize,
    clearing_period: Duration,
}

impl GarbageCollector {
    /// Creates a collector that reclaims at most `capacity` buffers per pass.
    pub(crate) fn new(capacity: usize, clearing_period: Duration) -> Result<Self, PoolError> {
        let capacity = capacity.max(1);
        Ok(GarbageCollector {
            state: Mutex::new(CollectorState {
                last_used: Vec::with_capacity(capacity),
                garbage: Vec::with_capacity(capacity),
            }),
            semaphore: RealtimeSemaphore::new(0)?,
            capacity,
            clearing_period,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a file to the reclaim candidates if it is not there yet.
    pub(crate) fn mark_used(&self, id: &FileId) {
        let mut state = self.state.lock();
        if !state.last_used.contains(id) {
            state.last_used.push(id.clone());
        }
    }

    pub(crate) fn recently_used_count(&self) -> usize {
        self.state.lock().last_used.len()
    }

    /// Scans the candidates once and moves reclaimable streamed buffers to the
    /// garbage list. Returns false without doing anything if the bookkeeping
    /// is busy.
    pub(crate) fn collect(&self, files: &RwLock<HashMap<FileId, Arc<FileData>>>) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        let Some(files) = files.try_read() else {
            return false;
        };

        let CollectorState { last_used, garbage } = &mut *state;
        last_used.retain(|id| {
            if garbage.len() >= self.capacity {
                return true;
            }

            // Missing means the pool was cleared after the file streamed.
            let Some(data) = files.get(id) else {
                return false;
            };
            match data.status() {
                FileStatus::Preloaded => return false,
                FileStatus::Done => {}
                _ => return true,
            }
            if data.reader_count() != 0 || data.idle_time() < self.clearing_period {
                return true;
            }

            match data.reclaim() {
                Some(buffer) => {
                    garbage.extend(buffer);
                    false
                }
                None => true,
            }
        });

        drop(files);
        drop(state);

        if let Err(e) = self.semaphore.post() {
            error!(error = %e, "Unable to wake the garbage thread");
        }
        true
    }

    /// Frees everything on the garbage list. `spare` is swapped in so the
    /// list keeps its capacity and the buffers are dropped outside the lock.
    pub(crate) fn empty_garbage(&self, spare: &mut Vec<Arc<StreamBuffer>>) {
        {
            let mut state = self.state.lock();
            std::mem::swap(&mut state.garbage, spare);
        }
        if !spare.is_empty() {
            debug!(buffers = spare.len(), "Freeing reclaimed buffers");
        }
        spare.clear();
    }

    /// Forgets all candidates and garbage.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.last_used.clear();
        state.garbage.clear();
    }

    pub(crate) fn wake(&self) {
        if let Err(e) = self.semaphore.post() {
            error!(error = %e, "Unable to wake the garbage thread");
        }
    }

    /// Body of the garbage thread: frees garbage each time it is woken, until
    /// `quit` is set.
    pub(crate) fn run(&self, quit: &AtomicBool) {
        let mut spare = Vec::with_capacity(self.capacity);
        loop {
            self.semaphore.wait();
            if quit.load(Ordering::Acquire) {
                break;
            }
            self.empty_garbage(&mut spare);
        }
    }

    #[cfg(test)]
    fn garbage_len(&self) -> usize {
        self.state.lock().garbage.len()
    }
}
