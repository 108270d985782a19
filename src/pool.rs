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

//! The streaming sample pool.
//!
//! Files are preloaded up front with a short head buffer so that voices can
//! start immediately. When a voice starts, the audio thread asks for a
//! streaming handle, which returns the head buffer right away and queues a
//! background job that streams the rest of the file into a full-length buffer.
//! The audio thread never waits on any of this: every lock it touches is only
//! ever tried, and a failed attempt just means "no more data yet".

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::reader::{AudioReader, ReaderFactory, SymphoniaReaderFactory};
use crate::semaphore::RealtimeSemaphore;

mod data;
mod error;
mod executor;
mod file_id;
mod gc;
mod handle;
mod loader;

pub use data::{AudioBuffer, FileData, FileInformation, FileStatus, StreamBuffer};
pub use error::PoolError;
pub use executor::{spawn_job, Job, JobFuture, LoadExecutor, RayonExecutor};
pub use file_id::FileId;
pub use handle::{AudioView, FileDataHandle};

use gc::GarbageCollector;
use loader::{read_from_reader, reader_information, QueuedFileData};

type FileMap = RwLock<HashMap<FileId, Arc<FileData>>>;

/// State shared between the pool, its dispatcher and garbage threads, and the
/// loading jobs.
pub(crate) struct Shared {
    root_directory: RwLock<PathBuf>,
    pub(crate) factory: Arc<dyn ReaderFactory>,
    pub(crate) chunk_size: usize,
    pub(crate) background_priority: u8,
    pub(crate) collector: GarbageCollector,
    preloaded_files: FileMap,
    loaded_files: FileMap,
    queue_sender: Sender<QueuedFileData>,
    queue_receiver: Receiver<QueuedFileData>,
    queue_capacity: usize,
    dispatch_semaphore: RealtimeSemaphore,
    loading_jobs: Mutex<Vec<JobFuture>>,
    quit: AtomicBool,
}

impl Shared {
    pub(crate) fn root_directory(&self) -> PathBuf {
        self.root_directory.read().clone()
    }
}

/// Loads, caches and streams sample files for a real-time sampler.
pub struct SamplePool {
    shared: Arc<Shared>,
    executor: Arc<dyn LoadExecutor>,
    preload_size: AtomicUsize,
    load_in_ram: AtomicBool,
    dispatch_thread: Option<JoinHandle<()>>,
    garbage_thread: Option<JoinHandle<()>>,
}

impl SamplePool {
    /// Creates a pool that decodes files with symphonia and loads them on its
    /// own Rayon thread pool.
    pub fn new(config: &PoolConfig) -> Result<SamplePool, PoolError> {
        let executor = Arc::new(RayonExecutor::new(config.loader_threads())?);
        SamplePool::with_collaborators(config, executor, Arc::new(SymphoniaReaderFactory))
    }

    /// Creates a pool around an existing executor and reader factory. The
    /// executor may be shared with other pools.
    pub fn with_collaborators(
        config: &PoolConfig,
        executor: Arc<dyn LoadExecutor>,
        factory: Arc<dyn ReaderFactory>,
    ) -> Result<SamplePool, PoolError> {
        let queue_capacity = config.max_streaming_jobs();
        let (queue_sender, queue_receiver) = crossbeam_channel::bounded(queue_capacity);

        let shared = Arc::new(Shared {
            root_directory: RwLock::new(config.root_directory()),
            factory,
            chunk_size: config.chunk_size(),
            background_priority: config.background_priority(),
            collector: GarbageCollector::new(queue_capacity, config.file_clearing_period()?)?,
            preloaded_files: RwLock::new(HashMap::new()),
            loaded_files: RwLock::new(HashMap::new()),
            queue_sender,
            queue_receiver,
            queue_capacity,
            dispatch_semaphore: RealtimeSemaphore::new(0)?,
            loading_jobs: Mutex::new(Vec::new()),
            quit: AtomicBool::new(false),
        });

        let mut pool = SamplePool {
            shared,
            executor,
            preload_size: AtomicUsize::new(config.preload_size()),
            load_in_ram: AtomicBool::new(config.load_in_ram()),
            dispatch_thread: None,
            garbage_thread: None,
        };

        // If either spawn fails, dropping `pool` stops whatever did start.
        let dispatch_shared = pool.shared.clone();
        let dispatch_executor = pool.executor.clone();
        pool.dispatch_thread = Some(
            thread::Builder::new()
                .name("samplepool-dispatch".into())
                .spawn(move || dispatch_loop(dispatch_shared, dispatch_executor))
                .map_err(PoolError::ThreadSpawn)?,
        );

        let garbage_shared = pool.shared.clone();
        pool.garbage_thread = Some(
            thread::Builder::new()
                .name("samplepool-garbage".into())
                .spawn(move || garbage_shared.collector.run(&garbage_shared.quit))
                .map_err(PoolError::ThreadSpawn)?,
        );

        info!(
            root = ?pool.root_directory(),
            preload_size = pool.preload_size(),
            load_in_ram = pool.ram_loading(),
            chunk_size = pool.shared.chunk_size,
            max_streaming_jobs = queue_capacity,
            "Sample pool started"
        );

        Ok(pool)
    }

    /// Sets the directory that sample paths are relative to.
    pub fn set_root_directory<P: Into<PathBuf>>(&self, root: P) {
        *self.shared.root_directory.write() = root.into();
    }

    pub fn root_directory(&self) -> PathBuf {
        self.shared.root_directory()
    }

    /// Number of files held by the pool, preloaded or fully loaded.
    pub fn num_preloaded_samples(&self) -> usize {
        self.shared.preloaded_files.read().len() + self.shared.loaded_files.read().len()
    }

    /// Number of streaming requests waiting to be dispatched.
    pub fn pending_loads(&self) -> usize {
        self.shared.queue_receiver.len()
    }

    /// Number of streamed files the garbage collector is watching.
    pub fn recently_used_count(&self) -> usize {
        self.shared.collector.recently_used_count()
    }

    fn path_of(&self, id: &FileId) -> PathBuf {
        self.root_directory().join(id.filename())
    }

    fn open(&self, id: &FileId) -> Option<Box<dyn AudioReader>> {
        let path = self.path_of(id);
        match self.shared.factory.open(&path, id.is_reversed()) {
            Ok(reader) => Some(reader),
            Err(e) => {
                warn!(path = ?path, error = %e, "Unable to open sample file");
                None
            }
        }
    }

    /// Checks that `filename` exists under the root directory. If it only
    /// exists with different letter case, `filename` is rewritten to the
    /// actual path. Returns false if the file cannot be found.
    pub fn check_sample(&self, filename: &mut String) -> bool {
        let root = self.root_directory();
        if root.join(filename.as_str()).exists() {
            return true;
        }

        // Case-insensitive file systems already answered above.
        if cfg!(windows) {
            return false;
        }

        let mut path = root.clone();
        for component in Path::new(filename.as_str()).components() {
            let part = match component {
                Component::Normal(part) => part,
                // Absolute names are looked up under the root.
                Component::RootDir | Component::Prefix(_) => continue,
                Component::CurDir | Component::ParentDir => {
                    path.push(component.as_os_str());
                    continue;
                }
            };

            let exact = path.join(part);
            if exact.exists() {
                path = exact;
                continue;
            }

            let entries = match fs::read_dir(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(path = ?path, error = %e, "Unable to list directory");
                    return false;
                }
            };
            let wanted = part.to_string_lossy();
            let found = entries
                .filter_map(Result::ok)
                .find(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(&wanted));
            match found {
                Some(entry) => path.push(entry.file_name()),
                None => {
                    debug!(file = %filename, "File not found, could not resolve");
                    return false;
                }
            }
        }

        let Ok(relative) = path.strip_prefix(&root) else {
            debug!(file = %filename, "Resolved path is outside the root directory");
            return false;
        };
        let relative = relative.to_string_lossy().into_owned();
        debug!(from = %filename, to = %relative, "Updating sample path");
        *filename = relative;
        true
    }

    /// Like [`SamplePool::check_sample`], for an identity. Files loaded from
    /// memory are always present.
    pub fn check_sample_id(&self, id: &mut FileId) -> bool {
        if self.shared.loaded_files.read().contains_key(id) {
            return true;
        }

        let mut filename = id.filename().to_string();
        if !self.check_sample(&mut filename) {
            return false;
        }
        *id = FileId::new(filename, id.is_reversed());
        true
    }

    /// Returns the information of a file, from the pool if it holds the file
    /// and from disk otherwise.
    pub fn get_file_information(&self, id: &FileId) -> Option<FileInformation> {
        if let Some(data) = self.existing_record(id) {
            return Some(data.information_blocking());
        }

        let path = self.path_of(id);
        if !path.exists() {
            return None;
        }
        let reader = self.open(id)?;
        reader_information(reader.as_ref())
    }

    fn existing_record(&self, id: &FileId) -> Option<Arc<FileData>> {
        if let Some(data) = self.shared.loaded_files.read().get(id) {
            return Some(data.clone());
        }
        self.shared.preloaded_files.read().get(id).cloned()
    }

    /// Preloads the head of a file, long enough to play `max_offset` frames
    /// in plus the preload size. Calling it again counts another user and
    /// grows the head if `max_offset` is larger.
    ///
    /// Returns false if the file cannot be read or is not mono or stereo.
    pub fn preload_file(&self, id: &FileId, max_offset: usize) -> bool {
        if let Some(data) = self.shared.loaded_files.read().get(id) {
            data.add_preload_call();
            return true;
        }

        let existing = self.shared.preloaded_files.read().get(id).cloned();
        let Some(mut reader) = self.open(id) else {
            return false;
        };

        let information = match &existing {
            Some(data) => data.information_blocking(),
            None => match reader_information(reader.as_ref()) {
                Some(information) => information,
                None => {
                    warn!(file = %id, "Unsupported sample file");
                    return false;
                }
            },
        };

        let frames = reader.frames();
        let frames_to_load = if self.ram_loading() {
            frames
        } else {
            frames.min(max_offset.saturating_add(self.preload_size()))
        };

        if let Some(data) = existing {
            if frames_to_load > data.preloaded_frames() {
                match read_from_reader(reader.as_mut(), frames_to_load, self.shared.chunk_size) {
                    Ok(buffer) => {
                        data.set_max_offset(max_offset);
                        data.replace_preloaded(buffer);
                    }
                    Err(e) => warn!(file = %id, error = %e, "Unable to grow preloaded data"),
                }
            }
            data.add_preload_call();
            return true;
        }

        let buffer = match read_from_reader(reader.as_mut(), frames_to_load, self.shared.chunk_size)
        {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(file = %id, error = %e, "Unable to preload file");
                return false;
            }
        };

        let data = FileData::new(
            buffer,
            FileInformation {
                max_offset,
                ..information
            },
        );
        data.mark_preloaded();

        let mut files = self.shared.preloaded_files.write();
        files
            .entry(id.clone())
            .or_insert_with(|| Arc::new(data))
            .add_preload_call();
        true
    }

    /// Reads a whole file into memory right away. Returns an empty handle if
    /// the file cannot be read.
    pub fn load_file(&self, id: &FileId) -> FileDataHandle {
        if let Some(data) = self.shared.loaded_files.read().get(id) {
            data.add_preload_call();
            return FileDataHandle::new(data.clone());
        }

        let Some(mut reader) = self.open(id) else {
            return FileDataHandle::default();
        };
        self.load_from_reader(id, reader.as_mut())
    }

    /// Decodes a whole file from an in-memory copy of its encoded bytes.
    pub fn load_from_memory(&self, id: &FileId, bytes: &[u8]) -> FileDataHandle {
        if let Some(data) = self.shared.loaded_files.read().get(id) {
            return FileDataHandle::new(data.clone());
        }

        let mut reader = match self.shared.factory.open_memory(bytes, id.is_reversed()) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(file = %id, error = %e, "Unable to decode file from memory");
                return FileDataHandle::default();
            }
        };
        self.load_from_reader(id, reader.as_mut())
    }

    fn load_from_reader(&self, id: &FileId, reader: &mut dyn AudioReader) -> FileDataHandle {
        let Some(information) = reader_information(reader) else {
            warn!(file = %id, "Unsupported sample file");
            return FileDataHandle::default();
        };
        let frames = reader.frames();
        let buffer = match read_from_reader(reader, frames, self.shared.chunk_size) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(file = %id, error = %e, "Unable to load file");
                return FileDataHandle::default();
            }
        };

        let data = FileData::new(buffer, information);
        data.mark_preloaded();

        let mut files = self.shared.loaded_files.write();
        let data = files.entry(id.clone()).or_insert_with(|| Arc::new(data));
        data.add_preload_call();
        debug!(file = %id, frames, "Loaded file");
        FileDataHandle::new(data.clone())
    }

    /// Returns a handle to a preloaded file and queues the rest of the file
    /// for streaming. Safe to call from the audio thread.
    ///
    /// The handle is empty if the file was never preloaded, or if the pool is
    /// being modified at this very moment. If the work queue is full the
    /// handle only ever sees the head buffer.
    pub fn request_streaming_handle(&self, id: &Arc<FileId>) -> FileDataHandle {
        if let Some(files) = self.shared.loaded_files.try_read() {
            if let Some(data) = files.get(&**id) {
                return FileDataHandle::new(data.clone());
            }
        }

        let (handle, request) = {
            let Some(files) = self.shared.preloaded_files.try_read() else {
                return FileDataHandle::default();
            };
            let Some(data) = files.get(&**id) else {
                debug!(file = %id, "File not found in the preloaded files");
                return FileDataHandle::default();
            };
            (
                FileDataHandle::new(data.clone()),
                QueuedFileData {
                    id: Arc::downgrade(id),
                    data: Arc::downgrade(data),
                },
            )
        };

        if self.shared.queue_sender.try_send(request).is_err() {
            warn!(
                file = %id,
                capacity = self.shared.queue_capacity,
                "Could not enqueue the file to load"
            );
            return handle;
        }
        if let Err(e) = self.shared.dispatch_semaphore.post() {
            error!(error = %e, "Unable to wake the dispatcher");
        }
        handle
    }

    /// Sets the head-buffer size and re-reads every preloaded file to match.
    /// Not real-time safe.
    pub fn set_preload_size(&self, preload_size: usize) {
        self.preload_size.store(preload_size, Ordering::Release);
        if self.ram_loading() {
            return;
        }

        for (id, data) in self.preloaded_snapshot() {
            let Some(mut reader) = self.open(&id) else {
                continue;
            };
            let frames = preload_size.saturating_add(data.information_blocking().max_offset);
            match read_from_reader(reader.as_mut(), frames, self.shared.chunk_size) {
                Ok(buffer) => data.replace_preloaded(buffer),
                Err(e) => warn!(file = %id, error = %e, "Unable to resize preloaded data"),
            }
        }
        debug!(preload_size, "Resized preloaded data");
    }

    pub fn preload_size(&self) -> usize {
        self.preload_size.load(Ordering::Acquire)
    }

    /// Switches between loading whole files and preloading their heads.
    /// Every preloaded file is re-read. Not real-time safe.
    pub fn set_ram_loading(&self, load_in_ram: bool) {
        if self.load_in_ram.swap(load_in_ram, Ordering::AcqRel) == load_in_ram {
            return;
        }

        if !load_in_ram {
            self.set_preload_size(self.preload_size());
            return;
        }

        for (id, data) in self.preloaded_snapshot() {
            let Some(mut reader) = self.open(&id) else {
                continue;
            };
            let frames = reader.frames();
            match read_from_reader(reader.as_mut(), frames, self.shared.chunk_size) {
                Ok(buffer) => data.replace_preloaded(buffer),
                Err(e) => warn!(file = %id, error = %e, "Unable to load file into memory"),
            }
        }
        debug!("Loaded all preloaded files into memory");
    }

    pub fn ram_loading(&self) -> bool {
        self.load_in_ram.load(Ordering::Acquire)
    }

    fn preloaded_snapshot(&self) -> Vec<(FileId, Arc<FileData>)> {
        self.shared
            .preloaded_files
            .read()
            .iter()
            .map(|(id, data)| (id.clone(), data.clone()))
            .collect()
    }

    /// Zeroes every file's preload call count. Files that are not preloaded
    /// again before [`SamplePool::remove_unused_preloaded_data`] get removed.
    pub fn reset_preload_call_counts(&self) {
        for data in self.shared.preloaded_files.read().values() {
            data.reset_preload_calls();
        }
        for data in self.shared.loaded_files.read().values() {
            data.reset_preload_calls();
        }
    }

    /// Removes every file whose preload call count is zero.
    pub fn remove_unused_preloaded_data(&self) {
        self.shared.preloaded_files.write().retain(|id, data| {
            let used = data.preload_call_count() > 0;
            if !used {
                debug!(file = %id, "Removing unused preloaded data");
            }
            used
        });
        self.shared.loaded_files.write().retain(|id, data| {
            let used = data.preload_call_count() > 0;
            if !used {
                debug!(file = %id, "Removing unused loaded data");
            }
            used
        });
    }

    /// Reclaims streamed buffers that have been idle for the clearing period.
    /// Never blocks; if the bookkeeping is busy the pass is skipped.
    pub fn trigger_garbage_collection(&self) {
        self.shared.collector.collect(&self.shared.preloaded_files);
    }

    /// Blocks until every queued streaming request has been loaded.
    /// Not real-time safe.
    pub fn wait_for_background_loading(&self) {
        loop {
            let jobs = self.shared.loading_jobs.lock();
            // The dispatcher holds the job lock while it moves a request from
            // the queue to the executor.
            if self.shared.queue_receiver.is_empty() || self.shared.quit.load(Ordering::Acquire) {
                for job in jobs.iter() {
                    job.wait();
                }
                break;
            }
            drop(jobs);
            thread::sleep(Duration::from_millis(1));
        }
        self.shared.loading_jobs.lock().retain(|job| !job.is_ready());
    }

    /// Drops every file and every pending request. Handles that are still
    /// alive keep their data. Not real-time safe.
    pub fn clear(&self) {
        self.shared.collector.clear();
        while self.shared.queue_receiver.try_recv().is_ok() {}
        self.shared.preloaded_files.write().clear();
        self.shared.loaded_files.write().clear();
        info!("Sample pool cleared");
    }
}

/// Moves streaming requests from the queue to the executor, one per wakeup.
fn dispatch_loop(shared: Arc<Shared>, executor: Arc<dyn LoadExecutor>) {
    loop {
        shared.dispatch_semaphore.wait();
        if shared.quit.load(Ordering::Acquire) {
            break;
        }

        let mut jobs = shared.loading_jobs.lock();
        if let Ok(request) = shared.queue_receiver.try_recv() {
            // A dead identity means the region was destroyed while waiting.
            if request.id.strong_count() > 0 {
                let job_shared = shared.clone();
                jobs.push(spawn_job(executor.as_ref(), move || {
                    loader::loading_job(&job_shared, request)
                }));
            }
        }

        jobs.retain(|job| !job.is_ready());
    }
}

impl Drop for SamplePool {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::Release);
        if let Err(e) = self.shared.dispatch_semaphore.post() {
            error!(error = %e, "Unable to wake the dispatcher");
        }
        self.shared.collector.wake();

        for join_handle in [self.dispatch_thread.take(), self.garbage_thread.take()]
            .into_iter()
            .flatten()
        {
            if join_handle.join().is_err() {
                error!("Error joining handle");
            }
        }

        for job in self.shared.loading_jobs.lock().drain(..) {
            job.wait();
        }
    }
}

impl std::fmt::Debug for SamplePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplePool")
            .field("root_directory", &self.root_directory())
            .field("preload_size", &self.preload_size())
            .field("load_in_ram", &self.ram_loading())
            .field("num_preloaded_samples", &self.num_preloaded_samples())
            .finish()
    }
}
