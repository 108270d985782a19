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
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use crate::thread_priority::DEFAULT_BACKGROUND_PRIORITY;

mod error;

pub use error::ConfigError;

/// Default number of frames kept resident for every preloaded file.
pub const DEFAULT_PRELOAD_SIZE: usize = 8192;

/// Default number of frames read per streaming chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default idle time before a streamed buffer may be reclaimed.
pub const DEFAULT_FILE_CLEARING_PERIOD: Duration = Duration::from_secs(5);

/// Default capacity of the streaming work queue.
pub const DEFAULT_MAX_STREAMING_JOBS: usize = 256;

/// Prefix for environment overrides, e.g. `SAMPLEPOOL_PRELOAD_SIZE=16384`.
const ENV_PREFIX: &str = "SAMPLEPOOL";

/// A YAML representation of the sample pool configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct PoolConfig {
    /// Directory that relative sample paths are resolved against.
    root_directory: Option<PathBuf>,

    /// Frames kept resident per preloaded file (default: 8192).
    preload_size: Option<usize>,

    /// Load whole files up front instead of streaming them.
    load_in_ram: Option<bool>,

    /// How long a streamed file must go unused before its buffer is reclaimed,
    /// e.g. "5s" or "500ms".
    file_clearing_period: Option<String>,

    /// Frames read per streaming chunk (default: 1024).
    chunk_size: Option<usize>,

    /// Capacity of the streaming work queue (default: 256).
    max_streaming_jobs: Option<usize>,

    /// Priority of background loading threads, as a percentage (default: 50).
    background_priority: Option<u8>,

    /// Worker threads for the default loader pool. Defaults to the number of
    /// CPUs minus two, with a minimum of one.
    loader_threads: Option<usize>,
}

impl PoolConfig {
    /// Loads the configuration from a YAML file, with `SAMPLEPOOL_*`
    /// environment variables taking precedence.
    pub fn deserialize(path: &Path) -> Result<PoolConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<PoolConfig>()?)
    }

    /// Returns the root directory (default: the current directory).
    pub fn root_directory(&self) -> PathBuf {
        self.root_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns the preload size in frames.
    pub fn preload_size(&self) -> usize {
        self.preload_size.unwrap_or(DEFAULT_PRELOAD_SIZE)
    }

    /// Returns whether whole files are loaded into memory.
    pub fn load_in_ram(&self) -> bool {
        self.load_in_ram.unwrap_or(false)
    }

    /// Returns the idle period after which streamed data may be reclaimed.
    pub fn file_clearing_period(&self) -> Result<Duration, ConfigError> {
        match &self.file_clearing_period {
            Some(period) => Ok(DurationString::from_string(period.clone())?.into()),
            None => Ok(DEFAULT_FILE_CLEARING_PERIOD),
        }
    }

    /// Returns the streaming chunk size in frames, never zero.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1)
    }

    /// Returns the work queue capacity, never zero.
    pub fn max_streaming_jobs(&self) -> usize {
        self.max_streaming_jobs
            .unwrap_or(DEFAULT_MAX_STREAMING_JOBS)
            .max(1)
    }

    /// Returns the background thread priority percentage, clamped to 100.
    pub fn background_priority(&self) -> u8 {
        self.background_priority
            .unwrap_or(DEFAULT_BACKGROUND_PRIORITY)
            .min(100)
    }

    /// Returns the number of threads for the default loader pool.
    pub fn loader_threads(&self) -> usize {
        self.loader_threads.unwrap_or_else(|| {
            let cpus = num_cpus::get();
            if cpus > 2 {
                cpus - 2
            } else {
                1
            }
        })
        .max(1)
    }

    pub fn with_root_directory<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root_directory = Some(root.into());
        self
    }

    pub fn with_preload_size(mut self, frames: usize) -> Self {
        self.preload_size = Some(frames);
        self
    }

    pub fn with_load_in_ram(mut self, load_in_ram: bool) -> Self {
        self.load_in_ram = Some(load_in_ram);
        self
    }

    /// Sets the clearing period from a duration.
    pub fn with_file_clearing_period(mut self, period: Duration) -> Self {
        self.file_clearing_period = Some(DurationString::from(period).to_string());
        self
    }

    pub fn with_chunk_size(mut self, frames: usize) -> Self {
        self.chunk_size = Some(frames);
        self
    }

    pub fn with_max_streaming_jobs(mut self, jobs: usize) -> Self {
        self.max_streaming_jobs = Some(jobs);
        self
    }

    pub fn with_background_priority(mut self, percent: u8) -> Self {
        self.background_priority = Some(percent);
        self
    }

    pub fn with_loader_threads(mut self, threads: usize) -> Self {
        self.loader_threads = Some(threads);
        self
    }
}
