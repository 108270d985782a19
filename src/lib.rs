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

//! A streaming sample-file pool for real-time samplers.
//!
//! [`SamplePool`] preloads the head of every sample file and streams the rest
//! in the background on demand, so the audio thread can start voices at once
//! and read progressively more of a file without ever blocking on disk I/O.

pub mod config;
pub mod pool;
pub mod reader;
pub mod semaphore;
pub mod thread_priority;
#[cfg(test)]
mod testutil;

pub use crate::config::{ConfigError, PoolConfig};
pub use pool::{
    AudioView, FileData, FileDataHandle, FileId, FileInformation, FileStatus, LoadExecutor,
    PoolError, RayonExecutor, SamplePool,
};
pub use reader::{AudioReader, ReaderError, ReaderFactory, SymphoniaReaderFactory};
pub use semaphore::{RealtimeSemaphore, SemaphoreError};
