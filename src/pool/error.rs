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
use crate::config::ConfigError;
use crate::semaphore::SemaphoreError;

/// Errors that can occur while setting up a sample pool. Once running, the
/// pool reports problems with files as empty results instead.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Unable to spawn pool thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("Unable to build the loader thread pool: {0}")]
    Executor(String),

    #[error("Semaphore error: {0}")]
    Semaphore(#[from] SemaphoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
