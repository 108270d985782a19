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

//! Audio file readers consumed by the sample pool.
//!
//! The pool never decodes anything itself. It asks a [`ReaderFactory`] for an
//! [`AudioReader`] and pulls interleaved `f32` frames out of it in blocks.

mod decoder;
pub mod memory;
pub mod metadata;

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

pub use decoder::SymphoniaReader;
pub use memory::MemoryReader;
pub use metadata::{InstrumentInfo, LoopInfo, LoopMode, WavetableInfo};

/// Error types for reader operations
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Sample rate not specified")]
    UnknownSampleRate,
}

/// Direction in which a reader yields frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    Forward,
    Reverse,
}

/// A blocking source of interleaved audio frames.
pub trait AudioReader: Send {
    /// Direction of this reader.
    fn kind(&self) -> ReaderKind;

    /// Number of interleaved channels.
    fn channels(&self) -> usize;

    /// Total number of frames in the source.
    fn frames(&self) -> usize;

    /// Sample rate of the source in Hz.
    fn sample_rate(&self) -> u32;

    /// Reads up to `frames` frames into `buffer` as interleaved samples and
    /// returns the number of frames written. Zero means end of stream.
    ///
    /// Never writes more than `buffer.len() / channels()` frames.
    fn read_next_block(&mut self, buffer: &mut [f32], frames: usize) -> Result<usize, ReaderError>;

    /// Sampler instrument metadata (root key, loops), if the file carries any.
    fn instrument_info(&self) -> Option<InstrumentInfo>;

    /// Wavetable metadata, if the file carries any.
    fn wavetable_info(&self) -> Option<WavetableInfo>;
}

/// Opens readers for file paths or in-memory files.
pub trait ReaderFactory: Send + Sync {
    /// Opens the file at `path`. A reversed reader yields the last frame first.
    fn open(&self, path: &Path, reversed: bool) -> Result<Box<dyn AudioReader>, ReaderError>;

    /// Opens an encoded file held in memory.
    fn open_memory(&self, bytes: &[u8], reversed: bool)
        -> Result<Box<dyn AudioReader>, ReaderError>;
}

/// Reader factory backed by symphonia; handles WAV, FLAC, OGG, MP3 and every
/// other format symphonia was built with.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaReaderFactory;

impl ReaderFactory for SymphoniaReaderFactory {
    fn open(&self, path: &Path, reversed: bool) -> Result<Box<dyn AudioReader>, ReaderError> {
        // Include the path in the error so the log shows which file failed.
        let file = File::open(path).map_err(|e| {
            ReaderError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let file_metadata = match File::open(path) {
            Ok(mut handle) => metadata::read_metadata(&mut handle).unwrap_or_default(),
            Err(_) => metadata::FileMetadata::default(),
        };
        let extension = path.extension().and_then(|ext| ext.to_str());
        decoder::open_media_source(Box::new(file), extension, file_metadata, reversed)
    }

    fn open_memory(
        &self,
        bytes: &[u8],
        reversed: bool,
    ) -> Result<Box<dyn AudioReader>, ReaderError> {
        let owned = bytes.to_vec();
        let file_metadata =
            metadata::read_metadata(&mut Cursor::new(owned.as_slice())).unwrap_or_default();
        decoder::open_media_source(Box::new(Cursor::new(owned)), None, file_metadata, reversed)
    }
}

/// Splits interleaved stereo samples into two channel slices.
pub fn read_interleaved(input: &[f32], left: &mut [f32], right: &mut [f32]) {
    for ((frame, l), r) in input.chunks_exact(2).zip(left.iter_mut()).zip(right.iter_mut()) {
        *l = frame[0];
        *r = frame[1];
    }
}
