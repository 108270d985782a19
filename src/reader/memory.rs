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
use super::metadata::FileMetadata;
use super::{AudioReader, InstrumentInfo, ReaderError, ReaderKind, WavetableInfo};

/// A reader over fully decoded, interleaved samples held in memory.
///
/// Used for reversed reads (the whole file has to be decoded before the last
/// frame is known) and for streams whose length the container does not state.
pub struct MemoryReader {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    /// Current position in frames
    position: usize,
    kind: ReaderKind,
    metadata: FileMetadata,
}

impl MemoryReader {
    /// Creates a forward reader over interleaved samples.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
            position: 0,
            kind: ReaderKind::Forward,
            metadata: FileMetadata::default(),
        }
    }

    /// Attaches sampler metadata to this reader.
    pub fn with_metadata(mut self, metadata: FileMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reverses the frame order so that the last frame is read first. Channel
    /// order within each frame is preserved.
    pub fn reversed(mut self) -> Self {
        reverse_frames(&mut self.samples, self.channels);
        self.kind = ReaderKind::Reverse;
        self
    }
}

/// Reverses the order of interleaved frames in place.
pub fn reverse_frames(samples: &mut [f32], channels: usize) {
    let whole = samples.len() - samples.len() % channels.max(1);
    let samples = &mut samples[..whole];
    samples.reverse();
    // Reversing the whole slice also reversed each frame's channels.
    for frame in samples.chunks_exact_mut(channels.max(1)) {
        frame.reverse();
    }
}

impl AudioReader for MemoryReader {
    fn kind(&self) -> ReaderKind {
        self.kind
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_next_block(&mut self, buffer: &mut [f32], frames: usize) -> Result<usize, ReaderError> {
        let frames = frames
            .min(buffer.len() / self.channels)
            .min(self.frames().saturating_sub(self.position));
        let start = self.position * self.channels;
        let end = start + frames * self.channels;
        buffer[..end - start].copy_from_slice(&self.samples[start..end]);
        self.position += frames;
        Ok(frames)
    }

    fn instrument_info(&self) -> Option<InstrumentInfo> {
        self.metadata.instrument.clone()
    }

    fn wavetable_info(&self) -> Option<WavetableInfo> {
        self.metadata.wavetable
    }
}
