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
use std::sync::Arc;

use super::data::{AudioBuffer, FileData, FileInformation, FileStatus, StreamBuffer};

/// A counted view on a [`FileData`] record.
///
/// Every live handle counts as one reader of the record, which keeps the
/// garbage collector away from its streamed buffer. An empty handle
/// (`FileDataHandle::default()`) is what the pool hands out when it has
/// nothing to offer.
#[derive(Default)]
pub struct FileDataHandle {
    data: Option<Arc<FileData>>,
}

impl FileDataHandle {
    pub(crate) fn new(data: Arc<FileData>) -> FileDataHandle {
        data.add_viewer();
        FileDataHandle { data: Some(data) }
    }

    /// Returns true if this handle refers to no record.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// The record behind this handle.
    pub fn data(&self) -> Option<&FileData> {
        self.data.as_deref()
    }

    /// The audio currently readable through this handle. Call again to pick
    /// up frames streamed in since the last call.
    pub fn audio(&self) -> Option<AudioView> {
        self.data.as_ref()?.audio()
    }

    pub fn status(&self) -> Option<FileStatus> {
        self.data.as_ref().map(|data| data.status())
    }

    pub fn available_frames(&self) -> usize {
        self.data
            .as_ref()
            .map(|data| data.available_frames())
            .unwrap_or(0)
    }

    pub fn information(&self) -> Option<FileInformation> {
        self.data.as_ref()?.information()
    }

    /// Returns true if both handles refer to the same record.
    pub fn same_record(&self, other: &FileDataHandle) -> bool {
        match (&self.data, &other.data) {
            (Some(left), Some(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl Clone for FileDataHandle {
    fn clone(&self) -> Self {
        match &self.data {
            Some(data) => FileDataHandle::new(data.clone()),
            None => FileDataHandle::default(),
        }
    }
}

impl Drop for FileDataHandle {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            data.remove_viewer();
        }
    }
}

impl std::fmt::Debug for FileDataHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDataHandle")
            .field("data", &self.data)
            .finish()
    }
}

#[derive(Clone)]
enum ViewSource {
    Preloaded(Arc<AudioBuffer>),
    Streamed(Arc<StreamBuffer>),
}

/// Read-only planar audio of a record, fixed at the time it was taken.
#[derive(Clone)]
pub struct AudioView {
    source: ViewSource,
    frames: usize,
}

impl AudioView {
    pub(crate) fn preloaded(buffer: Arc<AudioBuffer>) -> AudioView {
        let frames = buffer.frames();
        AudioView {
            source: ViewSource::Preloaded(buffer),
            frames,
        }
    }

    pub(crate) fn streamed(buffer: Arc<StreamBuffer>) -> AudioView {
        let frames = buffer.available_frames();
        AudioView {
            source: ViewSource::Streamed(buffer),
            frames,
        }
    }

    /// Number of valid frames in every channel of this view.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn num_channels(&self) -> usize {
        match &self.source {
            ViewSource::Preloaded(buffer) => buffer.num_channels(),
            ViewSource::Streamed(buffer) => buffer.num_channels(),
        }
    }

    /// Returns true if the view reads from the streamed buffer rather than
    /// the head buffer.
    pub fn is_streamed(&self) -> bool {
        matches!(self.source, ViewSource::Streamed(_))
    }

    /// One channel of the view; empty if the channel does not exist.
    pub fn channel(&self, index: usize) -> &[f32] {
        let channel = match &self.source {
            ViewSource::Preloaded(buffer) => buffer.channel(index),
            ViewSource::Streamed(buffer) => buffer.channel(index),
        };
        &channel[..self.frames.min(channel.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Arc<FileData> {
        let data = FileData::new(
            AudioBuffer::from_planar(vec![vec![0.1, 0.2, 0.3], vec![-0.1, -0.2, -0.3]]),
            FileInformation {
                end: 2,
                num_channels: 2,
                sample_rate: 44100,
                ..Default::default()
            },
        );
        data.mark_preloaded();
        Arc::new(data)
    }

    #[test]
    fn test_empty_handle() {
        let handle = FileDataHandle::default();
        assert!(handle.is_empty());
        assert!(handle.audio().is_none());
        assert!(handle.status().is_none());
        assert_eq!(handle.available_frames(), 0);
        assert!(!handle.same_record(&FileDataHandle::default()));
    }

    #[test]
    fn test_reader_count_follows_handles() {
        let data = record();
        let first = FileDataHandle::new(data.clone());
        assert_eq!(data.reader_count(), 1);

        let second = first.clone();
        assert_eq!(data.reader_count(), 2);
        assert!(first.same_record(&second));

        // Moving a handle does not change the count.
        let moved = second;
        assert_eq!(data.reader_count(), 2);

        drop(first);
        assert_eq!(data.reader_count(), 1);
        drop(moved);
        assert_eq!(data.reader_count(), 0);
    }

    #[test]
    fn test_audio_view_of_head_buffer() {
        let handle = FileDataHandle::new(record());
        let view = handle.audio().unwrap();
        assert!(!view.is_streamed());
        assert_eq!(view.frames(), 3);
        assert_eq!(view.num_channels(), 2);
        assert_eq!(view.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(view.channel(1), &[-0.1, -0.2, -0.3]);
        assert!(view.channel(2).is_empty());
        assert_eq!(handle.information().unwrap().frames(), 3);
    }
}
