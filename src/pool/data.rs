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
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::handle::AudioView;
use crate::reader::WavetableInfo;

/// Metadata gathered when a file is first opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInformation {
    /// Index of the last frame.
    pub end: usize,
    /// Deepest offset requested so far by a preload.
    pub max_offset: usize,
    pub has_loop: bool,
    pub loop_start: usize,
    /// Inclusive, and never past `end`.
    pub loop_end: usize,
    pub sample_rate: u32,
    pub num_channels: usize,
    /// MIDI root key from the instrument chunk, clamped to 0..=127.
    pub root_key: Option<u8>,
    pub wavetable: Option<WavetableInfo>,
}

impl FileInformation {
    /// Total number of frames in the file.
    pub fn frames(&self) -> usize {
        self.end + 1
    }
}

/// Lifecycle of a record.
///
/// ```text
/// Invalid -> Preloaded -> Streaming -> Done
///                ^  ^         |          |
///                |  +-abandon-+          |
///                +------- reclaim -------+
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Placeholder; nothing beyond the head buffer may be read.
    Invalid = 0,
    /// The head buffer is valid and no streaming job owns the record.
    Preloaded = 1,
    /// A loading job holds exclusive write access to the streamed buffer.
    Streaming = 2,
    /// The whole file has been streamed.
    Done = 3,
}

impl FileStatus {
    fn from_u8(value: u8) -> FileStatus {
        match value {
            1 => FileStatus::Preloaded,
            2 => FileStatus::Streaming,
            3 => FileStatus::Done,
            _ => FileStatus::Invalid,
        }
    }
}

/// Planar audio that is written once and then only read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl AudioBuffer {
    /// Builds a buffer from one `Vec` per channel. The frame count is the
    /// length of the shortest channel.
    pub fn from_planar(channels: Vec<Vec<f32>>) -> AudioBuffer {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        AudioBuffer { channels, frames }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Returns one channel, or an empty slice if it does not exist.
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels
            .get(index)
            .map(|channel| &channel[..self.frames])
            .unwrap_or(&[])
    }
}

/// A full-length planar buffer filled progressively by one loading job while
/// any number of readers consume what has been published so far.
///
/// Frames below [`StreamBuffer::available_frames`] are immutable. Frames at or
/// above it are only ever touched by the buffer's single [`StreamWriter`].
pub struct StreamBuffer {
    channels: Box<[Box<[UnsafeCell<f32>]>]>,
    capacity: usize,
    published: AtomicUsize,
    writer_taken: AtomicBool,
}

// SAFETY: shared access only reads the published prefix, which is never
// written again. The unpublished tail is written through the one StreamWriter.
unsafe impl Sync for StreamBuffer {}

impl StreamBuffer {
    /// Allocates a zeroed buffer.
    pub fn new(num_channels: usize, frames: usize) -> Arc<StreamBuffer> {
        let channels: Box<[Box<[UnsafeCell<f32>]>]> = (0..num_channels)
            .map(|_| {
                (0..frames)
                    .map(|_| UnsafeCell::new(0.0))
                    .collect::<Box<[UnsafeCell<f32>]>>()
            })
            .collect();
        Arc::new(StreamBuffer {
            channels,
            capacity: frames,
            published: AtomicUsize::new(0),
            writer_taken: AtomicBool::new(false),
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames written and published so far.
    pub fn available_frames(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    /// Returns the published part of one channel, or an empty slice if the
    /// channel does not exist.
    pub fn channel(&self, index: usize) -> &[f32] {
        let frames = self.available_frames();
        match self.channels.get(index) {
            // SAFETY: UnsafeCell<f32> has the layout of f32, and the first
            // `frames` cells were published with Release and are never
            // written again.
            Some(data) => unsafe { std::slice::from_raw_parts(data.as_ptr() as *const f32, frames) },
            None => &[],
        }
    }

    /// Hands out the write side of this buffer. Only the first call succeeds.
    pub(crate) fn writer(self: &Arc<Self>) -> Option<StreamWriter> {
        if self.writer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(StreamWriter {
            buffer: self.clone(),
            written: 0,
        })
    }
}

/// The unique write side of a [`StreamBuffer`].
pub(crate) struct StreamWriter {
    buffer: Arc<StreamBuffer>,
    written: usize,
}

impl StreamWriter {
    /// Deinterleaves `frames` frames from `interleaved` after everything
    /// written so far, then publishes them. Returns the frames appended,
    /// which is less than requested once the buffer is full.
    pub(crate) fn append_interleaved(&mut self, interleaved: &[f32], frames: usize) -> usize {
        let num_channels = self.buffer.num_channels();
        if num_channels == 0 {
            return 0;
        }
        let frames = frames
            .min(self.buffer.capacity - self.written)
            .min(interleaved.len() / num_channels);

        for (channel_index, channel) in self.buffer.channels.iter().enumerate() {
            let tail = &channel[self.written..self.written + frames];
            for (frame, cell) in tail.iter().enumerate() {
                // SAFETY: cells at or after `written` are unpublished and this
                // writer is the only one that exists for the buffer.
                unsafe { *cell.get() = interleaved[frame * num_channels + channel_index] };
            }
        }

        self.written += frames;
        self.buffer.published.fetch_add(frames, Ordering::Release);
        frames
    }
}

/// Monotonic nanoseconds since the first call in this process.
fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// The data and bookkeeping for one sample file.
pub struct FileData {
    preloaded: RwLock<Arc<AudioBuffer>>,
    streamed: RwLock<Option<Arc<StreamBuffer>>>,
    information: RwLock<FileInformation>,
    status: AtomicU8,
    available_frames: AtomicUsize,
    reader_count: AtomicUsize,
    preload_call_count: AtomicUsize,
    last_viewer_left_at: AtomicU64,
}

impl FileData {
    /// Creates a record in the [`FileStatus::Invalid`] state.
    pub(crate) fn new(preloaded: AudioBuffer, information: FileInformation) -> FileData {
        FileData {
            preloaded: RwLock::new(Arc::new(preloaded)),
            streamed: RwLock::new(None),
            information: RwLock::new(information),
            status: AtomicU8::new(FileStatus::Invalid as u8),
            available_frames: AtomicUsize::new(0),
            reader_count: AtomicUsize::new(0),
            preload_call_count: AtomicUsize::new(0),
            last_viewer_left_at: AtomicU64::new(monotonic_nanos()),
        }
    }

    pub fn status(&self) -> FileStatus {
        FileStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Invalid -> Preloaded, once the head buffer holds valid data.
    pub(crate) fn mark_preloaded(&self) {
        let _ = self.status.compare_exchange(
            FileStatus::Invalid as u8,
            FileStatus::Preloaded as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Preloaded -> Streaming. The caller that wins gets exclusive write
    /// access to the streamed buffer; everyone else must back off.
    pub(crate) fn try_claim_for_streaming(&self) -> bool {
        self.status
            .compare_exchange(
                FileStatus::Preloaded as u8,
                FileStatus::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Streaming -> Done.
    pub(crate) fn mark_done(&self) {
        let _ = self.status.compare_exchange(
            FileStatus::Streaming as u8,
            FileStatus::Done as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Done -> Preloaded. Resets the available frames and detaches the
    /// streamed buffer, which is returned so the caller can free it elsewhere.
    ///
    /// Never blocks: returns `None` without changing anything if the record is
    /// not done or the streamed buffer slot is busy.
    pub(crate) fn reclaim(&self) -> Option<Option<Arc<StreamBuffer>>> {
        let mut slot = self.streamed.try_write()?;
        if self.status() != FileStatus::Done {
            return None;
        }
        self.available_frames.store(0, Ordering::Release);
        let buffer = slot.take();
        self.status.store(FileStatus::Preloaded as u8, Ordering::Release);
        Some(buffer)
    }

    /// Streaming -> Preloaded, for a job that could not finish reading the
    /// file. Like [`FileData::reclaim`] the available frames drop to zero, so
    /// the next streaming request starts over. Blocks on the buffer slot; only
    /// call it from a loading job.
    pub(crate) fn abandon_streaming(&self) -> Option<Arc<StreamBuffer>> {
        let mut slot = self.streamed.write();
        if self.status() != FileStatus::Streaming {
            return None;
        }
        self.available_frames.store(0, Ordering::Release);
        let buffer = slot.take();
        self.status.store(FileStatus::Preloaded as u8, Ordering::Release);
        buffer
    }

    /// Attaches the buffer a loading job is about to fill.
    pub(crate) fn install_stream_buffer(&self, buffer: Arc<StreamBuffer>) {
        *self.streamed.write() = Some(buffer);
    }

    /// Frames of the streamed buffer that are safe to read.
    pub fn available_frames(&self) -> usize {
        self.available_frames.load(Ordering::Acquire)
    }

    pub(crate) fn add_available_frames(&self, frames: usize) {
        self.available_frames.fetch_add(frames, Ordering::Release);
    }

    /// Number of live handles on this record.
    pub fn reader_count(&self) -> usize {
        self.reader_count.load(Ordering::Acquire)
    }

    pub(crate) fn add_viewer(&self) {
        self.reader_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove_viewer(&self) {
        if self.reader_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.last_viewer_left_at
                .store(monotonic_nanos(), Ordering::Release);
        }
    }

    /// Time since the last handle on this record was released.
    pub fn idle_time(&self) -> Duration {
        let left_at = self.last_viewer_left_at.load(Ordering::Acquire);
        Duration::from_nanos(monotonic_nanos().saturating_sub(left_at))
    }

    /// Number of preload requests since the last reset.
    pub fn preload_call_count(&self) -> usize {
        self.preload_call_count.load(Ordering::Acquire)
    }

    pub(crate) fn add_preload_call(&self) {
        self.preload_call_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_preload_calls(&self) {
        self.preload_call_count.store(0, Ordering::Release);
    }

    /// Returns a copy of the file information, or `None` if it is being
    /// updated right now.
    pub fn information(&self) -> Option<FileInformation> {
        self.information.try_read().map(|information| *information)
    }

    /// Blocking variant of [`FileData::information`] for maintenance calls.
    pub(crate) fn information_blocking(&self) -> FileInformation {
        *self.information.read()
    }

    pub(crate) fn set_max_offset(&self, max_offset: usize) {
        self.information.write().max_offset = max_offset;
    }

    /// Number of frames in the head buffer.
    pub fn preloaded_frames(&self) -> usize {
        self.preloaded.read().frames()
    }

    pub(crate) fn replace_preloaded(&self, buffer: AudioBuffer) {
        *self.preloaded.write() = Arc::new(buffer);
    }

    /// Returns the best data currently available without blocking: the
    /// streamed buffer once it holds more than the head buffer, otherwise the
    /// head buffer. `None` if a maintenance call is swapping the head buffer.
    pub fn audio(&self) -> Option<AudioView> {
        let preloaded = self.preloaded.try_read()?.clone();
        if self.available_frames() > preloaded.frames() {
            if let Some(slot) = self.streamed.try_read() {
                if let Some(buffer) = slot.as_ref() {
                    return Some(AudioView::streamed(buffer.clone()));
                }
            }
        }
        Some(AudioView::preloaded(preloaded))
    }
}

impl std::fmt::Debug for FileData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileData")
            .field("status", &self.status())
            .field("available_frames", &self.available_frames())
            .field("reader_count", &self.reader_count())
            .field("preload_call_count", &self.preload_call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn record(frames: usize) -> FileData {
        let information = FileInformation {
            end: frames.saturating_sub(1),
            num_channels: 1,
            sample_rate: 48000,
            ..Default::default()
        };
        FileData::new(AudioBuffer::from_planar(vec![vec![0.5; frames]]), information)
    }

    #[test]
    fn test_status_transitions() {
        let data = record(4);
        assert_eq!(data.status(), FileStatus::Invalid);
        assert!(!data.try_claim_for_streaming());

        data.mark_preloaded();
        assert_eq!(data.status(), FileStatus::Preloaded);
        assert!(data.try_claim_for_streaming());
        assert_eq!(data.status(), FileStatus::Streaming);
        assert!(!data.try_claim_for_streaming());

        data.mark_done();
        assert_eq!(data.status(), FileStatus::Done);
        assert!(!data.try_claim_for_streaming());

        let reclaimed = data.reclaim();
        assert!(reclaimed.is_some());
        assert_eq!(data.status(), FileStatus::Preloaded);
        assert!(data.try_claim_for_streaming());
    }

    #[test]
    fn test_reclaim_requires_done() {
        let data = record(4);
        data.mark_preloaded();
        assert!(data.reclaim().is_none());
        assert_eq!(data.status(), FileStatus::Preloaded);
    }

    #[test]
    fn test_only_one_claim_wins() {
        let data = Arc::new(record(4));
        data.mark_preloaded();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let data = data.clone();
                thread::spawn(move || data.try_claim_for_streaming())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_viewer_count_stamps_idle_time() {
        let data = record(4);
        data.add_viewer();
        data.add_viewer();
        assert_eq!(data.reader_count(), 2);
        data.remove_viewer();
        thread::sleep(Duration::from_millis(20));
        data.remove_viewer();
        assert_eq!(data.reader_count(), 0);
        assert!(data.idle_time() < Duration::from_millis(20));
    }

    #[test]
    fn test_stream_buffer_publishes_in_order() {
        let buffer = StreamBuffer::new(2, 5);
        let mut writer = buffer.writer().unwrap();
        assert!(buffer.writer().is_none());
        assert_eq!(buffer.available_frames(), 0);
        assert!(buffer.channel(0).is_empty());

        assert_eq!(writer.append_interleaved(&[1.0, -1.0, 2.0, -2.0], 2), 2);
        assert_eq!(buffer.channel(0), &[1.0, 2.0]);
        assert_eq!(buffer.channel(1), &[-1.0, -2.0]);

        // Only three frames of room are left.
        let block = [3.0, -3.0, 4.0, -4.0, 5.0, -5.0, 6.0, -6.0];
        assert_eq!(writer.append_interleaved(&block, 4), 3);
        assert_eq!(buffer.channel(0), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buffer.available_frames(), 5);
        assert!(buffer.channel(2).is_empty());
    }

    #[test]
    fn test_audio_prefers_streamed_once_larger() {
        let data = record(2);
        data.mark_preloaded();
        assert!(!data.audio().unwrap().is_streamed());

        assert!(data.try_claim_for_streaming());
        let buffer = StreamBuffer::new(1, 4);
        let mut writer = buffer.writer().unwrap();
        data.install_stream_buffer(buffer);

        writer.append_interleaved(&[0.1, 0.2], 2);
        data.add_available_frames(2);
        assert!(!data.audio().unwrap().is_streamed());

        writer.append_interleaved(&[0.3, 0.4], 2);
        data.add_available_frames(2);
        let view = data.audio().unwrap();
        assert!(view.is_streamed());
        assert_eq!(view.channel(0), &[0.1, 0.2, 0.3, 0.4]);

        data.mark_done();
        let reclaimed = data.reclaim().unwrap();
        assert!(reclaimed.is_some());
        assert_eq!(data.available_frames(), 0);
        assert!(!data.audio().unwrap().is_streamed());
        // The old view still owns its buffer.
        assert_eq!(view.frames(), 4);
    }

    #[test]
    fn test_concurrent_readers_all_see_streamed_data() {
        let data = Arc::new(record(4));
        data.mark_preloaded();
        assert!(data.try_claim_for_streaming());
        let buffer = StreamBuffer::new(1, 10_000);
        let mut writer = buffer.writer().unwrap();
        data.install_stream_buffer(buffer);
        writer.append_interleaved(&vec![0.25; 10_000], 10_000);
        data.add_available_frames(10_000);
        data.mark_done();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let data = data.clone();
                thread::spawn(move || {
                    (0..20_000)
                        .filter(|_| {
                            let view = data.audio().unwrap();
                            !view.is_streamed() || view.frames() != 10_000
                        })
                        .count()
                })
            })
            .collect();
        let head_only: usize = readers
            .into_iter()
            .map(|reader| reader.join().unwrap())
            .sum();
        assert_eq!(head_only, 0);
    }

    #[test]
    fn test_abandon_streaming_allows_a_new_claim() {
        let data = record(2);
        data.mark_preloaded();
        assert!(data.abandon_streaming().is_none());
        assert_eq!(data.status(), FileStatus::Preloaded);

        assert!(data.try_claim_for_streaming());
        let buffer = StreamBuffer::new(1, 8);
        let mut writer = buffer.writer().unwrap();
        data.install_stream_buffer(buffer);
        writer.append_interleaved(&[0.5; 3], 3);
        data.add_available_frames(3);

        assert!(data.abandon_streaming().is_some());
        assert_eq!(data.status(), FileStatus::Preloaded);
        assert_eq!(data.available_frames(), 0);
        assert!(!data.audio().unwrap().is_streamed());
        assert!(data.try_claim_for_streaming());
    }
}
