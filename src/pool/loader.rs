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
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::data::{AudioBuffer, FileData, FileInformation, FileStatus, StreamBuffer};
use super::file_id::FileId;
use super::Shared;
use crate::reader::{read_interleaved, AudioReader, ReaderError, ReaderKind};
use crate::thread_priority::raise_current_thread_priority;

/// How many times a job re-checks a record stuck in `Invalid`.
const INVALID_SPIN_LIMIT: u32 = 1024;
const INVALID_SPIN_SLEEP: Duration = Duration::from_micros(100);

/// A streaming request waiting in the work queue.
///
/// Neither reference keeps anything alive: if the region that asked for the
/// file goes away, or the pool is cleared, the job is dropped.
pub(crate) struct QueuedFileData {
    pub(crate) id: Weak<FileId>,
    pub(crate) data: Weak<FileData>,
}

/// Builds the file information from an opened reader. Only mono and stereo
/// files are supported.
pub(crate) fn reader_information(reader: &dyn AudioReader) -> Option<FileInformation> {
    let num_channels = reader.channels();
    if num_channels != 1 && num_channels != 2 {
        debug!(channels = num_channels, "Unsupported channel count");
        return None;
    }
    if reader.frames() == 0 {
        debug!("File has no frames");
        return None;
    }

    let mut information = FileInformation {
        end: reader.frames() - 1,
        sample_rate: reader.sample_rate(),
        num_channels,
        ..Default::default()
    };

    if let Some(instrument) = reader.instrument_info() {
        information.root_key = Some(instrument.base_note.min(127) as u8);
        // Loops are ignored for reversed files.
        if reader.kind() == ReaderKind::Forward {
            if let Some(first) = instrument.loops.first() {
                information.has_loop = true;
                information.loop_start = first.start as usize;
                information.loop_end = information.end.min((first.end as usize).saturating_sub(1));
            }
        }
    }

    information.wavetable = reader.wavetable_info();
    Some(information)
}

/// Reads up to `frames` frames from the current position of `reader` into a
/// planar buffer. Stops early at the end of the file.
pub(crate) fn read_from_reader(
    reader: &mut dyn AudioReader,
    frames: usize,
    chunk_size: usize,
) -> Result<AudioBuffer, ReaderError> {
    let num_channels = reader.channels().max(1);
    let frames = frames.min(reader.frames());
    let chunk_size = chunk_size.max(1);

    let mut channels = vec![Vec::with_capacity(frames); num_channels];
    let mut block = vec![0.0; chunk_size * num_channels];
    let mut frames_read = 0;

    while frames_read < frames {
        let this_chunk = chunk_size.min(frames - frames_read);
        let read = reader.read_next_block(&mut block, this_chunk)?.min(this_chunk);
        if read == 0 {
            break;
        }

        for channel in channels.iter_mut() {
            channel.resize(frames_read + read, 0.0);
        }
        let input = &block[..read * num_channels];
        match channels.as_mut_slice() {
            [mono] => mono[frames_read..].copy_from_slice(input),
            [left, right] => {
                read_interleaved(input, &mut left[frames_read..], &mut right[frames_read..])
            }
            others => {
                for (channel_index, channel) in others.iter_mut().enumerate() {
                    for (frame, sample) in channel[frames_read..].iter_mut().enumerate() {
                        *sample = input[frame * num_channels + channel_index];
                    }
                }
            }
        }
        frames_read += read;
    }

    Ok(AudioBuffer::from_planar(channels))
}

/// Streams the whole of `reader` into a fresh buffer attached to `data`,
/// publishing each chunk as soon as it lands. Returns the frames streamed.
pub(crate) fn stream_from_reader(
    reader: &mut dyn AudioReader,
    data: &FileData,
    chunk_size: usize,
) -> Result<usize, ReaderError> {
    let num_frames = reader.frames();
    let num_channels = reader.channels().max(1);
    let chunk_size = chunk_size.max(1);

    let buffer = StreamBuffer::new(num_channels, num_frames);
    let Some(mut writer) = buffer.writer() else {
        return Ok(0);
    };
    data.install_stream_buffer(buffer);

    let mut block = vec![0.0; chunk_size * num_channels];
    let mut frames_read = 0;

    while frames_read < num_frames {
        let this_chunk = chunk_size.min(num_frames - frames_read);
        let read = reader.read_next_block(&mut block, this_chunk)?;
        if read == 0 {
            break;
        }

        let appended = writer.append_interleaved(&block, read.min(this_chunk));
        data.add_available_frames(appended);
        frames_read += appended;

        // A short read is the end of the file.
        if read < this_chunk {
            break;
        }
    }

    Ok(frames_read)
}

/// Runs one streaming request on an executor thread.
pub(crate) fn loading_job(shared: &Shared, request: QueuedFileData) {
    raise_current_thread_priority(shared.background_priority);

    let Some(id) = request.id.upgrade() else {
        return;
    };
    let Some(data) = request.data.upgrade() else {
        debug!(file = %id, "Record dropped before streaming");
        return;
    };

    let path = shared.root_directory().join(id.filename());
    let mut reader = match shared.factory.open(&path, id.is_reversed()) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = ?path, error = %e, "Unable to open file for streaming");
            return;
        }
    };

    let mut spins = 0;
    while data.status() == FileStatus::Invalid {
        if spins > INVALID_SPIN_LIMIT {
            warn!(file = %id, "File is stuck on Invalid, leaving the load");
            return;
        }
        thread::sleep(INVALID_SPIN_SLEEP);
        spins += 1;
    }

    // Already streaming, or already done.
    if !data.try_claim_for_streaming() {
        return;
    }

    match stream_from_reader(reader.as_mut(), &data, shared.chunk_size) {
        Ok(frames) => {
            debug!(file = %id, frames, "Streamed file");
            data.mark_done();
            shared.collector.mark_used(&id);
        }
        Err(e) => {
            warn!(file = %id, error = %e, "Error while streaming, back to preloaded data");
            data.abandon_streaming();
        }
    }
}
