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
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use super::memory::MemoryReader;
use super::metadata::FileMetadata;
use super::{AudioReader, InstrumentInfo, ReaderError, ReaderKind, WavetableInfo};

/// Forward reader that decodes packets on demand with symphonia.
pub struct SymphoniaReader {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    frames: usize,
    sample_rate: u32,
    // Interleaved samples decoded but not yet handed out
    leftover: Vec<f32>,
    leftover_position: usize,
    sample_buffer: Option<SampleBuffer<f32>>,
    is_finished: bool,
    metadata: FileMetadata,
}

/// Probes `source` and returns a reader for its first audio track.
///
/// Reversed readers, and streams that do not state their length or channel
/// count up front, are decoded entirely into a [`MemoryReader`].
pub(super) fn open_media_source(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
    metadata: FileMetadata,
    reversed: bool,
) -> Result<Box<dyn AudioReader>, ReaderError> {
    let mss = MediaSourceStream::new(source, Default::default());

    // Create a hint to help the format registry guess the format
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(ReaderError::NoAudioTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params.sample_rate.ok_or(ReaderError::UnknownSampleRate)?;
    let decoder = get_codecs().make(&params, &DecoderOptions::default())?;

    let channels = params.channels.map(|c| c.count()).unwrap_or(0);
    let frames = params.n_frames.map(|n| n as usize);

    let mut reader = SymphoniaReader {
        format_reader,
        decoder,
        track_id,
        channels,
        frames: frames.unwrap_or(0),
        sample_rate,
        leftover: Vec::new(),
        leftover_position: 0,
        sample_buffer: None,
        is_finished: false,
        metadata,
    };

    if !reversed && channels > 0 && frames.is_some() {
        return Ok(Box::new(reader));
    }

    let (samples, channels) = reader.decode_all()?;
    let memory = MemoryReader::new(samples, channels, sample_rate).with_metadata(reader.metadata);
    if reversed {
        Ok(Box::new(memory.reversed()))
    } else {
        Ok(Box::new(memory))
    }
}

impl SymphoniaReader {
    /// Reads the next packet. `Ok(None)` is the end of the stream.
    fn read_next_packet(&mut self) -> Result<Option<Packet>, ReaderError> {
        loop {
            match self.format_reader.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(ReaderError::Decode(e)),
            }
        }
    }

    /// Decodes the next packet into `self.leftover`. Returns false at the end
    /// of the stream.
    fn decode_next_packet(&mut self) -> Result<bool, ReaderError> {
        loop {
            let Some(packet) = self.read_next_packet()? else {
                return Ok(false);
            };

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // A corrupt packet only loses its own frames.
                    debug!(error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(ReaderError::Decode(e)),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needs_new_buffer = self
                .sample_buffer
                .as_ref()
                .map(|buffer| buffer.capacity() < decoded.capacity() * spec.channels.count())
                .unwrap_or(true);
            if needs_new_buffer {
                self.sample_buffer = Some(SampleBuffer::new(capacity, spec));
            }
            let Some(buffer) = self.sample_buffer.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);

            if self.channels == 0 {
                self.channels = spec.channels.count();
            }
            self.leftover.clear();
            self.leftover.extend_from_slice(buffer.samples());
            self.leftover_position = 0;
            return Ok(true);
        }
    }

    /// Decodes everything that is left and returns it with the channel count.
    fn decode_all(&mut self) -> Result<(Vec<f32>, usize), ReaderError> {
        let mut samples = Vec::new();
        while self.decode_next_packet()? {
            samples.extend_from_slice(&self.leftover[self.leftover_position..]);
            self.leftover_position = self.leftover.len();
        }
        self.is_finished = true;
        Ok((samples, self.channels.max(1)))
    }
}

impl AudioReader for SymphoniaReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Forward
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_next_block(&mut self, buffer: &mut [f32], frames: usize) -> Result<usize, ReaderError> {
        let channels = self.channels.max(1);
        let wanted = frames.min(buffer.len() / channels) * channels;
        let mut written = 0;

        while written < wanted {
            if self.leftover_position >= self.leftover.len() {
                if self.is_finished || !self.decode_next_packet()? {
                    self.is_finished = true;
                    break;
                }
            }
            let available = &self.leftover[self.leftover_position..];
            let count = available.len().min(wanted - written);
            buffer[written..written + count].copy_from_slice(&available[..count]);
            written += count;
            self.leftover_position += count;
        }

        Ok(written / channels)
    }

    fn instrument_info(&self) -> Option<InstrumentInfo> {
        self.metadata.instrument.clone()
    }

    fn wavetable_info(&self) -> Option<WavetableInfo> {
        self.metadata.wavetable
    }
}
