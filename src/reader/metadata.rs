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

//! Sampler metadata carried in RIFF chunks.
//!
//! WAV files store these chunks at the top level. FLAC files can carry them in
//! APPLICATION blocks with the `riff` application id.

use std::io::{self, Read, Seek, SeekFrom};

/// Maximum number of loops read from a `smpl` chunk.
const MAX_LOOPS: usize = 16;

/// Loop playback mode from a `smpl` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    None,
    Forward,
    Alternating,
    Backward,
}

/// One sampler loop. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    pub mode: LoopMode,
    pub start: u32,
    pub end: u32,
    pub count: u32,
}

/// Instrument metadata from a `smpl` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstrumentInfo {
    pub base_note: u32,
    /// Pitch fraction in cents.
    pub detune: u8,
    pub loops: Vec<LoopInfo>,
}

/// Wavetable metadata from `clm `, `srge`/`srgo` or `uhWT` chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WavetableInfo {
    pub table_size: u32,
    pub cross_table_interpolation: u8,
    pub one_shot: bool,
}

/// Metadata collected while scanning a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub instrument: Option<InstrumentInfo>,
    pub wavetable: Option<WavetableInfo>,
}

#[derive(Debug, Clone, Copy)]
struct RiffChunk {
    id: [u8; 4],
    offset: u64,
    length: u32,
}

/// Scans `source` for sampler metadata. Files that are neither RIFF nor FLAC
/// produce empty metadata.
pub fn read_metadata<R: Read + Seek>(source: &mut R) -> io::Result<FileMetadata> {
    let mut magic = [0u8; 4];
    source.seek(SeekFrom::Start(0))?;
    if source.read_exact(&mut magic).is_err() {
        return Ok(FileMetadata::default());
    }

    let chunks = match &magic {
        b"RIFF" => riff_chunks(source)?,
        b"fLaC" => flac_chunks(source)?,
        _ => return Ok(FileMetadata::default()),
    };

    Ok(FileMetadata {
        instrument: extract_instrument(source, &chunks)?,
        wavetable: extract_wavetable(source, &chunks)?,
    })
}

fn read_u32le<R: Read>(source: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    source.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u32be<R: Read>(source: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    source.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

fn riff_chunks<R: Read + Seek>(source: &mut R) -> io::Result<Vec<RiffChunk>> {
    let mut chunks = Vec::with_capacity(16);
    source.seek(SeekFrom::Start(12))?;

    loop {
        let mut id = [0u8; 4];
        if source.read_exact(&mut id).is_err() {
            break;
        }
        let length = match read_u32le(source) {
            Ok(length) => length,
            Err(_) => break,
        };
        let offset = source.stream_position()?;
        chunks.push(RiffChunk { id, offset, length });

        // Chunks are padded to an even size.
        let skip = i64::from(length) + i64::from(length & 1);
        source.seek(SeekFrom::Current(skip))?;
    }

    Ok(chunks)
}

fn flac_chunks<R: Read + Seek>(source: &mut R) -> io::Result<Vec<RiffChunk>> {
    let mut chunks = Vec::new();
    source.seek(SeekFrom::Start(4))?;

    let mut header = 0u32;
    while (header >> 31) & 1 != 1 {
        header = read_u32be(source)?;
        let block_type = (header >> 24) & 0x7f;
        let block_size = header & ((1 << 24) - 1);
        let next_block = source.stream_position()? + u64::from(block_size);

        // APPLICATION block
        if block_type == 2 {
            let mut app_id = [0u8; 4];
            let mut id = [0u8; 4];
            if source.read_exact(&mut app_id).is_ok()
                && &app_id == b"riff"
                && source.read_exact(&mut id).is_ok()
            {
                if let Ok(length) = read_u32le(source) {
                    if block_size >= 12 && length <= block_size - 12 {
                        let offset = source.stream_position()?;
                        chunks.push(RiffChunk { id, offset, length });
                    }
                }
            }
        }

        source.seek(SeekFrom::Start(next_block))?;
    }

    Ok(chunks)
}

fn chunk_by_id<'a>(chunks: &'a [RiffChunk], id: &[u8; 4]) -> Option<&'a RiffChunk> {
    chunks.iter().find(|chunk| &chunk.id == id)
}

/// Reads up to `max` bytes of a chunk's payload.
fn chunk_data<R: Read + Seek>(source: &mut R, chunk: &RiffChunk, max: usize) -> io::Result<Vec<u8>> {
    let count = max.min(chunk.length as usize);
    source.seek(SeekFrom::Start(chunk.offset))?;
    let mut data = Vec::with_capacity(count);
    (&mut *source).take(count as u64).read_to_end(&mut data)?;
    Ok(data)
}

fn extract_instrument<R: Read + Seek>(
    source: &mut R,
    chunks: &[RiffChunk],
) -> io::Result<Option<InstrumentInfo>> {
    let Some(smpl) = chunk_by_id(chunks, b"smpl") else {
        return Ok(None);
    };

    let data = chunk_data(source, smpl, 9 * 4 + MAX_LOOPS * 6 * 4)?;
    let u32_at = |offset: usize| -> u32 {
        data.get(offset..offset + 4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .unwrap_or(0)
    };

    // Offsets below are relative to the chunk payload.
    let base_note = u32_at(0x0c);
    let pitch_fraction = u32_at(0x10);
    let detune = (f64::from(pitch_fraction) * (100.0 / (1u64 << 32) as f64)).round() as u8;

    let num_loops = (u32_at(0x1c) as usize).min(MAX_LOOPS);
    let loops = (0..num_loops)
        .map(|i| {
            let loop_offset = 0x24 + i * 24;
            let mode = match u32_at(loop_offset + 0x04) {
                0 => LoopMode::Forward,
                1 => LoopMode::Alternating,
                2 => LoopMode::Backward,
                _ => LoopMode::None,
            };
            LoopInfo {
                mode,
                start: u32_at(loop_offset + 0x08),
                end: u32_at(loop_offset + 0x0c).saturating_add(1),
                count: u32_at(loop_offset + 0x14),
            }
        })
        .collect();

    Ok(Some(InstrumentInfo {
        base_note,
        detune,
        loops,
    }))
}

fn extract_wavetable<R: Read + Seek>(
    source: &mut R,
    chunks: &[RiffChunk],
) -> io::Result<Option<WavetableInfo>> {
    if let Some(clm) = chunk_by_id(chunks, b"clm ") {
        // "<!>2048 01000000 wavetable (maker)": ASCII table size at 3..7 and
        // the interpolation flag as the first ASCII digit at 8.
        let data = chunk_data(source, clm, 16)?;
        if data.len() == 16 {
            let table_size = std::str::from_utf8(&data[3..7])
                .ok()
                .and_then(|digits| digits.trim().parse::<u32>().ok());
            if let Some(table_size) = table_size {
                let cross_table_interpolation = match data[8] {
                    c @ b'0'..=b'4' => c - b'0',
                    _ => 0,
                };
                return Ok(Some(WavetableInfo {
                    table_size,
                    cross_table_interpolation,
                    one_shot: false,
                }));
            }
        }
    }

    let surge = chunk_by_id(chunks, b"srge")
        .map(|chunk| (chunk, false))
        .or_else(|| chunk_by_id(chunks, b"srgo").map(|chunk| (chunk, true)));
    if let Some((chunk, one_shot)) = surge {
        let data = chunk_data(source, chunk, 8)?;
        if data.len() == 8 {
            return Ok(Some(WavetableInfo {
                table_size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
                cross_table_interpolation: 0,
                one_shot,
            }));
        }
    }

    if let Some(uhwt) = chunk_by_id(chunks, b"uhWT") {
        // version, number of tables, table size
        let data = chunk_data(source, uhwt, 12)?;
        if data.len() == 12 {
            return Ok(Some(WavetableInfo {
                table_size: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
                cross_table_interpolation: 0,
                one_shot: false,
            }));
        }
    }

    Ok(None)
}
