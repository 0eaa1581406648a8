// SPDX-License-Identifier: GPL-2.0-or-later
//
// Stage 1: decode the pixel buffer entries of a direction.
//
// Every frame cell either reuses the contents of its buffer cell or produces
// a new entry holding up to four palette indices. Stage 2 replays the same
// walk and consumes the entries in order.

use log::{trace, warn};

use crate::bitstream::BitReader;
use crate::dcc::DccError;
use crate::dcc::cells::CellLayout;
use crate::dcc::header::Direction;

/// Number of new channel values announced by a 4-bit pixel mask.
pub const PIXEL_COUNT_TABLE: [usize; 16] = [0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4];

const FIRST_VISIT_MASK: u8 = 0x0F;
const DISPLACEMENT_BITS: u32 = 4;
const DISPLACEMENT_CONTINUE: u32 = 0x0F;
const RAW_CODE_BITS: u32 = 8;

/// Four palette indices produced for one frame cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBufferEntry {
    pub values: [u8; 4],
    pub frame: usize,
    pub cell_index: usize,
}

impl PixelBufferEntry {
    #[inline]
    pub fn belongs_to(&self, frame: usize, cell_index: usize) -> bool {
        self.frame == frame && self.cell_index == cell_index
    }
}

/// Output of stage 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    pub entries: Vec<PixelBufferEntry>,
    /// Bit position in the displacement stream where stage 2 resumes.
    pub displacement_position: usize,
}

/// Cursors into the four streams read by stage 1.
struct StageOneStreams<'a> {
    equal_cells: Option<BitReader<'a>>,
    pixel_mask: BitReader<'a>,
    encoding_type: Option<BitReader<'a>>,
    raw_pixel_codes: BitReader<'a>,
    displacement: BitReader<'a>,
}

impl<'a> StageOneStreams<'a> {
    fn new(direction: &'a Direction) -> Self {
        let streams = &direction.streams;
        StageOneStreams {
            equal_cells: (direction.stream_sizes.equal_cells > 0)
                .then(|| streams.equal_cells.reader()),
            pixel_mask: streams.pixel_mask.reader(),
            encoding_type: (direction.stream_sizes.encoding_type > 0)
                .then(|| streams.encoding_type.reader()),
            raw_pixel_codes: streams.raw_pixel_codes.reader(),
            displacement: streams.pixel_codes_and_displacement.reader(),
        }
    }

    /// `None` when the cell reuses its buffer cell, otherwise the pixel mask.
    fn next_mask(&mut self, seen_before: bool) -> Result<Option<u8>, DccError> {
        if !seen_before {
            return Ok(Some(FIRST_VISIT_MASK));
        }
        let equal = match self.equal_cells.as_mut() {
            Some(reader) => reader.read_bit()?,
            None => false,
        };
        if equal {
            return Ok(None);
        }
        Ok(Some(self.pixel_mask.read_bits(4)? as u8))
    }

    fn raw_encoding(&mut self, count: usize) -> Result<bool, DccError> {
        match self.encoding_type.as_mut() {
            Some(reader) if count > 0 => reader.read_bit(),
            _ => Ok(false),
        }
    }
}

/// Accumulate 4-bit displacements while the previous nibble was 15.
pub fn read_displacement(reader: &mut BitReader<'_>, last: u32) -> Result<u32, DccError> {
    let mut value = last;
    loop {
        let nibble = reader.read_bits(DISPLACEMENT_BITS)?;
        value = value.wrapping_add(nibble);
        if nibble != DISPLACEMENT_CONTINUE {
            return Ok(value);
        }
    }
}

/// Decode up to `count` distinct codes; stops early on a repeated value.
fn decode_codes(
    streams: &mut StageOneStreams<'_>,
    count: usize,
    raw: bool,
) -> Result<([u32; 4], usize), DccError> {
    let mut decoded = [0u32; 4];
    let mut len = 0;
    let mut last = 0u32;
    for _ in 0..count {
        let value = if raw {
            streams.raw_pixel_codes.read_bits(RAW_CODE_BITS)?
        } else {
            read_displacement(&mut streams.displacement, last)?
        };
        if value == last {
            break;
        }
        decoded[len] = value;
        len += 1;
        last = value;
    }
    Ok((decoded, len))
}

/// Fill masked channels from the decoded stack, last decoded first.
fn merge_channels(mask: u8, decoded: &[u32], previous: [u8; 4]) -> [u8; 4] {
    let mut stack = decoded.iter().rev();
    let mut codes = [0u8; 4];
    for (channel, code) in codes.iter_mut().enumerate() {
        *code = if mask & (1 << channel) != 0 {
            stack.next().map(|&value| value as u8).unwrap_or(0)
        } else {
            previous[channel]
        };
    }
    codes
}

/// Run stage 1 over `layout` and return the ordered entries.
pub fn fill_pixel_buffer(direction: &Direction, layout: &CellLayout) -> Result<PixelBuffer, DccError> {
    let mut streams = StageOneStreams::new(direction);
    let mut last_codes: Vec<Option<[u8; 4]>> = vec![None; layout.grid.len()];
    let mut entries = Vec::new();
    let mut unmapped_codes = 0usize;

    for visit in layout.visits() {
        let previous = last_codes[visit.buffer_cell];
        let Some(mask) = streams.next_mask(previous.is_some())? else {
            continue;
        };

        let count = PIXEL_COUNT_TABLE[mask as usize];
        let raw = streams.raw_encoding(count)?;
        let (decoded, len) = decode_codes(&mut streams, count, raw)?;
        let codes = merge_channels(mask, &decoded[..len], previous.unwrap_or([0; 4]));
        last_codes[visit.buffer_cell] = Some(codes);

        let values = codes.map(|code| {
            direction.palette_index(code).unwrap_or_else(|| {
                unmapped_codes += 1;
                0
            })
        });
        entries.push(PixelBufferEntry {
            values,
            frame: visit.frame,
            cell_index: visit.cell_index,
        });
    }

    if unmapped_codes > 0 {
        warn!(
            "direction {}: {unmapped_codes} pixel codes beyond the {} used palette entries",
            direction.index,
            direction.pixel_values.len()
        );
    }
    trace!(
        "direction {}: stage 1 produced {} entries, displacement cursor at bit {}",
        direction.index,
        entries.len(),
        streams.displacement.position()
    );

    Ok(PixelBuffer {
        entries,
        displacement_position: streams.displacement.position(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitWriter;

    #[test]
    fn displacement_chain_accumulates_nibbles() {
        let mut writer = BitWriter::new();
        for nibble in [15, 15, 3] {
            writer.write_bits(nibble, 4);
        }
        writer.write_bits(2, 4);
        let stream = writer.into_stream();
        let mut reader = stream.reader();

        assert_eq!(read_displacement(&mut reader, 7).unwrap(), 7 + 33);
        assert_eq!(reader.position(), 12);
        assert_eq!(read_displacement(&mut reader, 0).unwrap(), 2);
    }

    #[test]
    fn masked_channels_pop_the_last_decoded_value_first() {
        let merged = merge_channels(0x0F, &[10, 20, 30, 40], [0; 4]);
        assert_eq!(merged, [40, 30, 20, 10]);

        let merged = merge_channels(0b0101, &[9, 11], [1, 2, 3, 4]);
        assert_eq!(merged, [11, 2, 9, 4]);
    }

    #[test]
    fn exhausted_stack_pops_zero() {
        let merged = merge_channels(0b1010, &[5], [1, 2, 3, 4]);
        assert_eq!(merged, [1, 5, 3, 0]);
    }

    #[test]
    fn pixel_count_table_matches_popcount() {
        for (mask, &count) in PIXEL_COUNT_TABLE.iter().enumerate() {
            assert_eq!(count, (mask as u32).count_ones() as usize);
        }
    }
}
