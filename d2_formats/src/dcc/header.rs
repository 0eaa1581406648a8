// SPDX-License-Identifier: GPL-2.0-or-later

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use serde::Serialize;

use crate::bitstream::{BitReader, BitStream};
use crate::dcc::DccError;

pub const DCC_SIGNATURE: u8 = 0x74;
pub const DCC_VERSION: u8 = 6;
pub const FILE_HEADER_SIZE: usize = 15;
pub const MAX_DIRECTIONS: usize = 32;
pub const MAX_FRAMES_PER_DIRECTION: usize = 256;
/// Upper bound on a direction box edge, in pixels.
pub const MAX_DIRECTION_EXTENT: i32 = 8192;

/// Maps a 4-bit width selector to the bit width of a frame header field.
pub const FIELD_WIDTH_TABLE: [u8; 16] = [0, 1, 2, 4, 6, 8, 10, 12, 14, 16, 20, 24, 26, 28, 30, 32];

const STREAM_SIZE_BITS: u32 = 20;
const PALETTE_KEY_BITS: usize = 256;

pub const COMPRESS_RAW_PIXELS: u8 = 0x01;
pub const COMPRESS_EQUAL_CELLS: u8 = 0x02;

#[inline]
pub fn field_width(code: u8) -> u32 {
    FIELD_WIDTH_TABLE[(code & 0x0F) as usize] as u32
}

/// Fixed-size header at the start of every DCC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub signature: u8,
    pub version: u8,
    pub direction_count: u8,
    pub frames_per_direction: u32,
    pub reserved: u32,
    pub total_size_coded: u32,
}

impl FileHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, DccError> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(DccError::BufferUnderrun {
                requested: FILE_HEADER_SIZE * 8,
                available: bytes.len() * 8,
            });
        }
        let header = FileHeader {
            signature: bytes[0],
            version: bytes[1],
            direction_count: bytes[2],
            frames_per_direction: LittleEndian::read_u32(&bytes[3..7]),
            reserved: LittleEndian::read_u32(&bytes[7..11]),
            total_size_coded: LittleEndian::read_u32(&bytes[11..15]),
        };

        if header.signature != DCC_SIGNATURE {
            return Err(DccError::InconsistentHeader(format!(
                "signature {:#04x} (expected {DCC_SIGNATURE:#04x})",
                header.signature
            )));
        }
        if header.version != DCC_VERSION {
            return Err(DccError::UnsupportedFeature(format!(
                "DCC version {}",
                header.version
            )));
        }
        let directions = header.direction_count as usize;
        if directions == 0 || directions > MAX_DIRECTIONS {
            return Err(DccError::InconsistentHeader(format!(
                "{directions} directions (expected 1..={MAX_DIRECTIONS})"
            )));
        }
        let frames = header.frames_per_direction as usize;
        if frames == 0 || frames > MAX_FRAMES_PER_DIRECTION {
            return Err(DccError::InconsistentHeader(format!(
                "{frames} frames per direction (expected 1..={MAX_FRAMES_PER_DIRECTION})"
            )));
        }
        Ok(header)
    }
}

/// Read the direction offset table and turn it into byte ranges.
///
/// Each direction runs up to the next one's start; the last runs to the end of
/// the buffer.
pub fn direction_ranges(bytes: &[u8], header: &FileHeader) -> Result<Vec<Range<usize>>, DccError> {
    let count = header.direction_count as usize;
    let table_end = FILE_HEADER_SIZE + count * 4;
    if bytes.len() < table_end {
        return Err(DccError::InconsistentHeader(format!(
            "direction offset table needs {table_end} bytes, file has {}",
            bytes.len()
        )));
    }

    let offsets: Vec<usize> = (0..count)
        .map(|index| {
            let start = FILE_HEADER_SIZE + index * 4;
            LittleEndian::read_u32(&bytes[start..start + 4]) as usize
        })
        .collect();

    let mut ranges = Vec::with_capacity(count);
    for (index, &start) in offsets.iter().enumerate() {
        let end = offsets.get(index + 1).copied().unwrap_or(bytes.len());
        if start < table_end || start >= end || end > bytes.len() {
            return Err(DccError::InconsistentHeader(format!(
                "direction {index} spans {start}..{end} which does not partition a {} byte file",
                bytes.len()
            )));
        }
        ranges.push(start..end);
    }
    Ok(ranges)
}

/// Bit widths of the seven per-frame header fields of one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldWidths {
    pub reserved: u32,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub optional_data: u32,
    pub coded_bytes: u32,
}

impl FieldWidths {
    fn read(reader: &mut BitReader<'_>) -> Result<Self, DccError> {
        let mut next = || -> Result<u32, DccError> { Ok(field_width(reader.read_bits(4)? as u8)) };
        Ok(FieldWidths {
            reserved: next()?,
            width: next()?,
            height: next()?,
            x_offset: next()?,
            y_offset: next()?,
            optional_data: next()?,
            coded_bytes: next()?,
        })
    }
}

/// Inclusive pixel bounds plus the derived extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Identity for [`BoundingBox::union`].
    pub const EMPTY: BoundingBox = BoundingBox {
        xmin: i32::MAX,
        ymin: i32::MAX,
        xmax: i32::MIN,
        ymax: i32::MIN,
        width: 0,
        height: 0,
    };

    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        let mut bbox = BoundingBox {
            xmin,
            ymin,
            xmax,
            ymax,
            width: 0,
            height: 0,
        };
        bbox.recompute_extent();
        bbox
    }

    fn recompute_extent(&mut self) {
        self.width = (self.xmax as i64 - self.xmin as i64 + 1).clamp(0, i32::MAX as i64) as i32;
        self.height = (self.ymax as i64 - self.ymin as i64 + 1).clamp(0, i32::MAX as i64) as i32;
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.xmin.min(other.xmin),
            self.ymin.min(other.ymin),
            self.xmax.max(other.xmax),
            self.ymax.max(other.ymax),
        )
    }
}

/// Per-frame header inside a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub reserved: u32,
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub optional_data_len: u32,
    pub coded_bytes: u32,
    pub bottom_up: bool,
    pub bbox: BoundingBox,
}

impl FrameHeader {
    fn read(reader: &mut BitReader<'_>, widths: &FieldWidths) -> Result<Self, DccError> {
        let reserved = reader.read_bits(widths.reserved)?;
        let width = reader.read_bits(widths.width)?;
        let height = reader.read_bits(widths.height)?;
        let offset_x = reader.read_signed_bits(widths.x_offset)?;
        let offset_y = reader.read_signed_bits(widths.y_offset)?;
        let optional_data_len = reader.read_bits(widths.optional_data)?;
        let coded_bytes = reader.read_bits(widths.coded_bytes)?;
        let bottom_up = reader.read_bit()?;

        let bbox = frame_box(width, height, offset_x, offset_y, bottom_up)?;
        Ok(FrameHeader {
            reserved,
            width,
            height,
            offset_x,
            offset_y,
            optional_data_len,
            coded_bytes,
            bottom_up,
            bbox,
        })
    }
}

fn frame_box(
    width: u32,
    height: u32,
    offset_x: i32,
    offset_y: i32,
    bottom_up: bool,
) -> Result<BoundingBox, DccError> {
    let extent = |value: u32| -> Result<i32, DccError> {
        i32::try_from(value)
            .ok()
            .filter(|value| *value <= MAX_DIRECTION_EXTENT)
            .ok_or_else(|| DccError::InconsistentHeader(format!("frame extent {value} too large")))
    };
    let width = extent(width)?;
    let height = extent(height)?;

    let xmin = offset_x;
    let xmax = offset_x.saturating_add(width - 1);
    let (ymin, ymax) = if bottom_up {
        (offset_y, offset_y.saturating_add(height - 1))
    } else {
        (offset_y.saturating_sub(height - 1), offset_y)
    };
    Ok(BoundingBox::new(xmin, ymin, xmax, ymax))
}

/// Byte-level sizes of the four explicitly sized sub-streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSizes {
    pub equal_cells: u32,
    pub pixel_mask: u32,
    pub encoding_type: u32,
    pub raw_pixel_codes: u32,
}

/// The five sub-bitstreams of a direction.
#[derive(Debug, Clone, Default)]
pub struct DirectionStreams {
    pub equal_cells: BitStream,
    pub pixel_mask: BitStream,
    pub encoding_type: BitStream,
    pub raw_pixel_codes: BitStream,
    pub pixel_codes_and_displacement: BitStream,
}

/// Fully parsed direction, ready for the two decoding stages.
#[derive(Debug, Clone)]
pub struct Direction {
    pub index: usize,
    pub coded_size: u32,
    pub compression_flags: u8,
    pub field_widths: FieldWidths,
    pub frames: Vec<FrameHeader>,
    pub bbox: BoundingBox,
    pub stream_sizes: StreamSizes,
    /// Palette indices in use, ascending; stream codes index into this list.
    pub pixel_values: Vec<u8>,
    pub streams: DirectionStreams,
}

impl Direction {
    /// Parse one direction from its byte range.
    pub fn parse(index: usize, bytes: &[u8], frame_count: usize) -> Result<Self, DccError> {
        let mut reader = BitReader::new(bytes);

        let coded_size = reader.read_bits(32)?;
        let compression_flags = reader.read_bits(2)? as u8;
        let field_widths = FieldWidths::read(&mut reader)?;

        if field_widths.optional_data != 0 {
            return Err(DccError::UnsupportedFeature(format!(
                "direction {index} declares {}-bit optional frame data",
                field_widths.optional_data
            )));
        }

        let mut frames = Vec::with_capacity(frame_count);
        let mut bbox = BoundingBox::EMPTY;
        for _ in 0..frame_count {
            let frame = FrameHeader::read(&mut reader, &field_widths)?;
            bbox = bbox.union(&frame.bbox);
            frames.push(frame);
        }

        if bbox.width <= 0
            || bbox.height <= 0
            || bbox.width > MAX_DIRECTION_EXTENT
            || bbox.height > MAX_DIRECTION_EXTENT
        {
            return Err(DccError::InconsistentHeader(format!(
                "direction {index} box is {}x{}",
                bbox.width, bbox.height
            )));
        }

        let mut stream_sizes = StreamSizes::default();
        if compression_flags & COMPRESS_EQUAL_CELLS != 0 {
            stream_sizes.equal_cells = reader.read_bits(STREAM_SIZE_BITS)?;
        }
        stream_sizes.pixel_mask = reader.read_bits(STREAM_SIZE_BITS)?;
        if compression_flags & COMPRESS_RAW_PIXELS != 0 {
            stream_sizes.encoding_type = reader.read_bits(STREAM_SIZE_BITS)?;
            stream_sizes.raw_pixel_codes = reader.read_bits(STREAM_SIZE_BITS)?;
        }

        let mut pixel_values = Vec::new();
        for value in 0..PALETTE_KEY_BITS {
            if reader.read_bit()? {
                pixel_values.push(value as u8);
            }
        }

        let equal_cells = reader.read_stream(stream_sizes.equal_cells as usize)?;
        let pixel_mask = reader.read_stream(stream_sizes.pixel_mask as usize)?;
        let encoding_type = reader.read_stream(stream_sizes.encoding_type as usize)?;
        let raw_pixel_codes = reader.read_stream(stream_sizes.raw_pixel_codes as usize)?;
        let pixel_codes_and_displacement = reader.read_stream(reader.remaining())?;

        debug!(
            "direction {index}: {} frames, box {}x{} at ({}, {}), {} palette entries",
            frames.len(),
            bbox.width,
            bbox.height,
            bbox.xmin,
            bbox.ymin,
            pixel_values.len()
        );
        trace!(
            "direction {index}: flags {compression_flags:#x}, streams {:?}, displacement {} bits",
            stream_sizes,
            pixel_codes_and_displacement.bit_len()
        );

        Ok(Direction {
            index,
            coded_size,
            compression_flags,
            field_widths,
            frames,
            bbox,
            stream_sizes,
            pixel_values,
            streams: DirectionStreams {
                equal_cells,
                pixel_mask,
                encoding_type,
                raw_pixel_codes,
                pixel_codes_and_displacement,
            },
        })
    }

    /// Resolve a stream code through the direction's palette index list.
    pub fn palette_index(&self, code: u8) -> Option<u8> {
        self.pixel_values.get(code as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitWriter;

    fn file_header_bytes(directions: u8, frames: u32) -> Vec<u8> {
        let mut data = vec![DCC_SIGNATURE, DCC_VERSION, directions];
        data.extend_from_slice(&frames.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data
    }

    #[test]
    fn width_table_lookup() {
        assert_eq!(field_width(9), 16);
        assert_eq!(field_width(0), 0);
        assert_eq!(field_width(15), 32);
    }

    #[test]
    fn rejects_bad_signature_and_version() {
        let mut data = file_header_bytes(1, 1);
        data[0] = 0x75;
        assert!(matches!(
            FileHeader::parse(&data),
            Err(DccError::InconsistentHeader(_))
        ));

        let mut data = file_header_bytes(1, 1);
        data[1] = 5;
        assert!(matches!(
            FileHeader::parse(&data),
            Err(DccError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn direction_ranges_partition_the_buffer() {
        let mut data = file_header_bytes(2, 1);
        data.extend_from_slice(&23u32.to_le_bytes());
        data.extend_from_slice(&30u32.to_le_bytes());
        data.resize(40, 0);

        let header = FileHeader::parse(&data).unwrap();
        let ranges = direction_ranges(&data, &header).unwrap();
        assert_eq!(ranges, vec![23..30, 30..40]);
    }

    #[test]
    fn overlapping_direction_offsets_are_rejected() {
        let mut data = file_header_bytes(2, 1);
        data.extend_from_slice(&30u32.to_le_bytes());
        data.extend_from_slice(&25u32.to_le_bytes());
        data.resize(40, 0);

        let header = FileHeader::parse(&data).unwrap();
        assert!(matches!(
            direction_ranges(&data, &header),
            Err(DccError::InconsistentHeader(_))
        ));
    }

    #[test]
    fn frame_boxes_follow_the_bottom_up_flag() {
        let top_down = frame_box(5, 3, -2, 10, false).unwrap();
        assert_eq!((top_down.xmin, top_down.xmax), (-2, 2));
        assert_eq!((top_down.ymin, top_down.ymax), (8, 10));
        assert_eq!((top_down.width, top_down.height), (5, 3));

        let bottom_up = frame_box(5, 3, -2, 10, true).unwrap();
        assert_eq!((bottom_up.ymin, bottom_up.ymax), (10, 12));
    }

    #[test]
    fn union_recomputes_extent() {
        let a = BoundingBox::new(0, 0, 3, 3);
        let b = BoundingBox::new(-4, 2, 1, 9);
        let merged = BoundingBox::EMPTY.union(&a).union(&b);
        assert_eq!(merged, BoundingBox::new(-4, 0, 3, 9));
        assert_eq!((merged.width, merged.height), (8, 10));
    }

    #[test]
    fn optional_data_is_rejected_before_frames() {
        let mut writer = BitWriter::new();
        writer.write_bits(0, 32);
        writer.write_bits(0, 2);
        for code in [0, 5, 5, 5, 5, 3, 0] {
            writer.write_bits(code, 4);
        }
        let bytes = writer.into_bytes();
        assert!(matches!(
            Direction::parse(0, &bytes, 1),
            Err(DccError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn parses_stream_sizes_and_palette_key() {
        let mut writer = BitWriter::new();
        writer.write_bits(0, 32);
        writer.write_bits(0x3, 2);
        // reserved, width, height, x, y, optional, coded
        for code in [0, 4, 4, 5, 5, 0, 0] {
            writer.write_bits(code, 4);
        }
        writer.write_bits(4, 6);
        writer.write_bits(4, 6);
        writer.write_signed_bits(-1, 8);
        writer.write_signed_bits(3, 8);
        writer.write_bit(false);
        writer.write_bits(3, 20); // equal cells
        writer.write_bits(5, 20); // pixel mask
        writer.write_bits(1, 20); // encoding type
        writer.write_bits(16, 20); // raw pixel codes
        for value in 0..256 {
            writer.write_bit(value == 7 || value == 200);
        }
        writer.write_bits(0b101, 3);
        writer.write_bits(0b11011, 5);
        writer.write_bits(1, 1);
        writer.write_bits(0xBEEF, 16);
        writer.write_bits(0x2A, 6);
        let bytes = writer.into_bytes();

        let direction = Direction::parse(3, &bytes, 1).unwrap();
        assert_eq!(direction.index, 3);
        assert_eq!(direction.field_widths.width, 6);
        assert_eq!(direction.field_widths.x_offset, 8);
        let frame = &direction.frames[0];
        assert_eq!((frame.offset_x, frame.offset_y), (-1, 3));
        assert_eq!(direction.bbox, BoundingBox::new(-1, 0, 2, 3));
        assert_eq!(
            direction.stream_sizes,
            StreamSizes {
                equal_cells: 3,
                pixel_mask: 5,
                encoding_type: 1,
                raw_pixel_codes: 16
            }
        );
        assert_eq!(direction.pixel_values, vec![7, 200]);
        assert_eq!(direction.palette_index(1), Some(200));
        assert_eq!(direction.palette_index(2), None);

        let streams = &direction.streams;
        assert_eq!(streams.equal_cells.as_bytes(), &[0b101]);
        assert_eq!(streams.pixel_mask.as_bytes(), &[0b11011]);
        assert_eq!(streams.raw_pixel_codes.as_bytes(), &[0xEF, 0xBE]);
        // The displacement stream runs to the end of the padded final byte.
        let mut displacement = streams.pixel_codes_and_displacement.reader();
        assert_eq!(displacement.read_bits(6).unwrap(), 0x2A);
    }
}
