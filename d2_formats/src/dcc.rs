// SPDX-License-Identifier: GPL-2.0-or-later
//
// DCC animated sprite decoder for Diablo II character and monster
// animations. Cell layout, channel merge order and the reuse rules follow the
// game's own decoder so frames match what the engine draws.
//
// A DCC file stores one or more directions, each holding the same number of
// palette-indexed frames. Every direction is an independent bitstream that
// decodes in two passes: stage 1 builds a list of pixel buffer entries, stage
// 2 replays the same cell walk to paint frames from those entries.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::debug;
use rayon::prelude::*;
use serde::Serialize;

pub mod assembler;
pub mod cells;
pub mod error;
pub mod header;
pub mod pixel_buffer;

pub use assembler::{DecodedDirection, DecodedFrame, IndexedCanvas, assemble_frames};
pub use cells::{CellGrid, CellLayout, CellVisit, FrameCell, frame_spans, grid_spans};
pub use error::DccError;
pub use header::{
    BoundingBox, Direction, FIELD_WIDTH_TABLE, FieldWidths, FileHeader, FrameHeader, StreamSizes,
    field_width,
};
pub use pixel_buffer::{PixelBuffer, PixelBufferEntry, fill_pixel_buffer};

impl Direction {
    /// Decode every frame of this direction.
    pub fn decode(&self) -> Result<Vec<DecodedFrame>, DccError> {
        let layout = CellLayout::build(self)?;
        let buffer = fill_pixel_buffer(self, &layout)?;
        assemble_frames(self, &layout, &buffer)
    }
}

/// A parsed DCC container. Directions are parsed on demand.
#[derive(Debug, Clone)]
pub struct DccFile {
    pub source: Option<PathBuf>,
    header: FileHeader,
    data: Vec<u8>,
    direction_ranges: Vec<Range<usize>>,
}

impl DccFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, DccError> {
        Self::from_vec(bytes.to_vec())
    }

    pub fn from_vec(data: Vec<u8>) -> Result<Self, DccError> {
        let header = FileHeader::parse(&data)?;
        let direction_ranges = header::direction_ranges(&data, &header)?;
        debug!(
            "DCC: {} directions x {} frames, {} bytes",
            header.direction_count,
            header.frames_per_direction,
            data.len()
        );
        Ok(DccFile {
            source: None,
            header,
            data,
            direction_ranges,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, DccError> {
        let path = path.as_ref();
        let mut parsed = Self::from_vec(fs::read(path)?)?;
        parsed.source = Some(path.to_path_buf());
        Ok(parsed)
    }

    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    #[inline]
    pub fn direction_count(&self) -> usize {
        self.direction_ranges.len()
    }

    #[inline]
    pub fn frames_per_direction(&self) -> usize {
        self.header.frames_per_direction as usize
    }

    /// Raw bytes of one direction.
    pub fn direction_bytes(&self, index: usize) -> Result<&[u8], DccError> {
        let range = self
            .direction_ranges
            .get(index)
            .ok_or(DccError::DirectionOutOfRange {
                index,
                count: self.direction_count(),
            })?;
        Ok(&self.data[range.clone()])
    }

    /// Parse the headers and sub-streams of one direction.
    pub fn direction(&self, index: usize) -> Result<Direction, DccError> {
        let bytes = self.direction_bytes(index)?;
        Direction::parse(index, bytes, self.frames_per_direction())
    }

    pub fn decode_direction(&self, index: usize) -> Result<DecodedDirection, DccError> {
        let direction = self.direction(index)?;
        let frames = direction.decode()?;
        Ok(DecodedDirection {
            index,
            bbox: direction.bbox,
            frames,
        })
    }

    /// Decode all directions in parallel; results keep direction order.
    pub fn decode_all(&self) -> Vec<Result<DecodedDirection, DccError>> {
        (0..self.direction_count())
            .into_par_iter()
            .map(|index| self.decode_direction(index))
            .collect()
    }

    /// Header-level description, parsing each direction but decoding no pixels.
    pub fn summary(&self) -> DccSummary {
        let directions = (0..self.direction_count())
            .map(|index| {
                let range = &self.direction_ranges[index];
                match self.direction(index) {
                    Ok(direction) => DirectionSummary::from_direction(&direction, range),
                    Err(err) => DirectionSummary::failed(index, range, &err),
                }
            })
            .collect();
        DccSummary {
            source: self.source.clone(),
            header: self.header,
            directions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DccSummary {
    pub source: Option<PathBuf>,
    pub header: FileHeader,
    pub directions: Vec<DirectionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionSummary {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub coded_size: u32,
    pub compression_flags: u8,
    pub field_widths: FieldWidths,
    pub stream_sizes: StreamSizes,
    pub displacement_bits: usize,
    pub palette_entries: usize,
    pub bbox: Option<BoundingBox>,
    pub frames: Vec<FrameHeader>,
}

impl DirectionSummary {
    fn from_direction(direction: &Direction, range: &Range<usize>) -> Self {
        DirectionSummary {
            index: direction.index,
            offset: range.start,
            size: range.len(),
            error: None,
            coded_size: direction.coded_size,
            compression_flags: direction.compression_flags,
            field_widths: direction.field_widths,
            stream_sizes: direction.stream_sizes,
            displacement_bits: direction.streams.pixel_codes_and_displacement.bit_len(),
            palette_entries: direction.pixel_values.len(),
            bbox: Some(direction.bbox),
            frames: direction.frames.clone(),
        }
    }

    fn failed(index: usize, range: &Range<usize>, err: &DccError) -> Self {
        DirectionSummary {
            index,
            offset: range.start,
            size: range.len(),
            error: Some(err.to_string()),
            coded_size: 0,
            compression_flags: 0,
            field_widths: FieldWidths::default(),
            stream_sizes: StreamSizes::default(),
            displacement_bits: 0,
            palette_entries: 0,
            bbox: None,
            frames: Vec::new(),
        }
    }
}
