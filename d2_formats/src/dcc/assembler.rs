// SPDX-License-Identifier: GPL-2.0-or-later
//
// Stage 2: paint frames from the pixel buffer.
//
// The walk mirrors stage 1 exactly. A visit whose (frame, cell) tag matches
// the current entry paints new pixels; any other visit reuses what its buffer
// cell already holds on the running direction canvas.

use log::trace;

use crate::bitstream::BitReader;
use crate::dcc::DccError;
use crate::dcc::cells::{CellLayout, CellVisit, FrameCell};
use crate::dcc::header::{BoundingBox, Direction};
use crate::dcc::pixel_buffer::{PixelBuffer, PixelBufferEntry};
use crate::palette::Palette;

/// Palette index written to cleared or untouched pixels.
pub const BACKGROUND_INDEX: u8 = 0;

/// Decoded frame as palette indices, cropped to the frame's own box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub bbox: BoundingBox,
    /// Row-major, top row first.
    pub pixels: Vec<u8>,
}

impl DecodedFrame {
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Convert to tightly packed RGBA8888 through `palette`.
    pub fn to_rgba8888(&self, palette: &Palette) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for &index in &self.pixels {
            out.extend_from_slice(&palette.rgba(index));
        }
        out
    }
}

/// Every frame of one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDirection {
    pub index: usize,
    pub bbox: BoundingBox,
    pub frames: Vec<DecodedFrame>,
}

/// Palette-indexed surface the size of the direction box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedCanvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl IndexedCanvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![BACKGROUND_INDEX; width * height],
        }
    }

    #[inline]
    fn offset(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Rows of a rectangle clipped to the canvas, as (row start, length).
    fn rows(&self, x0: usize, y0: usize, width: usize, height: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let len = width.min(self.width.saturating_sub(x0));
        let bottom = (y0 + height).min(self.height);
        (y0..bottom).map(move |y| (self.offset(x0, y), len))
    }

    pub fn fill(&mut self, cell: &FrameCell, value: u8) {
        let rows: Vec<_> = self.rows(cell.x0, cell.y0, cell.width, cell.height).collect();
        for (start, len) in rows {
            self.pixels[start..start + len].fill(value);
        }
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            let offset = self.offset(x, y);
            self.pixels[offset] = value;
        }
    }

    /// Copy a `cell`-sized block from `(src_x, src_y)` onto the cell's origin.
    /// Source and destination may overlap.
    pub fn copy_within(&mut self, src_x: usize, src_y: usize, cell: &FrameCell) {
        let src_width = cell.width.min(self.width.saturating_sub(src_x));
        if src_width == 0 {
            return;
        }
        let block = self.crop(src_x, src_y, cell.width, cell.height);
        let width = src_width.min(self.width.saturating_sub(cell.x0));
        for (dy, row) in block.chunks_exact(src_width).enumerate() {
            let y = cell.y0 + dy;
            if y >= self.height {
                break;
            }
            let dst = self.offset(cell.x0, y);
            self.pixels[dst..dst + width].copy_from_slice(&row[..width]);
        }
    }

    /// Copy the cell's region of `source` into the same region of `self`.
    pub fn blit_cell(&mut self, source: &IndexedCanvas, cell: &FrameCell) {
        let rows: Vec<_> = self.rows(cell.x0, cell.y0, cell.width, cell.height).collect();
        for (start, len) in rows {
            self.pixels[start..start + len].copy_from_slice(&source.pixels[start..start + len]);
        }
    }

    /// Extract a sub-rectangle as a new row-major buffer.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(width * height);
        for (start, len) in self.rows(x0, y0, width, height) {
            out.extend_from_slice(&self.pixels[start..start + len]);
        }
        out
    }
}

/// Size and origin of the last frame cell painted into a buffer cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastWrite {
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
}

impl LastWrite {
    fn same_size(&self, cell: &FrameCell) -> bool {
        self.width == cell.width && self.height == cell.height
    }
}

/// Mutable state of one stage 2 pass.
struct AssemblyContext<'a> {
    canvas: IndexedCanvas,
    last_writes: Vec<Option<LastWrite>>,
    entries: std::slice::Iter<'a, PixelBufferEntry>,
    current: Option<&'a PixelBufferEntry>,
    consumed: usize,
    pixel_codes: BitReader<'a>,
}

impl<'a> AssemblyContext<'a> {
    fn visit(&mut self, visit: &CellVisit, frame_canvas: &mut IndexedCanvas) -> Result<(), DccError> {
        let cell = &visit.cell;
        match self.current {
            Some(entry) if entry.belongs_to(visit.frame, visit.cell_index) => {
                self.paint(entry, cell)?;
                frame_canvas.blit_cell(&self.canvas, cell);
                self.current = self.entries.next();
                self.consumed += 1;
            }
            _ => match self.last_writes[visit.buffer_cell] {
                None => {
                    return Err(DccError::EntryExhausted {
                        frame: visit.frame,
                        cell: visit.cell_index,
                    });
                }
                Some(last) if !last.same_size(cell) => {
                    self.canvas.fill(cell, BACKGROUND_INDEX);
                }
                Some(last) => {
                    self.canvas.copy_within(last.x0, last.y0, cell);
                    frame_canvas.blit_cell(&self.canvas, cell);
                }
            },
        }

        self.last_writes[visit.buffer_cell] = Some(LastWrite {
            x0: cell.x0,
            y0: cell.y0,
            width: cell.width,
            height: cell.height,
        });
        Ok(())
    }

    fn paint(&mut self, entry: &PixelBufferEntry, cell: &FrameCell) -> Result<(), DccError> {
        let values = entry.values;
        if values[0] == values[1] {
            self.canvas.fill(cell, values[0]);
            return Ok(());
        }

        let bits = if values[1] == values[2] { 1 } else { 2 };
        for y in 0..cell.height {
            for x in 0..cell.width {
                let code = self.pixel_codes.read_bits(bits)? as usize;
                self.canvas.set(cell.x0 + x, cell.y0 + y, values[code]);
            }
        }
        Ok(())
    }
}

/// Run stage 2 and return the direction's frames in order.
pub fn assemble_frames(
    direction: &Direction,
    layout: &CellLayout,
    buffer: &PixelBuffer,
) -> Result<Vec<DecodedFrame>, DccError> {
    let mut entries = buffer.entries.iter();
    let current = entries.next();
    let mut context = AssemblyContext {
        canvas: IndexedCanvas::new(layout.width, layout.height),
        last_writes: vec![None; layout.grid.len()],
        entries,
        current,
        consumed: 0,
        pixel_codes: direction
            .streams
            .pixel_codes_and_displacement
            .reader_at(buffer.displacement_position)?,
    };

    let mut frames = Vec::with_capacity(direction.frames.len());
    for (index, header) in direction.frames.iter().enumerate() {
        let mut frame_canvas = IndexedCanvas::new(layout.width, layout.height);
        for visit in layout.frame_visits(index) {
            context.visit(&visit, &mut frame_canvas)?;
        }

        let bbox = header.bbox;
        let x0 = (bbox.xmin - direction.bbox.xmin) as usize;
        let y0 = (bbox.ymin - direction.bbox.ymin) as usize;
        let width = bbox.width as usize;
        let height = bbox.height as usize;
        frames.push(DecodedFrame {
            index,
            width: width as u32,
            height: height as u32,
            bbox,
            pixels: frame_canvas.crop(x0, y0, width, height),
        });
    }

    let produced = buffer.entries.len();
    if context.consumed != produced {
        return Err(DccError::UnconsumedEntries {
            produced,
            consumed: context.consumed,
        });
    }
    trace!(
        "direction {}: stage 2 consumed {produced} entries, pixel codes stopped at bit {}",
        direction.index,
        context.pixel_codes.position()
    );

    Ok(frames)
}
