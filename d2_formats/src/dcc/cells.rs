// SPDX-License-Identifier: GPL-2.0-or-later
//
// Buffer-cell grid and per-frame cell layout.
//
// A direction's bounding box is tiled into 4x4 buffer cells. Each frame is cut
// into frame cells whose inner edges line up with that grid, so the first
// and last column/row of a frame can be narrower or wider than 4 pixels.

use crate::dcc::DccError;
use crate::dcc::header::Direction;

pub const CELL_SIZE: usize = 4;

/// One cell of the direction-wide grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCell {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGrid {
    pub columns: usize,
    pub rows: usize,
    pub cells: Vec<BufferCell>,
}

impl CellGrid {
    pub fn new(width: usize, height: usize) -> Self {
        let column_spans = grid_spans(width);
        let row_spans = grid_spans(height);

        let mut cells = Vec::with_capacity(column_spans.len() * row_spans.len());
        let mut y0 = 0;
        for &cell_height in &row_spans {
            let mut x0 = 0;
            for &cell_width in &column_spans {
                cells.push(BufferCell {
                    x0,
                    y0,
                    width: cell_width,
                    height: cell_height,
                });
                x0 += CELL_SIZE;
            }
            y0 += CELL_SIZE;
        }

        CellGrid {
            columns: column_spans.len(),
            rows: row_spans.len(),
            cells,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Index of the buffer cell covering a direction-relative pixel.
    pub fn cell_at(&self, x: usize, y: usize) -> Option<usize> {
        let column = x / CELL_SIZE;
        let row = y / CELL_SIZE;
        (column < self.columns && row < self.rows).then(|| column + row * self.columns)
    }
}

/// A cell of a single frame, positioned relative to the direction box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCell {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCells {
    pub columns: usize,
    pub rows: usize,
    pub cells: Vec<FrameCell>,
    /// Covering buffer cell for each entry of `cells`.
    pub buffer_cells: Vec<usize>,
}

/// Spans of the direction grid along one axis: 4-wide, last one takes the rest.
pub fn grid_spans(extent: usize) -> Vec<usize> {
    if extent == 0 {
        return vec![0];
    }
    let count = 1 + (extent - 1) / CELL_SIZE;
    let mut spans = vec![CELL_SIZE; count];
    spans[count - 1] = extent - CELL_SIZE * (count - 1);
    spans
}

/// Spans of a frame along one axis, aligned to the direction grid.
///
/// `offset` is the frame's start relative to the direction box.
pub fn frame_spans(offset: usize, extent: usize) -> Vec<usize> {
    let first = CELL_SIZE - offset % CELL_SIZE;
    if extent <= first + 1 {
        return vec![extent];
    }

    let tail = extent - first - 1;
    let mut count = 2 + tail / CELL_SIZE;
    if tail % CELL_SIZE == 0 {
        count -= 1;
    }

    let mut spans = Vec::with_capacity(count);
    spans.push(first);
    spans.extend(std::iter::repeat_n(CELL_SIZE, count - 2));
    spans.push(extent - first - CELL_SIZE * (count - 2));
    spans
}

/// Position of one frame cell in the shared traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellVisit {
    pub frame: usize,
    pub cell_index: usize,
    pub cell: FrameCell,
    pub buffer_cell: usize,
}

/// Grid plus every frame's cells for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellLayout {
    pub width: usize,
    pub height: usize,
    pub grid: CellGrid,
    pub frames: Vec<FrameCells>,
}

impl CellLayout {
    pub fn build(direction: &Direction) -> Result<Self, DccError> {
        let dir_box = &direction.bbox;
        let width = dir_box.width as usize;
        let height = dir_box.height as usize;
        let grid = CellGrid::new(width, height);

        let mut frames = Vec::with_capacity(direction.frames.len());
        for (frame_index, frame) in direction.frames.iter().enumerate() {
            let origin_x = (frame.bbox.xmin - dir_box.xmin) as usize;
            let origin_y = (frame.bbox.ymin - dir_box.ymin) as usize;
            let column_spans = frame_spans(origin_x, frame.bbox.width as usize);
            let row_spans = frame_spans(origin_y, frame.bbox.height as usize);

            let mut cells = Vec::with_capacity(column_spans.len() * row_spans.len());
            let mut buffer_cells = Vec::with_capacity(cells.capacity());
            let mut y0 = origin_y;
            for &cell_height in &row_spans {
                let mut x0 = origin_x;
                for &cell_width in &column_spans {
                    let buffer_cell = grid.cell_at(x0, y0).ok_or_else(|| {
                        DccError::InconsistentHeader(format!(
                            "frame {frame_index} cell at ({x0}, {y0}) lies outside the {width}x{height} direction box"
                        ))
                    })?;
                    cells.push(FrameCell {
                        x0,
                        y0,
                        width: cell_width,
                        height: cell_height,
                    });
                    buffer_cells.push(buffer_cell);
                    x0 += cell_width;
                }
                y0 += cell_height;
            }

            frames.push(FrameCells {
                columns: column_spans.len(),
                rows: row_spans.len(),
                cells,
                buffer_cells,
            });
        }

        Ok(CellLayout {
            width,
            height,
            grid,
            frames,
        })
    }

    /// Every frame cell of one frame, row-major.
    pub fn frame_visits(&self, frame: usize) -> impl Iterator<Item = CellVisit> + '_ {
        let cells = &self.frames[frame];
        cells
            .cells
            .iter()
            .zip(&cells.buffer_cells)
            .enumerate()
            .map(move |(cell_index, (cell, &buffer_cell))| CellVisit {
                frame,
                cell_index,
                cell: *cell,
                buffer_cell,
            })
    }

    /// Every frame cell of the direction in decoding order.
    pub fn visits(&self) -> impl Iterator<Item = CellVisit> + '_ {
        (0..self.frames.len()).flat_map(move |frame| self.frame_visits(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_spans_absorb_the_remainder() {
        assert_eq!(grid_spans(4), vec![4]);
        assert_eq!(grid_spans(3), vec![3]);
        assert_eq!(grid_spans(10), vec![4, 4, 2]);
        assert_eq!(grid_spans(12), vec![4, 4, 4]);
    }

    #[test]
    fn unaligned_frame_spans_sum_to_the_extent() {
        for offset in [1usize, 2, 3, 5, 6, 7] {
            let spans = frame_spans(offset, 10);
            assert_eq!(spans[0], 4 - offset % 4, "offset {offset}");
            assert!(spans[1..spans.len() - 1].iter().all(|&span| span == 4));
            assert_eq!(spans.iter().sum::<usize>(), 10, "offset {offset}");
        }
        assert_eq!(frame_spans(1, 10), vec![3, 4, 3]);
        assert_eq!(frame_spans(2, 10), vec![2, 4, 4]);
    }

    #[test]
    fn single_leftover_pixel_merges_into_the_last_span() {
        assert_eq!(frame_spans(3, 10), vec![1, 4, 5]);
        assert_eq!(frame_spans(0, 5), vec![5]);
        assert_eq!(frame_spans(2, 3), vec![3]);
    }

    #[test]
    fn aligned_frame_spans_match_the_grid() {
        assert_eq!(frame_spans(0, 8), vec![4, 4]);
        assert_eq!(frame_spans(4, 12), vec![4, 4, 4]);
        assert_eq!(frame_spans(0, 2), vec![2]);
    }

    #[test]
    fn grid_lookup_maps_pixels_to_cells() {
        let grid = CellGrid::new(10, 6);
        assert_eq!((grid.columns, grid.rows), (3, 2));
        assert_eq!(grid.cells[2].width, 2);
        assert_eq!(grid.cells[5].height, 2);
        assert_eq!(grid.cell_at(9, 5), Some(5));
        assert_eq!(grid.cell_at(12, 0), None);
    }
}
