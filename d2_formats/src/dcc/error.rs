// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

/// Failures raised while parsing or decoding a DCC container.
///
/// Every variant is fatal for the direction being decoded; other directions
/// of the same container are unaffected.
#[derive(Debug, Error)]
pub enum DccError {
    #[error("bitstream underrun: requested {requested} bits but only {available} remain")]
    BufferUnderrun { requested: usize, available: usize },
    #[error("unsupported DCC feature: {0}")]
    UnsupportedFeature(String),
    #[error("inconsistent DCC header: {0}")]
    InconsistentHeader(String),
    #[error("pixel buffer exhausted at frame {frame} cell {cell}")]
    EntryExhausted { frame: usize, cell: usize },
    #[error("frame assembly consumed {consumed} of {produced} pixel buffer entries")]
    UnconsumedEntries { produced: usize, consumed: usize },
    #[error("direction {index} out of range (container has {count})")]
    DirectionOutOfRange { index: usize, count: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
