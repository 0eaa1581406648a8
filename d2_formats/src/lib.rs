pub mod bitstream;
pub mod dcc;
pub mod palette;

pub use bitstream::{BitReader, BitStream, BitWriter};
pub use dcc::{
    DccError, DccFile, DccSummary, DecodedDirection, DecodedFrame, Direction, DirectionSummary,
};
pub use palette::Palette;
