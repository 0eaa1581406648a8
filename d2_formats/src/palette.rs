use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};

pub const PALETTE_COLORS: usize = 256;
/// Size of a game palette file: 256 BGR triples.
pub const PALETTE_FILE_SIZE: usize = PALETTE_COLORS * 3;

/// 256-entry RGBA palette. Index 0 is always fully transparent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: [[u8; 4]; PALETTE_COLORS],
}

impl Palette {
    /// Parse a `pal.dat`-style palette of BGR triples.
    pub fn from_bgr_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= PALETTE_FILE_SIZE,
            "palette holds {} bytes, expected at least {PALETTE_FILE_SIZE}",
            bytes.len()
        );
        let mut colors = [[0u8; 4]; PALETTE_COLORS];
        for (color, bgr) in colors.iter_mut().zip(bytes.chunks_exact(3)) {
            *color = [bgr[2], bgr[1], bgr[0], 255];
        }
        colors[0][3] = 0;
        Ok(Palette { colors })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("reading palette {}", path.display()))?;
        Self::from_bgr_bytes(&bytes).with_context(|| format!("parsing palette {}", path.display()))
    }

    /// Ramp where index `i` maps to grey level `i`; handy without game data.
    pub fn greyscale() -> Self {
        let mut colors = [[0u8; 4]; PALETTE_COLORS];
        for (index, color) in colors.iter_mut().enumerate() {
            let level = index as u8;
            *color = [level, level, level, 255];
        }
        colors[0][3] = 0;
        Palette { colors }
    }

    #[inline]
    pub fn rgba(&self, index: u8) -> [u8; 4] {
        self.colors[index as usize]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::greyscale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_triples_become_rgba() {
        let mut bytes = vec![0u8; PALETTE_FILE_SIZE];
        bytes[3..6].copy_from_slice(&[10, 20, 30]);
        bytes[0..3].copy_from_slice(&[1, 2, 3]);
        let palette = Palette::from_bgr_bytes(&bytes).unwrap();
        assert_eq!(palette.rgba(1), [30, 20, 10, 255]);
        assert_eq!(palette.rgba(0), [3, 2, 1, 0]);
    }

    #[test]
    fn short_palettes_are_rejected() {
        assert!(Palette::from_bgr_bytes(&[0u8; 100]).is_err());
    }
}
