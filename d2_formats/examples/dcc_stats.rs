use anyhow::{Result, anyhow};
use d2_formats::DccFile;
use d2_formats::dcc::{CellLayout, fill_pixel_buffer};
use std::{collections::BTreeMap, env};

fn main() -> Result<()> {
    env_logger::init();
    let path = env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: cargo run -p d2_formats --example dcc_stats -- <dcc>"))?;
    let dcc = DccFile::open(&path)?;

    for index in 0..dcc.direction_count() {
        let direction = dcc.direction(index)?;
        let layout = CellLayout::build(&direction)?;
        let buffer = fill_pixel_buffer(&direction, &layout)?;

        let visits = layout.visits().count();
        let uniform = buffer
            .entries
            .iter()
            .filter(|entry| entry.values[0] == entry.values[1])
            .count();
        println!(
            "direction {index}: {}x{} grid, {visits} cell visits, {} entries ({uniform} uniform), {} reused",
            layout.grid.columns,
            layout.grid.rows,
            buffer.entries.len(),
            visits - buffer.entries.len()
        );

        let mut histogram: BTreeMap<u8, usize> = BTreeMap::new();
        for frame in direction.decode()? {
            for &pixel in &frame.pixels {
                *histogram.entry(pixel).or_default() += 1;
            }
        }
        let mut top: Vec<_> = histogram.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1));
        top.truncate(8);
        println!("  most used palette indices: {top:?}");
    }
    Ok(())
}
