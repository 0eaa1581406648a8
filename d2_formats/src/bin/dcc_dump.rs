use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use d2_formats::{DccFile, DccSummary};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print the header layout of a DCC sprite.")]
struct Args {
    /// Path to the input .dcc file.
    input: PathBuf,
    /// Emit the summary as JSON instead of a text table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let dcc = DccFile::open(&args.input)
        .with_context(|| format!("parsing {}", args.input.display()))?;
    let summary = dcc.summary();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &DccSummary) {
    let header = &summary.header;
    if let Some(source) = &summary.source {
        println!("{}", source.display());
    }
    println!(
        "version {} | {} directions x {} frames | coded size {}",
        header.version, header.direction_count, header.frames_per_direction, header.total_size_coded
    );

    for direction in &summary.directions {
        println!(
            "direction {:>2} @ {:>8} ({} bytes)",
            direction.index, direction.offset, direction.size
        );
        if let Some(error) = &direction.error {
            println!("  error: {error}");
            continue;
        }
        if let Some(bbox) = direction.bbox {
            println!(
                "  box ({}, {})..({}, {}) {}x{}",
                bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax, bbox.width, bbox.height
            );
        }
        let sizes = &direction.stream_sizes;
        println!(
            "  flags {:#04x} | streams equal={} mask={} encoding={} raw={} displacement={} | {} palette entries",
            direction.compression_flags,
            sizes.equal_cells,
            sizes.pixel_mask,
            sizes.encoding_type,
            sizes.raw_pixel_codes,
            direction.displacement_bits,
            direction.palette_entries
        );
        for (index, frame) in direction.frames.iter().enumerate() {
            println!(
                "  frame {index:>3} {width:>4}x{height:<4} offset ({x:>5}, {y:>5}) {order}",
                width = frame.width,
                height = frame.height,
                x = frame.offset_x,
                y = frame.offset_y,
                order = if frame.bottom_up { "bottom-up" } else { "top-down" }
            );
        }
    }
}
