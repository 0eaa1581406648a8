use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use d2_formats::{DccFile, DecodedDirection, DecodedFrame, Palette};
use image::{ColorType, ImageEncoder, codecs::png::PngEncoder};
use log::{info, warn};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Decode DCC sprites into per-frame images."
)]
struct Args {
    /// A .dcc file, or a directory searched recursively for them.
    input: PathBuf,
    /// Output directory where decoded frames will be written.
    #[arg(long)]
    output: PathBuf,
    /// Palette of 256 BGR triples (defaults to $D2_PALETTE_PATH, then greyscale).
    #[arg(long)]
    palette: Option<PathBuf>,
    /// Only decode this direction.
    #[arg(long)]
    direction: Option<usize>,
    /// Output format for decoded frames (default: png).
    #[arg(long, value_enum, default_value_t = OutputFormat::Png)]
    format: OutputFormat,
    /// Skip overwriting frames that already exist on disk.
    #[arg(long)]
    skip_existing: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Png,
    /// Raw palette indices, width * height bytes per frame.
    Indexed,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Indexed => "idx",
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let palette = load_palette(args.palette.as_deref())?;
    let sprites = collect_sprites(&args.input)?;
    if sprites.is_empty() {
        bail!("no .dcc files found under {}", args.input.display());
    }

    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let mut written = 0usize;
    let mut failed = 0usize;
    for path in &sprites {
        match extract_sprite(&args, &palette, path) {
            Ok(count) => written += count,
            Err(err) => {
                failed += 1;
                warn!("{}: {err:#}", path.display());
            }
        }
    }

    println!(
        "wrote {written} frame(s) from {} sprite(s) into {}",
        sprites.len() - failed,
        args.output.display()
    );
    if failed > 0 {
        println!("{failed} sprite(s) could not be read");
    }
    Ok(())
}

fn load_palette(path: Option<&Path>) -> Result<Palette> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::var_os("D2_PALETTE_PATH").map(PathBuf::from),
    };
    match path {
        Some(path) => Palette::open(&path),
        None => {
            info!("no palette given; writing greyscale frames");
            Ok(Palette::greyscale())
        }
    }
}

fn collect_sprites(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut sprites = Vec::new();
    for entry in WalkDir::new(input) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_dcc = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("dcc"))
            .unwrap_or(false);
        if is_dcc {
            sprites.push(path.to_path_buf());
        }
    }
    sprites.sort();
    Ok(sprites)
}

/// Decode one sprite and write its frames; returns the number written.
fn extract_sprite(args: &Args, palette: &Palette, path: &Path) -> Result<usize> {
    let dcc = DccFile::open(path).with_context(|| format!("parsing {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("sprite")
        .to_ascii_lowercase();

    let results = match args.direction {
        Some(index) => vec![dcc.decode_direction(index)],
        None => dcc.decode_all(),
    };

    let mut written = 0usize;
    for (position, result) in results.into_iter().enumerate() {
        let direction = match result {
            Ok(direction) => direction,
            Err(err) => {
                let index = args.direction.unwrap_or(position);
                warn!("{} direction {index}: {err}", path.display());
                continue;
            }
        };
        written += write_direction(args, palette, &stem, &direction)?;
    }
    Ok(written)
}

fn write_direction(
    args: &Args,
    palette: &Palette,
    stem: &str,
    direction: &DecodedDirection,
) -> Result<usize> {
    let mut written = 0usize;
    for frame in &direction.frames {
        let file_name = format!(
            "{stem}_d{:02}_f{:03}.{}",
            direction.index,
            frame.index,
            args.format.extension()
        );
        let dest = args.output.join(file_name);
        if args.skip_existing && dest.exists() {
            continue;
        }

        match args.format {
            OutputFormat::Png => write_png(&dest, frame, palette)?,
            OutputFormat::Indexed => fs::write(&dest, &frame.pixels)
                .with_context(|| format!("failed to write {}", dest.display()))?,
        }
        written += 1;
    }
    info!(
        "{stem}: direction {} -> {written} frame(s)",
        direction.index
    );
    Ok(written)
}

fn write_png(path: &Path, frame: &DecodedFrame, palette: &Palette) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let rgba = frame.to_rgba8888(palette);
    PngEncoder::new(BufWriter::new(file))
        .write_image(&rgba, frame.width, frame.height, ColorType::Rgba8.into())
        .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(())
}
