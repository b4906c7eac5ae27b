//! heifkit CLI - HEIF container toolkit.
//!
//! Inspects, decodes and builds HEIF containers, including the nested
//! wallpaper metadata some files carry.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;

use heifkit::image::{Channel, Chroma, Colorspace, CompressionFormat, Image};
use heifkit::{FiletypeResult, Session};

/// HEIF container toolkit for decoding, encoding and metadata extraction
#[derive(Parser)]
#[command(name = "heifkit")]
#[command(author = "heifkit-rs contributors")]
#[command(version)]
#[command(about = "HEIF container toolkit for decoding, encoding and metadata", long_about = None)]
#[command(after_help = "EXAMPLES:
    heifkit info -i wallpaper.heic
    heifkit decode -i image.heic -o image.ppm
    heifkit decode -i image.heic -o image.pgm -f pgm
    heifkit encode -i image.ppm -o image.heic -q 90 --thumbnail 256
    heifkit times -i wallpaper.heic

Set RUST_LOG=debug for engine-level tracing.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display container structure and item information
    #[command(visible_alias = "i")]
    Info {
        /// Input container file
        #[arg(short, long, help = "Path to the container file to inspect")]
        input: PathBuf,
    },

    /// Decode the primary image to a portable pixmap or raw planes
    #[command(visible_alias = "d")]
    Decode {
        /// Input container file
        #[arg(short, long, help = "Path to the input container")]
        input: PathBuf,

        /// Output file path
        #[arg(short, long, help = "Path for the decoded output")]
        output: PathBuf,

        /// Output format: ppm (color), pgm (grayscale) or raw plane dump
        #[arg(short, long, default_value = "ppm", value_enum)]
        format: OutputFormat,
    },

    /// Encode a portable pixmap into a new container
    #[command(visible_alias = "e")]
    Encode {
        /// Input image (PPM P6 or PGM P5)
        #[arg(short, long, help = "Path to the input pixmap")]
        input: PathBuf,

        /// Output container file
        #[arg(short, long, help = "Path for the encoded container")]
        output: PathBuf,

        /// Target codec
        #[arg(short, long, default_value = "hevc", value_enum)]
        codec: Codec,

        /// Quality level (0-100)
        #[arg(short, long, default_value = "75")]
        quality: u8,

        /// Also store a thumbnail bounded by this many pixels
        #[arg(short, long)]
        thumbnail: Option<u32>,
    },

    /// Print the frame schedule of a dynamic wallpaper container
    #[command(visible_alias = "t")]
    Times {
        /// Input container file
        #[arg(short, long, help = "Path to the wallpaper container")]
        input: PathBuf,
    },

    /// List the available encoders
    #[command(visible_alias = "l")]
    List,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Portable PixMap, alpha dropped
    Ppm,
    /// Portable GrayMap
    Pgm,
    /// Raw plane dump in the stored representation
    Raw,
}

#[derive(Clone, Debug, ValueEnum)]
enum Codec {
    /// HEVC plane store
    Hevc,
    /// Uncompressed plane store
    Uncompressed,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { input } => show_info(&input),
        Commands::Decode {
            input,
            output,
            format,
        } => decode_image(&input, &output, &format),
        Commands::Encode {
            input,
            output,
            codec,
            quality,
            thumbnail,
        } => encode_image(&input, &output, &codec, quality, thumbnail),
        Commands::Times { input } => show_times(&input),
        Commands::List => list_encoders(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn show_info(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!(
        "Signature: {}",
        match heifkit::check_filetype(&data) {
            FiletypeResult::Supported => "supported container",
            FiletypeResult::Unsupported => "container with unsupported brand",
            FiletypeResult::Maybe => "too short to classify",
            FiletypeResult::No => "not a container",
        }
    );

    let mut session = Session::new()?;
    session.open_from_bytes(&data)?;
    let primary = session.primary_image_id().ok();

    println!("Items: {}", session.top_level_image_count());
    for id in session.top_level_image_ids() {
        let handle = session.image_handle(id)?;
        let mut notes = Vec::new();
        if Some(id) == primary {
            notes.push("primary".to_string());
        }
        if handle.has_alpha_channel() {
            notes.push("alpha".to_string());
        }
        if handle.has_depth_image() {
            notes.push(format!("{} depth", handle.depth_image_count()));
        }
        let thumbs = handle.thumbnail_count();
        if thumbs > 0 {
            notes.push(format!("{} thumbnail", thumbs));
        }
        let blocks = handle.metadata_count(None);
        if blocks > 0 {
            notes.push(format!("{} metadata", blocks));
        }
        let suffix = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join(", "))
        };
        println!("  #{}: {}x{}{}", id, handle.width(), handle.height(), suffix);
    }
    Ok(())
}

fn decode_image(
    input: &PathBuf,
    output: &PathBuf,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;

    match format {
        OutputFormat::Ppm => {
            let mut session = Session::new()?;
            session.open_from_bytes(&data)?;
            let handle = session.primary_image_handle()?;
            let image = handle.decode(Colorspace::Rgb, Chroma::InterleavedRgba, None)?;
            let plane = image.plane(Channel::Interleaved)?;
            let mut pixels = Vec::with_capacity((plane.width * plane.height * 3) as usize);
            for y in 0..plane.height {
                for chunk in plane.row(y).chunks_exact(4) {
                    pixels.extend_from_slice(&chunk[..3]);
                }
            }
            write_pnm(output, &pixels, plane.width, plane.height, 3)?;
            println!("✓ Decoded {}x{} image to {:?}", plane.width, plane.height, output);
        }
        OutputFormat::Pgm => {
            let mut session = Session::new()?;
            session.open_from_bytes(&data)?;
            let handle = session.primary_image_handle()?;
            let image = handle.decode(Colorspace::Monochrome, Chroma::Monochrome, None)?;
            let plane = image.plane(Channel::Y)?;
            let mut pixels = Vec::with_capacity((plane.width * plane.height) as usize);
            for y in 0..plane.height {
                pixels.extend_from_slice(plane.row(y));
            }
            write_pnm(output, &pixels, plane.width, plane.height, 1)?;
            println!("✓ Decoded {}x{} image to {:?}", plane.width, plane.height, output);
        }
        OutputFormat::Raw => {
            let pixels = heifkit::decode_primary(&data)?;
            let (width, height) = (pixels.width(), pixels.height());
            let dump = match pixels {
                heifkit::Pixels::Rgba(p) => p.data,
                heifkit::Pixels::Gray(p) => p.data,
                heifkit::Pixels::YCbCr(p) => {
                    let mut dump = p.y;
                    dump.extend_from_slice(&p.cb);
                    dump.extend_from_slice(&p.cr);
                    dump
                }
            };
            fs::write(output, &dump)?;
            println!("✓ Dumped {}x{} image planes to {:?}", width, height, output);
        }
    }
    Ok(())
}

fn encode_image(
    input: &PathBuf,
    output: &PathBuf,
    codec: &Codec,
    quality: u8,
    thumbnail: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = fs::read(input)?;
    let (pixels, width, height, components) = read_pnm(&raw)?;

    let image = match components {
        1 => {
            let mut image = Image::new(width, height, Colorspace::Monochrome, Chroma::Monochrome)?;
            let mut plane = image.add_plane(Channel::Y, width, height, 8)?;
            plane.set_data(&pixels, width as usize)?;
            image
        }
        _ => {
            let mut image = Image::new(width, height, Colorspace::Rgb, Chroma::InterleavedRgb)?;
            let mut plane = image.add_plane(Channel::Interleaved, width, height, 24)?;
            plane.set_data(&pixels, width as usize * 3)?;
            image
        }
    };

    let format = match codec {
        Codec::Hevc => CompressionFormat::Hevc,
        Codec::Uncompressed => CompressionFormat::Uncompressed,
    };

    let mut session = Session::new()?;
    let mut encoder = session.new_encoder(format)?;
    encoder.set_quality(quality)?;
    let handle = session.encode_image(&image, &encoder, None)?;
    session.set_primary_image(&handle)?;
    if let Some(bbox) = thumbnail {
        session.encode_thumbnail(&image, &handle, &encoder, None, bbox)?;
    }
    session.write_to_path(output)?;

    println!(
        "✓ Encoded {}x{} image to {:?} using {:?} codec",
        width, height, output, codec
    );
    Ok(())
}

fn show_times(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let mut session = Session::new()?;
    session.open_from_bytes(&data)?;

    for id in session.top_level_image_ids() {
        let handle = session.image_handle(id)?;
        for block in handle.metadata_block_ids(None) {
            if let Ok(table) = handle.image_time_table(block) {
                println!("Frame schedule ({} frames):", table.len());
                for (index, time) in table.iter().enumerate() {
                    println!("  image {}: {:02}:{:02}", index, time.hour, time.minute);
                }
                return Ok(());
            }
            if let Ok(map) = handle.apple_solar_map(block) {
                println!("Solar wallpaper descriptor ({} keys)", map.len());
                return Ok(());
            }
        }
    }

    println!("No wallpaper schedule metadata found");
    Ok(())
}

fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::new()?;
    println!("Available encoders:");
    for format in [
        CompressionFormat::Hevc,
        CompressionFormat::Avc,
        CompressionFormat::Jpeg,
        CompressionFormat::Av1,
        CompressionFormat::Uncompressed,
    ] {
        if let Ok(encoder) = session.new_encoder(format) {
            println!("  {:<22} {}", encoder.id(), encoder.name());
        }
    }
    Ok(())
}

// Internal helpers

fn read_pnm(data: &[u8]) -> Result<(Vec<u8>, u32, u32, u32), Box<dyn std::error::Error>> {
    let components = match data.get(..2) {
        Some(b"P6") => 3,
        Some(b"P5") => 1,
        _ => return Err("input is not a binary PPM or PGM file".into()),
    };

    let mut pos = 2;
    let mut fields = [0u32; 3];
    for field in &mut fields {
        // Skip whitespace and comment lines between header fields.
        loop {
            match data.get(pos) {
                Some(b) if b.is_ascii_whitespace() => pos += 1,
                Some(b'#') => {
                    while data.get(pos).is_some_and(|&b| b != b'\n') {
                        pos += 1;
                    }
                }
                Some(_) => break,
                None => return Err("truncated pixmap header".into()),
            }
        }
        let mut value: u32 = 0;
        let mut any = false;
        while let Some(&b) = data.get(pos) {
            if !b.is_ascii_digit() {
                break;
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as u32))
                .ok_or("oversized value in pixmap header")?;
            any = true;
            pos += 1;
        }
        if !any {
            return Err("malformed pixmap header".into());
        }
        *field = value;
    }
    let [width, height, maxval] = fields;
    if maxval != 255 {
        return Err("only 8-bit pixmaps are supported".into());
    }
    // Single whitespace byte separates the header from the raster.
    pos += 1;

    let expected = (width as u64)
        .checked_mul(height as u64)
        .and_then(|v| v.checked_mul(components as u64))
        .ok_or("oversized pixmap dimensions")? as usize;
    let pixels = data
        .get(pos..)
        .filter(|rest| rest.len() >= expected)
        .map(|rest| rest[..expected].to_vec())
        .ok_or("pixmap raster shorter than its header promises")?;
    Ok((pixels, width, height, components))
}

fn write_pnm(
    path: &PathBuf,
    pixels: &[u8],
    width: u32,
    height: u32,
    components: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;
    let mut file = fs::File::create(path)?;

    if components == 1 {
        writeln!(file, "P5")?;
    } else {
        writeln!(file, "P6")?;
    }
    writeln!(file, "{} {}", width, height)?;
    writeln!(file, "255")?;
    file.write_all(pixels)?;

    Ok(())
}
