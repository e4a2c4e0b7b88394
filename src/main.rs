//! gc-media - converts GameCube-era audio, video frames and movies
//!
//! The conversion is picked from the input and output extensions.

use anyhow::{bail, Context, Result};
use clap::Parser;
use gc_media::{
    sound::AudioFormat,
    video::{
        images::{load_picture, save_picture, ImageSequenceReader, ImageSequenceWriter, JpegCodec},
        service::{decode_thp, encode_thp, frames_to_mth, mth_to_frames},
        FrameSink, MthReader, Thp, ThpMovie,
    },
    wav::Wave,
    Sound,
};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

const VIDEO_QUALITY: u8 = 25;
const IMAGE_QUALITY: u8 = 99;
const DEFAULT_FRAME_RATE: u32 = 30;
const THP_MOVIE_MAGIC: &[u8; 4] = b"THP\0";

#[derive(Parser)]
#[command(name = "gc-media")]
#[command(about = "Convert GameCube-era audio, video frames and movies")]
#[command(version)]
struct Cli {
    /// Input file: wav, dsp, hps, brstm, mth, thp, png, jpg or a directory of frames
    input: PathBuf,

    /// Output file, or a path prefix when extracting frames
    output: PathBuf,

    /// Loop start for audio output, as hh:mm:ss[.fff]
    #[arg(long = "loop", value_parser = parse_time)]
    loop_start: Option<Duration>,

    /// JPEG quality from 1 to 100, raised to at least 24 (25 for video frames, 99 for single images)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Resize video frames to this width and height
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    res: Option<Vec<u32>>,

    /// Frame rate for clips built from a directory of images
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE)]
    fps: u32,

    /// Image format for extracted frames
    #[arg(long, default_value = "png")]
    ext: String,
}

fn parse_time(value: &str) -> std::result::Result<Duration, String> {
    let parts: Vec<&str> = value.split(':').collect();
    let &[hours, minutes, seconds] = parts.as_slice() else {
        return Err(format!("expected hh:mm:ss, got {value:?}"));
    };

    let hours: u64 = hours.parse().map_err(|e| format!("hours: {e}"))?;
    let minutes: u64 = minutes.parse().map_err(|e| format!("minutes: {e}"))?;
    let seconds: f64 = seconds.parse().map_err(|e| format!("seconds: {e}"))?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(format!("{value:?} is not a valid time"));
    }

    Ok(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

fn extension(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    if !cli.input.exists() {
        bail!("{} not found", cli.input.display());
    }

    let resolution = match cli.res.as_deref() {
        Some(&[width, height]) => Some((width, height)),
        _ => None,
    };

    let input_ext = extension(&cli.input);
    let output_ext = extension(&cli.output);

    match (input_ext.as_str(), output_ext.as_str()) {
        _ if cli.input.is_dir() && output_ext == "mth" => {
            let mut source = ImageSequenceReader::open(&cli.input, cli.fps, resolution)?;
            let count = source.len();
            let output = BufWriter::new(File::create(&cli.output)?);
            let quality = cli.quality.unwrap_or(VIDEO_QUALITY);
            frames_to_mth(&mut source, &JpegCodec, quality, output)?;
            info!("encoded {count} frames into {}", cli.output.display());
        },
        (input, output) if AudioFormat::from_path(&cli.input).is_some() => {
            if !matches!(output, "wav" | "dsp" | "hps") {
                bail!("unsupported audio export format {output:?}");
            }

            let mut sound = Sound::open(&cli.input).with_context(|| format!("reading {input} audio"))?;
            if let Some(time) = cli.loop_start.filter(|t| !t.is_zero()) {
                sound.set_loop_time(time)?;
            }

            sound.save(&cli.output)?;
            info!(
                "wrote {} ({} channels, {:?}, loop {:?})",
                cli.output.display(),
                sound.channels.len(),
                sound.duration(),
                sound.loop_time()
            );
        },
        ("mth", "") => {
            let mut reader = MthReader::new(BufReader::new(File::open(&cli.input)?))?;
            let count = reader.frame_count() as usize;

            if matches!(cli.ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg") {
                // JPEG frames are written as-is rather than decoded and re-encoded.
                let sink = ImageSequenceWriter::new(&cli.output, &cli.ext, count)?;
                for index in 0..count {
                    std::fs::write(sink.path(index), reader.read_frame()?.to_jpeg()?)?;
                }
            } else {
                let mut sink = ImageSequenceWriter::new(&cli.output, &cli.ext, count)?;
                mth_to_frames(&mut reader, &JpegCodec, &mut sink)?;
            }
            info!("extracted {count} frames");
        },
        ("thp", output) => {
            let data = std::fs::read(&cli.input)?;
            if data.starts_with(THP_MOVIE_MAGIC) {
                extract_movie(&cli.input, &cli.output, &cli.ext)?;
            } else if matches!(output, "jpg" | "jpeg") {
                std::fs::write(&cli.output, Thp::new(data).to_jpeg()?)?;
            } else if output == "png" || output == "bmp" {
                save_picture(&decode_thp(&JpegCodec, &Thp::new(data))?, &cli.output)?;
            } else {
                bail!("unsupported export format {output:?}");
            }
        },
        ("png" | "jpg" | "jpeg" | "bmp", "thp") => {
            let picture = load_picture(&cli.input)?;
            encode_thp(&JpegCodec, &picture, cli.quality.unwrap_or(IMAGE_QUALITY))?.save(&cli.output)?;
        },
        (input, output) => bail!("unsupported conversion from {input:?} to {output:?}"),
    }

    Ok(())
}

/// Writes every movie frame as an image and the audio track as one wave file.
fn extract_movie(input: &Path, prefix: &Path, ext: &str) -> Result<()> {
    let mut movie = ThpMovie::open(input)?;
    let mut sink = ImageSequenceWriter::new(prefix, ext, movie.frame_count() as usize)?;

    let channel_count = movie.audio_channel_count() as usize;
    let mut audio = movie.audio_frequency().map(|sample_rate| Wave {
        sample_rate,
        channels: vec![Vec::new(); channel_count],
        loop_point: None,
    });

    while let Some(frame) = movie.read_frame()? {
        sink.write_frame(&decode_thp(&JpegCodec, &frame.image)?)?;

        if let (Some(track), Some(wave)) = (audio.as_mut(), frame.audio) {
            for (all, part) in track.channels.iter_mut().zip(wave.channels) {
                all.extend(part);
            }
        }
    }
    sink.close()?;

    if let Some(track) = audio {
        let mut path = prefix.as_os_str().to_owned();
        path.push("audio.wav");
        std::fs::write(&path, track.to_bytes()?)?;
    }

    info!("extracted {} frames at {} fps", movie.frame_count(), movie.frame_rate());
    Ok(())
}
