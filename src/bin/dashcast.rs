//! dashcast command line: maps flags onto `DashcastConfig` and runs the
//! pipeline until the inputs end, `q` is typed or Ctrl-C is pressed.

use clap::{Parser, ValueEnum};
use dashcast::core::media_io::MediaBackend;
use dashcast::core::scheduler::quit_task::StdinQuitSource;
use dashcast::{
    AudioRepresentation, BufferMode, DashScheduler, DashcastConfig, InputSource, VideoRepresentation,
};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Capture device, frames are dropped rather than stalling capture
    LiveCamera,
    /// File played out at its native rate
    LiveMedia,
    /// Encode as fast as possible without losing frames
    OnDemand,
}

impl From<Mode> for BufferMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::LiveCamera => BufferMode::LiveCamera,
            Mode::LiveMedia => BufferMode::LiveMedia,
            Mode::OnDemand => BufferMode::OnDemand,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "dashcast")]
#[command(version)]
#[command(about = "Live and on-demand MPEG-DASH encoder")]
#[command(long_about = "Decodes audio and video inputs, encodes them into several \
    representations and packs them into DASH segments described by an MPD.\n\n\
    EXAMPLES:\n    \
    dashcast -v input.yuv --video-size 1280x720 --framerate 25 --rep hd:1280x720@25:2000000 --rep sd:640x360@25:800000\n    \
    dashcast -v input.yuv --video-size 640x480 -a input.pcm --sample-rate 48000 --channels 2 --mode live-media")]
struct Args {
    /// Video input
    #[arg(short = 'v', long = "video")]
    video: Option<String>,

    /// Demuxer or device format of the video input
    #[arg(long)]
    video_format: Option<String>,

    /// Picture size of the video input, WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    video_size: Option<(u32, u32)>,

    /// Frame rate of the video input
    #[arg(long)]
    framerate: Option<u32>,

    /// Audio input
    #[arg(short = 'a', long = "audio")]
    audio: Option<String>,

    /// Demuxer or device format of the audio input
    #[arg(long)]
    audio_format: Option<String>,

    /// Sample rate of the audio input
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Channel count of the audio input
    #[arg(long)]
    channels: Option<u16>,

    /// Alternative video input active during a window,
    /// "URL|YYYY-MM-DD HH:MM:SS|YYYY-MM-DD HH:MM:SS"
    #[arg(long = "switch", value_parser = parse_switch)]
    switch: Vec<(String, String, String)>,

    /// Video representation, ID:WIDTHxHEIGHT[@FPS][:BITRATE]
    #[arg(long = "rep", value_parser = parse_video_representation)]
    video_representations: Vec<VideoRepresentation>,

    /// Audio representation, ID[:SAMPLERATE[:CHANNELS[:BITRATE]]]
    #[arg(long = "audio-rep", value_parser = parse_audio_representation)]
    audio_representations: Vec<AudioRepresentation>,

    #[arg(long, value_enum, default_value_t = Mode::OnDemand)]
    mode: Mode,

    /// Segment duration in milliseconds
    #[arg(long = "seg-dur", default_value_t = 1000)]
    segment_duration_ms: u32,

    /// Fragment duration in milliseconds, defaults to the segment duration
    #[arg(long = "frag-dur")]
    fragment_duration_ms: Option<u32>,

    /// Output directory
    #[arg(short = 'o', long = "out", default_value = "output")]
    out_dir: PathBuf,

    /// Manifest file name inside the output directory
    #[arg(long, default_value = "dashcast.mpd")]
    mpd: String,

    /// Availability start time offset in milliseconds
    #[arg(long = "ast-offset", default_value_t = 0, allow_hyphen_values = true)]
    ast_offset_ms: i32,

    /// Time-shift depth in seconds; 0 keeps every segment
    #[arg(long = "time-shift")]
    time_shift_secs: Option<u32>,

    /// Minimum buffer time in seconds
    #[arg(long, default_value_t = 1.0)]
    min_buffer: f32,

    /// Minimum manifest update period in seconds
    #[arg(long = "mup")]
    minimum_update_period_secs: Option<u32>,

    /// Base URL written into the manifest
    #[arg(long)]
    base_url: Option<String>,

    /// Re-anchor the availability start time on every segment
    #[arg(long)]
    dynamic_ast: bool,

    /// Do not loop live media inputs
    #[arg(long)]
    no_loop: bool,

    /// Encoder GOP size in frames, defaults to one segment
    #[arg(long)]
    gop: Option<u32>,

    /// Slots per ring buffer
    #[arg(long, default_value_t = 3)]
    buffer_len: usize,

    /// Decode with FFmpeg instead of reading raw files
    #[cfg(feature = "ffmpeg")]
    #[arg(long)]
    ffmpeg: bool,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("'{value}' is not WIDTHxHEIGHT"))?;
    let width = width.parse().map_err(|_| format!("bad width in '{value}'"))?;
    let height = height.parse().map_err(|_| format!("bad height in '{value}'"))?;
    Ok((width, height))
}

fn parse_switch(value: &str) -> Result<(String, String, String), String> {
    let mut parts = value.splitn(3, '|');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(url), Some(start), Some(end)) if !url.is_empty() => {
            Ok((url.to_string(), start.trim().to_string(), end.trim().to_string()))
        }
        _ => Err(format!("'{value}' is not URL|START|END")),
    }
}

fn parse_video_representation(value: &str) -> Result<VideoRepresentation, String> {
    let mut parts = value.split(':');
    let id = parts.next().filter(|id| !id.is_empty()).ok_or("missing id")?;
    let mut representation = VideoRepresentation::new(id);
    if let Some(geometry) = parts.next() {
        let (size, framerate) = match geometry.split_once('@') {
            Some((size, fps)) => (size, Some(fps)),
            None => (geometry, None),
        };
        let (width, height) = parse_size(size)?;
        representation = representation.set_resolution(width, height);
        if let Some(fps) = framerate {
            representation = representation.set_framerate(fps.parse().map_err(|_| format!("bad frame rate '{fps}'"))?);
        }
    }
    if let Some(bitrate) = parts.next() {
        representation = representation.set_bitrate(bitrate.parse().map_err(|_| format!("bad bitrate '{bitrate}'"))?);
    }
    Ok(representation)
}

fn parse_audio_representation(value: &str) -> Result<AudioRepresentation, String> {
    let mut parts = value.split(':');
    let id = parts.next().filter(|id| !id.is_empty()).ok_or("missing id")?;
    let mut representation = AudioRepresentation::new(id);
    if let Some(rate) = parts.next() {
        representation = representation.set_sample_rate(rate.parse().map_err(|_| format!("bad sample rate '{rate}'"))?);
    }
    if let Some(channels) = parts.next() {
        representation = representation.set_channels(channels.parse().map_err(|_| format!("bad channel count '{channels}'"))?);
    }
    if let Some(bitrate) = parts.next() {
        representation = representation.set_bitrate(bitrate.parse().map_err(|_| format!("bad bitrate '{bitrate}'"))?);
    }
    Ok(representation)
}

fn video_input(args: &Args, url: &str) -> InputSource {
    let mut source = InputSource::new(url);
    if let Some(format) = &args.video_format {
        source = source.set_format(format.clone());
    }
    if let Some((width, height)) = args.video_size {
        source = source.set_resolution(width, height);
    }
    if let Some(framerate) = args.framerate {
        source = source.set_framerate(framerate);
    }
    source
}

fn build_config(args: &Args) -> dashcast::error::Result<DashcastConfig> {
    let mut builder = DashcastConfig::builder()
        .mode(args.mode.into())
        .segment_duration_ms(args.segment_duration_ms)
        .out_dir(args.out_dir.clone())
        .mpd_filename(args.mpd.clone())
        .ast_offset_ms(args.ast_offset_ms)
        .min_buffer_time(args.min_buffer)
        .dynamic_ast(args.dynamic_ast)
        .no_loop(args.no_loop)
        .buffer_len(args.buffer_len);

    if let Some(url) = &args.video {
        builder = builder.video_source(video_input(args, url));
    }
    if let Some(url) = &args.audio {
        let mut source = InputSource::new(url.clone());
        if let Some(format) = &args.audio_format {
            source = source.set_format(format.clone());
        }
        if let Some(sample_rate) = args.sample_rate {
            source = source.set_sample_rate(sample_rate);
        }
        if let Some(channels) = args.channels {
            source = source.set_channels(channels);
        }
        builder = builder.audio_source(source);
    }
    for (url, start, end) in &args.switch {
        builder = builder.switch_source(video_input(args, url), start.clone(), end.clone());
    }
    for representation in &args.video_representations {
        builder = builder.video_representation(representation.clone());
    }
    for representation in &args.audio_representations {
        builder = builder.audio_representation(representation.clone());
    }
    if let Some(duration) = args.fragment_duration_ms {
        builder = builder.fragment_duration_ms(duration);
    }
    if let Some(secs) = args.time_shift_secs {
        builder = builder.time_shift_secs(secs);
    }
    if let Some(secs) = args.minimum_update_period_secs {
        builder = builder.minimum_update_period_secs(secs);
    }
    if let Some(url) = &args.base_url {
        builder = builder.base_url(url.clone());
    }
    if let Some(gop) = args.gop {
        builder = builder.gop_size(gop);
    }
    Ok(builder.build()?)
}

#[cfg(feature = "ffmpeg")]
fn backend(args: &Args, config: &DashcastConfig) -> MediaBackend {
    if args.ffmpeg {
        dashcast::ffmpeg_io::backend(config)
    } else {
        dashcast::raw::backend(config)
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn backend(_args: &Args, config: &DashcastConfig) -> MediaBackend {
    dashcast::raw::backend(config)
}

fn run(args: Args) -> dashcast::error::Result<()> {
    let config = build_config(&args)?;
    info!(
        "{:?}: {} video and {} audio representations, {}ms segments into {}",
        config.mode,
        config.video_representations.len(),
        config.audio_representations.len(),
        config.segment_duration_ms,
        config.out_dir().display()
    );

    let backend = backend(&args, &config);
    let scheduler = DashScheduler::new(config, backend).set_quit_source(StdinQuitSource::new());

    let shutdown = scheduler.shutdown_token();
    if let Err(e) = ctrlc::set_handler(move || {
        if shutdown.cancel() {
            info!("Interrupted, stopping the pipeline.");
        }
    }) {
        error!("Cannot install the Ctrl-C handler: {e}");
    }

    info!("Press q then Enter to stop.");
    scheduler.start()?.wait()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_representation() {
        let representation = parse_video_representation("hd:1280x720@30:2000000").unwrap();
        assert_eq!(representation.id, "hd");
        assert_eq!((representation.resolution.width, representation.resolution.height), (1280, 720));
        assert_eq!(representation.framerate, 30);
        assert_eq!(representation.bitrate, 2_000_000);

        assert!(parse_video_representation(":640x480").is_err());
        assert!(parse_video_representation("sd:640").is_err());
    }

    #[test]
    fn test_parse_audio_representation() {
        let representation = parse_audio_representation("a1:48000:1").unwrap();
        assert_eq!((representation.sample_rate, representation.channels), (48000, 1));
    }

    #[test]
    fn test_parse_switch() {
        let (url, start, end) = parse_switch("backup.yuv|2024-05-01 10:00:00|2024-05-01 10:05:00").unwrap();
        assert_eq!(url, "backup.yuv");
        assert_eq!(start, "2024-05-01 10:00:00");
        assert_eq!(end, "2024-05-01 10:05:00");
        assert!(parse_switch("backup.yuv|2024-05-01 10:00:00").is_err());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::parse_from([
            "dashcast",
            "-v",
            "in.yuv",
            "--video-size",
            "320x240",
            "--rep",
            "v1:320x240@25",
            "--mode",
            "live-media",
            "--seg-dur",
            "2000",
            "--ast-offset",
            "-500",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.mode, BufferMode::LiveMedia);
        assert_eq!(config.segment_duration_ms, 2000);
        assert_eq!(config.ast_offset_ms, -500);
        assert_eq!(config.time_shift_secs, Some(10));
        assert!(config.video_source.as_ref().is_some_and(|s| s.loop_input));
    }
}
