use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use soundframe_core::{
    AppConfig, AudioEngine, Clock, ClockedPlayback, DecodedTrack, ExportPipeline, FeatureSource,
    ManualClock, SceneRenderer, SoundframeError, SystemClock, TrackTimelinePreprocessor,
};
use tracing_subscriber::EnvFilter;

/// Display tick rate of the live loop.
const LIVE_TICK_HZ: u64 = 60;

fn main() -> soundframe_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Live { input, seconds } => run_live(config, &input, seconds),
        Commands::Precompute { input, output, fps } => {
            run_precompute(config, &input, output.as_deref(), fps)
        }
        Commands::Export(args) => run_export(config, args),
    }
}

fn run_live(
    mut config: AppConfig,
    input: &Path,
    seconds: Option<f64>,
) -> soundframe_core::Result<()> {
    let mut track = DecodedTrack::open_wav(input)?;
    if let Some(seconds) = seconds {
        track = track.trimmed(seconds);
    }
    tracing::info!(?input, duration = track.duration_seconds(), "starting live mode");

    config.audio.sample_rate = track.sample_rate();
    config.audio.channels = track.channel_count();
    let quantum = config.audio.render_quantum.max(1);
    let mut engine = AudioEngine::new(config);
    let Some(mut analyzer) = engine.start_live() else {
        return Err(SoundframeError::msg("live analysis could not be started"));
    };

    // Stands in for the audio device: feeds render quanta at real-time pace.
    let clock = SystemClock::start();
    let feeder_clock = clock.clone();
    let feeder = std::thread::Builder::new()
        .name("audio-process".to_string())
        .spawn(move || {
            let sample_rate = f64::from(track.sample_rate());
            let mut output = vec![vec![0.0_f32; quantum]; track.channel_count()];
            let mut start = 0;
            while start + quantum <= track.frames() {
                let block: Vec<&[f32]> = track
                    .channels()
                    .iter()
                    .map(|channel| &channel[start..start + quantum])
                    .collect();
                analyzer.process(&block, &mut output);
                start += quantum;
                feeder_clock.sleep_until(Duration::from_secs_f64(start as f64 / sample_rate));
            }
        })?;

    let mut tick = 0_u64;
    while !feeder.is_finished() {
        tick += 1;
        clock.sleep_until(Duration::from_nanos(tick * 1_000_000_000 / LIVE_TICK_HZ));
        engine.tick();

        if tick % LIVE_TICK_HZ == 0 {
            let features = engine.frame_features(tick, clock.now().as_secs_f64());
            tracing::info!(
                level = features.loudness,
                bass = features.band("bass").unwrap_or(0.0),
                mid = features.band("mid").unwrap_or(0.0),
                presence = features.band("presence").unwrap_or(0.0),
                "live features"
            );
        }
    }

    feeder
        .join()
        .map_err(|_| SoundframeError::msg("audio processing thread panicked"))?;
    tracing::info!(level = engine.current_loudness(), "live mode finished");
    Ok(())
}

fn run_precompute(
    config: AppConfig,
    input: &Path,
    output: Option<&Path>,
    fps: Option<u32>,
) -> soundframe_core::Result<()> {
    let fps = fps.unwrap_or(config.export.fps);
    tracing::info!(?input, fps, "running precompute pipeline");

    let track = Arc::new(DecodedTrack::open_wav(input)?);
    let timeline = TrackTimelinePreprocessor::from_config(&config.analysis)
        .spawn(track.clone(), fps)?
        .join()
        .map_err(|_| SoundframeError::msg("preprocessor thread panicked"))??;

    if let Some(output) = output {
        let file = std::fs::File::create(output)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &timeline)?;
        tracing::info!(?output, "timeline written");
    }

    let summary = serde_json::json!({
        "input": input,
        "sample_rate": track.sample_rate(),
        "channels": track.channel_count(),
        "duration_seconds": track.duration_seconds(),
        "fps": timeline.fps(),
        "fft_size": timeline.fft_size(),
        "frames": timeline.len(),
        "peak_loudness": timeline.peak_loudness(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_export(mut config: AppConfig, args: ExportArgs) -> soundframe_core::Result<()> {
    let export = &mut config.export;
    export.fps = args.fps.unwrap_or(export.fps);
    export.width = args.width.unwrap_or(export.width);
    export.height = args.height.unwrap_or(export.height);
    export.bitrate = args.bitrate.unwrap_or(export.bitrate);

    let track = DecodedTrack::open_wav(&args.input)?;
    config.audio.sample_rate = track.sample_rate();
    let fps = config.export.fps;
    let mut engine = AudioEngine::new(config);
    engine.load_track(track, fps)?;

    if args.fast {
        export_with(&engine, ManualClock::new(), &args.output)
    } else {
        export_with(&engine, SystemClock::start(), &args.output)
    }
}

fn export_with<C>(engine: &AudioEngine, clock: C, output: &Path) -> soundframe_core::Result<()>
where
    C: Clock + Clone + 'static,
{
    let (Some(track), Some(features)) = (engine.track(), engine.timeline_features()) else {
        return Err(SoundframeError::msg("no track loaded"));
    };

    let config = engine.config();
    let (width, height) = config.export.even_dimensions();
    let renderer = SceneRenderer::new(config.scene.clone(), width, height);
    let playback = ClockedPlayback::new(track.clone(), clock.clone());

    let mut pipeline = ExportPipeline::new(config.export.clone(), clock, features, playback)
        .with_renderer(renderer);
    let summary = pipeline.run()?;

    let bytes = pipeline
        .take_output()
        .ok_or_else(|| SoundframeError::msg("export produced no output"))?;
    std::fs::write(output, bytes)?;

    tracing::info!(?output, "export written");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive frame renderer and exporter", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a WAV file through the live analyzer and log its features.
    Live {
        /// WAV file standing in for the live input.
        input: PathBuf,
        /// Only play the first N seconds.
        #[arg(short, long)]
        seconds: Option<f64>,
    },
    /// Analyse an audio file ahead of time and print a summary.
    Precompute {
        /// Path to the audio file that should be analysed.
        input: PathBuf,
        /// Also write the full timeline as JSON.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Timeline frame rate; defaults to the export fps.
        #[arg(long)]
        fps: Option<u32>,
    },
    /// Render, encode and mux a track into a packed video file.
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct ExportArgs {
    input: PathBuf,
    output: PathBuf,
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    bitrate: Option<u32>,
    /// Render as fast as possible instead of in real time.
    #[arg(long)]
    fast: bool,
}
