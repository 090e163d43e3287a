use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use facetrack_core::capture::domain::capture_source::CaptureSource;
use facetrack_core::capture::infrastructure::detection_script::DetectionScript;
use facetrack_core::capture::infrastructure::replay_capture_source::{
    ReplayCaptureSource, ReplayOptions,
};
use facetrack_core::effects::domain::effect_variant::EffectVariant;
use facetrack_core::pipeline::capture_pipeline::{CapturePipeline, PipelineConfig};
use facetrack_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facetrack_core::recording::domain::muxing_writer::{MuxingWriter, WriterFactory};
use facetrack_core::recording::domain::recording_controller::StopOutcome;
use facetrack_core::recording::infrastructure::ffmpeg_muxing_writer::FfmpegMuxingWriter;
use facetrack_core::rendering::infrastructure::renderer_factory::{
    create_renderer, RendererPreference,
};
use facetrack_core::shared::settings::PipelineSettings;

/// Replays a video through the face-tracking effect pipeline and records
/// the processed result.
#[derive(Parser)]
#[command(name = "facetrack")]
struct Cli {
    /// Input video file, used as the capture source.
    input: PathBuf,

    /// Directory for the recording (default: settings, then the temp dir).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Effect: none, gray or face.
    #[arg(long)]
    effect: Option<String>,

    /// Record the stream unmirrored.
    #[arg(long)]
    no_mirror: bool,

    /// JSON detection script with face boxes keyed by time.
    #[arg(long)]
    faces: Option<PathBuf>,

    /// Flip detection-script boxes horizontally before use.
    #[arg(long)]
    mirror_faces: bool,

    /// Settings file to use instead of the user's settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render backend: auto, gpu or cpu.
    #[arg(long)]
    renderer: Option<String>,

    /// Save the last rendered frame as an image.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Deliver samples at their recorded pace instead of as fast as possible.
    #[arg(long)]
    realtime: bool,

    /// Persist the effective settings as the user's defaults.
    #[arg(long)]
    save_settings: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let settings = effective_settings(&cli)?;
    if cli.save_settings {
        settings.save();
    }

    let detection_script = cli
        .faces
        .as_deref()
        .map(DetectionScript::load)
        .transpose()?;
    let source = Arc::new(ReplayCaptureSource::open(
        &cli.input,
        ReplayOptions {
            realtime: cli.realtime,
            mirror_metadata: cli.mirror_faces,
            detection_script,
        },
    )?);

    let writer_factory: WriterFactory =
        Box::new(|| Box::new(FfmpegMuxingWriter::new()) as Box<dyn MuxingWriter>);
    let pipeline = CapturePipeline::new(
        Arc::clone(&source) as Arc<dyn CaptureSource>,
        create_renderer(settings.renderer),
        writer_factory,
        PipelineConfig::from_settings(&settings),
        Box::new(StdoutPipelineLogger::default()),
    );

    let session = pipeline.start_recording()?;
    log::info!("Recording to {}", session.destination.display());

    pipeline.start_capture();
    pipeline.sync_control();
    source.wait_until_finished();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let outcome = pipeline.stop_recording(move |result| {
        let _ = done_tx.send(result);
    });
    if outcome == StopOutcome::NothingToStop {
        return Err("recording ended before it could be finalized".into());
    }
    let path = done_rx.recv()??;

    if let Some(preview_path) = &cli.preview {
        let preview = pipeline.preview().ok_or("no frame was rendered")?;
        preview.save(preview_path)?;
        log::info!("Preview saved to {}", preview_path.display());
    }

    pipeline.log_summary();
    println!("{}", path.display());
    Ok(())
}

fn effective_settings(cli: &Cli) -> Result<PipelineSettings, Box<dyn std::error::Error>> {
    let mut settings = match &cli.config {
        Some(path) => PipelineSettings::load_from(path)?,
        None => PipelineSettings::load(),
    };
    if let Some(effect) = &cli.effect {
        settings.initial_effect = effect.parse::<EffectVariant>()?;
    }
    if let Some(renderer) = &cli.renderer {
        settings.renderer = renderer.parse::<RendererPreference>()?;
    }
    if let Some(dir) = &cli.output_dir {
        settings.recording_dir = Some(dir.clone());
    }
    if cli.no_mirror {
        settings.mirrored = false;
    }
    Ok(settings)
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.input.exists() {
        return Err(format!("Input file not found: {}", cli.input.display()).into());
    }
    if let Some(faces) = &cli.faces {
        if !faces.exists() {
            return Err(format!("Detection script not found: {}", faces.display()).into());
        }
    }
    if cli.mirror_faces && cli.faces.is_none() {
        return Err("--mirror-faces requires --faces".into());
    }
    if let Some(effect) = &cli.effect {
        effect.parse::<EffectVariant>()?;
    }
    if let Some(renderer) = &cli.renderer {
        renderer.parse::<RendererPreference>()?;
    }
    if let Some(dir) = &cli.output_dir {
        if dir.exists() && !dir.is_dir() {
            return Err(format!("Output path is not a directory: {}", dir.display()).into());
        }
    }
    Ok(())
}
