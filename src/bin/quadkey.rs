use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use quadkey::{
    export::{CancelToken, ExportGate, ExportPipeline, ExportRequest, StillImage},
    keyframe::Fps,
    media::{FfmpegVideoSource, VideoSource as _, load_image_rgba8},
    preset::{Preset, load_presets},
    renderer::{LayerSource, RenderRequest, RendererContext, WarpMode},
    surface::Surface,
};

#[derive(Parser, Debug)]
#[command(name = "quadkey", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite a single frame as a PNG (requires `ffmpeg` on PATH).
    Frame(FrameArgs),
    /// Export the full composited video as an MP4 (requires `ffmpeg` on PATH).
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Preset configuration JSON (array of preset records).
    #[arg(long = "presets")]
    presets_path: PathBuf,

    /// Name of the preset to composite.
    #[arg(long)]
    preset: String,

    /// Background artwork image (PNG/JPEG). Omit for a black background.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Frame index (0-based).
    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// Output frame rate used to resolve keyframe timing.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Quad warp mode.
    #[arg(long, value_enum, default_value_t = WarpChoice::Triangles)]
    warp: WarpChoice,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Preset configuration JSON (array of preset records).
    #[arg(long = "presets")]
    presets_path: PathBuf,

    /// Name of the preset to export.
    #[arg(long)]
    preset: String,

    /// Background artwork image (PNG/JPEG). Omit for a black background.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Output frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Quad warp mode.
    #[arg(long, value_enum, default_value_t = WarpChoice::Triangles)]
    warp: WarpChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WarpChoice {
    Triangles,
    Projective,
}

impl From<WarpChoice> for WarpMode {
    fn from(choice: WarpChoice) -> Self {
        match choice {
            WarpChoice::Triangles => WarpMode::Triangles,
            WarpChoice::Projective => WarpMode::Projective,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Export(args) => cmd_export(args),
    }
}

fn load_preset(presets_path: &Path, name: &str) -> anyhow::Result<Preset> {
    let json = std::fs::read_to_string(presets_path)
        .with_context(|| format!("read presets '{}'", presets_path.display()))?;
    let presets = load_presets(&json)?;
    presets
        .into_iter()
        .find(|p| p.name == name)
        .with_context(|| format!("no preset named '{name}' in '{}'", presets_path.display()))
}

/// Preset video paths are resolved relative to the presets file.
fn resolve_video_path(presets_path: &Path, video_file: &str) -> PathBuf {
    let video = Path::new(video_file);
    if video.is_absolute() {
        return video.to_path_buf();
    }
    presets_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(video)
}

fn load_background(path: Option<&PathBuf>) -> anyhow::Result<Option<StillImage>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let (w, h, rgba) = load_image_rgba8(path)?;
    Ok(Some(StillImage::new(w, h, rgba)?))
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let preset = load_preset(&args.presets_path, &args.preset)?;
    let fps = Fps::new(args.fps, 1)?;
    let background = load_background(args.background.as_ref())?;

    let video_path = resolve_video_path(&args.presets_path, &preset.video_file);
    let mut source = FfmpegVideoSource::open(&video_path)?;
    let info = source.info().clone();

    let t = fps.frame_timestamp_secs(args.frame);
    let video_frame = source.decode_frame_rgba8(t)?;

    let mut renderer = RendererContext::new(args.warp.into());
    let mut surface = Surface::new(info.width, info.height)?;
    let req = RenderRequest {
        background: background.as_ref().map(StillImage::as_layer),
        foreground: Some(LayerSource::new(info.width, info.height, &video_frame)?),
        quad: Some(preset.geometry.quad_at(t, fps)),
        chroma_key: Some(preset.chroma_key),
    };
    renderer.render(&mut surface, &req)?;
    let flat = surface.flatten_to_opaque([0, 0, 0]);

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &flat,
        info.width,
        info.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let preset = load_preset(&args.presets_path, &args.preset)?;
    let fps = Fps::new(args.fps, 1)?;
    let background = load_background(args.background.as_ref())?;

    let video_path = resolve_video_path(&args.presets_path, &preset.video_file);
    let mut source = FfmpegVideoSource::open(&video_path)?;
    let mut sink = quadkey::encode::FfmpegSequenceEncoder::new(&args.out)?;

    let mut renderer = RendererContext::new(args.warp.into());
    let pipeline = ExportPipeline::new(ExportGate::new());
    let req = ExportRequest {
        background: background.as_ref(),
        geometry: &preset.geometry,
        chroma_key: Some(preset.chroma_key),
        fps,
    };

    let summary = pipeline.run(
        &mut source,
        &mut sink,
        &mut renderer,
        &req,
        &CancelToken::new(),
        |pct| eprintln!("export {pct}%"),
    )?;

    eprintln!("wrote {} ({} frames)", summary.out_path.display(), summary.frames);
    Ok(())
}
