use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    chroma::ChromaKeySpec,
    encode::{FrameSink, MuxJob, encode_jpeg_rgba8, sequence_frame_name},
    error::{QuadkeyError, QuadkeyResult},
    keyframe::{Fps, QuadSource},
    media::VideoSource,
    renderer::{LayerSource, RenderRequest, RendererContext},
    surface::Surface,
};

/// An owned still image (the background artwork).
#[derive(Clone, Debug)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl StillImage {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> QuadkeyResult<Self> {
        LayerSource::new(width, height, &rgba)?;
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn as_layer(&self) -> LayerSource<'_> {
        LayerSource {
            width: self.width,
            height: self.height,
            rgba: &self.rgba,
        }
    }
}

/// Mutual exclusion between the live preview loop and the export pipeline.
///
/// Both mutate the video source's playback position, so they must never run
/// concurrently against it. The preview loop (and any user-driven scrub)
/// checks [`is_exporting`](Self::is_exporting) before touching the source;
/// the pipeline holds the flag for exactly one run via an RAII guard, so the
/// gate can never be left in a stale "exporting" state.
#[derive(Clone, Debug, Default)]
pub struct ExportGate {
    exporting: Arc<AtomicBool>,
}

impl ExportGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> QuadkeyResult<ExportGuard> {
        if self
            .exporting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QuadkeyError::export(
                "an export is already in progress",
                None,
            ));
        }
        Ok(ExportGuard {
            flag: Arc::clone(&self.exporting),
        })
    }
}

struct ExportGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Operator cancellation, observed at each seek boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What to composite during an export run.
#[derive(Debug)]
pub struct ExportRequest<'a> {
    pub background: Option<&'a StillImage>,
    pub geometry: &'a QuadSource,
    pub chroma_key: Option<ChromaKeySpec>,
    pub fps: Fps,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportSummary {
    pub frames: u64,
    pub out_path: PathBuf,
}

/// Drives the renderer once per output frame across the source's full
/// duration and streams the captures to a [`FrameSink`].
///
/// The loop is strictly sequential: frame `i` is seeked, rendered and staged
/// before frame `i + 1` starts. The only suspension point is the bounded
/// seek+decode inside the [`VideoSource`]. The pipeline owns no state beyond
/// the current frame index and the busy gate; both reset when a run ends,
/// successfully or not.
pub struct ExportPipeline {
    gate: ExportGate,
}

impl ExportPipeline {
    pub fn new(gate: ExportGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &ExportGate {
        &self.gate
    }

    #[tracing::instrument(skip_all)]
    pub fn run(
        &self,
        source: &mut dyn VideoSource,
        sink: &mut dyn FrameSink,
        renderer: &mut RendererContext,
        req: &ExportRequest<'_>,
        cancel: &CancelToken,
        mut progress: impl FnMut(u8),
    ) -> QuadkeyResult<ExportSummary> {
        let _guard = self.gate.try_begin()?;

        let result = run_inner(source, sink, renderer, req, cancel, &mut progress);
        if result.is_err() {
            // no partial/corrupt output: drop everything staged for this run
            sink.discard();
        }
        result
    }
}

fn run_inner(
    source: &mut dyn VideoSource,
    sink: &mut dyn FrameSink,
    renderer: &mut RendererContext,
    req: &ExportRequest<'_>,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u8),
) -> QuadkeyResult<ExportSummary> {
    if req.fps.den != 1 {
        return Err(QuadkeyError::validation(
            "export requires an integer frame rate (fps.den == 1)",
        ));
    }

    let info = source.info().clone();
    let total = req.fps.frame_count(info.duration_secs);
    if total == 0 {
        return Err(QuadkeyError::export(
            "source duration yields zero output frames",
            None,
        ));
    }

    let mux = MuxJob {
        fps: req.fps.num,
        width: info.width,
        height: info.height,
        original_media: Some(info.source_path.clone()),
    };
    // fail before the first seek rather than after the whole render loop
    mux.validate()?;

    // export-dedicated surface at the source's native dimensions
    let mut surface = Surface::new(info.width, info.height)?;

    tracing::info!(
        frames = total,
        width = info.width,
        height = info.height,
        "export started"
    );

    for i in 0..total {
        // cancellation takes effect at the seek boundary
        if cancel.is_cancelled() {
            tracing::info!(frame = i, "export cancelled");
            return Err(QuadkeyError::Cancelled(i));
        }

        let t = req.fps.frame_timestamp_secs(i);

        // 1. seek: must complete, in order, before this frame renders
        let video_frame = source.decode_frame_rgba8(t).map_err(|e| at_frame(e, i))?;

        // 2. resolve geometry for this exact timestamp
        let quad = req.geometry.quad_at(t, req.fps);

        // 3. render into the export surface
        let foreground =
            LayerSource::new(info.width, info.height, &video_frame).map_err(|e| at_frame(e, i))?;
        let render_req = RenderRequest {
            background: req.background.map(StillImage::as_layer),
            foreground: Some(foreground),
            quad: Some(quad),
            chroma_key: req.chroma_key,
        };
        renderer
            .render(&mut surface, &render_req)
            .map_err(|e| at_frame(e, i))?;

        // 4. capture and hand off under the deterministic sequence name
        let flat = surface.flatten_to_opaque([0, 0, 0]);
        let jpeg = encode_jpeg_rgba8(info.width, info.height, &flat).map_err(|e| at_frame(e, i))?;
        sink.write_frame(&sequence_frame_name(i), &jpeg)
            .map_err(|e| at_frame(e, i))?;

        // 5. coarse progress; the last 10% belongs to the mux step
        if i.is_multiple_of(5) {
            let pct = ((i as f64 / total as f64) * 90.0).round() as u8;
            progress(pct);
            tracing::debug!(frame = i, pct, "export progress");
        }
    }

    let out_path = sink.finish(&mux)?;
    progress(100);
    tracing::info!(out = %out_path.display(), frames = total, "export finished");

    Ok(ExportSummary {
        frames: total,
        out_path,
    })
}

/// Attaches the failing frame index to an error, preserving retriability.
fn at_frame(err: QuadkeyError, frame: u64) -> QuadkeyError {
    match err {
        QuadkeyError::Export {
            msg, retriable, ..
        } => QuadkeyError::Export {
            msg,
            frame: Some(frame),
            retriable,
        },
        other => QuadkeyError::export(other.to_string(), Some(frame)),
    }
}

/// Renders one live-preview frame, unless an export currently owns the
/// source. Returns whether anything was rendered.
pub fn render_preview(
    gate: &ExportGate,
    renderer: &mut RendererContext,
    surface: &mut Surface,
    req: &RenderRequest<'_>,
) -> QuadkeyResult<bool> {
    if gate.is_exporting() {
        tracing::debug!("preview render suppressed: export in progress");
        return Ok(false);
    }
    renderer.render(surface, req)?;
    Ok(true)
}
