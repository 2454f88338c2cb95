use std::path::PathBuf;

use quadkey::{
    ChromaKeySpec, QuadkeyError, QuadkeyResult, Rgb,
    encode::{FrameSink, MuxJob},
    export::{
        CancelToken, ExportGate, ExportPipeline, ExportRequest, StillImage, render_preview,
    },
    geometry::Quad,
    keyframe::{Fps, QuadSource},
    media::{VideoSource, VideoSourceInfo},
    renderer::{RenderRequest, RendererContext},
    surface::Surface,
};

const W: u32 = 16;
const H: u32 = 16;

/// A source that synthesizes a solid-color frame for any timestamp.
struct SolidSource {
    info: VideoSourceInfo,
    color: [u8; 4],
    fail_at: Option<f64>,
    truncate_at: Option<f64>,
    decodes: u64,
}

impl SolidSource {
    fn new(duration_secs: f64, color: [u8; 4]) -> Self {
        Self {
            info: VideoSourceInfo {
                source_path: PathBuf::from("solid.mp4"),
                width: W,
                height: H,
                duration_secs,
                has_audio: false,
            },
            color,
            fail_at: None,
            truncate_at: None,
            decodes: 0,
        }
    }
}

impl VideoSource for SolidSource {
    fn info(&self) -> &VideoSourceInfo {
        &self.info
    }

    fn decode_frame_rgba8(&mut self, time_secs: f64) -> QuadkeyResult<Vec<u8>> {
        if let Some(fail_at) = self.fail_at
            && time_secs >= fail_at
        {
            return Err(QuadkeyError::export_timeout("seek stalled", None));
        }
        self.decodes += 1;
        let mut buf = Vec::with_capacity((W * H * 4) as usize);
        for _ in 0..W * H {
            buf.extend_from_slice(&self.color);
        }
        if let Some(truncate_at) = self.truncate_at
            && time_secs >= truncate_at
        {
            buf.truncate(7);
        }
        Ok(buf)
    }
}

/// Records every staged frame in memory; no external encoder involved.
#[derive(Default)]
struct RecordingSink {
    frames: Vec<(String, Vec<u8>)>,
    finished: bool,
    discarded: bool,
}

impl FrameSink for RecordingSink {
    fn write_frame(&mut self, name: &str, jpeg: &[u8]) -> QuadkeyResult<()> {
        self.frames.push((name.to_string(), jpeg.to_vec()));
        Ok(())
    }

    fn finish(&mut self, job: &MuxJob) -> QuadkeyResult<PathBuf> {
        job.validate()?;
        self.finished = true;
        Ok(PathBuf::from("out.mp4"))
    }

    fn discard(&mut self) {
        self.discarded = true;
        self.frames.clear();
    }
}

fn static_request(geometry: &QuadSource) -> ExportRequest<'_> {
    ExportRequest {
        background: None,
        geometry,
        chroma_key: None,
        fps: Fps::new(30, 1).unwrap(),
    }
}

#[test]
fn two_seconds_at_30fps_yields_exactly_60_ordered_frames() {
    let mut source = SolidSource::new(2.0, [10, 20, 30, 255]);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());

    let mut progress = Vec::new();
    let summary = pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &CancelToken::new(),
            |pct| progress.push(pct),
        )
        .unwrap();

    assert_eq!(summary.frames, 60);
    assert_eq!(sink.frames.len(), 60);
    assert_eq!(sink.frames[0].0, "frame000000.jpg");
    assert_eq!(sink.frames[59].0, "frame000059.jpg");
    assert!(sink.frames.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(sink.finished);
    assert!(!sink.discarded);

    // coarse, monotone progress that ends at 100 after the mux step
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().rev().skip(1).all(|&p| p <= 90));

    // one seek per output frame, none skipped or reordered
    assert_eq!(source.decodes, 60);
    assert!(!pipeline.gate().is_exporting());
}

#[test]
fn keyed_foreground_reveals_background_in_captured_frames() {
    // pure green foreground, fully keyed out over a red background
    let mut source = SolidSource::new(0.1, [0, 255, 0, 255]);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let background = StillImage::new(W, H, vec![200, 0, 0, 255].repeat((W * H) as usize)).unwrap();
    let geometry = QuadSource::Static(Quad::full_surface());
    let chroma = ChromaKeySpec::new(Rgb::new(0.0, 1.0, 0.0), 0.15, 0.10).unwrap();

    let req = ExportRequest {
        background: Some(&background),
        geometry: &geometry,
        chroma_key: Some(chroma),
        fps: Fps::new(30, 1).unwrap(),
    };
    let pipeline = ExportPipeline::new(ExportGate::new());
    pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &req,
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();

    let (_, jpeg) = &sink.frames[0];
    let img = image::load_from_memory(jpeg).unwrap().to_rgb8();
    let px = img.get_pixel(W / 2, H / 2);
    // JPEG is lossy; the center pixel must still read as the background red
    assert!(px[0] > 150, "expected red background, got {px:?}");
    assert!(px[1] < 60, "green foreground leaked through: {px:?}");
}

#[test]
fn cancellation_takes_effect_at_the_seek_boundary() {
    let mut source = SolidSource::new(2.0, [0, 0, 0, 255]);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &cancel,
            |_| {},
        )
        .unwrap_err();

    assert!(matches!(err, QuadkeyError::Cancelled(0)));
    assert_eq!(source.decodes, 0);
    assert!(sink.discarded);
    assert!(!sink.finished);

    // the busy gate resets, so a fresh run can start immediately
    let mut sink = RecordingSink::default();
    pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();
    assert!(sink.finished);
}

#[test]
fn failing_seek_reports_the_frame_and_discards_the_run() {
    let mut source = SolidSource::new(2.0, [0, 0, 0, 255]);
    // frames 0..=29 land below 1.0s; frame 30 is the first to stall
    source.fail_at = Some(1.0);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());

    let err = pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

    assert!(err.is_retriable());
    assert!(err.to_string().contains("at frame 30"));
    assert!(sink.discarded);
    assert!(!pipeline.gate().is_exporting());
}

#[test]
fn preview_renders_are_suppressed_while_exporting() {
    let mut source = SolidSource::new(0.5, [0, 0, 0, 255]);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());
    let gate = pipeline.gate().clone();

    let mut preview_renderer = RendererContext::default();
    let mut preview_surface = Surface::new(8, 8).unwrap();
    let preview_req = RenderRequest {
        quad: Some(Quad::full_surface()),
        ..Default::default()
    };

    let mut mid_run = Vec::new();
    pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &CancelToken::new(),
            |_| {
                let drawn = render_preview(
                    &gate,
                    &mut preview_renderer,
                    &mut preview_surface,
                    &preview_req,
                )
                .unwrap();
                mid_run.push(drawn);
            },
        )
        .unwrap();

    // every preview attempt during the run is refused
    assert!(!mid_run.is_empty());
    assert!(mid_run.iter().all(|&drawn| !drawn));

    // once the run ends the gate releases and previews draw again
    assert!(
        render_preview(&gate, &mut preview_renderer, &mut preview_surface, &preview_req).unwrap()
    );
}

#[test]
fn bad_decoded_frame_reports_its_frame_index() {
    let mut source = SolidSource::new(2.0, [0, 0, 0, 255]);
    // frame 2 at 30 fps is the first decode to come back undersized
    source.truncate_at = Some(2.0 / 30.0);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());

    let err = pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

    assert!(err.to_string().contains("at frame 2"));
    assert!(!err.is_retriable());
    assert!(sink.discarded);
    assert!(!pipeline.gate().is_exporting());
}

#[test]
fn fractional_frame_rates_are_rejected() {
    let mut source = SolidSource::new(2.0, [0, 0, 0, 255]);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());

    let req = ExportRequest {
        background: None,
        geometry: &geometry,
        chroma_key: None,
        fps: Fps::new(30000, 1001).unwrap(),
    };
    assert!(
        pipeline
            .run(
                &mut source,
                &mut sink,
                &mut renderer,
                &req,
                &CancelToken::new(),
                |_| {},
            )
            .is_err()
    );
}

#[test]
fn zero_duration_source_is_an_error() {
    let mut source = SolidSource::new(0.0, [0, 0, 0, 255]);
    let mut sink = RecordingSink::default();
    let mut renderer = RendererContext::default();
    let geometry = QuadSource::Static(Quad::full_surface());
    let pipeline = ExportPipeline::new(ExportGate::new());

    let err = pipeline
        .run(
            &mut source,
            &mut sink,
            &mut renderer,
            &static_request(&geometry),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();
    assert!(err.to_string().contains("zero output frames"));
    assert!(sink.discarded);
}
