use std::{
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use crate::{
    error::{QuadkeyError, QuadkeyResult},
    media,
};

/// JPEG quality for captured frames (the encoder contract fixes ~0.92).
pub const FRAME_JPEG_QUALITY: u8 = 92;

/// Default bound on the final mux invocation.
pub const DEFAULT_MUX_TIMEOUT: Duration = Duration::from_secs(600);

/// The deterministic, zero-padded sequence name for frame `i`. The external
/// encoder orders its input by filename, so this must match generation order
/// exactly.
pub fn sequence_frame_name(index: u64) -> String {
    format!("frame{index:06}.jpg")
}

/// Parameters for the final mux step.
#[derive(Clone, Debug)]
pub struct MuxJob {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Original media, mapped for audio passthrough when present.
    pub original_media: Option<PathBuf>,
}

impl MuxJob {
    pub fn validate(&self) -> QuadkeyResult<()> {
        if self.fps == 0 {
            return Err(QuadkeyError::validation("mux fps must be non-zero"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(QuadkeyError::validation("mux width/height must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p output for broad playback compatibility needs even dims.
            return Err(QuadkeyError::validation(
                "mux width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        Ok(())
    }
}

/// The external encoder collaborator: receives one JPEG buffer per frame
/// under its sequence name, then muxes the whole run into a single file.
pub trait FrameSink {
    fn write_frame(&mut self, name: &str, jpeg: &[u8]) -> QuadkeyResult<()>;

    /// Invokes the encoder over the accumulated sequence. Consumes the run's
    /// buffered state; returns the finished output path.
    fn finish(&mut self, job: &MuxJob) -> QuadkeyResult<PathBuf>;

    /// Discards all encoder-side state for the run (cancellation or failure).
    fn discard(&mut self);
}

/// [`FrameSink`] backed by the system `ffmpeg`: frames are staged as a JPEG
/// sequence in a temp directory, then muxed with
/// `-framerate <fps> -i frame%06d.jpg -i <original> -c:v libx264
/// -preset ultrafast -pix_fmt yuv420p -map 0:v -map 1:a? -shortest`.
pub struct FfmpegSequenceEncoder {
    out_path: PathBuf,
    staging: Option<StagingDir>,
    frames_written: u64,
    mux_timeout: Duration,
}

impl FfmpegSequenceEncoder {
    pub fn new(out_path: impl Into<PathBuf>) -> QuadkeyResult<Self> {
        Self::with_mux_timeout(out_path, DEFAULT_MUX_TIMEOUT)
    }

    pub fn with_mux_timeout(
        out_path: impl Into<PathBuf>,
        mux_timeout: Duration,
    ) -> QuadkeyResult<Self> {
        if !media::is_ffmpeg_on_path() {
            return Err(QuadkeyError::render(
                "ffmpeg is required for MP4 export, but was not found on PATH",
            ));
        }
        let out_path = out_path.into();
        ensure_parent_dir(&out_path)?;
        Ok(Self {
            out_path,
            staging: Some(StagingDir::create()?),
            frames_written: 0,
            mux_timeout,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn staging(&mut self) -> QuadkeyResult<&StagingDir> {
        // a discarded run needs a fresh staging dir before it can be reused
        if self.staging.is_none() {
            self.staging = Some(StagingDir::create()?);
            self.frames_written = 0;
        }
        Ok(self
            .staging
            .as_ref()
            .expect("staging present after refresh"))
    }
}

impl FrameSink for FfmpegSequenceEncoder {
    fn write_frame(&mut self, name: &str, jpeg: &[u8]) -> QuadkeyResult<()> {
        let path = self.staging()?.path.join(name);
        std::fs::write(&path, jpeg).map_err(|e| {
            QuadkeyError::export(
                format!("failed to stage frame '{name}': {e}"),
                Some(self.frames_written),
            )
        })?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self, job: &MuxJob) -> QuadkeyResult<PathBuf> {
        job.validate()?;
        let staging = self
            .staging
            .take()
            .ok_or_else(|| QuadkeyError::export("encoder run already finalized", None))?;
        if self.frames_written == 0 {
            return Err(QuadkeyError::export("no frames were staged", None));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-loglevel", "error"])
            .args(["-framerate", &job.fps.to_string()])
            .arg("-i")
            .arg(staging.path.join("frame%06d.jpg"));

        if let Some(original) = &job.original_media {
            cmd.arg("-i").arg(original);
        }

        cmd.args([
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-pix_fmt",
            "yuv420p",
            "-map",
            "0:v",
        ]);

        if job.original_media.is_some() {
            // audio is optional: proceed video-only when the source has none
            cmd.args(["-map", "1:a?", "-shortest"]);
        }

        cmd.arg(&self.out_path);

        tracing::debug!(
            frames = self.frames_written,
            out = %self.out_path.display(),
            "muxing frame sequence"
        );

        media::run_with_deadline(cmd, self.mux_timeout).map_err(|e| match e {
            QuadkeyError::Export { msg, retriable, .. } => QuadkeyError::Export {
                msg: format!("mux step: {msg}"),
                frame: None,
                retriable,
            },
            other => QuadkeyError::export(format!("mux step failed: {other}"), None),
        })?;

        self.frames_written = 0;
        Ok(self.out_path.clone())
    }

    fn discard(&mut self) {
        self.staging = None;
        self.frames_written = 0;
    }
}

pub fn ensure_parent_dir(path: &Path) -> QuadkeyResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Encodes a straight, opaque RGBA8 buffer to JPEG at the fixed capture
/// quality.
pub fn encode_jpeg_rgba8(width: u32, height: u32, rgba: &[u8]) -> QuadkeyResult<Vec<u8>> {
    if rgba.len() != width as usize * height as usize * 4 {
        return Err(QuadkeyError::render(
            "jpeg capture buffer length does not match width*height*4",
        ));
    }
    // JPEG has no alpha channel; the surface is flattened before this point.
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }

    let mut out = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, FRAME_JPEG_QUALITY);
    image::ImageEncoder::write_image(
        encoder,
        &rgb,
        width,
        height,
        image::ExtendedColorType::Rgb8,
    )
    .map_err(|e| QuadkeyError::render(format!("jpeg encode failed: {e}")))?;
    Ok(out)
}

/// A per-run staging directory, removed when the run ends either way.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create() -> QuadkeyResult<Self> {
        let path = std::env::temp_dir().join(format!(
            "quadkey_frames_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        std::fs::create_dir_all(&path).map_err(|e| {
            QuadkeyError::export(format!("failed to create staging dir: {e}"), None)
        })?;
        Ok(Self { path })
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_names_are_zero_padded_and_ordered() {
        assert_eq!(sequence_frame_name(0), "frame000000.jpg");
        assert_eq!(sequence_frame_name(59), "frame000059.jpg");
        assert_eq!(sequence_frame_name(123_456), "frame123456.jpg");
        assert!(sequence_frame_name(9) < sequence_frame_name(10));
    }

    #[test]
    fn mux_job_validation_catches_bad_values() {
        let job = MuxJob {
            fps: 0,
            width: 10,
            height: 10,
            original_media: None,
        };
        assert!(job.validate().is_err());

        let job = MuxJob {
            fps: 30,
            width: 11,
            height: 10,
            original_media: None,
        };
        assert!(job.validate().is_err());

        let job = MuxJob {
            fps: 30,
            width: 10,
            height: 10,
            original_media: None,
        };
        assert!(job.validate().is_ok());
    }

    #[test]
    fn jpeg_capture_rejects_bad_buffer() {
        assert!(encode_jpeg_rgba8(4, 4, &[0u8; 7]).is_err());
        let buf = vec![128u8; 4 * 4 * 4];
        let jpeg = encode_jpeg_rgba8(4, 4, &buf).unwrap();
        // JPEG SOI marker
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }
}
