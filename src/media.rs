use std::{
    io::Read as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use crate::error::{QuadkeyError, QuadkeyResult};

/// Default bound on a single seek+decode. A source that never resolves a
/// seek must fail the export, not hang it.
pub const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_secs(20);

/// Everything the pipeline needs to know about a video source up front.
#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub has_audio: bool,
}

/// The external video decode collaborator: native dimensions, duration, and
/// a seek-then-decode operation that must complete, in order, before the next
/// frame renders.
pub trait VideoSource {
    fn info(&self) -> &VideoSourceInfo;

    /// Seeks to the exact timestamp and returns the presented frame as
    /// straight RGBA8 at native dimensions. Implementations must bound this
    /// call; an unresolved seek surfaces a retriable export error.
    fn decode_frame_rgba8(&mut self, time_secs: f64) -> QuadkeyResult<Vec<u8>>;
}

pub fn is_ffmpeg_on_path() -> bool {
    tool_on_path("ffmpeg")
}

pub fn is_ffprobe_on_path() -> bool {
    tool_on_path("ffprobe")
}

fn tool_on_path(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Probes a media file with `ffprobe` for dimensions, duration and the
/// presence of an audio stream.
pub fn probe_video(source_path: &Path) -> QuadkeyResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| QuadkeyError::render(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(QuadkeyError::render(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| QuadkeyError::render(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| QuadkeyError::render("no video stream found"))?;
    let width = video
        .width
        .ok_or_else(|| QuadkeyError::render("missing video width from ffprobe"))?;
    let height = video
        .height
        .ok_or_else(|| QuadkeyError::render("missing video height from ffprobe"))?;
    // Prefer the video stream's own duration: the container duration can run
    // past the last video frame when an audio stream is longer, and every
    // exported timestamp must land on a decodable frame.
    let duration_secs = video
        .duration
        .as_ref()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|f| f.duration.as_ref())
                .and_then(|s| s.parse::<f64>().ok())
        })
        .unwrap_or(0.0);
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        duration_secs,
        has_audio,
    })
}

/// A [`VideoSource`] backed by the system `ffmpeg` binary: every decode is a
/// fresh accurate-seek subprocess, killed if it exceeds the deadline.
pub struct FfmpegVideoSource {
    info: VideoSourceInfo,
    seek_timeout: Duration,
}

impl FfmpegVideoSource {
    pub fn open(source_path: &Path) -> QuadkeyResult<Self> {
        Self::open_with_timeout(source_path, DEFAULT_SEEK_TIMEOUT)
    }

    pub fn open_with_timeout(source_path: &Path, seek_timeout: Duration) -> QuadkeyResult<Self> {
        let info = probe_video(source_path)?;
        Ok(Self { info, seek_timeout })
    }
}

impl VideoSource for FfmpegVideoSource {
    fn info(&self) -> &VideoSourceInfo {
        &self.info
    }

    fn decode_frame_rgba8(&mut self, time_secs: f64) -> QuadkeyResult<Vec<u8>> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-ss", &format!("{time_secs:.9}")])
            .arg("-i")
            .arg(&self.info.source_path)
            .args([
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "pipe:1",
            ]);

        let out = run_with_deadline(cmd, self.seek_timeout)?;

        let expected = self.info.width as usize * self.info.height as usize * 4;
        if out.len() < expected {
            return Err(QuadkeyError::render(format!(
                "decoded frame at {time_secs:.3}s has invalid size: got {} bytes, expected {expected}",
                out.len()
            )));
        }
        // ffmpeg may emit a trailing partial buffer; keep exactly one frame
        let mut frame = out;
        frame.truncate(expected);
        Ok(frame)
    }
}

/// Runs a command with piped stdout/stderr and a hard deadline. On timeout
/// the child is killed and a retriable export error is returned.
pub(crate) fn run_with_deadline(mut cmd: Command, timeout: Duration) -> QuadkeyResult<Vec<u8>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| QuadkeyError::render(format!("failed to spawn ffmpeg: {e}")))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| QuadkeyError::render("failed to open ffmpeg stdout"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| QuadkeyError::render("failed to open ffmpeg stderr"))?;

    // Drain both pipes off-thread so the child can never block on a full
    // pipe while we wait on it.
    let out_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let err_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // release the reader threads before reporting
                    let _ = out_reader.join();
                    let _ = err_reader.join();
                    return Err(QuadkeyError::export_timeout(
                        format!("ffmpeg did not finish within {timeout:?}"),
                        None,
                    ));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(QuadkeyError::render(format!(
                    "failed to wait for ffmpeg: {e}"
                )));
            }
        }
    };

    let out = out_reader
        .join()
        .map_err(|_| QuadkeyError::render("ffmpeg stdout reader thread panicked"))?;
    let err = err_reader
        .join()
        .map_err(|_| QuadkeyError::render("ffmpeg stderr reader thread panicked"))?;

    if !status.success() {
        return Err(QuadkeyError::render(format!(
            "ffmpeg exited with status {}: {}",
            status,
            String::from_utf8_lossy(&err).trim()
        )));
    }

    Ok(out)
}

/// Loads a still image (the background artwork) as straight RGBA8.
pub fn load_image_rgba8(path: &Path) -> QuadkeyResult<(u32, u32, Vec<u8>)> {
    use anyhow::Context as _;
    let img = image::open(path)
        .with_context(|| format!("failed to open image '{}'", path.display()))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    Ok((w, h, img.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_kills_stalled_child() {
        // `sleep` stands in for a seek that never resolves.
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_with_deadline(cmd, Duration::from_millis(100)).unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    fn failing_child_surfaces_stderr() {
        let mut cmd = Command::new("ffprobe");
        cmd.arg("/nonexistent/definitely_missing.mp4");
        if !is_ffprobe_on_path() {
            eprintln!("skipping: ffprobe not on PATH");
            return;
        }
        let err = run_with_deadline(cmd, Duration::from_secs(10)).unwrap_err();
        assert!(!err.is_retriable());
    }
}
