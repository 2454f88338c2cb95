use crate::{
    error::{QuadkeyError, QuadkeyResult},
    geometry::{clamp_corner, CornerId, Quad},
};

/// Session frame rate. One value per session: preview and export must map the
/// same wall-clock position to the same frame index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> QuadkeyResult<Self> {
        if num == 0 {
            return Err(QuadkeyError::validation("Fps num must be > 0"));
        }
        if den == 0 {
            return Err(QuadkeyError::validation("Fps den must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn frame_timestamp_secs(self, frame: u64) -> f64 {
        (frame as f64) * f64::from(self.den) / f64::from(self.num)
    }

    /// Frame index the given timestamp lands on (nearest frame).
    pub fn frame_at_secs(self, secs: f64) -> u64 {
        (secs * self.as_f64()).round().max(0.0) as u64
    }

    /// Number of output frames covering `duration_secs`.
    pub fn frame_count(self, duration_secs: f64) -> u64 {
        (duration_secs * self.as_f64()).ceil().max(0.0) as u64
    }
}

/// A time-indexed quad with an interpolation flag. `interpolate == false`
/// makes the segment toward the next keyframe a hard hold.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Keyframe {
    pub frame: u64,
    pub quad: Quad,
    #[serde(default = "default_interpolate")]
    pub interpolate: bool,
}

fn default_interpolate() -> bool {
    true
}

/// An ordered-by-frame sequence of keyframes.
///
/// Construction sorts stably by frame and rejects duplicate frame numbers:
/// two keyframes on the same frame would make resolution order undefined, so
/// they are a data-validation error rather than a silent tie-break.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct KeyframeTrack {
    keys: Vec<Keyframe>,
}

impl KeyframeTrack {
    pub fn new(mut keys: Vec<Keyframe>) -> QuadkeyResult<Self> {
        if keys.is_empty() {
            return Err(QuadkeyError::geometry(
                "keyframe track must have at least one keyframe",
            ));
        }
        keys.sort_by_key(|k| k.frame);
        if let Some(w) = keys.windows(2).find(|w| w[0].frame == w[1].frame) {
            return Err(QuadkeyError::geometry(format!(
                "duplicate keyframe at frame {}",
                w[0].frame
            )));
        }
        for k in &keys {
            crate::geometry::validate_quad(&k.quad)?;
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The interpolated quad at `time_seconds`.
    ///
    /// Semantics: clamp-and-hold before the first and at/after the last
    /// keyframe; otherwise bracket the current frame between the last key
    /// with `frame <= current` and the next one, hold if the start key has
    /// `interpolate == false`, else lerp each corner axis independently.
    pub fn active_quad(&self, time_seconds: f64, fps: Fps) -> Quad {
        let current = fps.frame_at_secs(time_seconds);

        let first = &self.keys[0];
        if current < first.frame {
            return first.quad;
        }
        let last = &self.keys[self.keys.len() - 1];
        if current >= last.frame {
            return last.quad;
        }

        // keys are sorted and current is strictly inside [first, last)
        let idx = self.keys.partition_point(|k| k.frame <= current);
        let start = &self.keys[idx - 1];
        let end = &self.keys[idx];

        if !start.interpolate {
            return start.quad;
        }

        let t = (current - start.frame) as f64 / (end.frame - start.frame) as f64;
        Quad::lerp(&start.quad, &end.quad, t)
    }
}

/// Where the active quad comes from: a directly edited static quad, or an
/// animated keyframe track.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum QuadSource {
    Static(Quad),
    Animated(KeyframeTrack),
}

impl QuadSource {
    pub fn quad_at(&self, time_seconds: f64, fps: Fps) -> Quad {
        match self {
            Self::Static(q) => *q,
            Self::Animated(track) => track.active_quad(time_seconds, fps),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, Self::Animated(_))
    }
}

/// Owns the corner/keyframe data and is its sole mutator.
#[derive(Clone, Debug)]
pub struct GeometryModel {
    source: QuadSource,
}

impl GeometryModel {
    pub fn with_static(quad: Quad) -> Self {
        Self {
            source: QuadSource::Static(quad),
        }
    }

    pub fn with_track(track: KeyframeTrack) -> Self {
        Self {
            source: QuadSource::Animated(track),
        }
    }

    pub fn source(&self) -> &QuadSource {
        &self.source
    }

    pub fn quad_at(&self, time_seconds: f64, fps: Fps) -> Quad {
        self.source.quad_at(time_seconds, fps)
    }

    /// Replaces an animated track with a static quad (e.g. when a static
    /// preset is applied).
    pub fn set_static(&mut self, quad: Quad) {
        self.source = QuadSource::Static(quad);
    }

    /// Moves one corner of the static quad, clamped to the legal drag range.
    ///
    /// Dragging while a keyframe track is active is rejected: silently
    /// editing a decoupled static copy was an interaction bug in earlier
    /// versions of this tool, not a feature.
    pub fn drag_corner(&mut self, id: CornerId, x: f64, y: f64) -> QuadkeyResult<()> {
        let QuadSource::Static(quad) = &mut self.source else {
            return Err(QuadkeyError::geometry(
                "cannot drag corners while a keyframe track is active",
            ));
        };
        *quad.corner_mut(id) = clamp_corner(x, y);
        Ok(())
    }
}
