use crate::error::{QuadkeyError, QuadkeyResult};

/// A key color in normalized RGB (each channel 0..=1).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` (leading `#` optional).
    pub fn from_hex(hex: &str) -> QuadkeyResult<Self> {
        let s = hex.strip_prefix('#').unwrap_or(hex);
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(QuadkeyError::config(format!(
                "invalid hex color '{hex}' (expected #rrggbb)"
            )));
        }
        let channel = |range: std::ops::Range<usize>| -> f32 {
            // validated hex above
            u8::from_str_radix(&s[range], 16).unwrap_or(0) as f32 / 255.0
        };
        Ok(Self {
            r: channel(0..2),
            g: channel(2..4),
            b: channel(4..6),
        })
    }

    pub fn to_hex(self) -> String {
        fn byte(v: f32) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        format!("#{:02x}{:02x}{:02x}", byte(self.r), byte(self.g), byte(self.b))
    }

    /// Euclidean distance to another color in normalized RGB space.
    pub fn distance(self, other: Rgb) -> f32 {
        let dr = self.r - other.r;
        let dg = self.g - other.g;
        let db = self.b - other.b;
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

/// Chroma key parameters applied to the foreground layer.
///
/// `threshold` is the color-distance radius of full transparency; `smoothing`
/// is the width of the falloff band that follows it.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChromaKeySpec {
    pub color: Rgb,
    pub threshold: f32,
    pub smoothing: f32,
}

impl ChromaKeySpec {
    pub fn new(color: Rgb, threshold: f32, smoothing: f32) -> QuadkeyResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(QuadkeyError::config("chroma threshold must be in [0,1]"));
        }
        if !(0.0..=1.0).contains(&smoothing) {
            return Err(QuadkeyError::config("chroma smoothing must be in [0,1]"));
        }
        Ok(Self {
            color,
            threshold,
            smoothing,
        })
    }

    /// The alpha law: 0 inside the threshold radius, a Hermite smoothstep
    /// ramp across the smoothing band, 1 beyond it. The ramp is Hermite,
    /// not linear; a linear ramp produces visibly harder key edges.
    pub fn alpha_for_distance(&self, distance: f32) -> f32 {
        smoothstep(self.threshold, self.threshold + self.smoothing, distance)
    }

    /// Alpha for one straight (non-premultiplied) RGB8 pixel.
    pub fn alpha_for_rgb8(&self, r: u8, g: u8, b: u8) -> f32 {
        let sample = Rgb::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
        );
        self.alpha_for_distance(self.color.distance(sample))
    }
}

/// Hermite smoothstep: 0 below `edge0`, 1 at or above `edge1`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        // zero-width band degenerates to a step
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Applies the key to a straight-alpha RGBA8 pixel buffer in place,
/// multiplying each pixel's alpha by the keyed alpha. Color channels are
/// left unchanged (no spill suppression).
pub fn apply_chroma_key(pixels: &mut [u8], spec: &ChromaKeySpec) -> QuadkeyResult<()> {
    if !pixels.len().is_multiple_of(4) {
        return Err(QuadkeyError::render(
            "apply_chroma_key expects a tightly packed rgba8 buffer",
        ));
    }
    for px in pixels.chunks_exact_mut(4) {
        let alpha = spec.alpha_for_rgb8(px[0], px[1], px[2]);
        px[3] = (f32::from(px[3]) * alpha).round().clamp(0.0, 255.0) as u8;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green_key() -> ChromaKeySpec {
        ChromaKeySpec::new(Rgb::from_hex("#00ff00").unwrap(), 0.15, 0.10).unwrap()
    }

    #[test]
    fn hex_roundtrip() {
        let c = Rgb::from_hex("#00ff00").unwrap();
        assert_eq!(c, Rgb::new(0.0, 1.0, 0.0));
        assert_eq!(c.to_hex(), "#00ff00");
        assert!(Rgb::from_hex("nope").is_err());
        assert!(Rgb::from_hex("#12345").is_err());
    }

    #[test]
    fn alpha_is_zero_at_key_color() {
        let spec = green_key();
        assert_eq!(spec.alpha_for_distance(0.0), 0.0);
        assert_eq!(spec.alpha_for_rgb8(0, 255, 0), 0.0);
    }

    #[test]
    fn alpha_is_one_beyond_band() {
        let spec = green_key();
        assert_eq!(spec.alpha_for_distance(0.25), 1.0);
        assert_eq!(spec.alpha_for_distance(0.30), 1.0);
    }

    #[test]
    fn alpha_is_monotonic_in_distance() {
        let spec = green_key();
        let mut last = -1.0f32;
        for i in 0..=300 {
            let d = i as f32 / 300.0;
            let a = spec.alpha_for_distance(d);
            assert!(a >= last, "alpha decreased at distance {d}");
            last = a;
        }
    }

    #[test]
    fn band_midpoint_follows_smoothstep_not_linear() {
        let spec = green_key();
        // t = 0.5 -> smoothstep 0.5; t = 0.25 -> 0.15625 (a linear ramp
        // would give 0.25 there).
        let mid = spec.alpha_for_distance(0.20);
        assert!((mid - 0.5).abs() < 1e-6);
        let quarter = spec.alpha_for_distance(0.175);
        assert!((quarter - 0.15625).abs() < 1e-6);
    }

    #[test]
    fn buffer_pass_matches_pointwise_law() {
        let spec = green_key();
        // pure green, far-off red, and an in-band color
        let mut buf = vec![
            0, 255, 0, 255, //
            255, 0, 0, 255, //
            40, 255, 40, 200,
        ];
        apply_chroma_key(&mut buf, &spec).unwrap();
        assert_eq!(buf[3], 0);
        assert_eq!(buf[7], 255);

        let expected = (200.0 * spec.alpha_for_rgb8(40, 255, 40)).round() as u8;
        assert_eq!(buf[11], expected);
    }

    #[test]
    fn zero_smoothing_is_a_hard_step() {
        let spec = ChromaKeySpec::new(Rgb::new(0.0, 1.0, 0.0), 0.15, 0.0).unwrap();
        assert_eq!(spec.alpha_for_distance(0.1499), 0.0);
        assert_eq!(spec.alpha_for_distance(0.15), 1.0);
    }
}
