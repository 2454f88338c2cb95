pub use kurbo::Point;

use crate::error::{QuadkeyError, QuadkeyResult};

/// A single quad corner, in percent units of the output surface
/// (0–100 nominal). Corners may be dragged off-canvas for exaggerated
/// perspective, bounded by [`CORNER_MIN`]/[`CORNER_MAX`].
pub type Corner = Point;

pub const CORNER_MIN: f64 = -200.0;
pub const CORNER_MAX: f64 = 300.0;

/// The four named corners of a destination region.
///
/// Winding order is load-bearing: the rasterizer's triangle split and the
/// homography correspondence both assume `top_left, top_right, bottom_right,
/// bottom_left`. Corners are never an unordered set.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Quad {
    pub top_left: Corner,
    pub top_right: Corner,
    pub bottom_right: Corner,
    pub bottom_left: Corner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CornerId {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

impl Quad {
    pub fn new(
        top_left: impl Into<Corner>,
        top_right: impl Into<Corner>,
        bottom_right: impl Into<Corner>,
        bottom_left: impl Into<Corner>,
    ) -> Self {
        Self {
            top_left: top_left.into(),
            top_right: top_right.into(),
            bottom_right: bottom_right.into(),
            bottom_left: bottom_left.into(),
        }
    }

    /// The full output surface: corners at 0–100%.
    pub fn full_surface() -> Self {
        Self::new((0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0))
    }

    pub fn corner(&self, id: CornerId) -> Corner {
        match id {
            CornerId::TopLeft => self.top_left,
            CornerId::TopRight => self.top_right,
            CornerId::BottomRight => self.bottom_right,
            CornerId::BottomLeft => self.bottom_left,
        }
    }

    pub fn corner_mut(&mut self, id: CornerId) -> &mut Corner {
        match id {
            CornerId::TopLeft => &mut self.top_left,
            CornerId::TopRight => &mut self.top_right,
            CornerId::BottomRight => &mut self.bottom_right,
            CornerId::BottomLeft => &mut self.bottom_left,
        }
    }

    /// Corners in winding order (matches [`CornerId`] declaration order).
    pub fn corners(&self) -> [Corner; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Per-corner, per-axis linear interpolation.
    pub fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        fn lerp_pt(a: Corner, b: Corner, t: f64) -> Corner {
            Corner::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
        }

        Self {
            top_left: lerp_pt(a.top_left, b.top_left, t),
            top_right: lerp_pt(a.top_right, b.top_right, t),
            bottom_right: lerp_pt(a.bottom_right, b.bottom_right, t),
            bottom_left: lerp_pt(a.bottom_left, b.bottom_left, t),
        }
    }

    /// A quad with any non-finite coordinate cannot be rasterized; the
    /// renderer treats it as "incomplete" and aborts the call as a no-op.
    pub fn is_finite(&self) -> bool {
        self.corners().iter().all(|c| c.x.is_finite() && c.y.is_finite())
    }

    /// Percent coordinates scaled to pixel space for a surface of the given
    /// dimensions.
    pub fn to_pixels(&self, width: u32, height: u32) -> [Point; 4] {
        let sx = f64::from(width) / 100.0;
        let sy = f64::from(height) / 100.0;
        self.corners()
            .map(|c| Point::new(c.x * sx, c.y * sy))
    }
}

/// Clamps a dragged corner position to the legal off-canvas range.
pub fn clamp_corner(x: f64, y: f64) -> Corner {
    Corner::new(
        x.clamp(CORNER_MIN, CORNER_MAX),
        y.clamp(CORNER_MIN, CORNER_MAX),
    )
}

pub(crate) fn validate_quad(quad: &Quad) -> QuadkeyResult<()> {
    if !quad.is_finite() {
        return Err(QuadkeyError::geometry(
            "quad has non-finite corner coordinates",
        ));
    }
    Ok(())
}
