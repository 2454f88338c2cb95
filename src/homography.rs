use kurbo::Point;

use crate::{
    error::{QuadkeyError, QuadkeyResult},
    geometry::Quad,
};

/// Pivot magnitudes below this are treated as a singular system.
const SINGULAR_EPS: f64 = 1e-10;

/// A 3x3 projective (perspective) transform, row-major, with the ninth
/// entry fixed at 1 by construction.
///
/// This is the rigorous mapping between two quads. The default rasterizer
/// approximates warps with two affine triangles instead; this type stays
/// available for consumers that need the exact map (the projective warp mode
/// samples through its inverse).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectiveTransform {
    pub m: [f64; 9],
}

impl ProjectiveTransform {
    pub const IDENTITY: Self = Self {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    /// Maps a point through the transform (homogeneous divide included).
    ///
    /// Points on or near the horizon line (w ≈ 0) produce non-finite
    /// coordinates; samplers must treat those as outside the source.
    pub fn apply(&self, p: Point) -> Point {
        let m = &self.m;
        let w = m[6] * p.x + m[7] * p.y + m[8];
        Point::new(
            (m[0] * p.x + m[1] * p.y + m[2]) / w,
            (m[3] * p.x + m[4] * p.y + m[5]) / w,
        )
    }

    /// `self` followed by `other` (i.e. `other * self` in matrix terms),
    /// renormalized so the last entry stays 1.
    pub fn then(&self, other: &Self) -> Self {
        let a = &other.m;
        let b = &self.m;
        let mut out = [0.0f64; 9];
        for row in 0..3 {
            for col in 0..3 {
                let mut sum = 0.0;
                for k in 0..3 {
                    sum += a[row * 3 + k] * b[k * 3 + col];
                }
                out[row * 3 + col] = sum;
            }
        }
        let w = out[8];
        if w.abs() > SINGULAR_EPS {
            for v in &mut out {
                *v /= w;
            }
        }
        Self { m: out }
    }
}

/// Computes the projective transform mapping `src` onto `dst` from the four
/// corner correspondences.
///
/// Builds the standard 8-unknown linear system (h9 fixed at 1) and solves it
/// by Gaussian elimination with partial pivoting. Collinear or coincident
/// corners make the system singular; that is reported as a geometry error,
/// never as NaN coefficients. Callers treat it as "no valid warp for this
/// frame" and skip or hold the previous transform.
pub fn solve(src: &Quad, dst: &Quad) -> QuadkeyResult<ProjectiveTransform> {
    let s = src.corners();
    let d = dst.corners();

    let mut a = [[0.0f64; 8]; 8];
    let mut b = [0.0f64; 8];
    for i in 0..4 {
        let (sx, sy) = (s[i].x, s[i].y);
        let (dx, dy) = (d[i].x, d[i].y);
        a[2 * i] = [sx, sy, 1.0, 0.0, 0.0, 0.0, -sx * dx, -sy * dx];
        a[2 * i + 1] = [0.0, 0.0, 0.0, sx, sy, 1.0, -sx * dy, -sy * dy];
        b[2 * i] = dx;
        b[2 * i + 1] = dy;
    }

    let h = solve_linear_8(&mut a, &mut b)?;

    let t = ProjectiveTransform {
        m: [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0],
    };

    // The linear system can stay well-conditioned while the resulting map is
    // rank-deficient (e.g. three collinear destination corners collapse the
    // plane onto a line). Catch that on the 3x3 determinant.
    let scale = t.m.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
    if det3(&t.m).abs() <= SINGULAR_EPS * scale * scale * scale {
        return Err(QuadkeyError::geometry(
            "degenerate correspondence: resulting homography is rank-deficient \
             (three or more corners collinear)",
        ));
    }

    Ok(t)
}

fn det3(m: &[f64; 9]) -> f64 {
    m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6])
}

/// Gaussian elimination with partial pivoting over an 8x8 system.
fn solve_linear_8(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> QuadkeyResult<[f64; 8]> {
    let n = 8;

    for i in 0..n {
        // Partial pivot: largest magnitude entry in column i at or below row i.
        let mut max_row = i;
        for j in (i + 1)..n {
            if a[j][i].abs() > a[max_row][i].abs() {
                max_row = j;
            }
        }
        if a[max_row][i].abs() < SINGULAR_EPS {
            return Err(QuadkeyError::geometry(
                "degenerate correspondence: homography system is singular \
                 (collinear or coincident corners)",
            ));
        }
        a.swap(i, max_row);
        b.swap(i, max_row);

        for j in (i + 1)..n {
            let alpha = a[j][i] / a[i][i];
            b[j] -= alpha * b[i];
            for k in i..n {
                a[j][k] -= alpha * a[i][k];
            }
        }
    }

    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += a[i][j] * x[j];
        }
        x[i] = (b[i] - sum) / a[i][i];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(QuadkeyError::geometry(
            "homography solve produced non-finite coefficients",
        ));
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_quad() -> Quad {
        Quad::new((0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0))
    }

    fn convex_quad() -> Quad {
        Quad::new((10.0, 12.0), (88.0, 8.0), (95.0, 92.0), (5.0, 80.0))
    }

    fn assert_close(a: Point, b: Point, tol: f64) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn maps_corners_exactly() {
        let src = unit_quad();
        let dst = convex_quad();
        let t = solve(&src, &dst).unwrap();
        for (s, d) in src.corners().iter().zip(dst.corners()) {
            assert_close(t.apply(*s), d, 1e-9);
        }
    }

    #[test]
    fn forward_then_inverse_is_identity() {
        let src = unit_quad();
        let dst = convex_quad();
        let fwd = solve(&src, &dst).unwrap();
        let inv = solve(&dst, &src).unwrap();
        let round = fwd.then(&inv);

        for p in [
            Point::new(0.25, 0.25),
            Point::new(0.5, 0.9),
            Point::new(0.01, 0.7),
        ] {
            assert_close(round.apply(p), p, 1e-7);
        }
    }

    #[test]
    fn identity_quad_pair_yields_identity() {
        let q = convex_quad();
        let t = solve(&q, &q).unwrap();
        let p = Point::new(42.0, 17.0);
        assert_close(t.apply(p), p, 1e-7);
    }

    #[test]
    fn collinear_destination_is_degenerate() {
        let src = unit_quad();
        // Three destination corners on one line.
        let dst = Quad::new((0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (0.0, 5.0));
        let err = solve(&src, &dst).unwrap_err();
        assert!(err.to_string().contains("geometry error"));
    }

    #[test]
    fn coincident_source_corners_are_degenerate() {
        let src = Quad::new((1.0, 1.0), (1.0, 1.0), (2.0, 2.0), (0.0, 2.0));
        assert!(solve(&src, &convex_quad()).is_err());
    }
}
