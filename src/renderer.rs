use kurbo::Point;

use crate::{
    chroma::ChromaKeySpec,
    error::{QuadkeyError, QuadkeyResult},
    geometry::Quad,
    homography,
    surface::Surface,
};

/// Triangles with area below this are not rasterized.
const DEGENERATE_TRI_EPS: f64 = 1e-9;

/// Which logical layer a texture slot belongs to. Slots are cached per role
/// so repeated renders of the same source reuse the same allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerRole {
    Background,
    Foreground,
}

/// How a quad is warped onto the surface.
///
/// `Triangles` is the shipped default: two affine-interpolated triangles.
/// Visually acceptable for moderate perspective, but not the same transform
/// as the projective solver's output. `Projective` samples through the
/// inverse homography per pixel: exact, slower.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WarpMode {
    #[default]
    Triangles,
    Projective,
}

/// Borrowed straight-alpha RGBA8 source pixels for one layer.
#[derive(Clone, Copy, Debug)]
pub struct LayerSource<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

impl<'a> LayerSource<'a> {
    pub fn new(width: u32, height: u32, rgba: &'a [u8]) -> QuadkeyResult<Self> {
        if width == 0 || height == 0 {
            return Err(QuadkeyError::render("layer source has zero dimensions"));
        }
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(QuadkeyError::render(
                "layer source byte length does not match width*height*4",
            ));
        }
        Ok(Self { width, height, rgba })
    }
}

/// Per-call renderer input, constructed fresh for every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderRequest<'a> {
    /// Drawn first, warped into the active quad, never chroma-keyed.
    pub background: Option<LayerSource<'a>>,
    /// Drawn second across the entire surface, keyed if a spec is present.
    pub foreground: Option<LayerSource<'a>>,
    pub quad: Option<Quad>,
    pub chroma_key: Option<ChromaKeySpec>,
}

#[derive(Debug)]
struct TextureSlot {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// The long-lived rendering context: one per process, passed to every render
/// call. Owns the per-role texture slots for its whole lifetime.
///
/// The slots are purely a performance path: a full reallocation happens only
/// when a source's pixel dimensions change, otherwise pixels are copied in
/// place. Rendered output must be identical either way, and a slot never
/// carries content between unrelated sources (every upload overwrites the
/// full slot).
///
/// Not safe for concurrent render calls; the two layer draws within one call
/// are strictly sequential.
#[derive(Debug, Default)]
pub struct RendererContext {
    background: Option<TextureSlot>,
    foreground: Option<TextureSlot>,
    warp_mode: WarpMode,
}

impl RendererContext {
    pub fn new(warp_mode: WarpMode) -> Self {
        Self {
            background: None,
            foreground: None,
            warp_mode,
        }
    }

    pub fn warp_mode(&self) -> WarpMode {
        self.warp_mode
    }

    /// Composites the requested layers into `surface`.
    ///
    /// The surface is always cleared to transparent first. A request whose
    /// quad is missing or has non-finite corners aborts the whole call as a
    /// no-op, leaving the surface cleared. A missing layer source skips that
    /// layer only.
    pub fn render(&mut self, surface: &mut Surface, req: &RenderRequest<'_>) -> QuadkeyResult<()> {
        surface.clear();

        let Some(quad) = req.quad else {
            tracing::debug!("render skipped: no active quad");
            return Ok(());
        };
        if !quad.is_finite() {
            tracing::debug!("render skipped: quad has non-finite corners");
            return Ok(());
        }

        if let Some(src) = req.background {
            self.upload(LayerRole::Background, &src)?;
            self.draw_layer(surface, LayerRole::Background, &quad, None)?;
        } else {
            tracing::debug!("background layer missing, skipped");
        }

        if let Some(src) = req.foreground {
            self.upload(LayerRole::Foreground, &src)?;
            self.draw_layer(
                surface,
                LayerRole::Foreground,
                &Quad::full_surface(),
                req.chroma_key.as_ref(),
            )?;
        } else {
            tracing::debug!("foreground layer missing, skipped");
        }

        Ok(())
    }

    /// Copies source pixels into the role's slot, reallocating only on a
    /// dimension change.
    fn upload(&mut self, role: LayerRole, src: &LayerSource<'_>) -> QuadkeyResult<()> {
        LayerSource::new(src.width, src.height, src.rgba)?;

        let slot = match role {
            LayerRole::Background => &mut self.background,
            LayerRole::Foreground => &mut self.foreground,
        };
        match slot {
            Some(tex) if tex.width == src.width && tex.height == src.height => {
                tex.pixels.copy_from_slice(src.rgba);
            }
            _ => {
                *slot = Some(TextureSlot {
                    width: src.width,
                    height: src.height,
                    pixels: src.rgba.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn draw_layer(
        &self,
        surface: &mut Surface,
        role: LayerRole,
        quad: &Quad,
        chroma: Option<&ChromaKeySpec>,
    ) -> QuadkeyResult<()> {
        let slot = match role {
            LayerRole::Background => self.background.as_ref(),
            LayerRole::Foreground => self.foreground.as_ref(),
        };
        let Some(tex) = slot else {
            return Err(QuadkeyError::render("layer texture slot not uploaded"));
        };

        match self.warp_mode {
            WarpMode::Triangles => draw_quad_triangles(surface, tex, quad, chroma),
            WarpMode::Projective => draw_quad_projective(surface, tex, quad, chroma),
        }
    }
}

struct Vertex {
    pos: Point, // pixel space
    uv: Point,  // texture space, 0..1
}

/// The default warp: the quad split into `(tl, tr, bl)` and `(bl, tr, br)`
/// with affine-interpolated texture coordinates across each triangle.
///
/// The pass rasterizes both triangles in one sweep over the quad's bounding
/// box. Each pixel is assigned to exactly one triangle by the sign of a
/// single shared bl-tr edge function; evaluating that edge once per pixel
/// (rather than once per triangle with swapped operands) keeps the seam free
/// of double-composited or dropped pixels, since the two evaluations are not
/// exact IEEE negations of each other.
fn draw_quad_triangles(
    surface: &mut Surface,
    tex: &TextureSlot,
    quad: &Quad,
    chroma: Option<&ChromaKeySpec>,
) -> QuadkeyResult<()> {
    let [tl, tr, br, bl] = quad.to_pixels(surface.width(), surface.height());

    let v = |pos: Point, u: f64, vv: f64| Vertex {
        pos,
        uv: Point::new(u, vv),
    };
    let tri_a = [v(tl, 0.0, 0.0), v(tr, 1.0, 0.0), v(bl, 0.0, 1.0)];
    let tri_b = [v(bl, 0.0, 1.0), v(tr, 1.0, 0.0), v(br, 1.0, 1.0)];
    let area_a = edge(tri_a[0].pos, tri_a[1].pos, tri_a[2].pos);
    let area_b = edge(tri_b[0].pos, tri_b[1].pos, tri_b[2].pos);
    // which side of the diagonal the first triangle's apex lies on
    let apex_a = edge(bl, tr, tl);

    let (w, h) = (surface.width(), surface.height());
    let xs = [tl.x, tr.x, br.x, bl.x];
    let ys = [tl.y, tr.y, br.y, bl.y];
    let min_x = xs.iter().fold(f64::INFINITY, |m, &x| m.min(x)).floor().max(0.0) as u32;
    let min_y = ys.iter().fold(f64::INFINITY, |m, &y| m.min(y)).floor().max(0.0) as u32;
    let max_x = (xs.iter().fold(f64::NEG_INFINITY, |m, &x| m.max(x)).ceil() as i64)
        .clamp(0, i64::from(w)) as u32;
    let max_y = (ys.iter().fold(f64::NEG_INFINITY, |m, &y| m.max(y)).ceil() as i64)
        .clamp(0, i64::from(h)) as u32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            // one owner per pixel; the diagonal itself goes to the second
            // triangle
            let d = edge(bl, tr, p);
            let (tri, area) = if d * apex_a > 0.0 {
                (&tri_a, area_a)
            } else {
                (&tri_b, area_b)
            };
            if area.abs() < DEGENERATE_TRI_EPS {
                continue;
            }

            // barycentric weights, winding-agnostic via the signed area
            let w0 = edge(tri[1].pos, tri[2].pos, p) / area;
            let w1 = edge(tri[2].pos, tri[0].pos, p) / area;
            let w2 = edge(tri[0].pos, tri[1].pos, p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }

            let uv = Point::new(
                w0 * tri[0].uv.x + w1 * tri[1].uv.x + w2 * tri[2].uv.x,
                w0 * tri[0].uv.y + w1 * tri[1].uv.y + w2 * tri[2].uv.y,
            );
            let rgba = shade(tex, uv, chroma);
            surface.blend_pixel_straight(x, y, rgba);
        }
    }
    Ok(())
}

/// The exact warp: inverse-homography sampling per pixel. A degenerate quad
/// (no valid warp this frame) skips the layer rather than failing the call.
fn draw_quad_projective(
    surface: &mut Surface,
    tex: &TextureSlot,
    quad: &Quad,
    chroma: Option<&ChromaKeySpec>,
) -> QuadkeyResult<()> {
    let unit = Quad::new((0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0));
    let to_uv = match homography::solve(quad, &unit) {
        Ok(t) => t,
        Err(err) => {
            tracing::warn!(%err, "projective warp skipped for this layer");
            return Ok(());
        }
    };

    let (w, h) = (surface.width(), surface.height());
    let px = quad.to_pixels(w, h);
    let min_x = px.iter().fold(f64::INFINITY, |m, p| m.min(p.x)).floor().max(0.0) as u32;
    let min_y = px.iter().fold(f64::INFINITY, |m, p| m.min(p.y)).floor().max(0.0) as u32;
    let max_x = (px.iter().fold(f64::NEG_INFINITY, |m, p| m.max(p.x)).ceil() as i64)
        .clamp(0, i64::from(w)) as u32;
    let max_y = (px.iter().fold(f64::NEG_INFINITY, |m, p| m.max(p.y)).ceil() as i64)
        .clamp(0, i64::from(h)) as u32;

    let sx = 100.0 / f64::from(w);
    let sy = 100.0 / f64::from(h);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let pct = Point::new((f64::from(x) + 0.5) * sx, (f64::from(y) + 0.5) * sy);
            let uv = to_uv.apply(pct);
            if !uv.x.is_finite() || !uv.y.is_finite() {
                continue;
            }
            if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
                continue;
            }
            let rgba = shade(tex, uv, chroma);
            surface.blend_pixel_straight(x, y, rgba);
        }
    }
    Ok(())
}

fn edge(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Samples the texture and applies the chroma-key alpha, returning a
/// straight-alpha RGBA8 pixel.
fn shade(tex: &TextureSlot, uv: Point, chroma: Option<&ChromaKeySpec>) -> [u8; 4] {
    let mut rgba = sample_bilinear(tex, uv);
    if let Some(spec) = chroma {
        let alpha = spec.alpha_for_rgb8(rgba[0], rgba[1], rgba[2]);
        rgba[3] = (f32::from(rgba[3]) * alpha).round().clamp(0.0, 255.0) as u8;
    }
    rgba
}

/// Bilinear sample with clamp-to-edge addressing.
fn sample_bilinear(tex: &TextureSlot, uv: Point) -> [u8; 4] {
    let w = tex.width as i64;
    let h = tex.height as i64;

    let fx = uv.x.clamp(0.0, 1.0) * f64::from(tex.width) - 0.5;
    let fy = uv.y.clamp(0.0, 1.0) * f64::from(tex.height) - 0.5;
    let x0 = fx.floor() as i64;
    let y0 = fy.floor() as i64;
    let tx = (fx - fx.floor()) as f32;
    let ty = (fy - fy.floor()) as f32;

    let texel = |x: i64, y: i64| -> [u8; 4] {
        let x = x.clamp(0, w - 1) as usize;
        let y = y.clamp(0, h - 1) as usize;
        let i = (y * tex.width as usize + x) * 4;
        [
            tex.pixels[i],
            tex.pixels[i + 1],
            tex.pixels[i + 2],
            tex.pixels[i + 3],
        ]
    };

    let c00 = texel(x0, y0);
    let c10 = texel(x0 + 1, y0);
    let c01 = texel(x0, y0 + 1);
    let c11 = texel(x0 + 1, y0 + 1);

    let mut out = [0u8; 4];
    for i in 0..4 {
        let top = f32::from(c00[i]) + (f32::from(c10[i]) - f32::from(c00[i])) * tx;
        let bot = f32::from(c01[i]) + (f32::from(c11[i]) - f32::from(c01[i])) * tx;
        out[i] = (top + (bot - top) * ty).round().clamp(0.0, 255.0) as u8;
    }
    out
}
