use crate::error::{QuadkeyError, QuadkeyResult};

/// An output surface: premultiplied RGBA8, row-major, tightly packed.
///
/// Premultiplied alpha is the crate-wide pixel contract; anything handed to
/// an encoder is flattened to opaque first.
#[derive(Clone, Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> QuadkeyResult<Self> {
        if width == 0 || height == 0 {
            return Err(QuadkeyError::validation(
                "surface width/height must be non-zero",
            ));
        }
        Ok(Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Clears every pixel to fully transparent.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Composites one straight-alpha source pixel over the surface
    /// (converted to premultiplied on the way in).
    pub fn blend_pixel_straight(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let src = premultiply(rgba);
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let dst = [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]];
        let out = over(dst, src);
        self.data[i..i + 4].copy_from_slice(&out);
    }

    /// Flattens the surface over an opaque background color, producing
    /// straight (and fully opaque) RGBA8 suitable for JPEG/encoder input.
    pub fn flatten_to_opaque(&self, bg_rgb: [u8; 3]) -> Vec<u8> {
        let mut out = vec![0u8; self.data.len()];
        let bg = [
            u16::from(bg_rgb[0]),
            u16::from(bg_rgb[1]),
            u16::from(bg_rgb[2]),
        ];
        for (d, s) in out.chunks_exact_mut(4).zip(self.data.chunks_exact(4)) {
            let a = u16::from(s[3]);
            if a == 255 {
                d.copy_from_slice(s);
                continue;
            }
            let inv = 255 - a;
            for c in 0..3 {
                // src is premultiplied, so the source term is used as-is
                d[c] = (u16::from(s[c]) + mul_div255(bg[c], inv)).min(255) as u8;
            }
            d[3] = 255;
        }
        out
    }
}

/// Premultiplied source-over-destination.
pub fn over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 {
        return src;
    }
    let inv = 255u16 - u16::from(src[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = (u16::from(src[i]) + mul_div255(u16::from(dst[i]), inv)).min(255) as u8;
    }
    out
}

pub fn premultiply(rgba: [u8; 4]) -> [u8; 4] {
    let a = u16::from(rgba[3]);
    if a == 255 {
        return rgba;
    }
    [
        mul_div255(u16::from(rgba[0]), a) as u8,
        mul_div255(u16::from(rgba[1]), a) as u8,
        mul_div255(u16::from(rgba[2]), a) as u8,
        rgba[3],
    ]
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_surface_is_transparent() {
        let s = Surface::new(4, 3).unwrap();
        assert_eq!(s.data().len(), 48);
        assert!(s.data().iter().all(|&b| b == 0));
        assert!(Surface::new(0, 3).is_err());
    }

    #[test]
    fn over_src_transparent_is_noop() {
        let dst = [10, 20, 30, 40];
        assert_eq!(over(dst, [255, 255, 255, 0]), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        let src = [255, 0, 0, 255];
        assert_eq!(over([0, 0, 0, 255], src), src);
    }

    #[test]
    fn blend_converts_straight_to_premultiplied() {
        let mut s = Surface::new(1, 1).unwrap();
        // straight 50% white => premul (128,128,128,128)
        s.blend_pixel_straight(0, 0, [255, 255, 255, 128]);
        assert_eq!(s.pixel(0, 0), [128, 128, 128, 128]);
    }

    #[test]
    fn flatten_blends_over_background() {
        let mut s = Surface::new(1, 1).unwrap();
        s.blend_pixel_straight(0, 0, [255, 0, 0, 128]);
        let flat = s.flatten_to_opaque([0, 0, 0]);
        assert_eq!(&flat[..], &[128, 0, 0, 255]);

        let s2 = Surface::new(1, 1).unwrap();
        let flat2 = s2.flatten_to_opaque([9, 8, 7]);
        assert_eq!(&flat2[..], &[9, 8, 7, 255]);
    }

    #[test]
    fn out_of_bounds_blend_is_ignored() {
        let mut s = Surface::new(2, 2).unwrap();
        s.blend_pixel_straight(5, 5, [255, 255, 255, 255]);
        assert!(s.data().iter().all(|&b| b == 0));
    }
}
