// ============================================================================
// SURFACE — canvas-sized RGBA pixel buffer (the "paint device")
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::geometry::IRect;

/// An RGBA pixel buffer covering the whole canvas.
///
/// Every layer, mask and selection in the graph owns one of these.  The
/// buffer is canvas-sized rather than sparse: the engine cares about
/// scheduling and undo correctness, and a flat buffer keeps bit-exact
/// snapshot comparison trivial for transactions and tests.
#[derive(Clone, PartialEq)]
pub struct Surface {
    pixels: RgbaImage,
}

impl Surface {
    /// Create a fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
        }
    }

    pub fn from_image(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, p: Rgba<u8>) {
        if x < self.width() && y < self.height() {
            self.pixels.put_pixel(x, y, p);
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.as_raw().len()
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|p| p[3] == 0)
    }

    /// Fill the whole surface with a single pixel value.
    pub fn fill(&mut self, p: Rgba<u8>) {
        for px in self.pixels.pixels_mut() {
            *px = p;
        }
    }

    /// Clear the whole surface to transparent.
    pub fn clear(&mut self) {
        self.fill(Rgba([0, 0, 0, 0]));
    }

    /// Clear a rectangular region to transparent.
    pub fn clear_rect(&mut self, rect: &IRect) {
        let r = rect.intersect(&self.bounds());
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                self.pixels.put_pixel(x as u32, y as u32, Rgba([0, 0, 0, 0]));
            }
        }
    }

    /// Whole-canvas rect.
    pub fn bounds(&self) -> IRect {
        IRect::new(0, 0, self.width() as i32, self.height() as i32)
    }

    /// Tight bounding rect of all pixels with non-zero alpha.
    /// Empty rect for a blank surface.
    pub fn exact_bounds(&self) -> IRect {
        let (w, h) = (self.width(), self.height());
        let (mut min_x, mut min_y) = (w, h);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        let mut any = false;
        for (x, y, p) in self.pixels.enumerate_pixels() {
            if p[3] != 0 {
                any = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        if !any {
            return IRect::default();
        }
        IRect::from_corners(min_x as i32, min_y as i32, max_x as i32 + 1, max_y as i32 + 1)
    }

    /// Copy of this surface with every pixel's alpha scaled by the mask's
    /// alpha channel.  Pixels outside the mask become transparent.
    pub fn masked_copy(&self, mask: &Surface) -> Surface {
        let mut out = Surface::new(self.width(), self.height());
        for (x, y, p) in self.pixels.enumerate_pixels() {
            let m = if x < mask.width() && y < mask.height() {
                mask.get_pixel(x, y)[3] as u32
            } else {
                0
            };
            if m == 0 {
                continue;
            }
            let a = (p[3] as u32 * m + 127) / 255;
            out.pixels.put_pixel(x, y, Rgba([p[0], p[1], p[2], a as u8]));
        }
        out
    }

    /// Remove the masked portion of this surface: alpha is scaled by the
    /// mask's *inverse*.  With a full-coverage mask this equals `clear()`.
    pub fn clear_masked(&mut self, mask: &Surface) {
        for (x, y, p) in self.pixels.enumerate_pixels_mut() {
            let m = if x < mask.width() && y < mask.height() {
                mask.get_pixel(x, y)[3] as u32
            } else {
                0
            };
            if m == 0 {
                continue;
            }
            let a = p[3] as u32 * (255 - m) / 255;
            p[3] = a as u8;
        }
    }

    /// Composite `src` over `self` (straight-alpha "over" operator).
    pub fn alpha_over(&mut self, src: &Surface) {
        self.alpha_over_with_opacity(src, 1.0);
    }

    /// Composite `src` over `self` with an extra global opacity factor.
    pub fn alpha_over_with_opacity(&mut self, src: &Surface, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        for (x, y, sp) in src.pixels.enumerate_pixels() {
            if x >= self.width() || y >= self.height() {
                continue;
            }
            let sa = sp[3] as f32 / 255.0 * opacity;
            if sa <= 0.0 {
                continue;
            }
            let dp = self.pixels.get_pixel_mut(x, y);
            let da = dp[3] as f32 / 255.0;
            let oa = sa + da * (1.0 - sa);
            if oa <= 0.0 {
                continue;
            }
            for c in 0..3 {
                let sc = sp[c] as f32;
                let dc = dp[c] as f32;
                dp[c] = ((sc * sa + dc * da * (1.0 - sa)) / oa).round().clamp(0.0, 255.0) as u8;
            }
            dp[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    }

    /// Paint `color` over every pixel covered by `mask`, with the color's
    /// alpha scaled by the mask's coverage.  Renders selection pixels as an
    /// overlay instead of as content.
    pub fn tint_masked(&mut self, mask: &Surface, color: Rgba<u8>) {
        for (x, y, mp) in mask.pixels.enumerate_pixels() {
            if x >= self.width() || y >= self.height() {
                continue;
            }
            let sa = color[3] as f32 / 255.0 * (mp[3] as f32 / 255.0);
            if sa <= 0.0 {
                continue;
            }
            let dp = self.pixels.get_pixel_mut(x, y);
            let da = dp[3] as f32 / 255.0;
            let oa = sa + da * (1.0 - sa);
            if oa <= 0.0 {
                continue;
            }
            for c in 0..3 {
                let sc = color[c] as f32;
                let dc = dp[c] as f32;
                dp[c] = ((sc * sa + dc * da * (1.0 - sa)) / oa).round().clamp(0.0, 255.0) as u8;
            }
            dp[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("exact_bounds", &self.exact_bounds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> Surface {
        let mut s = Surface::new(w, h);
        for y in 0..h {
            for x in 0..w {
                if (x + y) % 2 == 0 {
                    s.put_pixel(x, y, Rgba([200, 10, 10, 255]));
                }
            }
        }
        s
    }

    #[test]
    fn exact_bounds_tight() {
        let mut s = Surface::new(16, 16);
        s.put_pixel(3, 4, Rgba([1, 2, 3, 255]));
        s.put_pixel(10, 12, Rgba([1, 2, 3, 9]));
        assert_eq!(s.exact_bounds(), IRect::from_corners(3, 4, 11, 13));
    }

    #[test]
    fn masked_copy_then_clear_masked_partitions_pixels() {
        let src = checker(8, 8);
        let mut mask = Surface::new(8, 8);
        for y in 0..8 {
            for x in 0..4 {
                mask.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let copied = src.masked_copy(&mask);
        let mut rest = src.clone();
        rest.clear_masked(&mask);

        // Masked half moved to the copy, unmasked half stayed behind.
        assert!(copied.exact_bounds().right() <= 4);
        assert!(rest.exact_bounds().x >= 4);
    }

    #[test]
    fn tint_masked_covers_only_masked_pixels() {
        let mut out = Surface::new(4, 4);
        let mut mask = Surface::new(4, 4);
        mask.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        out.tint_masked(&mask, Rgba([255, 0, 0, 128]));
        assert_eq!(out.get_pixel(1, 1), Rgba([255, 0, 0, 128]));
        assert_eq!(out.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn alpha_over_opaque_replaces() {
        let mut dst = Surface::new(4, 4);
        dst.fill(Rgba([0, 0, 255, 255]));
        let mut src = Surface::new(4, 4);
        src.fill(Rgba([255, 0, 0, 255]));
        dst.alpha_over(&src);
        assert_eq!(dst.get_pixel(1, 1), Rgba([255, 0, 0, 255]));
    }
}
