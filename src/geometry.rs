// ============================================================================
// GEOMETRY — integer rects and 3×3 matrices for dirty-region bookkeeping
// ============================================================================

use serde::{Deserialize, Serialize};

/// Axis-aligned integer rectangle in canvas pixel coordinates.
///
/// Empty rects are normalised to all-zero so that `union` with an empty rect
/// is the identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl IRect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        if w <= 0 || h <= 0 {
            return Self::default();
        }
        Self { x, y, w, h }
    }

    /// Rect from inclusive min / exclusive max corners.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn union(&self, other: &IRect) -> IRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        IRect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn intersect(&self, other: &IRect) -> IRect {
        IRect::from_corners(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        )
    }

    /// Grow the rect by `d` pixels on every side.
    pub fn grown(&self, d: i32) -> IRect {
        if self.is_empty() {
            return *self;
        }
        IRect::new(self.x - d, self.y - d, self.w + 2 * d, self.h + 2 * d)
    }

    pub fn translated(&self, dx: i32, dy: i32) -> IRect {
        IRect::new(self.x + dx, self.y + dy, self.w, self.h)
    }
}

// ============================================================================
// 3×3 MATRIX — affine / projective maps for external-layer transforms
// ============================================================================

/// Row-major 3×3 matrix.  Used for external (non-raster) layers that carry a
/// native transform instead of resampled pixels, and for mapping dirty rects
/// through a transform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mat3(pub [[f32; 3]; 3]);

impl Default for Mat3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mat3 {
    pub fn identity() -> Self {
        Mat3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// 2D affine map: rotate by `rot` radians and scale about `(cx, cy)`,
    /// then translate by `(dx, dy)`.
    pub fn rotate_scale_about(rot: f32, sx: f32, sy: f32, cx: f32, cy: f32, dx: f32, dy: f32) -> Self {
        let (s, c) = rot.sin_cos();
        let (a, b) = (c * sx, -s * sy);
        let (d, e) = (s * sx, c * sy);
        // translate(-c) then rotate/scale then translate(c + offset)
        Mat3([
            [a, b, cx + dx - a * cx - b * cy],
            [d, e, cy + dy - d * cx - e * cy],
            [0.0, 0.0, 1.0],
        ])
    }

    pub fn mul(&self, o: &Mat3) -> Mat3 {
        let mut r = [[0.0f32; 3]; 3];
        for (i, row) in r.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.0[i][k] * o.0[k][j]).sum();
            }
        }
        Mat3(r)
    }

    /// Invert the matrix.  Returns identity on singular input.
    pub fn invert(&self) -> Mat3 {
        let m = &self.0;
        let (a, b, c) = (m[0][0], m[0][1], m[0][2]);
        let (d, e, f) = (m[1][0], m[1][1], m[1][2]);
        let (g, h, i) = (m[2][0], m[2][1], m[2][2]);

        let det = a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g);
        if det.abs() < 1e-12 {
            return Mat3::identity();
        }
        let inv = 1.0 / det;
        Mat3([
            [(e * i - f * h) * inv, (c * h - b * i) * inv, (b * f - c * e) * inv],
            [(f * g - d * i) * inv, (a * i - c * g) * inv, (c * d - a * f) * inv],
            [(d * h - e * g) * inv, (b * g - a * h) * inv, (a * e - b * d) * inv],
        ])
    }

    /// Map a point through the projective transform.
    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        let w = if w.abs() < 1e-8 { 1.0 } else { w };
        (
            (m[0][0] * x + m[0][1] * y + m[0][2]) / w,
            (m[1][0] * x + m[1][1] * y + m[1][2]) / w,
        )
    }

    /// Axis-aligned bounding rect of the mapped corners of `r`.
    pub fn map_rect(&self, r: &IRect) -> IRect {
        if r.is_empty() {
            return *r;
        }
        let corners = [
            self.map_point(r.x as f32, r.y as f32),
            self.map_point(r.right() as f32, r.y as f32),
            self.map_point(r.x as f32, r.bottom() as f32),
            self.map_point(r.right() as f32, r.bottom() as f32),
        ];
        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        IRect::from_corners(
            min_x.floor() as i32,
            min_y.floor() as i32,
            max_x.ceil() as i32,
            max_y.ceil() as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_with_empty_is_identity() {
        let r = IRect::new(3, 4, 10, 10);
        assert_eq!(r.union(&IRect::default()), r);
        assert_eq!(IRect::default().union(&r), r);
    }

    #[test]
    fn intersect_disjoint_is_empty() {
        let a = IRect::new(0, 0, 5, 5);
        let b = IRect::new(10, 10, 5, 5);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn mat3_invert_roundtrip() {
        let m = Mat3::rotate_scale_about(0.7, 2.0, 2.0, 50.0, 50.0, 3.0, -4.0);
        let inv = m.invert();
        let (x, y) = m.map_point(12.0, 34.0);
        let (bx, by) = inv.map_point(x, y);
        assert!((bx - 12.0).abs() < 1e-3 && (by - 34.0).abs() < 1e-3);
    }

    #[test]
    fn map_rect_identity() {
        let r = IRect::new(1, 2, 3, 4);
        assert_eq!(Mat3::identity().map_rect(&r), r);
    }
}
