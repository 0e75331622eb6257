//! Axis-aligned polygon math shared by every structural pass.
//!
//! Detectors hand us four-corner polygons that are rectangles in practice, so
//! [`PolygonBox`] normalises whatever corners it receives into a rectangle
//! ordered top-left, top-right, bottom-right, bottom-left. All percentage
//! queries on a zero-area box return `0.0` instead of dividing by zero.

use serde::{Deserialize, Serialize};

/// A normalised rectangle stored as four corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolygonBox {
    /// Corners in `[top-left, top-right, bottom-right, bottom-left]` order.
    pub polygon: [[f32; 2]; 4],
}

impl PolygonBox {
    /// Build from arbitrary corners; the result is the bounding rectangle.
    pub fn new(points: [[f32; 2]; 4]) -> Self {
        let xs = points.map(|p| p[0]);
        let ys = points.map(|p| p[1]);
        let x0 = xs.iter().copied().fold(f32::INFINITY, f32::min);
        let x1 = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let y0 = ys.iter().copied().fold(f32::INFINITY, f32::min);
        let y1 = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Self::from_bbox([x0, y0, x1, y1])
    }

    /// Build from `[x0, y0, x1, y1]`, swapping coordinates if they are reversed.
    pub fn from_bbox(bbox: [f32; 4]) -> Self {
        let (x0, x1) = if bbox[0] <= bbox[2] {
            (bbox[0], bbox[2])
        } else {
            (bbox[2], bbox[0])
        };
        let (y0, y1) = if bbox[1] <= bbox[3] {
            (bbox[1], bbox[3])
        } else {
            (bbox[3], bbox[1])
        };
        Self {
            polygon: [[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
        }
    }

    /// Derived `[x0, y0, x1, y1]`.
    pub fn bbox(&self) -> [f32; 4] {
        [
            self.polygon[0][0],
            self.polygon[0][1],
            self.polygon[2][0],
            self.polygon[2][1],
        ]
    }

    pub fn x_start(&self) -> f32 {
        self.polygon[0][0]
    }

    pub fn y_start(&self) -> f32 {
        self.polygon[0][1]
    }

    pub fn x_end(&self) -> f32 {
        self.polygon[2][0]
    }

    pub fn y_end(&self) -> f32 {
        self.polygon[2][1]
    }

    pub fn width(&self) -> f32 {
        self.x_end() - self.x_start()
    }

    pub fn height(&self) -> f32 {
        self.y_end() - self.y_start()
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> [f32; 2] {
        [
            (self.x_start() + self.x_end()) / 2.0,
            (self.y_start() + self.y_end()) / 2.0,
        ]
    }

    pub fn is_degenerate(&self) -> bool {
        self.area() <= 0.0
    }

    /// Union bounding box of all polygons. An empty slice yields a zero box.
    pub fn merge(polygons: &[PolygonBox]) -> PolygonBox {
        let Some(first) = polygons.first() else {
            return PolygonBox::from_bbox([0.0, 0.0, 0.0, 0.0]);
        };
        let mut bbox = first.bbox();
        for p in &polygons[1..] {
            let b = p.bbox();
            bbox[0] = bbox[0].min(b[0]);
            bbox[1] = bbox[1].min(b[1]);
            bbox[2] = bbox[2].max(b[2]);
            bbox[3] = bbox[3].max(b[3]);
        }
        PolygonBox::from_bbox(bbox)
    }

    /// Affine-scale from one coordinate space `(width, height)` into another.
    ///
    /// A zero-sized source space leaves the box unchanged.
    pub fn rescale(&self, from_size: (f32, f32), to_size: (f32, f32)) -> PolygonBox {
        if from_size.0 <= 0.0 || from_size.1 <= 0.0 {
            return *self;
        }
        let sx = to_size.0 / from_size.0;
        let sy = to_size.1 / from_size.1;
        let b = self.bbox();
        PolygonBox::from_bbox([b[0] * sx, b[1] * sy, b[2] * sx, b[3] * sy])
    }

    /// Horizontal overlap length, with `margin` added on both sides.
    pub fn overlap_x(&self, other: &PolygonBox, margin: f32) -> f32 {
        let left = self.x_start().max(other.x_start()) - margin;
        let right = self.x_end().min(other.x_end()) + margin;
        (right - left).max(0.0)
    }

    /// Vertical overlap length, with `margin` added on both sides.
    pub fn overlap_y(&self, other: &PolygonBox, margin: f32) -> f32 {
        let top = self.y_start().max(other.y_start()) - margin;
        let bottom = self.y_end().min(other.y_end()) + margin;
        (bottom - top).max(0.0)
    }

    /// Intersection area. Margins are fractions of the smaller box's width
    /// (`x_margin`) or height (`y_margin`).
    pub fn intersection_area(&self, other: &PolygonBox, x_margin: f32, y_margin: f32) -> f32 {
        let mx = x_margin * self.width().min(other.width());
        let my = y_margin * self.height().min(other.height());
        self.overlap_x(other, mx) * self.overlap_y(other, my)
    }

    /// Fraction of `self` covered by `other`. Directional: `a.intersection_pct(b)`
    /// and `b.intersection_pct(a)` differ when the areas differ.
    pub fn intersection_pct(&self, other: &PolygonBox) -> f32 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other, 0.0, 0.0) / area
    }

    /// Shortest separation between the two rectangles; `0.0` when they touch or overlap.
    pub fn minimum_gap(&self, other: &PolygonBox) -> f32 {
        let dx = (other.x_start() - self.x_end())
            .max(self.x_start() - other.x_end())
            .max(0.0);
        let dy = (other.y_start() - self.y_end())
            .max(self.y_start() - other.y_end())
            .max(0.0);
        if dx > 0.0 && dy > 0.0 {
            (dx * dx + dy * dy).sqrt()
        } else {
            dx.max(dy)
        }
    }

    /// Grow the box by fractions of its own width/height on every side.
    pub fn expand(&self, x_margin: f32, y_margin: f32) -> PolygonBox {
        let mx = self.width() * x_margin;
        let my = self.height() * y_margin;
        let b = self.bbox();
        PolygonBox::from_bbox([b[0] - mx, b[1] - my, b[2] + mx, b[3] + my])
    }

    /// Clamp into `[0, width] x [0, height]`.
    pub fn fit_to_bounds(&self, width: f32, height: f32) -> PolygonBox {
        let b = self.bbox();
        PolygonBox::from_bbox([
            b[0].clamp(0.0, width),
            b[1].clamp(0.0, height),
            b[2].clamp(0.0, width),
            b[3].clamp(0.0, height),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> PolygonBox {
        PolygonBox::from_bbox([x0, y0, x1, y1])
    }

    #[test]
    fn normalises_reversed_corners() {
        let p = rect(10.0, 20.0, 0.0, 5.0);
        assert_eq!(p.bbox(), [0.0, 5.0, 10.0, 20.0]);

        let q = PolygonBox::new([[4.0, 9.0], [1.0, 2.0], [3.0, 7.0], [2.0, 1.0]]);
        assert_eq!(q.bbox(), [1.0, 1.0, 4.0, 9.0]);
    }

    #[test]
    fn self_intersection_is_full() {
        let a = rect(3.0, 4.0, 30.0, 12.0);
        assert!((a.intersection_pct(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_boxes_are_neutral() {
        let line = rect(0.0, 5.0, 10.0, 5.0);
        let other = rect(0.0, 0.0, 10.0, 10.0);
        assert_eq!(line.intersection_pct(&other), 0.0);
        assert_eq!(line.intersection_pct(&line), 0.0);
        assert_eq!(other.intersection_pct(&line), 0.0);
    }

    #[test]
    fn intersection_pct_is_directional() {
        let small = rect(0.0, 0.0, 10.0, 10.0);
        let big = rect(0.0, 0.0, 20.0, 20.0);
        assert!((small.intersection_pct(&big) - 1.0).abs() < 1e-6);
        assert!((big.intersection_pct(&small) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn merge_covers_inputs() {
        let a = rect(0.0, 0.0, 5.0, 5.0);
        let b = rect(10.0, 2.0, 12.0, 20.0);
        let m = PolygonBox::merge(&[a, b]);
        assert_eq!(m.bbox(), [0.0, 0.0, 12.0, 20.0]);
        assert!(m.area() >= a.area());
        assert!(m.area() >= b.area());
    }

    #[test]
    fn rescale_round_trip() {
        let a = rect(12.5, 40.0, 300.25, 512.0);
        let up = a.rescale((100.0, 100.0), (250.0, 250.0));
        let back = up.rescale((250.0, 250.0), (100.0, 100.0));
        for (x, y) in a.bbox().iter().zip(back.bbox().iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn minimum_gap_cases() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.minimum_gap(&rect(5.0, 5.0, 15.0, 15.0)), 0.0);
        assert_eq!(a.minimum_gap(&rect(0.0, 14.0, 10.0, 20.0)), 4.0);
        assert_eq!(a.minimum_gap(&rect(13.0, 0.0, 20.0, 10.0)), 3.0);
        let diag = a.minimum_gap(&rect(13.0, 14.0, 20.0, 20.0));
        assert!((diag - 5.0).abs() < 1e-6);
    }

    #[test]
    fn intersection_margin_uses_smaller_box() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(11.0, 0.0, 31.0, 10.0);
        assert_eq!(a.intersection_area(&b, 0.0, 0.0), 0.0);
        // 10% of the smaller width (10) = 1 on each side bridges the 1pt gap.
        assert!(a.intersection_area(&b, 0.1, 0.0) > 0.0);
    }
}
