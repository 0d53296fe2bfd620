//! Page geometry.
//!
//! All boxes use a top-left origin: `top` grows downwards. PDF pages are
//! measured in points, raster pages in pixels. Conversion to pdfium's
//! bottom-left origin happens only at the drawing boundary in
//! [`crate::pipeline::pdf`].

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box with top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub top: f32,
    pub x1: f32,
    pub bottom: f32,
}

impl BBox {
    pub fn new(x0: f32, top: f32, x1: f32, bottom: f32) -> Self {
        Self {
            x0,
            top,
            x1,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            top: self.top.min(other.top),
            x1: self.x1.max(other.x1),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Grow every edge by `margin`.
    pub fn expand(&self, margin: f32) -> BBox {
        BBox {
            x0: self.x0 - margin,
            top: self.top - margin,
            x1: self.x1 + margin,
            bottom: self.bottom + margin,
        }
    }

    /// Clamp to `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: f32, height: f32) -> BBox {
        BBox {
            x0: self.x0.clamp(0.0, width),
            top: self.top.clamp(0.0, height),
            x1: self.x1.clamp(0.0, width),
            bottom: self.bottom.clamp(0.0, height),
        }
    }

    /// True when `other` lies entirely inside `self` (edges may touch).
    pub fn contains(&self, other: &BBox) -> bool {
        self.x0 <= other.x0 && self.top <= other.top && self.x1 >= other.x1 && self.bottom >= other.bottom
    }

    /// True when the box lies inside a `width × height` page.
    pub fn within_page(&self, width: f32, height: f32) -> bool {
        self.x0 >= 0.0 && self.top >= 0.0 && self.x1 <= width && self.bottom <= height
    }

    /// Interior intersection. Boxes that only share an edge do not overlap.
    pub fn overlaps(&self, other: &BBox) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.top < other.bottom && other.top < self.bottom
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.overlaps(other) {
            return None;
        }
        Some(BBox {
            x0: self.x0.max(other.x0),
            top: self.top.max(other.top),
            x1: self.x1.min(other.x1),
            bottom: self.bottom.min(other.bottom),
        })
    }

    /// Intersection over union, 0.0 for disjoint boxes.
    pub fn iou(&self, other: &BBox) -> f32 {
        let Some(inter) = self.intersection(other) else {
            return 0.0;
        };
        let inter_area = inter.area();
        let union_area = self.area() + other.area() - inter_area;
        if union_area <= 0.0 {
            0.0
        } else {
            inter_area / union_area
        }
    }

    /// Scale every coordinate, used to map OCR pixels onto page units.
    pub fn scale(&self, sx: f32, sy: f32) -> BBox {
        BBox {
            x0: self.x0 * sx,
            top: self.top * sy,
            x1: self.x1 * sx,
            bottom: self.bottom * sy,
        }
    }
}

/// Union of a non-empty sequence of boxes.
pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<BBox> {
    boxes.into_iter().fold(None, |acc, b| match acc {
        None => Some(*b),
        Some(u) => Some(u.union(b)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_dimensions() {
        let b = BBox::new(10.0, 20.0, 50.0, 60.0);
        assert_eq!(b.width(), 40.0);
        assert_eq!(b.height(), 40.0);
        assert_eq!(b.area(), 1600.0);
    }

    #[test]
    fn test_expand_contains_source() {
        let b = BBox::new(10.0, 20.0, 30.0, 25.0);
        let e = b.expand(1.5);
        assert!(e.contains(&b));
        assert_eq!(e.x0, 8.5);
        assert_eq!(e.bottom, 26.5);
    }

    #[test]
    fn test_touching_boxes_do_not_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(!a.overlaps(&b));
        assert!(a.intersection(&b).is_none());
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_and_within_page() {
        let b = BBox::new(-2.0, 5.0, 700.0, 20.0);
        assert!(!b.within_page(612.0, 792.0));
        let c = b.clamp_to(612.0, 792.0);
        assert!(c.within_page(612.0, 792.0));
        assert_eq!(c.x0, 0.0);
        assert_eq!(c.x1, 612.0);
    }

    #[test]
    fn test_union_all() {
        let boxes = [BBox::new(0.0, 0.0, 1.0, 1.0), BBox::new(5.0, -1.0, 6.0, 2.0)];
        let u = union_all(boxes.iter()).unwrap();
        assert_eq!(u, BBox::new(0.0, -1.0, 6.0, 2.0));
        assert!(union_all(std::iter::empty()).is_none());
    }
}
