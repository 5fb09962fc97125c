//! Clip rectangle and camera state applied to every draw and fill.

/// Logical rectangle as last requested by the script, before clamping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Effective half-open clip region, always inside the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipRegion {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// A destination rectangle after clipping, plus the offset into the source
/// that its top-left corner corresponds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub x: i32,
    pub y: i32,
    pub src_x: i32,
    pub src_y: i32,
    pub w: i32,
    pub h: i32,
}

impl ClipRegion {
    pub fn full(width: i32, height: i32) -> Self {
        ClipRegion {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    /// Region for a requested rect. Non-positive sizes collapse to the point
    /// `(x, y)`, which contains no pixels.
    pub fn from_rect(rect: Rect, width: i32, height: i32) -> Self {
        if rect.w > 0 && rect.h > 0 {
            let x1 = rect.x.saturating_add(rect.w).min(width);
            let y1 = rect.y.saturating_add(rect.h).min(height);
            let x0 = rect.x.max(0);
            let y0 = rect.y.max(0);
            ClipRegion {
                x0,
                y0,
                x1: x1.max(x0),
                y1: y1.max(y0),
            }
        } else {
            ClipRegion {
                x0: rect.x,
                y0: rect.y,
                x1: rect.x,
                y1: rect.y,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// Intersect a `w`×`h` rect at `(x, y)` with the region. Returns `None`
    /// when nothing is visible.
    pub fn clip(&self, x: i32, y: i32, w: i32, h: i32) -> Option<Span> {
        let left = x.max(self.x0);
        let right = x.saturating_add(w).min(self.x1);
        if right <= left {
            return None;
        }
        let top = y.max(self.y0);
        let bottom = y.saturating_add(h).min(self.y1);
        if bottom <= top {
            return None;
        }
        Some(Span {
            x: left,
            y: top,
            src_x: left - x,
            src_y: top - y,
            w: right - left,
            h: bottom - top,
        })
    }
}

/// Signed offset added to draw coordinates before clipping.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    pub x: f64,
    pub y: f64,
}

impl Camera {
    /// Apply the offset to a script coordinate pair.
    pub fn apply(&self, x: f64, y: f64) -> (i32, i32) {
        ((x + self.x).floor() as i32, (y + self.y).floor() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rect_clamps_to_bounds() {
        let r = ClipRegion::from_rect(Rect { x: -4, y: 2, w: 20, h: 3 }, 8, 8);
        assert_eq!(r, ClipRegion { x0: 0, y0: 2, x1: 8, y1: 5 });
    }

    #[test]
    fn non_positive_size_collapses_to_point() {
        let r = ClipRegion::from_rect(Rect { x: 3, y: 4, w: 0, h: 5 }, 8, 8);
        assert!(r.is_empty());
        assert_eq!((r.x0, r.y0), (3, 4));
        assert_eq!(r.clip(0, 0, 8, 8), None);
    }

    #[test]
    fn rect_fully_outside_bounds_is_empty() {
        let r = ClipRegion::from_rect(Rect { x: 10, y: 10, w: 4, h: 4 }, 8, 8);
        assert!(r.is_empty());
    }

    #[test]
    fn clip_reports_source_offset() {
        let r = ClipRegion::full(8, 8);
        let span = r.clip(-2, 6, 4, 4).unwrap();
        assert_eq!(span, Span { x: 0, y: 6, src_x: 2, src_y: 0, w: 2, h: 2 });
    }

    #[test]
    fn camera_floors_fractional_offsets() {
        let cam = Camera { x: -0.5, y: 1.75 };
        assert_eq!(cam.apply(0.0, 0.0), (-1, 1));
    }
}
