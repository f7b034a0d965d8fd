//! Covered/Selected grid at native resolution.
//!
//! The grid is the single source of truth for the selection. The translucent
//! on-screen overlay and the exported black/transparent mask are both derived from
//! it, so neither depends on compositing order.

use crate::geometry::NativePoint;
use image::{Rgba, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Overlay present: "do not edit here".
    Covered,
    /// Overlay removed: part of the region of interest.
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRaster {
    width: u32,
    height: u32,
    selected: Vec<bool>,
}

impl MaskRaster {
    /// Fresh mask with every pixel covered.
    pub fn covered(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            selected: vec![false; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize) * (self.width as usize) + x as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Coverage> {
        self.index(x, y).map(|idx| {
            if self.selected[idx] {
                Coverage::Selected
            } else {
                Coverage::Covered
            }
        })
    }

    pub fn is_selected(&self, x: u32, y: u32) -> bool {
        self.get(x, y) == Some(Coverage::Selected)
    }

    /// Returns true when the pixel changed state.
    pub fn set(&mut self, x: u32, y: u32, value: Coverage) -> bool {
        let Some(idx) = self.index(x, y) else {
            return false;
        };
        let next = value == Coverage::Selected;
        let changed = self.selected[idx] != next;
        self.selected[idx] = next;
        changed
    }

    pub fn selected_count(&self) -> u64 {
        self.selected.iter().filter(|s| **s).count() as u64
    }

    pub fn pixel_count(&self) -> u64 {
        self.selected.len() as u64
    }

    pub fn is_fully_covered(&self) -> bool {
        self.selected.iter().all(|s| !*s)
    }

    pub fn is_fully_selected(&self) -> bool {
        self.selected.iter().all(|s| *s)
    }

    /// Round stamp of the given diameter. A pixel belongs to the disc when its
    /// centre lies within the radius. Returns the number of pixels that changed.
    pub fn stamp_disc(&mut self, center: NativePoint, diameter: f64, value: Coverage) -> u64 {
        if self.width == 0 || self.height == 0 || !center.x.is_finite() || !center.y.is_finite() {
            return 0;
        }
        let radius = (diameter / 2.0).max(0.5);
        let Some((min_x, max_x)) = pixel_span(center.x - radius, center.x + radius, self.width)
        else {
            return 0;
        };
        let Some((min_y, max_y)) = pixel_span(center.y - radius, center.y + radius, self.height)
        else {
            return 0;
        };

        let r2 = radius * radius;
        let mut changed = 0;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = f64::from(x) + 0.5 - center.x;
                let dy = f64::from(y) + 0.5 - center.y;
                if dx * dx + dy * dy <= r2 && self.set(x, y, value) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Overlapping stamps from `from` to `to`, one per pixel of travel.
    pub fn stamp_segment(
        &mut self,
        from: NativePoint,
        to: NativePoint,
        diameter: f64,
        value: Coverage,
    ) -> u64 {
        let distance = from.distance_to(to);
        if !distance.is_finite() {
            return 0;
        }
        let steps = distance.max(1.0).ceil() as u32;
        let mut changed = 0;
        for step in 0..=steps {
            let t = f64::from(step) / f64::from(steps);
            let point = NativePoint::new(
                from.x + (to.x - from.x) * t,
                from.y + (to.y - from.y) * t,
            );
            changed += self.stamp_disc(point, diameter, value);
        }
        changed
    }

    /// Sets every pixel whose centre lies in the rectangle spanned by the two
    /// corners. Corners may be given in any order.
    pub fn fill_rect(&mut self, a: NativePoint, b: NativePoint, value: Coverage) -> u64 {
        let (x0, x1) = (a.x.min(b.x), a.x.max(b.x));
        let (y0, y1) = (a.y.min(b.y), a.y.max(b.y));
        if !(x0.is_finite() && x1.is_finite() && y0.is_finite() && y1.is_finite()) {
            return 0;
        }
        let Some((min_x, max_x)) = centre_span(x0, x1, self.width) else {
            return 0;
        };
        let Some((min_y, max_y)) = centre_span(y0, y1, self.height) else {
            return 0;
        };

        let mut changed = 0;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                if self.set(x, y, value) {
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn fill(&mut self, value: Coverage) {
        let next = value == Coverage::Selected;
        self.selected.iter_mut().for_each(|s| *s = next);
    }

    /// Overlay layer as shown on screen: `color` where covered, transparent where
    /// selected.
    pub fn render_overlay(&self, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            if self.is_selected(x, y) {
                Rgba([0, 0, 0, 0])
            } else {
                color
            }
        })
    }

    /// Tight bounding box of the selection as `(x, y, w, h)`.
    pub fn selection_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut any = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_selected(x, y) {
                    any = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        any.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }
}

/// Inclusive pixel range touched by `[lo, hi]`, clipped to `0..len`.
fn pixel_span(lo: f64, hi: f64, len: u32) -> Option<(u32, u32)> {
    let min = lo.floor().max(0.0);
    let max = hi.ceil().min(f64::from(len) - 1.0);
    if min > max {
        return None;
    }
    Some((min as u32, max as u32))
}

/// Inclusive range of pixels whose centres fall in `[lo, hi)`, clipped to `0..len`.
fn centre_span(lo: f64, hi: f64, len: u32) -> Option<(u32, u32)> {
    let min = (lo - 0.5).ceil().max(0.0);
    let max = ((hi - 0.5).ceil() - 1.0).min(f64::from(len) - 1.0);
    if min > max {
        return None;
    }
    Some((min as u32, max as u32))
}

/// Source-over blend of `src` onto `dst`.
pub(crate) fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| {
        (f64::from(d) * inv + f64::from(s) * a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    let out_a = (f64::from(dst[3]) * inv + f64::from(src[3]))
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}
