//! Display space vs native pixel space.
//!
//! The base image and the mask are stored at native resolution. On screen they are
//! shown scaled down to fit the container, centred inside it. Every pointer event
//! crosses from screen space into native space through [`DisplayTransform`]; nothing
//! else in the crate reads screen coordinates.

use serde::{Deserialize, Serialize};

/// Container rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    pub fn at(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A hidden or collapsed container cannot host the canvas.
    pub fn is_usable(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativePoint {
    pub x: f64,
    pub y: f64,
}

impl NativePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: NativePoint) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Maps native pixels to the scaled, centred canvas on screen and back.
///
/// `scale = min(container_w / W, container_h / H, 1)`; the canvas is never upscaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayTransform {
    native_width: u32,
    native_height: u32,
    scale: f64,
    left: f64,
    top: f64,
}

impl DisplayTransform {
    /// Returns `None` for an empty image or an unusable container.
    pub fn fit(native_width: u32, native_height: u32, viewport: Viewport) -> Option<Self> {
        if native_width == 0 || native_height == 0 || !viewport.is_usable() {
            return None;
        }
        let w = f64::from(native_width);
        let h = f64::from(native_height);
        let scale = (viewport.width / w).min(viewport.height / h).min(1.0);
        let left = viewport.x + (viewport.width - w * scale) / 2.0;
        let top = viewport.y + (viewport.height - h * scale) / 2.0;
        Some(Self {
            native_width,
            native_height,
            scale,
            left,
            top,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn native_size(&self) -> (u32, u32) {
        (self.native_width, self.native_height)
    }

    pub fn displayed_width(&self) -> f64 {
        f64::from(self.native_width) * self.scale
    }

    pub fn displayed_height(&self) -> f64 {
        f64::from(self.native_height) * self.scale
    }

    /// Top-left corner of the displayed canvas in screen space.
    pub fn origin(&self) -> ScreenPoint {
        ScreenPoint::new(self.left, self.top)
    }

    pub fn to_native(&self, point: ScreenPoint) -> NativePoint {
        let sx = f64::from(self.native_width) / self.displayed_width();
        let sy = f64::from(self.native_height) / self.displayed_height();
        NativePoint::new((point.x - self.left) * sx, (point.y - self.top) * sy)
    }

    pub fn to_screen(&self, point: NativePoint) -> ScreenPoint {
        let sx = self.displayed_width() / f64::from(self.native_width);
        let sy = self.displayed_height() / f64::from(self.native_height);
        ScreenPoint::new(self.left + point.x * sx, self.top + point.y * sy)
    }

    /// Edges are inclusive so a release exactly on the border still counts.
    pub fn contains(&self, point: ScreenPoint) -> bool {
        point.x >= self.left
            && point.y >= self.top
            && point.x <= self.left + self.displayed_width()
            && point.y <= self.top + self.displayed_height()
    }

    pub fn clamp_native(&self, point: NativePoint) -> NativePoint {
        NativePoint::new(
            point.x.clamp(0.0, f64::from(self.native_width)),
            point.y.clamp(0.0, f64::from(self.native_height)),
        )
    }

    /// Whole-pixel size of the displayed canvas, at least 1×1.
    pub fn displayed_pixels(&self) -> (u32, u32) {
        (
            (self.displayed_width().round() as u32).max(1),
            (self.displayed_height().round() as u32).max(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_never_upscales() {
        let t = DisplayTransform::fit(400, 300, Viewport::new(4000.0, 3000.0)).unwrap();
        assert_eq!(t.scale(), 1.0);
        assert_eq!(t.origin(), ScreenPoint::new(1800.0, 1350.0));
    }

    #[test]
    fn fit_uses_tighter_axis() {
        let t = DisplayTransform::fit(800, 600, Viewport::new(400.0, 600.0)).unwrap();
        assert_eq!(t.scale(), 0.5);
        assert_eq!(t.displayed_width(), 400.0);
        assert_eq!(t.displayed_height(), 300.0);
        assert_eq!(t.origin(), ScreenPoint::new(0.0, 150.0));
    }

    #[test]
    fn fit_rejects_degenerate_inputs() {
        assert!(DisplayTransform::fit(0, 10, Viewport::new(100.0, 100.0)).is_none());
        assert!(DisplayTransform::fit(10, 10, Viewport::new(0.0, 100.0)).is_none());
        assert!(DisplayTransform::fit(10, 10, Viewport::new(f64::NAN, 100.0)).is_none());
    }

    #[test]
    fn screen_native_round_trip_with_offset_container() {
        let t = DisplayTransform::fit(800, 600, Viewport::at(10.0, 20.0, 400.0, 400.0)).unwrap();
        let native = t.to_native(ScreenPoint::new(110.0, 120.0));
        assert_eq!(native, NativePoint::new(200.0, 100.0));
        assert_eq!(t.to_screen(native), ScreenPoint::new(110.0, 120.0));
    }

    #[test]
    fn contains_and_clamp() {
        let t = DisplayTransform::fit(100, 100, Viewport::new(100.0, 100.0)).unwrap();
        assert!(t.contains(ScreenPoint::new(100.0, 0.0)));
        assert!(!t.contains(ScreenPoint::new(100.5, 0.0)));
        assert_eq!(
            t.clamp_native(NativePoint::new(-4.0, 140.0)),
            NativePoint::new(0.0, 100.0)
        );
    }
}
