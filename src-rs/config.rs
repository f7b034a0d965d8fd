use crate::editor::{DEFAULT_BRUSH_DIAMETER, MAX_BRUSH_DIAMETER, MIN_BRUSH_DIAMETER};
use crate::geometry::Viewport;
use image::Rgba;
use std::env;
use std::path::PathBuf;

pub const OUT_DIR_ENV: &str = "REGION_MASK_OUT_DIR";
pub const VIEWPORT_ENV: &str = "REGION_MASK_VIEWPORT";
pub const LOG_ENV: &str = "REGION_MASK_LOG";

pub const DEFAULT_OVERLAY: Rgba<u8> = Rgba([0, 0, 0, 128]);
pub const DEFAULT_VIEWPORT: (f64, f64) = (1280.0, 800.0);

/// Editor-session settings. Tool state starts from these and then lives on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorConfig {
    /// Colour of the covering overlay on screen.
    pub overlay_color: Rgba<u8>,
    pub default_brush_diameter: u32,
    /// Fill between consecutive move samples. Off by default: each move event
    /// produces exactly one stamp, so fast strokes can leave gaps.
    pub interpolate_strokes: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            overlay_color: DEFAULT_OVERLAY,
            default_brush_diameter: DEFAULT_BRUSH_DIAMETER,
            interpolate_strokes: false,
        }
    }
}

impl EditorConfig {
    pub fn with_overlay(mut self, color: Rgba<u8>) -> Self {
        self.overlay_color = color;
        self
    }

    pub fn with_brush_diameter(mut self, diameter: u32) -> Self {
        self.default_brush_diameter = diameter.clamp(MIN_BRUSH_DIAMETER, MAX_BRUSH_DIAMETER);
        self
    }

    pub fn with_interpolation(mut self, enabled: bool) -> Self {
        self.interpolate_strokes = enabled;
        self
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `1280x720`.
pub fn parse_viewport(raw: &str) -> Option<Viewport> {
    let lower = raw.trim().to_ascii_lowercase();
    let (w, h) = lower.split_once('x')?;
    let viewport = Viewport::new(w.trim().parse().ok()?, h.trim().parse().ok()?);
    viewport.is_usable().then_some(viewport)
}

pub fn viewport_from_env() -> Option<Viewport> {
    env::var(VIEWPORT_ENV)
        .ok()
        .and_then(|raw| parse_viewport(&raw))
}

pub fn default_viewport() -> Viewport {
    viewport_from_env().unwrap_or(Viewport::new(DEFAULT_VIEWPORT.0, DEFAULT_VIEWPORT.1))
}

pub fn out_root() -> PathBuf {
    env::var(OUT_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".region-mask"))
}

/// Accepts `#RRGGBB`, `#RRGGBBAA` and `rgba(r, g, b, a)` with `a` in `0..=1` or
/// `0..=255`.
pub fn parse_color(raw: &str) -> Option<Rgba<u8>> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return match hex.len() {
            6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
            8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
            _ => None,
        };
    }

    let lower = s.to_ascii_lowercase();
    let body = lower.strip_prefix("rgba(")?.strip_suffix(')')?;
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return None;
    }
    let channel = |p: &str| -> Option<u8> {
        Some(p.parse::<f64>().ok()?.round().clamp(0.0, 255.0) as u8)
    };
    let alpha_value = parts[3].parse::<f64>().ok()?;
    let a = if alpha_value <= 1.0 {
        (alpha_value * 255.0).round().clamp(0.0, 255.0) as u8
    } else {
        alpha_value.round().clamp(0.0, 255.0) as u8
    };
    Some(Rgba([
        channel(parts[0])?,
        channel(parts[1])?,
        channel(parts[2])?,
        a,
    ]))
}
