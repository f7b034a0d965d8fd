//! Masked-region canvas editor.
//!
//! Holds the base image, the selection mask and the tool state, and turns pointer
//! events in screen space into mask mutations in native pixel space. The parent only
//! talks to it through methods: load, resize, pointer events, export, clear.
//!
//! ```text
//! Idle --down(Brush/Eraser)--> Stroking --move-->* Stroking --up/leave--> Idle
//! Idle --down(Rectangle)--> RectPending --move--> RectPending --up/leave--> Idle (commit)
//! ```

use crate::config::EditorConfig;
use crate::export::{MaskExport, MaskImage, MaskStyle};
use crate::geometry::{DisplayTransform, NativePoint, ScreenPoint, Viewport};
use crate::mask::{blend_pixel, Coverage, MaskRaster};
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const MIN_BRUSH_DIAMETER: u32 = 5;
pub const MAX_BRUSH_DIAMETER: u32 = 100;
pub const DEFAULT_BRUSH_DIAMETER: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Removes the overlay: marks the edit target.
    #[default]
    Brush,
    Rectangle,
    /// Restores the overlay.
    Eraser,
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brush" | "pen" => Ok(Tool::Brush),
            "rect" | "rectangle" => Ok(Tool::Rectangle),
            "eraser" | "erase" => Ok(Tool::Eraser),
            other => Err(format!("unknown tool: {other} (expected brush|rectangle|eraser)")),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Brush => f.write_str("brush"),
            Tool::Rectangle => f.write_str("rectangle"),
            Tool::Eraser => f.write_str("eraser"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolState {
    pub tool: Tool,
    pub brush_diameter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    Idle,
    Stroking,
    RectPending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Stroke { last: NativePoint },
    Rect { anchor: NativePoint },
}

/// Result of committing a decoded base image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Applied { width: u32, height: u32 },
    /// A newer load or a clear superseded this one.
    Stale,
    /// Decoding failed; the editor keeps whatever it showed before.
    Failed { reason: String },
    /// No usable container is mounted.
    NoViewport,
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, LoadOutcome::Applied { .. })
    }
}

/// A pending decode. Produced by [`MaskedCanvasEditor::begin_load`]; decoding may
/// happen on any thread.
#[derive(Debug)]
pub struct LoadTicket {
    generation: u64,
    bytes: Vec<u8>,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn decode(self) -> DecodedLoad {
        let result = image::load_from_memory(&self.bytes)
            .map(|img| img.to_rgba8())
            .map_err(|err| err.to_string())
            .and_then(|img| {
                if img.width() == 0 || img.height() == 0 {
                    Err("image has no pixels".to_string())
                } else {
                    Ok(img)
                }
            });
        DecodedLoad {
            generation: self.generation,
            result,
        }
    }
}

#[derive(Debug)]
pub struct DecodedLoad {
    generation: u64,
    result: std::result::Result<RgbaImage, String>,
}

impl DecodedLoad {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
struct Session {
    base: RgbaImage,
    mask: MaskRaster,
    transform: DisplayTransform,
}

#[derive(Debug, Clone)]
pub struct MaskedCanvasEditor {
    config: EditorConfig,
    viewport: Option<Viewport>,
    tools: ToolState,
    session: Option<Session>,
    gesture: Gesture,
    generation: u64,
}

impl Default for MaskedCanvasEditor {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl MaskedCanvasEditor {
    pub fn new(config: EditorConfig) -> Self {
        let brush_diameter = config
            .default_brush_diameter
            .clamp(MIN_BRUSH_DIAMETER, MAX_BRUSH_DIAMETER);
        Self {
            config,
            viewport: None,
            tools: ToolState {
                tool: Tool::default(),
                brush_diameter,
            },
            session: None,
            gesture: Gesture::Idle,
            generation: 0,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /* ---------- container geometry ---------- */

    /// Attaches the editor to a container. Same as [`resize`](Self::resize).
    pub fn mount(&mut self, viewport: Viewport) {
        self.resize(viewport);
    }

    /// Recomputes the display transform for a new container size. The selection is
    /// kept; only presentation changes.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (w, h) = session.mask.dimensions();
        match DisplayTransform::fit(w, h, viewport) {
            Some(transform) => {
                debug!(scale = transform.scale(), "display transform updated");
                session.transform = transform;
            }
            None => debug!(?viewport, "ignoring resize to unusable container"),
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /* ---------- loading ---------- */

    /// Decodes and commits a base image in one step.
    pub fn load(&mut self, bytes: &[u8]) -> LoadOutcome {
        match self.begin_load(bytes.to_vec()) {
            Some(ticket) => self.finish_load(ticket.decode()),
            None => LoadOutcome::NoViewport,
        }
    }

    /// Starts a load. Every call supersedes earlier tickets. Returns `None` when no
    /// container is mounted.
    pub fn begin_load(&mut self, bytes: Vec<u8>) -> Option<LoadTicket> {
        if !self.viewport.is_some_and(|v| v.is_usable()) {
            debug!("load requested before a container was mounted");
            return None;
        }
        self.generation += 1;
        Some(LoadTicket {
            generation: self.generation,
            bytes,
        })
    }

    /// Commits a decoded image if it belongs to the most recent load.
    pub fn finish_load(&mut self, decoded: DecodedLoad) -> LoadOutcome {
        if decoded.generation != self.generation {
            debug!(
                ticket = decoded.generation,
                latest = self.generation,
                "dropping stale decode"
            );
            return LoadOutcome::Stale;
        }
        let base = match decoded.result {
            Ok(base) => base,
            Err(reason) => {
                warn!(%reason, "base image decode failed");
                return LoadOutcome::Failed { reason };
            }
        };
        let (width, height) = base.dimensions();
        let Some(transform) = self
            .viewport
            .and_then(|viewport| DisplayTransform::fit(width, height, viewport))
        else {
            return LoadOutcome::NoViewport;
        };

        self.gesture = Gesture::Idle;
        self.session = Some(Session {
            base,
            mask: MaskRaster::covered(width, height),
            transform,
        });
        info!(width, height, scale = transform.scale(), "base image loaded");
        LoadOutcome::Applied { width, height }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.session.as_ref().map(|s| s.mask.dimensions())
    }

    pub fn transform(&self) -> Option<DisplayTransform> {
        self.session.as_ref().map(|s| s.transform)
    }

    pub fn base(&self) -> Option<&RgbaImage> {
        self.session.as_ref().map(|s| &s.base)
    }

    pub fn mask(&self) -> Option<&MaskRaster> {
        self.session.as_ref().map(|s| &s.mask)
    }

    /* ---------- tools ---------- */

    pub fn tool_state(&self) -> ToolState {
        self.tools
    }

    /// Switching tools ends any gesture in progress, including a pending rectangle.
    pub fn set_tool(&mut self, tool: Tool) {
        if self.tools.tool != tool {
            self.gesture = Gesture::Idle;
        }
        self.tools.tool = tool;
    }

    pub fn set_brush_diameter(&mut self, diameter: u32) {
        self.tools.brush_diameter = diameter.clamp(MIN_BRUSH_DIAMETER, MAX_BRUSH_DIAMETER);
    }

    pub fn interaction_state(&self) -> InteractionState {
        match self.gesture {
            Gesture::Idle => InteractionState::Idle,
            Gesture::Stroke { .. } => InteractionState::Stroking,
            Gesture::Rect { .. } => InteractionState::RectPending,
        }
    }

    /* ---------- pointer input ---------- */

    pub fn pointer_down(&mut self, point: ScreenPoint) {
        let tool = self.tools.tool;
        let diameter = f64::from(self.tools.brush_diameter);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.transform.contains(point) {
            return;
        }
        let native = session.transform.to_native(point);
        self.gesture = match tool {
            Tool::Rectangle => Gesture::Rect { anchor: native },
            Tool::Brush | Tool::Eraser => {
                session.mask.stamp_disc(native, diameter, stamp_value(tool));
                Gesture::Stroke { last: native }
            }
        };
    }

    pub fn pointer_move(&mut self, point: ScreenPoint) {
        let Gesture::Stroke { last } = self.gesture else {
            return;
        };
        let tool = self.tools.tool;
        let diameter = f64::from(self.tools.brush_diameter);
        let interpolate = self.config.interpolate_strokes;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.transform.contains(point) {
            return;
        }
        let native = session.transform.to_native(point);
        if interpolate {
            session
                .mask
                .stamp_segment(last, native, diameter, stamp_value(tool));
        } else {
            session.mask.stamp_disc(native, diameter, stamp_value(tool));
        }
        self.gesture = Gesture::Stroke { last: native };
    }

    /// Ends the gesture. A pending rectangle is committed using the release point,
    /// clamped to the canvas.
    pub fn pointer_up(&mut self, point: ScreenPoint) {
        let gesture = std::mem::replace(&mut self.gesture, Gesture::Idle);
        let Gesture::Rect { anchor } = gesture else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let end = session
            .transform
            .clamp_native(session.transform.to_native(point));
        let changed = session.mask.fill_rect(anchor, end, Coverage::Selected);
        debug!(changed, "rectangle committed");
    }

    pub fn pointer_leave(&mut self, point: ScreenPoint) {
        self.pointer_up(point);
    }

    /* ---------- export / reset ---------- */

    pub fn export_mask(&self) -> Result<MaskExport> {
        self.export_mask_with(MaskStyle::Alpha)
    }

    pub fn export_mask_with(&self, style: MaskStyle) -> Result<MaskExport> {
        let Some(session) = self.session.as_ref() else {
            return Ok(MaskExport::NotReady);
        };
        Ok(MaskExport::Ready(MaskImage::from_raster(&session.mask, style)?))
    }

    /// Drops the base image and the mask, cancels any gesture and invalidates
    /// pending loads. Tool state and the container survive.
    pub fn clear_all(&mut self) {
        self.generation += 1;
        self.gesture = Gesture::Idle;
        if self.session.take().is_some() {
            info!("editor cleared");
        }
    }

    /* ---------- rendering ---------- */

    /// The covering layer at native resolution.
    pub fn render_overlay(&self) -> Option<RgbaImage> {
        self.session
            .as_ref()
            .map(|s| s.mask.render_overlay(self.config.overlay_color))
    }

    /// Base image with the overlay composited on top, at native resolution.
    pub fn render_composite(&self) -> Option<RgbaImage> {
        let session = self.session.as_ref()?;
        let overlay = self.config.overlay_color;
        let mut out = session.base.clone();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            if !session.mask.is_selected(x, y) {
                *pixel = blend_pixel(*pixel, overlay);
            }
        }
        Some(out)
    }

    /// What the user sees: the composite scaled to the displayed canvas size.
    pub fn render_display(&self) -> Option<RgbaImage> {
        let composite = self.render_composite()?;
        let transform = self.transform()?;
        let (w, h) = transform.displayed_pixels();
        if (w, h) == composite.dimensions() {
            return Some(composite);
        }
        Some(imageops::resize(&composite, w, h, FilterType::Triangle))
    }
}

fn stamp_value(tool: Tool) -> Coverage {
    match tool {
        Tool::Eraser => Coverage::Covered,
        Tool::Brush | Tool::Rectangle => Coverage::Selected,
    }
}
