//! Session scripts: recorded viewport, tool and pointer events replayed against an
//! editor.
//!
//! ```json
//! {
//!   "viewport": "1280x720",
//!   "space": "native",
//!   "events": [
//!     {"type": "tool", "tool": "brush"},
//!     {"type": "brush", "diameter": 40},
//!     {"type": "stroke", "points": [[100, 100], ["50%", "50%"]]},
//!     {"type": "rect", "from": [50, 50], "to": [10, 10]},
//!     {"type": "down", "x": 12, "y": 30, "space": "screen"},
//!     {"type": "up", "x": 12, "y": 30, "space": "screen"}
//!   ]
//! }
//! ```
//!
//! Coordinates are native pixels by default. `"space": "screen"` takes absolute
//! screen positions instead. In either space `"25%"` and `"0.25rel"` are fractions
//! of the canvas, and `"units": "rel"` turns bare numbers into fractions.

use crate::config::parse_viewport;
use crate::editor::{InteractionState, LoadOutcome, MaskedCanvasEditor, Tool};
use crate::geometry::{DisplayTransform, NativePoint, ScreenPoint, Viewport};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SCRIPT_HELP: &str = r##"Session script JSON:
{
  "viewport": "1280x720",            // or {"width": 1280, "height": 720}
  "space": "native",                 // native (default) | screen
  "units": "px",                     // px (default) | rel
  "events": [
    {"type": "tool", "tool": "brush"},          // brush | rectangle | eraser
    {"type": "brush", "diameter": 40},          // clamped to 5..100
    {"type": "down", "x": 100, "y": 100},
    {"type": "move", "x": "30%", "y": 0.5, "units": "rel"},
    {"type": "up", "x": 100, "y": 100},
    {"type": "leave", "at": [0, 0]},
    {"type": "stroke", "points": [[10, 10], [40, 12]]},
    {"type": "rect", "from": [50, 50], "to": [10, 10]},
    {"type": "resize", "viewport": "640x480"},
    {"type": "load", "path": "other.png"},
    {"type": "clear"}
  ]
}

Notes:
- a bare list is accepted as the events array.
- "space" and "units" may be set per event.
- "%" and "rel" values are fractions of the displayed canvas.
- pointer events before an image is loaded are skipped.
"##;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordSpace {
    Native,
    Screen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measure {
    Absolute(f64),
    Fraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSpec {
    pub x: Measure,
    pub y: Measure,
    pub space: CoordSpace,
}

impl PointSpec {
    pub fn to_screen(&self, transform: &DisplayTransform) -> ScreenPoint {
        match self.space {
            CoordSpace::Native => {
                let (w, h) = transform.native_size();
                let x = match self.x {
                    Measure::Absolute(v) => v,
                    Measure::Fraction(f) => f * f64::from(w),
                };
                let y = match self.y {
                    Measure::Absolute(v) => v,
                    Measure::Fraction(f) => f * f64::from(h),
                };
                transform.to_screen(NativePoint::new(x, y))
            }
            CoordSpace::Screen => {
                let origin = transform.origin();
                let x = match self.x {
                    Measure::Absolute(v) => v,
                    Measure::Fraction(f) => origin.x + f * transform.displayed_width(),
                };
                let y = match self.y {
                    Measure::Absolute(v) => v,
                    Measure::Fraction(f) => origin.y + f * transform.displayed_height(),
                };
                ScreenPoint::new(x, y)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    Tool(Tool),
    Brush(u32),
    Down(PointSpec),
    Move(PointSpec),
    Up(PointSpec),
    Leave(PointSpec),
    Stroke(Vec<PointSpec>),
    Rect { from: PointSpec, to: PointSpec },
    Resize(Viewport),
    Load(PathBuf),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionScript {
    pub viewport: Option<Viewport>,
    pub events: Vec<ScriptEvent>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub events: usize,
    pub applied: usize,
    pub skipped: usize,
    pub loads: Vec<LoadOutcome>,
    pub final_state: Option<InteractionState>,
}

/// Reads a script from a file, or from stdin when `path` is `-`.
pub fn load_script(path: &str) -> Result<SessionScript> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read script from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read script file: {path}"))?
    };
    let value: Value = serde_json::from_str(&raw).context("invalid script JSON")?;
    parse_script(&value)
}

pub fn parse_script(value: &Value) -> Result<SessionScript> {
    let empty = Map::new();
    let (root, events) = match value {
        Value::Array(events) => (&empty, events),
        Value::Object(obj) => {
            let Some(events) = obj.get("events").and_then(Value::as_array) else {
                bail!("script must be a list or an object with 'events'");
            };
            (obj, events)
        }
        _ => bail!("script must be a list or an object with 'events'"),
    };

    let viewport = match root.get("viewport") {
        Some(v) => Some(parse_viewport_value(v).context("invalid script viewport")?),
        None => None,
    };
    let space = parse_space(root.get("space"))?.unwrap_or(CoordSpace::Native);
    let rel = units_is_rel(root.get("units"));

    let events = events
        .iter()
        .enumerate()
        .map(|(idx, event)| {
            parse_event(event, space, rel).with_context(|| format!("script event #{idx}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SessionScript { viewport, events })
}

fn parse_event(value: &Value, default_space: CoordSpace, default_rel: bool) -> Result<ScriptEvent> {
    let Some(obj) = value.as_object() else {
        bail!("event must be an object");
    };
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("event has no 'type'"))?
        .trim()
        .to_ascii_lowercase();
    let space = parse_space(obj.get("space"))?.unwrap_or(default_space);
    let rel = obj
        .get("units")
        .map(|u| units_is_rel(Some(u)))
        .unwrap_or(default_rel);

    let event = match kind.as_str() {
        "tool" => {
            let name = obj
                .get("tool")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("tool event needs 'tool'"))?;
            ScriptEvent::Tool(name.parse::<Tool>().map_err(|e| anyhow!(e))?)
        }
        "brush" | "brush_size" => {
            let diameter = obj
                .get("diameter")
                .or_else(|| obj.get("size"))
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow!("brush event needs numeric 'diameter'"))?;
            ScriptEvent::Brush(diameter.round().clamp(0.0, f64::from(u32::MAX)) as u32)
        }
        "down" | "move" | "up" | "leave" => {
            let point = event_point(obj, space, rel)?;
            match kind.as_str() {
                "down" => ScriptEvent::Down(point),
                "move" => ScriptEvent::Move(point),
                "up" => ScriptEvent::Up(point),
                _ => ScriptEvent::Leave(point),
            }
        }
        "stroke" => {
            let points = obj
                .get("points")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("stroke event needs 'points'"))?;
            if points.is_empty() {
                bail!("stroke needs at least one point");
            }
            let points = points
                .iter()
                .map(|p| parse_point(p, space, rel))
                .collect::<Result<Vec<_>>>()?;
            ScriptEvent::Stroke(points)
        }
        "rect" | "rectangle" => {
            let from = obj
                .get("from")
                .ok_or_else(|| anyhow!("rect event needs 'from'"))?;
            let to = obj.get("to").ok_or_else(|| anyhow!("rect event needs 'to'"))?;
            ScriptEvent::Rect {
                from: parse_point(from, space, rel)?,
                to: parse_point(to, space, rel)?,
            }
        }
        "resize" => {
            let viewport = match obj.get("viewport") {
                Some(v) => parse_viewport_value(v)?,
                None => parse_viewport_value(value)?,
            };
            ScriptEvent::Resize(viewport)
        }
        "load" => {
            let path = obj
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("load event needs 'path'"))?;
            ScriptEvent::Load(PathBuf::from(path))
        }
        "clear" | "clear_all" => ScriptEvent::Clear,
        other => bail!("unknown event type: {other}"),
    };
    Ok(event)
}

fn event_point(obj: &Map<String, Value>, space: CoordSpace, rel: bool) -> Result<PointSpec> {
    if let Some(at) = obj.get("at") {
        return parse_point(at, space, rel);
    }
    let x = obj.get("x").ok_or_else(|| anyhow!("pointer event needs 'x'"))?;
    let y = obj.get("y").ok_or_else(|| anyhow!("pointer event needs 'y'"))?;
    Ok(PointSpec {
        x: parse_measure(x, rel).ok_or_else(|| anyhow!("invalid x: {x}"))?,
        y: parse_measure(y, rel).ok_or_else(|| anyhow!("invalid y: {y}"))?,
        space,
    })
}

fn parse_point(value: &Value, space: CoordSpace, rel: bool) -> Result<PointSpec> {
    let (x, y) = match value {
        Value::Array(values) if values.len() >= 2 => (&values[0], &values[1]),
        Value::Object(obj) => (
            obj.get("x").ok_or_else(|| anyhow!("point needs 'x'"))?,
            obj.get("y").ok_or_else(|| anyhow!("point needs 'y'"))?,
        ),
        _ => bail!("point must be [x, y] or {{\"x\": .., \"y\": ..}}"),
    };
    Ok(PointSpec {
        x: parse_measure(x, rel).ok_or_else(|| anyhow!("invalid x: {x}"))?,
        y: parse_measure(y, rel).ok_or_else(|| anyhow!("invalid y: {y}"))?,
        space,
    })
}

fn parse_space(value: Option<&Value>) -> Result<Option<CoordSpace>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let raw = value
        .as_str()
        .ok_or_else(|| anyhow!("'space' must be a string"))?
        .trim()
        .to_ascii_lowercase();
    match raw.as_str() {
        "native" | "image" | "pixel" => Ok(Some(CoordSpace::Native)),
        "screen" | "display" => Ok(Some(CoordSpace::Screen)),
        other => bail!("unknown coordinate space: {other}"),
    }
}

fn parse_viewport_value(value: &Value) -> Result<Viewport> {
    let viewport = match value {
        Value::String(raw) => {
            parse_viewport(raw).ok_or_else(|| anyhow!("viewport must look like 1280x720"))?
        }
        Value::Object(obj) => {
            let num = |key: &str| obj.get(key).and_then(Value::as_f64);
            Viewport::at(
                num("x").unwrap_or(0.0),
                num("y").unwrap_or(0.0),
                num("width").ok_or_else(|| anyhow!("viewport needs 'width'"))?,
                num("height").ok_or_else(|| anyhow!("viewport needs 'height'"))?,
            )
        }
        _ => bail!("viewport must be a string or an object"),
    };
    if !viewport.is_usable() {
        bail!("viewport must have a positive size");
    }
    Ok(viewport)
}

fn units_is_rel(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(v)) => *v,
        Some(Value::String(s)) => {
            let key = s.trim().to_ascii_lowercase();
            matches!(
                key.as_str(),
                "rel" | "relative" | "ratio" | "fraction" | "normalized"
            )
        }
        _ => false,
    }
}

/// Numbers are absolute unless `default_rel`; strings may carry `%`, `rel` or
/// `px` suffixes.
pub fn parse_measure(value: &Value, default_rel: bool) -> Option<Measure> {
    let wrap = |v: f64| {
        if default_rel {
            Measure::Fraction(v)
        } else {
            Measure::Absolute(v)
        }
    };
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(wrap),
        Value::String(s) => {
            let raw = s.trim().to_ascii_lowercase();
            if raw.is_empty() {
                return None;
            }
            if let Some(percent) = raw.strip_suffix('%') {
                return percent
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(|v| Measure::Fraction(v / 100.0));
            }
            if let Some(rel) = raw.strip_suffix("rel") {
                let mut ratio = rel.trim().parse::<f64>().ok()?;
                if ratio.abs() > 1.0 {
                    ratio /= 100.0;
                }
                return Some(Measure::Fraction(ratio));
            }
            if let Some(px) = raw.strip_suffix("px") {
                return px.trim().parse::<f64>().ok().map(Measure::Absolute);
            }
            raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(wrap)
        }
        _ => None,
    }
}

/// Feeds every event to the editor. Relative `load` paths resolve against
/// `base_dir`.
pub fn replay(
    editor: &mut MaskedCanvasEditor,
    script: &SessionScript,
    base_dir: &Path,
) -> Result<ReplayReport> {
    let mut report = ReplayReport {
        events: script.events.len(),
        ..ReplayReport::default()
    };

    for event in &script.events {
        let applied = apply_event(editor, event, base_dir, &mut report)?;
        if applied {
            report.applied += 1;
        } else {
            report.skipped += 1;
            debug!(?event, "script event skipped");
        }
    }

    report.final_state = Some(editor.interaction_state());
    Ok(report)
}

fn apply_event(
    editor: &mut MaskedCanvasEditor,
    event: &ScriptEvent,
    base_dir: &Path,
    report: &mut ReplayReport,
) -> Result<bool> {
    match event {
        ScriptEvent::Tool(tool) => editor.set_tool(*tool),
        ScriptEvent::Brush(diameter) => editor.set_brush_diameter(*diameter),
        ScriptEvent::Resize(viewport) => editor.resize(*viewport),
        ScriptEvent::Clear => editor.clear_all(),
        ScriptEvent::Load(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                base_dir.join(path)
            };
            let bytes = fs::read(&path)
                .with_context(|| format!("failed to read image: {}", path.display()))?;
            let outcome = editor.load(&bytes);
            let applied = outcome.is_applied();
            report.loads.push(outcome);
            return Ok(applied);
        }
        ScriptEvent::Down(point)
        | ScriptEvent::Move(point)
        | ScriptEvent::Up(point)
        | ScriptEvent::Leave(point) => {
            let Some(transform) = editor.transform() else {
                return Ok(false);
            };
            let screen = point.to_screen(&transform);
            match event {
                ScriptEvent::Down(_) => editor.pointer_down(screen),
                ScriptEvent::Move(_) => editor.pointer_move(screen),
                ScriptEvent::Up(_) => editor.pointer_up(screen),
                _ => editor.pointer_leave(screen),
            }
        }
        ScriptEvent::Stroke(points) => {
            let Some(transform) = editor.transform() else {
                return Ok(false);
            };
            let screen: Vec<ScreenPoint> = points.iter().map(|p| p.to_screen(&transform)).collect();
            let (Some(first), Some(last)) = (screen.first(), screen.last()) else {
                return Ok(false);
            };
            editor.pointer_down(*first);
            for point in &screen[1..] {
                editor.pointer_move(*point);
            }
            editor.pointer_up(*last);
        }
        ScriptEvent::Rect { from, to } => {
            let Some(transform) = editor.transform() else {
                return Ok(false);
            };
            let previous = editor.tool_state().tool;
            editor.set_tool(Tool::Rectangle);
            editor.pointer_down(from.to_screen(&transform));
            editor.pointer_up(to.to_screen(&transform));
            editor.set_tool(previous);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::encode_png;
    use image::{Rgba, RgbaImage};
    use serde_json::json;

    fn editor_with_image(width: u32, height: u32, viewport: Viewport) -> MaskedCanvasEditor {
        let mut editor = MaskedCanvasEditor::default();
        editor.mount(viewport);
        let png = encode_png(&RgbaImage::from_pixel(width, height, Rgba([9, 9, 9, 255]))).unwrap();
        assert!(editor.load(&png).is_applied());
        editor
    }

    #[test]
    fn measures_accept_px_percent_and_rel() {
        assert_eq!(parse_measure(&json!(12), false), Some(Measure::Absolute(12.0)));
        assert_eq!(parse_measure(&json!(0.5), true), Some(Measure::Fraction(0.5)));
        assert_eq!(parse_measure(&json!("25%"), false), Some(Measure::Fraction(0.25)));
        assert_eq!(parse_measure(&json!("0.2rel"), false), Some(Measure::Fraction(0.2)));
        assert_eq!(parse_measure(&json!("20rel"), false), Some(Measure::Fraction(0.2)));
        assert_eq!(parse_measure(&json!("7px"), true), Some(Measure::Absolute(7.0)));
        assert_eq!(parse_measure(&json!("wide"), false), None);
        assert_eq!(parse_measure(&json!(null), false), None);
    }

    #[test]
    fn point_specs_resolve_through_transform() {
        let transform =
            DisplayTransform::fit(800, 600, Viewport::at(0.0, 0.0, 400.0, 400.0)).unwrap();
        let native = PointSpec {
            x: Measure::Absolute(200.0),
            y: Measure::Fraction(0.5),
            space: CoordSpace::Native,
        };
        assert_eq!(
            transform.to_native(native.to_screen(&transform)),
            NativePoint::new(200.0, 300.0)
        );

        let screen = PointSpec {
            x: Measure::Fraction(0.5),
            y: Measure::Absolute(60.0),
            space: CoordSpace::Screen,
        };
        assert_eq!(screen.to_screen(&transform), ScreenPoint::new(200.0, 60.0));
    }

    #[test]
    fn parses_object_and_list_forms() {
        let script = parse_script(&json!({
            "viewport": "640x480",
            "units": "rel",
            "events": [
                {"type": "tool", "tool": "Rectangle"},
                {"type": "rect", "from": [0.1, 0.1], "to": {"x": "50px", "y": 0.5}},
                {"type": "down", "at": [1, 2], "space": "screen", "units": "px"},
                {"type": "resize", "width": 100, "height": 50},
                {"type": "clear"}
            ]
        }))
        .unwrap();
        assert_eq!(script.viewport, Some(Viewport::new(640.0, 480.0)));
        assert_eq!(script.events.len(), 5);
        assert_eq!(script.events[0], ScriptEvent::Tool(Tool::Rectangle));
        assert_eq!(
            script.events[2],
            ScriptEvent::Down(PointSpec {
                x: Measure::Absolute(1.0),
                y: Measure::Absolute(2.0),
                space: CoordSpace::Screen,
            })
        );
        assert_eq!(script.events[3], ScriptEvent::Resize(Viewport::new(100.0, 50.0)));

        let list = parse_script(&json!([{"type": "brush", "diameter": 40}])).unwrap();
        assert_eq!(list.events, vec![ScriptEvent::Brush(40)]);
        assert_eq!(list.viewport, None);
    }

    #[test]
    fn rejects_bad_scripts_with_event_index() {
        let err = parse_script(&json!({"events": [{"type": "clear"}, {"type": "jump"}]}))
            .unwrap_err();
        assert!(format!("{err:#}").contains("script event #1"));
        assert!(parse_script(&json!({"viewport": "0x0", "events": []})).is_err());
        assert!(parse_script(&json!("events")).is_err());
        assert!(parse_script(&json!([{"type": "stroke", "points": []}])).is_err());
    }

    #[test]
    fn replay_applies_brush_and_backwards_rect() {
        let mut editor = editor_with_image(800, 600, Viewport::new(400.0, 300.0));
        let script = parse_script(&json!({
            "events": [
                {"type": "brush", "diameter": 40},
                {"type": "stroke", "points": [[100, 100]]},
                {"type": "rect", "from": [50, 450], "to": [10, 410]},
                {"type": "tool", "tool": "eraser"}
            ]
        }))
        .unwrap();
        let report = replay(&mut editor, &script, Path::new(".")).unwrap();
        assert_eq!(report.applied, 4);
        assert_eq!(report.final_state, Some(InteractionState::Idle));

        let mask = editor.mask().unwrap();
        assert!(mask.is_selected(100, 100));
        assert!(!mask.is_selected(100, 125));
        assert!(mask.is_selected(10, 410));
        assert!(mask.is_selected(49, 449));
        assert!(!mask.is_selected(50, 449));
        assert_eq!(editor.tool_state().tool, Tool::Eraser);
    }

    #[test]
    fn pointer_events_before_load_are_skipped() {
        let mut editor = MaskedCanvasEditor::default();
        editor.mount(Viewport::new(100.0, 100.0));
        let script = parse_script(&json!([
            {"type": "down", "x": 1, "y": 1},
            {"type": "rect", "from": [0, 0], "to": [5, 5]},
            {"type": "brush", "diameter": 10}
        ]))
        .unwrap();
        let report = replay(&mut editor, &script, Path::new(".")).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.applied, 1);
    }

    #[test]
    fn replay_loads_relative_paths_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let png = encode_png(&RgbaImage::from_pixel(32, 16, Rgba([1, 2, 3, 255]))).unwrap();
        fs::write(dir.path().join("next.png"), png).unwrap();

        let mut editor = editor_with_image(8, 8, Viewport::new(100.0, 100.0));
        let script = parse_script(&json!([
            {"type": "load", "path": "next.png"},
            {"type": "clear"}
        ]))
        .unwrap();
        let report = replay(&mut editor, &script, dir.path()).unwrap();
        assert_eq!(report.loads, vec![LoadOutcome::Applied { width: 32, height: 16 }]);
        assert!(!editor.is_loaded());

        let missing = parse_script(&json!([{"type": "load", "path": "gone.png"}])).unwrap();
        assert!(replay(&mut editor, &missing, dir.path()).is_err());
    }
}
