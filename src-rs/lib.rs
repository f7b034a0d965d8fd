//! Masked-region canvas editor for UI screenshots.
//!
//! A [`MaskedCanvasEditor`] keeps a base image and a Covered/Selected mask at native
//! resolution, translates pointer input from a scaled display into native pixels,
//! and exports a binary PNG mask (opaque black = keep, transparent = edit) for an
//! image-editing service.

pub mod config;
pub mod data_uri;
pub mod editor;
pub mod export;
pub mod geometry;
pub mod mask;
pub mod script;
pub mod service;

pub use config::EditorConfig;
pub use editor::{InteractionState, LoadOutcome, MaskedCanvasEditor, Tool, ToolState};
pub use export::{MaskExport, MaskImage, MaskStyle};
pub use geometry::{DisplayTransform, NativePoint, ScreenPoint, Viewport};
pub use mask::{Coverage, MaskRaster};

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

pub fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_pretty_into_new_dirs() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        let raw = fs::read_to_string(&target).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&raw).unwrap(), json!({"ok": true}));
    }
}
