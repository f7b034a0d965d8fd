//! Request/response contract of the image-editing service.
//!
//! Only the payload shapes live here: assembling the ordered request parts and
//! writing a returned result to disk. Transport is up to the caller.

use crate::data_uri;
use crate::export::MaskExport;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";

pub const SYSTEM_INSTRUCTION: &str = r#"You are a UI/UX designer and front-end developer. Edit the supplied base UI image according to the user's instruction.

Inputs:
1. The base image to edit.
2. A black and white mask. White (or transparent) areas mark the region of interest where edits apply. An all-black mask means the change applies to the whole layout.
3. An optional reference image for style guidance (colours, fonts, component styles).
4. The user's instruction.

Respond with exactly two parts, in this order:
1. IMAGE: the edited UI as a sharp, high-resolution PNG that keeps the base image's visual style unless told otherwise. Do not duplicate elements. Respect transparency.
2. TEXT: a single valid JSON object and nothing else:
{
  "svg": "<complete SVG of the new layout; every significant UI element is its own named layer, e.g. <g id='...'>>",
  "layout": [{"id", "type", "label", "x", "y", "w", "h", "zone", "props"}]
}
"type" is one of button, input, text, title, icon, card, navbar, tab, form, image. "props" may carry state, variant, required and link."#;

/// Images are data URIs, as produced by the uploader and [`MaskExport::to_data_uri`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub base_image: String,
    pub mask_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
    pub prompt: String,
}

impl GenerateRequest {
    /// Refuses to build a request around a mask that is not ready.
    pub fn new(
        base_image: String,
        mask: &MaskExport,
        reference_image: Option<String>,
        prompt: impl Into<String>,
    ) -> Result<Self> {
        let Some(mask) = mask.image() else {
            bail!("mask is not ready: load a base image before sending");
        };
        let request = Self {
            base_image,
            mask_image: mask.to_data_uri(),
            reference_image,
            prompt: prompt.into(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_image.trim().is_empty() {
            bail!("a base image is required");
        }
        if self.mask_image.trim().is_empty() {
            bail!("mask is not ready: load a base image before sending");
        }
        if self.prompt.trim().is_empty() {
            bail!("an instruction is required");
        }
        data_uri::split(&self.base_image).context("base image is not a data URI")?;
        data_uri::split(&self.mask_image).context("mask image is not a data URI")?;
        if let Some(reference) = &self.reference_image {
            data_uri::split(reference).context("reference image is not a data URI")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPart {
    Text(String),
    InlineData(InlineData),
}

impl RequestPart {
    fn text(text: &str) -> Self {
        RequestPart::Text(text.to_string())
    }

    /// Images are always declared as PNG; the service re-sniffs the payload.
    fn image(uri: &str) -> Result<Self> {
        let (_, payload) = data_uri::split(uri)?;
        Ok(RequestPart::InlineData(InlineData {
            mime_type: "image/png".to_string(),
            data: payload.to_string(),
        }))
    }
}

/// Ordered parts: instructions, base image, mask, optional reference, prompt.
pub fn build_parts(request: &GenerateRequest) -> Result<Vec<RequestPart>> {
    request.validate()?;
    let mut parts = vec![
        RequestPart::text(SYSTEM_INSTRUCTION),
        RequestPart::text("Base Image:"),
        RequestPart::image(&request.base_image)?,
        RequestPart::text("Mask (white is the edit area):"),
        RequestPart::image(&request.mask_image)?,
    ];
    if let Some(reference) = &request.reference_image {
        parts.push(RequestPart::text("Reference Image for style:"));
        parts.push(RequestPart::image(reference)?);
    }
    parts.push(RequestPart::text("User's instruction:"));
    parts.push(RequestPart::Text(request.prompt.clone()));
    Ok(parts)
}

pub fn build_payload(request: &GenerateRequest, model: &str) -> Result<Value> {
    let parts = build_parts(request)?;
    Ok(json!({
        "model": model,
        "contents": {"parts": parts},
        "config": {"response_modalities": ["IMAGE", "TEXT"]},
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Button,
    Input,
    Text,
    Title,
    Icon,
    Card,
    Navbar,
    Tab,
    Form,
    Image,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One detected element of the edited layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayoutKind,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub zone: String,
    #[serde(default)]
    pub props: LayoutProps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResult {
    /// Data URI of the edited image.
    pub edited_image: String,
    pub svg: String,
    pub layout: Vec<LayoutItem>,
}

impl GeneratedResult {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid result JSON")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpackedResult {
    pub edited_image: PathBuf,
    pub svg: PathBuf,
    pub layout: PathBuf,
}

/// Writes `edited.<ext>`, `layout.svg` and `layout.json` into `out_dir`.
pub fn unpack_result(result: &GeneratedResult, out_dir: &Path) -> Result<UnpackedResult> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output dir: {}", out_dir.display()))?;

    let image = data_uri::parse(&result.edited_image).context("edited image is not a data URI")?;
    let extension = data_uri::extension_for_mime(&image.mime);
    let edited_image = out_dir.join(format!("edited.{extension}"));
    fs::write(&edited_image, &image.data)
        .with_context(|| format!("failed to write edited image: {}", edited_image.display()))?;

    let svg = out_dir.join("layout.svg");
    fs::write(&svg, &result.svg)
        .with_context(|| format!("failed to write SVG: {}", svg.display()))?;

    let layout = out_dir.join("layout.json");
    let raw = serde_json::to_string_pretty(&result.layout)?;
    fs::write(&layout, raw)
        .with_context(|| format!("failed to write layout: {}", layout.display()))?;

    info!(items = result.layout.len(), dir = %out_dir.display(), "result unpacked");
    Ok(UnpackedResult {
        edited_image,
        svg,
        layout,
    })
}
