//! `data:<mime>;base64,<payload>` strings, the form images travel in between the
//! uploader, the editor and the service request.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub data: Vec<u8>,
}

pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Splits a base64 data URI into its MIME type and raw payload text.
pub fn split(uri: &str) -> Result<(&str, &str)> {
    let Some(rest) = uri.trim().strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((meta, payload)) = rest.split_once(',') else {
        bail!("data URI has no payload separator");
    };
    let Some(mime) = meta.strip_suffix(";base64") else {
        bail!("only base64 data URIs are supported");
    };
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    Ok((mime, payload))
}

pub fn parse(uri: &str) -> Result<DataUri> {
    let (mime, payload) = split(uri)?;
    let data = STANDARD
        .decode(payload.trim())
        .context("data URI payload is not valid base64")?;
    Ok(DataUri {
        mime: mime.to_string(),
        data,
    })
}

/// Reads a file into a data URI, guessing the MIME type from the extension.
pub fn from_file(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read file: {}", path.display()))?;
    Ok(encode(mime_for_path(path), &bytes))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/json" => "json",
        _ => "bin",
    }
}
