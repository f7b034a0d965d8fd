//! Binary mask export.
//!
//! The exported image is always built at native resolution from the selection
//! grid: an opaque black canvas with the selected cells cut out. It never reads the
//! translucent display overlay.

use crate::data_uri;
use crate::mask::MaskRaster;
use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

const COVERED_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// How selected cells are written into the exported mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskStyle {
    /// Selected cells become fully transparent.
    #[default]
    Alpha,
    /// Selected cells become opaque white; for services that ignore alpha.
    Opaque,
}

impl MaskStyle {
    fn selected_pixel(self) -> Rgba<u8> {
        match self {
            MaskStyle::Alpha => Rgba([0, 0, 0, 0]),
            MaskStyle::Opaque => Rgba([255, 255, 255, 255]),
        }
    }
}

impl FromStr for MaskStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alpha" | "transparent" => Ok(MaskStyle::Alpha),
            "opaque" | "bw" | "black-white" => Ok(MaskStyle::Opaque),
            other => Err(format!("unknown mask style: {other} (expected alpha|opaque)")),
        }
    }
}

impl fmt::Display for MaskStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskStyle::Alpha => f.write_str("alpha"),
            MaskStyle::Opaque => f.write_str("opaque"),
        }
    }
}

/// Opaque black W×H canvas with selected cells cut out.
pub fn compose_mask(mask: &MaskRaster, style: MaskStyle) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(mask.width(), mask.height(), COVERED_PIXEL);
    let cut = style.selected_pixel();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.is_selected(x, y) {
            *pixel = cut;
        }
    }
    out
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode mask PNG")?;
    Ok(bytes)
}

/// Encoded PNG mask at native resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskImage {
    width: u32,
    height: u32,
    style: MaskStyle,
    png: Vec<u8>,
}

impl MaskImage {
    pub fn from_raster(mask: &MaskRaster, style: MaskStyle) -> Result<Self> {
        let png = encode_png(&compose_mask(mask, style))?;
        Ok(Self {
            width: mask.width(),
            height: mask.height(),
            style,
            png,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn style(&self) -> MaskStyle {
        self.style
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn into_png_bytes(self) -> Vec<u8> {
        self.png
    }

    pub fn to_data_uri(&self) -> String {
        data_uri::encode("image/png", &self.png)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        crate::ensure_parent_dir(path)?;
        std::fs::write(path, &self.png)
            .with_context(|| format!("failed to write mask: {}", path.display()))
    }
}

/// Result of asking the editor for its mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskExport {
    Ready(MaskImage),
    /// No base image is loaded; the caller must not send anything.
    NotReady,
}

impl MaskExport {
    pub fn is_ready(&self) -> bool {
        matches!(self, MaskExport::Ready(_))
    }

    pub fn image(&self) -> Option<&MaskImage> {
        match self {
            MaskExport::Ready(image) => Some(image),
            MaskExport::NotReady => None,
        }
    }

    pub fn into_image(self) -> Option<MaskImage> {
        match self {
            MaskExport::Ready(image) => Some(image),
            MaskExport::NotReady => None,
        }
    }

    /// Data URI of the mask, or an empty string when not ready.
    pub fn to_data_uri(&self) -> String {
        self.image().map(MaskImage::to_data_uri).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NativePoint;
    use crate::mask::Coverage;

    fn decode(png: &[u8]) -> RgbaImage {
        image::load_from_memory(png).unwrap().to_rgba8()
    }

    #[test]
    fn untouched_mask_exports_opaque_black() {
        let mask = MaskRaster::covered(30, 20);
        let image = MaskImage::from_raster(&mask, MaskStyle::Alpha).unwrap();
        let decoded = decode(image.png_bytes());
        assert_eq!(decoded.dimensions(), (30, 20));
        assert!(decoded.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn fully_selected_mask_exports_transparent() {
        let mut mask = MaskRaster::covered(30, 20);
        mask.fill(Coverage::Selected);
        let decoded = decode(MaskImage::from_raster(&mask, MaskStyle::Alpha).unwrap().png_bytes());
        assert!(decoded.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn opaque_style_paints_selection_white() {
        let mut mask = MaskRaster::covered(10, 10);
        mask.fill_rect(NativePoint::new(0.0, 0.0), NativePoint::new(5.0, 10.0), Coverage::Selected);
        let composed = compose_mask(&mask, MaskStyle::Opaque);
        assert_eq!(composed.get_pixel(2, 2), &Rgba([255, 255, 255, 255]));
        assert_eq!(composed.get_pixel(7, 2), &Rgba([0, 0, 0, 255]));
        assert!(composed.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn not_ready_has_empty_data_uri() {
        assert_eq!(MaskExport::NotReady.to_data_uri(), "");
        assert!(!MaskExport::NotReady.is_ready());
    }

    #[test]
    fn ready_export_is_png_data_uri() {
        let image = MaskImage::from_raster(&MaskRaster::covered(2, 2), MaskStyle::Alpha).unwrap();
        let uri = MaskExport::Ready(image).to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn style_parses_aliases() {
        assert_eq!("Transparent".parse::<MaskStyle>(), Ok(MaskStyle::Alpha));
        assert_eq!("bw".parse::<MaskStyle>(), Ok(MaskStyle::Opaque));
        assert!("sepia".parse::<MaskStyle>().is_err());
    }
}
