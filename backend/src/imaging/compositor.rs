//! Alpha compositing of skin-analysis overlays onto the uploaded photo.
//!
//! Overlays are read from a result directory, applied in filename order with
//! source-over blending, and the composed image is written back next to them
//! as `overlayed.png`.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};

use super::codec::{self, CodecError};
use crate::storage::layout::{COMPOSED_FILE, ORIGINAL_FILE};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: CodecError,
    },
    #[error("Invalid opacity {0}, expected a value in [0, 1]")]
    InvalidOpacity(f32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// One overlay placed onto the base image.
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    pub image: RgbaImage,
    pub position: (i64, i64),
    pub resize: Option<(u32, u32)>,
    pub opacity: f32,
}

impl OverlayLayer {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            position: (0, 0),
            resize: None,
            opacity: 1.0,
        }
    }

    pub fn at(mut self, x: i64, y: i64) -> Self {
        self.position = (x, y);
        self
    }

    pub fn resized(mut self, width: u32, height: u32) -> Self {
        self.resize = Some((width, height));
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    fn prepared(&self) -> Result<RgbaImage, ComposeError> {
        if !(0.0..=1.0).contains(&self.opacity) || self.opacity.is_nan() {
            return Err(ComposeError::InvalidOpacity(self.opacity));
        }

        let mut layer = match self.resize {
            Some((w, h)) if (w, h) != self.image.dimensions() => {
                imageops::resize(&self.image, w, h, FilterType::Lanczos3)
            }
            _ => self.image.clone(),
        };

        if self.opacity < 1.0 {
            for pixel in layer.pixels_mut() {
                pixel[3] = (pixel[3] as f32 * self.opacity).round() as u8;
            }
        }
        Ok(layer)
    }
}

/// An ordered stack of overlays over a base image.
#[derive(Debug, Clone)]
pub struct Composition {
    base: RgbaImage,
    layers: Vec<OverlayLayer>,
}

impl Composition {
    pub fn new(base: RgbaImage) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    pub fn push(&mut self, layer: OverlayLayer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn render(&self) -> Result<RgbaImage, ComposeError> {
        let mut accumulator = self.base.clone();
        for layer in &self.layers {
            let prepared = layer.prepared()?;
            paste_over(&mut accumulator, &prepared, layer.position);
        }
        Ok(accumulator)
    }
}

/// Blends `layer` onto `canvas` with its top-left corner at `origin`.
/// Pixels falling outside the canvas are dropped.
fn paste_over(canvas: &mut RgbaImage, layer: &RgbaImage, origin: (i64, i64)) {
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for (x, y, src) in layer.enumerate_pixels() {
        let (cx, cy) = (origin.0 + i64::from(x), origin.1 + i64::from(y));
        if cx < 0 || cy < 0 || cx >= width || cy >= height {
            continue;
        }
        let dst = canvas.get_pixel_mut(cx as u32, cy as u32);
        *dst = source_over(*dst, *src);
    }
}

/// Porter-Duff source-over on straight (non-premultiplied) alpha.
pub fn source_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    if src[3] == 0 {
        return dst;
    }
    let src_a = f32::from(src[3]) / 255.0;
    let dst_a = f32::from(dst[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);

    let mut out = [0u8; 4];
    for c in 0..3 {
        let value =
            (f32::from(src[c]) * src_a + f32::from(dst[c]) * dst_a * (1.0 - src_a)) / out_a;
        out[c] = to_channel(value);
    }
    out[3] = to_channel(out_a * 255.0);
    Rgba(out)
}

fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// PNG overlays in `dir`, sorted by file name, excluding the stored original
/// and any previous composition.
pub fn list_overlays(dir: &Path) -> Result<Vec<PathBuf>, ComposeError> {
    let mut overlays = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == ORIGINAL_FILE || name == COMPOSED_FILE {
            continue;
        }
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));
        if is_png {
            overlays.push(path);
        }
    }
    overlays.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(overlays)
}

/// Composes every overlay in `overlay_dir` onto `base_png` at the origin with
/// full opacity, persists the result as `overlayed.png` and returns its bytes.
pub fn compose(base_png: &[u8], overlay_dir: &Path) -> Result<Vec<u8>, ComposeError> {
    let base = codec::decode_rgba(base_png)?;
    let mut composition = Composition::new(base);

    for path in list_overlays(overlay_dir)? {
        let raw = fs::read(&path)?;
        let image = codec::decode_rgba(&raw).map_err(|source| ComposeError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!(
            "Queued overlay {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        composition.push(OverlayLayer::new(image));
    }

    let rendered = composition.render()?;
    let png = codec::encode_png(&rendered)?;
    fs::write(overlay_dir.join(COMPOSED_FILE), &png)?;

    log::info!(
        "Composed {} overlays in {} ({} bytes)",
        composition.len(),
        overlay_dir.display(),
        png.len()
    );
    Ok(png)
}
