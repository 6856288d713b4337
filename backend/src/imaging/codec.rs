use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Decodes any supported image and re-encodes it as lossless RGBA PNG.
pub fn normalize_to_png(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let rgba = decode_rgba(raw)?;
    encode_png(&rgba)
}

pub fn decode_rgba(raw: &[u8]) -> Result<RgbaImage, CodecError> {
    let reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|e| CodecError::UnsupportedFormat(e.to_string()))?;

    if reader.format().is_none() {
        return Err(CodecError::UnsupportedFormat(
            "unrecognized image signature".to_string(),
        ));
    }

    let image = reader
        .decode()
        .map_err(|e| CodecError::UnsupportedFormat(e.to_string()))?;
    Ok(image.to_rgba8())
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}
