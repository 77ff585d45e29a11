//! Output encoding

use crate::stitch::CompositeImage;
use crate::{Error, ImageFormat, Result};
use base64::Engine as Base64Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

/// Encoded composite plus the content type matching its format.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

impl EncodedImage {
    /// Standard (padded) base64 for JSON transport.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Encode once in the requested format. `jpeg_quality` is clamped to 1..=95
/// and ignored for PNG.
pub fn encode(image: &CompositeImage, format: ImageFormat, jpeg_quality: u8) -> Result<EncodedImage> {
    let (width, height) = (image.width(), image.height());
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut bytes)
                .write_image(image.as_rgba(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| Error::EncodeFailed(format!("PNG encoding failed: {}", e)))?;
        }
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgba8(image.as_rgba().clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, jpeg_quality.clamp(1, 95))
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| Error::EncodeFailed(format!("JPEG encoding failed: {}", e)))?;
        }
    }
    Ok(EncodedImage {
        bytes,
        content_type: format.content_type(),
    })
}
