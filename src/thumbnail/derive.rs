//! Thumbnail derivation: decode, flatten, shrink, re-encode as JPEG.
//!
//! CPU-bound. Callers on the async runtime should go through
//! `tokio::task::spawn_blocking` (see `ThumbnailService`).

use image::{
    DynamicImage, GenericImageView, ImageError, Rgb, RgbImage, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("source is not decodable as an image: {0}")]
    DecodeFailed(String),
    #[error("failed to encode thumbnail: {0}")]
    EncodeFailed(String),
}

/// Bounds and encoding quality for derived thumbnails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThumbnailOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            max_width: 300,
            max_height: 300,
            quality: 85,
        }
    }
}

/// Produce a JPEG thumbnail no larger than `options` in either dimension.
///
/// Images already within bounds keep their size; nothing is ever upscaled.
/// Output is deterministic for a given (source, options) pair.
pub fn derive(source: &[u8], options: &ThumbnailOptions) -> Result<Vec<u8>, DeriveError> {
    let img = image::load_from_memory(source)
        .map_err(|err| DeriveError::DecodeFailed(err.to_string()))?;
    let (orig_w, orig_h) = img.dimensions();

    let flat = flatten(img);
    let max_w = options.max_width.max(1);
    let max_h = options.max_height.max(1);
    let resized = if orig_w > max_w || orig_h > max_h {
        flat.resize(max_w, max_h, FilterType::Lanczos3)
    } else {
        flat
    };

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, options.quality.clamp(1, 100));
    resized
        .write_with_encoder(encoder)
        .map_err(|err: ImageError| DeriveError::EncodeFailed(err.to_string()))?;

    debug!(
        original_width = orig_w,
        original_height = orig_h,
        width = resized.width(),
        height = resized.height(),
        size = buffer.len(),
        "thumbnail derived"
    );
    Ok(buffer)
}

/// Bring any colour mode into one JPEG can carry: alpha is blended onto
/// opaque white, grayscale stays 8-bit grayscale, everything else is RGB8.
fn flatten(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        return DynamicImage::ImageRgb8(composite_on_white(&img));
    }
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(img.to_luma8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn composite_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |channel: u8| -> u8 {
            ((u32::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Width and height of a fully decoded image. A readable header over a
/// damaged body is still a decode failure.
pub fn decode_dimensions(source: &[u8]) -> Result<(u32, u32), DeriveError> {
    image::load_from_memory(source)
        .map(|img| img.dimensions())
        .map_err(|err| DeriveError::DecodeFailed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::png_bytes;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn decoded(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn test_large_image_is_bounded_preserving_aspect() {
        let thumb = derive(&png_bytes(1000, 500), &ThumbnailOptions::default()).unwrap();
        let img = decoded(&thumb);
        assert_eq!(img.dimensions(), (300, 150));
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let thumb = derive(&png_bytes(120, 40), &ThumbnailOptions::default()).unwrap();
        assert_eq!(decoded(&thumb).dimensions(), (120, 40));
    }

    #[test]
    fn test_tall_image_respects_height_bound() {
        let options = ThumbnailOptions {
            max_width: 200,
            max_height: 100,
            quality: 85,
        };
        let thumb = derive(&png_bytes(400, 800), &options).unwrap();
        let (w, h) = decoded(&thumb).dimensions();
        assert!(w <= 200 && h <= 100);
        assert_eq!(h, 100);
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0])));
        let mut source = Vec::new();
        img.write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();

        let thumb = derive(&source, &ThumbnailOptions::default()).unwrap();
        let rgb = decoded(&thumb).to_rgb8();
        let center = rgb.get_pixel(8, 8);
        assert!(center.0.iter().all(|&c| c >= 245), "got {:?}", center);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let source = png_bytes(640, 480);
        let options = ThumbnailOptions::default();
        assert_eq!(derive(&source, &options).unwrap(), derive(&source, &options).unwrap());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let err = derive(b"definitely not an image", &ThumbnailOptions::default()).unwrap_err();
        assert!(matches!(err, DeriveError::DecodeFailed(_)));
    }

    #[test]
    fn test_decode_dimensions() {
        assert_eq!(decode_dimensions(&png_bytes(33, 21)).unwrap(), (33, 21));
        assert!(decode_dimensions(b"nope").is_err());
    }

    #[test]
    fn test_intact_header_with_truncated_body_fails() {
        let source = png_bytes(64, 64);
        let truncated = &source[..40];
        let header = image::ImageReader::new(Cursor::new(truncated))
            .with_guessed_format()
            .unwrap()
            .into_dimensions();
        assert_eq!(header.unwrap(), (64, 64));

        let err = decode_dimensions(truncated).unwrap_err();
        assert!(matches!(err, DeriveError::DecodeFailed(_)));
    }

    #[test]
    fn test_composite_blends_half_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let out = composite_on_white(&img);
        assert_eq!(out.get_pixel(0, 0).0, [127, 127, 127]);
    }
}
