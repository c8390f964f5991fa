//! Decode, bound and re-encode uploaded images.
//!
//! Everything here is synchronous and CPU bound; callers run it on the
//! blocking pool.

use std::io::Cursor;

use bytes::Bytes;
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilterType, PngEncoder},
    },
    imageops::FilterType,
    DynamicImage,
    ImageError,
    ImageReader,
    Limits,
};

use crate::data_model::ImageFormat;

pub const MAX_DIMENSION: u32 = 4000;
pub const JPEG_QUALITY: u8 = 85;
pub const WEBP_QUALITY: f32 = 85.0;
/// 16383 x 16383, checked against the header before any pixel is decoded.
pub const MAX_INPUT_PIXELS: u64 = 0x3FFF * 0x3FFF;
/// Allocation ceiling for a single decode.
pub const MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub max_dimension: u32,
    pub max_input_pixels: u64,
    pub max_decode_bytes: u64,
    pub jpeg_quality: u8,
    pub webp_quality: f32,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            max_input_pixels: MAX_INPUT_PIXELS,
            max_decode_bytes: MAX_DECODE_BYTES,
            jpeg_quality: JPEG_QUALITY,
            webp_quality: WEBP_QUALITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to decode {format} image: {source}")]
    Decode {
        format: ImageFormat,
        source: ImageError,
    },

    #[error("{format} image of {width}x{height} exceeds {max} pixels")]
    TooManyPixels {
        format: ImageFormat,
        width: u32,
        height: u32,
        max: u64,
    },

    #[error("failed to encode {format} image: {message}")]
    Encode {
        format: ImageFormat,
        message: String,
    },

    #[error("transcode worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
pub struct Transcoded {
    pub bytes: Bytes,
    /// Output dimensions; zero for passthrough formats, which are not decoded.
    pub width: u32,
    pub height: u32,
    pub resized: bool,
}

pub fn transcode(
    bytes: Bytes,
    format: ImageFormat,
    options: &TranscodeOptions,
) -> Result<Transcoded, DecodeError> {
    if format.is_animated() {
        return Ok(Transcoded {
            bytes,
            width: 0,
            height: 0,
            resized: false,
        });
    }

    let image = decode(&bytes, format, options)?;
    let (image, resized) = fit_within(image, options.max_dimension);
    let encoded = encode(&image, format, options)?;

    Ok(Transcoded {
        bytes: Bytes::from(encoded),
        width: image.width(),
        height: image.height(),
        resized,
    })
}

fn decode(
    bytes: &[u8],
    format: ImageFormat,
    options: &TranscodeOptions,
) -> Result<DynamicImage, DecodeError> {
    let decode_error = |source: ImageError| DecodeError::Decode { format, source };
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format.into())
        .into_dimensions()
        .map_err(decode_error)?;
    if u64::from(width) * u64::from(height) > options.max_input_pixels {
        return Err(DecodeError::TooManyPixels {
            format,
            width,
            height,
            max: options.max_input_pixels,
        });
    }

    let mut limits = Limits::default();
    limits.max_alloc = Some(options.max_decode_bytes);
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format.into());
    reader.limits(limits);
    reader.decode().map_err(decode_error)
}

/// Shrinks `image` so neither side exceeds `max`, keeping the aspect ratio.
/// Images already inside the bound are returned as is.
pub fn fit_within(image: DynamicImage, max: u32) -> (DynamicImage, bool) {
    if image.width() <= max && image.height() <= max {
        return (image, false);
    }
    (image.resize(max, max, FilterType::Lanczos3), true)
}

fn encode(
    image: &DynamicImage,
    format: ImageFormat,
    options: &TranscodeOptions,
) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Cursor::new(Vec::new());
    let result = match format {
        ImageFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Best,
                PngFilterType::Adaptive,
            );
            image.write_with_encoder(encoder)
        }
        ImageFormat::Webp => return encode_webp(image, options.webp_quality),
        // jpeg is the fallback for every other accepted format
        ImageFormat::Jpeg | ImageFormat::Gif => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, options.jpeg_quality);
            image.to_rgb8().write_with_encoder(encoder)
        }
    };
    result.map_err(|e| DecodeError::Encode {
        format,
        message: e.to_string(),
    })?;
    Ok(buf.into_inner())
}

fn encode_webp(image: &DynamicImage, quality: f32) -> Result<Vec<u8>, DecodeError> {
    // libwebp only takes 8-bit RGB(A)
    let image = if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    };
    let encoder = webp::Encoder::from_image(&image).map_err(|e| DecodeError::Encode {
        format: ImageFormat::Webp,
        message: e.to_string(),
    })?;
    Ok(encoder.encode(quality).to_vec())
}
