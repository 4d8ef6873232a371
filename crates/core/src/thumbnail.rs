//! Preview rendering: decode, rotate upright, fit, re-encode.
//!
//! Pipeline: JPEG decode (turbojpeg when enabled, else `image`) → EXIF
//! rotation → fast_image_resize bilinear fit → JPEG encode.

use chrono::{DateTime, Utc};
use fast_image_resize::{self as fir, images::Image as FirImage};
use image::codecs::jpeg::JpegEncoder;
use image::error::{DecodingError, ImageFormatHint};
use image::{imageops, ImageError, ImageFormat, RgbImage};

use crate::config::ThumbnailSettings;
use crate::error::FileError;
use crate::exif::{read_metadata, Rotation};

/// Encoded preview and its pixel size.
#[derive(Debug, Clone)]
pub struct Preview {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Everything the pipeline needs from one file's bytes.
#[derive(Debug, Clone)]
pub struct Processed {
    /// `None` when the file has no readable EXIF time.
    pub captured_at: Option<DateTime<Utc>>,
    pub preview: Preview,
}

/// Extract metadata and render the preview. CPU bound; call from a
/// blocking thread.
pub fn process(bytes: &[u8], settings: &ThumbnailSettings) -> Result<Processed, FileError> {
    let meta = read_metadata(bytes);
    let preview = render(bytes, meta.rotation, settings)?;
    Ok(Processed {
        captured_at: meta.captured_at,
        preview,
    })
}

pub fn render(
    bytes: &[u8],
    rotation: Rotation,
    settings: &ThumbnailSettings,
) -> Result<Preview, FileError> {
    let decoded = decode_jpeg(bytes)?;
    let upright = rotate(decoded, rotation);
    let fitted = fit(upright, settings.max_dimension)?;

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, settings.quality).encode_image(&fitted)?;
    Ok(Preview {
        jpeg,
        width: fitted.width(),
        height: fitted.height(),
    })
}

const EOI: [u8; 2] = [0xFF, 0xD9];

/// Whether the data ends with the end-of-image marker, ignoring trailing
/// zero padding. Decoders fill a cut-off scan with gray instead of failing.
fn ends_with_eoi(bytes: &[u8]) -> bool {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
    bytes[..end].ends_with(&EOI)
}

fn truncated() -> FileError {
    FileError::Decode(ImageError::Decoding(DecodingError::new(
        ImageFormatHint::Exact(ImageFormat::Jpeg),
        "missing end-of-image marker",
    )))
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage, FileError> {
    if !ends_with_eoi(bytes) {
        return Err(truncated());
    }
    #[cfg(feature = "turbojpeg")]
    if let Some(img) = decode_turbojpeg(bytes) {
        return Ok(img);
    }
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.to_rgb8())
}

#[cfg(feature = "turbojpeg")]
fn decode_turbojpeg(bytes: &[u8]) -> Option<RgbImage> {
    let mut decompressor = turbojpeg::Decompressor::new().ok()?;
    let header = decompressor.read_header(bytes).ok()?;
    let (w, h) = (header.width, header.height);

    let mut buf = vec![0u8; w * h * 3];
    let output = turbojpeg::Image {
        pixels: buf.as_mut_slice(),
        width: w,
        pitch: w * 3,
        height: h,
        format: turbojpeg::PixelFormat::RGB,
    };
    decompressor.decompress(bytes, output).ok()?;
    RgbImage::from_raw(w as u32, h as u32, buf)
}

fn rotate(img: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => img,
        Rotation::Clockwise90 => imageops::rotate90(&img),
        Rotation::Half => imageops::rotate180(&img),
        Rotation::CounterClockwise90 => imageops::rotate270(&img),
    }
}

/// Target size inside a `max × max` box, aspect preserved, never upscaled.
pub fn fit_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let longest = width.max(height) as f64;
    let scale = max as f64 / longest;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max);
    (scaled(width), scaled(height))
}

fn fit(img: RgbImage, max: u32) -> Result<RgbImage, FileError> {
    let (w, h) = img.dimensions();
    let (tw, th) = fit_dimensions(w, h, max);
    if (tw, th) == (w, h) {
        return Ok(img);
    }

    let src = FirImage::from_vec_u8(w, h, img.into_raw(), fir::PixelType::U8x3)
        .map_err(|e| FileError::Resize(e.to_string()))?;
    let mut dst = FirImage::new(tw, th, fir::PixelType::U8x3);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| FileError::Resize(e.to_string()))?;

    RgbImage::from_raw(tw, th, dst.into_vec())
        .ok_or_else(|| FileError::Resize("resized buffer has the wrong length".to_string()))
}
