//! Image normalizer
//!
//! Resizes a raw camera frame so its longer side is at most [`MAX_DIMENSION`] pixels,
//! keeping the aspect ratio, and encodes it as JPEG at [`JPEG_QUALITY`].

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use thiserror::Error;

use crate::capture::ImageBlob;

pub const MAX_DIMENSION: u32 = 1024;
pub const JPEG_QUALITY: u8 = 80;
pub const CAPTURE_FILE_NAME: &str = "capture.jpg";
pub const CAPTURE_MIME_TYPE: &str = "image/jpeg";

/// A decoded video frame, tightly packed RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self { width, height, rgba }
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Frame buffer of {len} bytes does not match {width}x{height} RGBA")]
    InvalidFrame { width: u32, height: u32, len: usize },
    #[error("Failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Normalizer task failed: {0}")]
    Worker(String),
}

/// Target size for a frame: longer side capped, aspect preserved, never upscaled
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= MAX_DIMENSION {
        return (width, height);
    }

    let scale = MAX_DIMENSION as f64 / longer as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, MAX_DIMENSION);
    (scaled(width), scaled(height))
}

/// Resize and encode a frame; the source frame is left untouched
pub fn normalize(frame: &RawFrame) -> Result<ImageBlob, NormalizeError> {
    let invalid = || NormalizeError::InvalidFrame {
        width: frame.width,
        height: frame.height,
        len: frame.rgba.len(),
    };
    if frame.width == 0 || frame.height == 0 {
        return Err(invalid());
    }
    let pixels = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(invalid)?;

    let (width, height) = target_dimensions(frame.width, frame.height);
    let image = DynamicImage::ImageRgba8(pixels);
    let resized = if (width, height) == (frame.width, frame.height) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    };

    let rgb = resized.to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY).encode_image(&rgb)?;

    log::debug!(
        "Normalized {}x{} frame to {}x{} JPEG ({} bytes)",
        frame.width,
        frame.height,
        width,
        height,
        encoded.len()
    );

    Ok(ImageBlob::new(CAPTURE_FILE_NAME, CAPTURE_MIME_TYPE, encoded))
}

/// [`normalize`] on the blocking pool
pub async fn normalize_async(frame: RawFrame) -> Result<ImageBlob, NormalizeError> {
    tokio::task::spawn_blocking(move || normalize(&frame))
        .await
        .map_err(|e| NormalizeError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> RawFrame {
        let rgba = [30u8, 160, 60, 255].repeat((width * height) as usize);
        RawFrame::new(width, height, rgba)
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(1920, 1080), (1024, 576));
        assert_eq!(target_dimensions(1080, 1920), (576, 1024));
        assert_eq!(target_dimensions(640, 480), (640, 480));
        assert_eq!(target_dimensions(4000, 1), (1024, 1));
    }

    #[test]
    fn test_normalize_large_frame() {
        let frame = solid_frame(1280, 720);
        let blob = normalize(&frame).unwrap();

        assert_eq!(blob.name, CAPTURE_FILE_NAME);
        assert_eq!(blob.mime_type, CAPTURE_MIME_TYPE);
        let decoded = image::load_from_memory(&blob.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 576));
        assert_eq!(frame.rgba.len(), 1280 * 720 * 4);
    }

    #[test]
    fn test_normalize_small_frame_not_upscaled() {
        let blob = normalize(&solid_frame(64, 48)).unwrap();
        let decoded = image::load_from_memory(&blob.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_rejects_short_buffer() {
        let frame = RawFrame::new(10, 10, vec![0; 12]);
        assert!(matches!(normalize(&frame), Err(NormalizeError::InvalidFrame { .. })));
        assert!(matches!(
            normalize(&RawFrame::new(0, 0, vec![])),
            Err(NormalizeError::InvalidFrame { .. })
        ));
    }

    #[tokio::test]
    async fn test_normalize_async() {
        let blob = normalize_async(solid_frame(32, 32)).await.unwrap();
        assert!(!blob.is_empty());
    }
}
