//! Screenshot preprocessing before inference
//!
//! Oversized screenshots are downscaled to a bounded resolution and
//! normalized to RGB so inference cost stays bounded and confidence
//! scores are comparable across calls.

use image::imageops::FilterType;
use image::GenericImageView;

use visionflow_core_types::{EngineError, ImageFormat, Screenshot};

/// A screenshot prepared for inference
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Normalized PNG screenshot, at most `max_dimension` on its
    /// largest side
    pub screenshot: Screenshot,

    /// preprocessed / original size ratio; candidate boxes detected on
    /// the preprocessed image are divided by this to map back
    pub scale: f64,
}

/// Decode, downscale if oversized, normalize to RGB8, re-encode as PNG
pub fn preprocess(shot: &Screenshot, max_dimension: u32) -> Result<Preprocessed, EngineError> {
    let img = image::load_from_memory(&shot.data)
        .map_err(|e| EngineError::ElementNotFound(format!("screenshot decode failed: {e}")))?;

    let (width, height) = img.dimensions();
    let largest = width.max(height);

    let (img, scale) = if largest > max_dimension {
        let scale = max_dimension as f64 / largest as f64;
        let new_w = ((width as f64 * scale).round() as u32).max(1);
        let new_h = ((height as f64 * scale).round() as u32).max(1);
        (img.resize_exact(new_w, new_h, FilterType::Triangle), scale)
    } else {
        (img, 1.0)
    };

    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    rgb.write_to(
        &mut std::io::Cursor::new(&mut buf),
        image::ImageFormat::Png,
    )
    .map_err(|e| EngineError::ElementNotFound(format!("screenshot re-encode failed: {e}")))?;

    let (out_w, out_h) = (rgb.width(), rgb.height());
    Ok(Preprocessed {
        screenshot: Screenshot::new(buf, ImageFormat::Png, out_w, out_h),
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn png_screenshot(width: u32, height: u32) -> Screenshot {
        let img = ImageBuffer::from_pixel(width, height, Rgba([40u8, 80, 120, 255]));
        let mut buf = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Png,
        )
        .unwrap();
        Screenshot::new(buf, ImageFormat::Png, width, height)
    }

    #[test]
    fn small_images_pass_through_at_scale_one() {
        let shot = png_screenshot(200, 100);
        let prepared = preprocess(&shot, 1568).unwrap();
        assert_eq!(prepared.scale, 1.0);
        assert_eq!(prepared.screenshot.width, 200);
        assert_eq!(prepared.screenshot.height, 100);
    }

    #[test]
    fn oversized_images_are_bounded_preserving_aspect() {
        let shot = png_screenshot(200, 100);
        let prepared = preprocess(&shot, 100).unwrap();
        assert_eq!(prepared.screenshot.width, 100);
        assert_eq!(prepared.screenshot.height, 50);
        assert!((prepared.scale - 0.5).abs() < 1e-9);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let shot = Screenshot::new(vec![0, 1, 2, 3], ImageFormat::Png, 10, 10);
        assert!(preprocess(&shot, 1568).is_err());
    }
}
