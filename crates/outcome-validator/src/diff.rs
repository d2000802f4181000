//! Structural before/after comparison

use image::GrayImage;
use serde::{Deserialize, Serialize};

use visionflow_core_types::{BoundingBox, EngineError, Screenshot};

// SSIM stabilizer constants for luma normalized to [0, 1]
const C1: f64 = 0.0001;
const C2: f64 = 0.0009;

/// Tunable comparison parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Normalized luminance delta above which a pixel counts as changed
    pub pixel_threshold: f64,

    /// Side of the square blocks used to cluster changed pixels
    pub block_size: u32,

    /// Fraction of changed pixels that marks a block as changed
    pub block_changed_fraction: f64,

    /// Regions smaller than this many square pixels are noise
    pub min_region_area: f64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 0.1,
            block_size: 16,
            block_changed_fraction: 0.1,
            min_region_area: 64.0,
        }
    }
}

/// Result of the structural pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralDiff {
    /// Structural similarity in [0, 1]; 1.0 means visually identical
    pub similarity: f64,

    /// Bounding boxes of clustered visual changes
    pub changed_regions: Vec<BoundingBox>,

    /// Fraction of pixels that changed
    pub changed_fraction: f64,
}

/// Compare two screenshots structurally
///
/// A dimension mismatch (the viewport was resized or navigation
/// replaced the page wholesale) is reported as a full-frame change
/// rather than an error.
pub fn compare(
    before: &Screenshot,
    after: &Screenshot,
    config: &DiffConfig,
) -> Result<StructuralDiff, EngineError> {
    let img_before = decode_gray(before)?;
    let img_after = decode_gray(after)?;

    if img_before.dimensions() != img_after.dimensions() {
        return Ok(StructuralDiff {
            similarity: 0.0,
            changed_regions: vec![BoundingBox::new(
                0.0,
                0.0,
                img_after.width() as f64,
                img_after.height() as f64,
            )],
            changed_fraction: 1.0,
        });
    }

    let (width, height) = img_before.dimensions();
    let total_pixels = (width as u64 * height as u64) as f64;

    // Single pass: SSIM moments and per-block changed-pixel counts
    let block_size = config.block_size.max(1);
    let blocks_x = (width + block_size - 1) / block_size;
    let blocks_y = (height + block_size - 1) / block_size;
    let mut block_changed = vec![0u32; (blocks_x * blocks_y) as usize];

    let mut sum_b = 0.0;
    let mut sum_a = 0.0;
    let mut sum_bb = 0.0;
    let mut sum_aa = 0.0;
    let mut sum_ba = 0.0;
    let mut changed_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let lb = img_before.get_pixel(x, y)[0] as f64 / 255.0;
            let la = img_after.get_pixel(x, y)[0] as f64 / 255.0;
            sum_b += lb;
            sum_a += la;
            sum_bb += lb * lb;
            sum_aa += la * la;
            sum_ba += lb * la;
            if (lb - la).abs() > config.pixel_threshold {
                changed_pixels += 1;
                let idx = (y / block_size) * blocks_x + (x / block_size);
                block_changed[idx as usize] += 1;
            }
        }
    }

    let mean_b = sum_b / total_pixels;
    let mean_a = sum_a / total_pixels;
    let var_b = (sum_bb / total_pixels - mean_b * mean_b).max(0.0);
    let var_a = (sum_aa / total_pixels - mean_a * mean_a).max(0.0);
    let covar = sum_ba / total_pixels - mean_b * mean_a;

    let similarity = ((2.0 * mean_b * mean_a + C1) * (2.0 * covar + C2))
        / ((mean_b * mean_b + mean_a * mean_a + C1) * (var_b + var_a + C2));
    let similarity = similarity.clamp(0.0, 1.0);

    let changed_regions = cluster_regions(
        &block_changed,
        blocks_x,
        blocks_y,
        block_size,
        width,
        height,
        config,
    );

    Ok(StructuralDiff {
        similarity,
        changed_regions,
        changed_fraction: changed_pixels as f64 / total_pixels,
    })
}

fn decode_gray(shot: &Screenshot) -> Result<GrayImage, EngineError> {
    image::load_from_memory(&shot.data)
        .map(|img| img.to_luma8())
        .map_err(|e| EngineError::UnexpectedStateChange(format!("screenshot decode failed: {e}")))
}

/// Merge adjacent changed blocks into bounding boxes
fn cluster_regions(
    block_changed: &[u32],
    blocks_x: u32,
    blocks_y: u32,
    block_size: u32,
    width: u32,
    height: u32,
    config: &DiffConfig,
) -> Vec<BoundingBox> {
    let block_area = (block_size * block_size) as f64;
    let is_changed = |bx: u32, by: u32| -> bool {
        let count = block_changed[(by * blocks_x + bx) as usize];
        count as f64 / block_area > config.block_changed_fraction
    };

    let mut visited = vec![false; block_changed.len()];
    let mut regions = Vec::new();

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let idx = (by * blocks_x + bx) as usize;
            if visited[idx] || !is_changed(bx, by) {
                continue;
            }
            // Flood-fill one connected component of changed blocks
            let (mut min_x, mut max_x, mut min_y, mut max_y) = (bx, bx, by, by);
            let mut queue = vec![(bx, by)];
            visited[idx] = true;
            while let Some((cx, cy)) = queue.pop() {
                min_x = min_x.min(cx);
                max_x = max_x.max(cx);
                min_y = min_y.min(cy);
                max_y = max_y.max(cy);
                let neighbors = [
                    (cx.wrapping_sub(1), cy),
                    (cx + 1, cy),
                    (cx, cy.wrapping_sub(1)),
                    (cx, cy + 1),
                ];
                for (nx, ny) in neighbors {
                    if nx >= blocks_x || ny >= blocks_y {
                        continue;
                    }
                    let nidx = (ny * blocks_x + nx) as usize;
                    if !visited[nidx] && is_changed(nx, ny) {
                        visited[nidx] = true;
                        queue.push((nx, ny));
                    }
                }
            }

            let x = (min_x * block_size) as f64;
            let y = (min_y * block_size) as f64;
            let w = (((max_x + 1) * block_size).min(width) as f64 - x).max(0.0);
            let h = (((max_y + 1) * block_size).min(height) as f64 - y).max(0.0);
            let region = BoundingBox::new(x, y, w, h);
            if region.area() >= config.min_region_area {
                regions.push(region);
            }
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgba};
    use visionflow_core_types::ImageFormat;

    fn solid_screenshot(width: u32, height: u32, shade: u8) -> Screenshot {
        encode(width, height, move |_, _| Rgba([shade, shade, shade, 255]))
    }

    fn encode(
        width: u32,
        height: u32,
        pixel: impl Fn(u32, u32) -> Rgba<u8>,
    ) -> Screenshot {
        let img = ImageBuffer::from_fn(width, height, pixel);
        let mut buf = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Png,
        )
        .unwrap();
        Screenshot::new(buf, ImageFormat::Png, width, height)
    }

    #[test]
    fn identical_screenshots_are_maximally_similar() {
        let a = solid_screenshot(128, 128, 180);
        let b = solid_screenshot(128, 128, 180);

        let diff = compare(&a, &b, &DiffConfig::default()).unwrap();
        assert!(diff.similarity > 0.999);
        assert!(diff.changed_regions.is_empty());
        assert_eq!(diff.changed_fraction, 0.0);
    }

    #[test]
    fn a_changed_rectangle_becomes_one_region() {
        let before = solid_screenshot(128, 128, 220);
        // A dark 48x32 patch appears at (32, 48)
        let after = encode(128, 128, |x, y| {
            if (32..80).contains(&x) && (48..80).contains(&y) {
                Rgba([20, 20, 20, 255])
            } else {
                Rgba([220, 220, 220, 255])
            }
        });

        let diff = compare(&before, &after, &DiffConfig::default()).unwrap();
        assert!(diff.similarity < 0.999);
        assert_eq!(diff.changed_regions.len(), 1);
        let region = diff.changed_regions[0];
        // The region covers the patch, snapped to block boundaries
        assert!(region.x <= 32.0 && region.x + region.width >= 80.0);
        assert!(region.y <= 48.0 && region.y + region.height >= 80.0);
    }

    #[test]
    fn dimension_mismatch_is_a_full_frame_change() {
        let a = solid_screenshot(64, 64, 100);
        let b = solid_screenshot(128, 64, 100);

        let diff = compare(&a, &b, &DiffConfig::default()).unwrap();
        assert_eq!(diff.similarity, 0.0);
        assert_eq!(diff.changed_regions.len(), 1);
        assert_eq!(diff.changed_regions[0].width, 128.0);
    }

    #[test]
    fn tiny_speckle_noise_is_filtered_out() {
        let before = solid_screenshot(128, 128, 200);
        // A single changed pixel is under every block threshold
        let after = encode(128, 128, |x, y| {
            if x == 5 && y == 5 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([200, 200, 200, 255])
            }
        });

        let diff = compare(&before, &after, &DiffConfig::default()).unwrap();
        assert!(diff.changed_regions.is_empty());
    }

    #[test]
    fn luma_helper_decodes() {
        let shot = solid_screenshot(8, 8, 50);
        let gray = decode_gray(&shot).unwrap();
        assert_eq!(gray.get_pixel(0, 0), &Luma([50u8]));
    }
}
