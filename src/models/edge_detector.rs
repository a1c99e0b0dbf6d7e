use image::{imageops, RgbImage};
use imageproc::edges::canny;
use tracing::debug;

use crate::errors::{Result, VisionError};
use crate::output::ResultMap;
use crate::traits::{AuxInput, VisionModel};
use crate::vision_ops::{mask, round_to};

/// Canny edge density of an image.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    low_threshold: f32,
    high_threshold: f32,
}

impl EdgeDetector {
    pub const fn new(low_threshold: f32, high_threshold: f32) -> Self {
        Self {
            low_threshold,
            high_threshold,
        }
    }
}

impl VisionModel for EdgeDetector {
    fn load(&mut self) -> Result<()> {
        if !(self.low_threshold >= 0.0 && self.low_threshold <= self.high_threshold) {
            return Err(VisionError::Configuration {
                message: format!(
                    "invalid canny thresholds {} / {}",
                    self.low_threshold, self.high_threshold
                ),
            });
        }
        Ok(())
    }

    fn predict(&mut self, image: &RgbImage, _aux: Option<&AuxInput>) -> Result<ResultMap> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::DegenerateImage { width, height });
        }

        let gray = imageops::grayscale(image);
        let edges = canny(&gray, self.low_threshold, self.high_threshold);

        let edge_pixels = mask::count_on(&edges);
        let total_pixels = u64::from(width) * u64::from(height);
        let edge_ratio = round_to(edge_pixels as f64 / total_pixels as f64, 4);
        debug!(edge_pixels, total_pixels, "edges extracted");

        let mut output = ResultMap::new();
        output.insert_data("edge_ratio", &edge_ratio)?;
        output.insert_data("edge_pixels", &edge_pixels)?;
        output.insert_data("total_pixels", &total_pixels)?;
        output.insert_image("preview", edges);
        Ok(output)
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}
