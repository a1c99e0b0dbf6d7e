use std::collections::HashMap;

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, VisionError};
use crate::output::ResultMap;
use crate::traits::{AuxInput, VisionModel};
use crate::vision_ops::color::{hue_ranges_for_rgb, HexColor, HueRange, Rgb8};
use crate::vision_ops::regions::{extract_regions, Region};
use crate::vision_ops::{draw, fit_within, mask, round_to};

/// Which regions a detector reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Only the largest qualifying region.
    Largest,
    /// Every qualifying region, largest first, up to `max_regions`.
    AllRegions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Minimum region size in working-image pixels.
    pub min_region_area: u64,
    pub max_working_side: u32,
    pub max_regions: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_region_area: 100,
            max_working_side: 640,
            max_regions: 10,
        }
    }
}

/// Bounding box with exclusive `x2`/`y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl From<&Region> for BoundingBox {
    fn from(region: &Region) -> Self {
        Self {
            x1: region.x,
            y1: region.y,
            x2: region.right(),
            y2: region.bottom(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetColor {
    pub hex: String,
    pub rgb: Rgb8,
}

/// Result of thresholding one image for one target color. All coordinates, areas and
/// pixel counts are in the coordinate space of the input image, even when the mask
/// was computed on a downscaled copy.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Qualifying regions, largest first.
    pub regions: Vec<Region>,
    pub detected_pixels: u64,
    pub total_pixels: u64,
    pub coverage_percentage: f64,
    /// Mask of the pixels belonging to qualifying regions, at input resolution.
    pub mask: GrayImage,
}

impl Detection {
    pub fn largest(&self) -> Option<&Region> {
        self.regions.first()
    }
}

/// Maps regions and counts from the working image back to the input image.
struct Rescale {
    sx: f64,
    sy: f64,
    width: u32,
    height: u32,
}

impl Rescale {
    fn new(original: (u32, u32), working: (u32, u32)) -> Self {
        Self {
            sx: f64::from(original.0) / f64::from(working.0),
            sy: f64::from(original.1) / f64::from(working.1),
            width: original.0,
            height: original.1,
        }
    }

    fn is_identity(&self) -> bool {
        self.sx == 1.0 && self.sy == 1.0
    }

    fn total(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn count(&self, pixels: u64) -> u64 {
        if self.is_identity() {
            return pixels;
        }
        ((pixels as f64 * self.sx * self.sy).round() as u64).min(self.total())
    }

    fn region(&self, region: &Region) -> Region {
        if self.is_identity() {
            return *region;
        }
        let x1 = (f64::from(region.x) * self.sx).floor() as u32;
        let y1 = (f64::from(region.y) * self.sy).floor() as u32;
        let x2 = ((f64::from(region.right()) * self.sx).ceil() as u32).min(self.width);
        let y2 = ((f64::from(region.bottom()) * self.sy).ceil() as u32).min(self.height);
        Region {
            x: x1.min(x2),
            y: y1.min(y2),
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
            area: self.count(region.area),
        }
    }
}

/// Finds the regions of an image that match a target color in HSV space.
#[derive(Debug, Clone)]
pub struct ColorDetector {
    mode: DetectionMode,
    settings: DetectorSettings,
    hue_cache: HashMap<String, Vec<HueRange>>,
}

impl ColorDetector {
    pub fn new(mode: DetectionMode, settings: DetectorSettings) -> Self {
        Self {
            mode,
            settings,
            hue_cache: HashMap::new(),
        }
    }

    pub const fn mode(&self) -> DetectionMode {
        self.mode
    }

    /// Number of target colors whose hue windows are memoised by this instance.
    pub fn cached_colors(&self) -> usize {
        self.hue_cache.len()
    }

    fn hue_ranges(&mut self, color: &HexColor) -> Vec<HueRange> {
        self.hue_cache
            .entry(color.as_str().to_string())
            .or_insert_with(|| hue_ranges_for_rgb(color.rgb()))
            .clone()
    }

    pub fn detect(&mut self, image: &RgbImage, color: &HexColor) -> Result<Detection> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::DegenerateImage { width, height });
        }

        let ranges = self.hue_ranges(color);
        let working = fit_within(image, self.settings.max_working_side);
        let rescale = Rescale::new((width, height), working.dimensions());

        let raw_mask = mask::threshold_hsv(&working, &ranges);
        let cleaned = mask::denoise(&raw_mask);
        let set = extract_regions(&cleaned, self.settings.min_region_area);

        let working_total = u64::from(working.width()) * u64::from(working.height());
        let working_detected = set.pixel_count();
        debug!(
            color = %color,
            ranges = ranges.len(),
            working = ?working.dimensions(),
            regions = set.regions.len(),
            "color mask evaluated"
        );

        let mask = if rescale.is_identity() {
            set.mask
        } else {
            imageops::resize(&set.mask, width, height, FilterType::Nearest)
        };

        Ok(Detection {
            regions: set.regions.iter().map(|r| rescale.region(r)).collect(),
            detected_pixels: rescale.count(working_detected),
            total_pixels: rescale.total(),
            coverage_percentage: round_to(
                working_detected as f64 / working_total as f64 * 100.0,
                2,
            ),
            mask,
        })
    }

    /// Returns the highlighted overlay, the same boxes on an untouched copy of the input,
    /// and the label of every box.
    fn annotate(
        image: &RgbImage,
        detection: &Detection,
        regions: &[Region],
    ) -> (RgbImage, RgbImage, Vec<String>) {
        let mut annotated = draw::highlight_mask(image, &detection.mask);
        let mut outlined = image.clone();
        let mut labels = Vec::with_capacity(regions.len());
        for region in regions {
            let label = format!("{}px", region.area);
            for canvas in [&mut annotated, &mut outlined] {
                draw::draw_box(canvas, region.x, region.y, region.width, region.height);
                draw::draw_label_tab(canvas, region.x, region.y, region.width, &label);
            }
            labels.push(label);
        }
        (annotated, outlined, labels)
    }
}

impl VisionModel for ColorDetector {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn predict(&mut self, image: &RgbImage, aux: Option<&AuxInput>) -> Result<ResultMap> {
        let color = match aux {
            Some(AuxInput::TargetColor(color)) => color,
            None => return Err(VisionError::validation("color", "is required")),
        };

        let detection = self.detect(image, color)?;
        let largest = detection.largest().copied();
        let listed = match self.mode {
            DetectionMode::Largest => largest.into_iter().collect::<Vec<_>>(),
            DetectionMode::AllRegions => detection
                .regions
                .iter()
                .take(self.settings.max_regions)
                .copied()
                .collect(),
        };
        let (annotated, outlined, labels) = Self::annotate(image, &detection, &listed);

        let mut output = ResultMap::new();
        output.insert_data("detection_found", &largest.is_some())?;
        output.insert_data("color_detected", color.as_str())?;
        output.insert_data(
            "target_color",
            &TargetColor {
                hex: color.as_str().to_string(),
                rgb: color.rgb(),
            },
        )?;
        output.insert_data("bounding_box", &largest.as_ref().map(BoundingBox::from))?;
        output.insert_data("coverage_percentage", &detection.coverage_percentage)?;
        output.insert_data("detected_pixels", &detection.detected_pixels)?;
        output.insert_data("total_pixels", &detection.total_pixels)?;
        match self.mode {
            DetectionMode::Largest => {
                output.insert_data("label", &labels.first())?;
            }
            DetectionMode::AllRegions => {
                output.insert_data("regions_found", &detection.regions.len())?;
                output.insert_data("regions", &listed)?;
                output.insert_data("labels", &labels)?;
            }
        }
        output.insert_image("annotated_image", annotated);
        output.insert_image("outlined_image", outlined);
        output.insert_image("mask", detection.mask);
        Ok(output)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.hue_cache.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use serde_json::Value;

    fn settings(min_region_area: u64) -> DetectorSettings {
        DetectorSettings {
            min_region_area,
            ..DetectorSettings::default()
        }
    }

    fn target(hex: &str) -> AuxInput {
        AuxInput::TargetColor(HexColor::parse(hex).unwrap())
    }

    fn with_block(
        width: u32,
        height: u32,
        block: (u32, u32, u32, u32),
        color: Rgb<u8>,
    ) -> RgbImage {
        let (bx, by, bw, bh) = block;
        RgbImage::from_fn(width, height, |x, y| {
            if x >= bx && x < bx + bw && y >= by && y < by + bh {
                color
            } else {
                Rgb([30, 30, 30])
            }
        })
    }

    #[test]
    fn test_solid_red_spans_whole_image() -> Result<()> {
        let image = RgbImage::from_pixel(100, 100, Rgb([255, 0, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(0));
        let output = detector.predict(&image, Some(&target("#ff0000")))?;

        assert_eq!(output.data("detection_found"), Some(&Value::Bool(true)));
        let bbox: BoundingBox =
            serde_json::from_value(output.data("bounding_box").cloned().unwrap_or_default())?;
        assert_eq!(
            bbox,
            BoundingBox {
                x1: 0,
                y1: 0,
                x2: 100,
                y2: 100
            }
        );
        assert_eq!(output.data("coverage_percentage"), Some(&Value::from(100.0)));
        assert_eq!(output.data("detected_pixels"), Some(&Value::from(10_000)));
        assert_eq!(output.data("color_detected"), Some(&Value::from("#ff0000")));
        Ok(())
    }

    #[test]
    fn test_near_red_uses_wrapped_ranges() -> Result<()> {
        let image = RgbImage::from_pixel(40, 40, Rgb([254, 0, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let detection = detector.detect(&image, &HexColor::parse("#fe0000")?)?;

        assert_eq!(detection.detected_pixels, 1600);
        assert_eq!(detection.coverage_percentage, 100.0);
        Ok(())
    }

    #[test]
    fn test_block_bounding_box() -> Result<()> {
        let image = with_block(120, 80, (30, 20, 40, 25), Rgb([0, 200, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let detection = detector.detect(&image, &HexColor::parse("#00c800")?)?;

        let region = detection.largest().copied().unwrap();
        assert_eq!((region.x, region.y, region.width, region.height), (30, 20, 40, 25));
        assert_eq!(detection.detected_pixels, 1000);
        assert!(detection.detected_pixels <= detection.total_pixels);
        assert_eq!(detection.coverage_percentage, round_to(1000.0 / 9600.0 * 100.0, 2));
        Ok(())
    }

    #[test]
    fn test_missing_color_reports_nothing() -> Result<()> {
        let image = RgbImage::from_pixel(60, 60, Rgb([0, 0, 255]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let output = detector.predict(&image, Some(&target("#ff0000")))?;

        assert_eq!(output.data("detection_found"), Some(&Value::Bool(false)));
        assert_eq!(output.data("bounding_box"), Some(&Value::Null));
        assert_eq!(output.data("coverage_percentage"), Some(&Value::from(0.0)));
        assert_eq!(output.data("detected_pixels"), Some(&Value::from(0)));
        Ok(())
    }

    #[test]
    fn test_small_regions_are_noise() -> Result<()> {
        // 8x8 block survives denoising but stays under the area threshold
        let image = with_block(60, 60, (10, 10, 8, 8), Rgb([255, 0, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let output = detector.predict(&image, Some(&target("#ff0000")))?;

        assert_eq!(output.data("detection_found"), Some(&Value::Bool(false)));
        assert_eq!(output.data("bounding_box"), Some(&Value::Null));
        assert_eq!(output.data("coverage_percentage"), Some(&Value::from(0.0)));
        Ok(())
    }

    #[test]
    fn test_all_regions_sorted_and_capped() -> Result<()> {
        let mut image = RgbImage::from_pixel(200, 200, Rgb([30, 30, 30]));
        let blocks = [(5, 5, 20, 20), (60, 60, 40, 30), (150, 10, 25, 12)];
        for (bx, by, bw, bh) in blocks {
            for y in by..by + bh {
                for x in bx..bx + bw {
                    image.put_pixel(x, y, Rgb([0, 0, 255]));
                }
            }
        }

        let settings = DetectorSettings {
            min_region_area: 100,
            max_working_side: 640,
            max_regions: 2,
        };
        let mut detector = ColorDetector::new(DetectionMode::AllRegions, settings);
        let output = detector.predict(&image, Some(&target("#0000ff")))?;

        let regions: Vec<Region> =
            serde_json::from_value(output.data("regions").cloned().unwrap_or_default())?;
        assert_eq!(output.data("regions_found"), Some(&Value::from(3)));
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].area, 1200);
        assert_eq!(regions[1].area, 400);
        Ok(())
    }

    #[test]
    fn test_downscaled_boxes_use_original_coordinates() -> Result<()> {
        let image = with_block(1280, 640, (640, 0, 640, 640), Rgb([255, 0, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let detection = detector.detect(&image, &HexColor::parse("#ff0000")?)?;

        assert_eq!(detection.total_pixels, 1280 * 640);
        assert_eq!(detection.mask.dimensions(), (1280, 640));
        let region = detection.largest().copied().unwrap();
        assert!((638..=642).contains(&region.x), "x was {}", region.x);
        assert_eq!(region.right(), 1280);
        assert_eq!(region.y, 0);
        assert_eq!(region.bottom(), 640);
        assert!(detection.detected_pixels <= detection.total_pixels);
        assert!((49.0..=51.0).contains(&detection.coverage_percentage));
        Ok(())
    }

    #[test]
    fn test_annotated_image_keeps_input_size() -> Result<()> {
        let image = with_block(90, 70, (20, 20, 30, 30), Rgb([255, 255, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let output = detector.predict(&image, Some(&target("#ffff00")))?;

        let annotated = output.image("annotated_image").unwrap().to_rgb8();
        assert_eq!(annotated.dimensions(), (90, 70));
        assert_eq!(annotated.get_pixel(20, 30), &draw::ANNOTATION_COLOR);
        assert_eq!(output.data("label"), Some(&Value::from("900px")));
        assert_eq!(image.get_pixel(20, 30), &Rgb([255, 255, 0]));
        Ok(())
    }

    #[test]
    fn test_outlined_image_skips_highlight() -> Result<()> {
        let image = with_block(90, 70, (20, 20, 30, 30), Rgb([255, 255, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(100));
        let output = detector.predict(&image, Some(&target("#ffff00")))?;

        let outlined = output.image("outlined_image").unwrap().to_rgb8();
        let annotated = output.image("annotated_image").unwrap().to_rgb8();
        assert_eq!(outlined.dimensions(), (90, 70));
        assert_eq!(outlined.get_pixel(20, 30), &draw::ANNOTATION_COLOR);
        // interior keeps the input color, the overlay lightens it
        assert_eq!(outlined.get_pixel(35, 35), &Rgb([255, 255, 0]));
        assert_ne!(annotated.get_pixel(35, 35), outlined.get_pixel(35, 35));
        assert_eq!(outlined.get_pixel(5, 60), image.get_pixel(5, 60));
        Ok(())
    }

    #[test]
    fn test_hue_cache_is_per_instance_and_cleared() -> Result<()> {
        let image = RgbImage::from_pixel(20, 20, Rgb([255, 0, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(0));

        let first = detector.detect(&image, &HexColor::parse("#ff0000")?)?;
        let second = detector.detect(&image, &HexColor::parse("#FF0000")?)?;
        assert_eq!(detector.cached_colors(), 1);
        assert_eq!(first.regions, second.regions);
        assert_eq!(first.detected_pixels, second.detected_pixels);

        let fresh = ColorDetector::new(DetectionMode::Largest, settings(0));
        assert_eq!(fresh.cached_colors(), 0);

        detector.cleanup()?;
        assert_eq!(detector.cached_colors(), 0);
        Ok(())
    }

    #[test]
    fn test_predict_without_color_fails() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let mut detector = ColorDetector::new(DetectionMode::Largest, settings(0));
        assert!(matches!(
            detector.predict(&image, None),
            Err(VisionError::Validation { .. })
        ));
    }
}
