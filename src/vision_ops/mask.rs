use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use rayon::prelude::*;

use crate::vision_ops::color::{rgb_to_hsv, HueRange};

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

/// Radius of the square structuring element used to denoise masks (5x5).
pub const DENOISE_RADIUS: u8 = 2;

/// Builds a binary mask of the pixels whose HSV value falls in any of `ranges`.
pub fn threshold_hsv(image: &RgbImage, ranges: &[HueRange]) -> GrayImage {
    let (width, height) = image.dimensions();
    let data = image
        .as_raw()
        .par_chunks_exact(3)
        .map(|px| {
            let hsv = rgb_to_hsv([px[0], px[1], px[2]]);
            if ranges.iter().any(|range| range.contains(hsv)) {
                MASK_ON
            } else {
                MASK_OFF
            }
        })
        .collect::<Vec<u8>>();

    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Extends `mask` by `border` pixels on every side, repeating the outermost row/column.
pub fn pad_replicate(mask: &GrayImage, border: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 || border == 0 {
        return mask.clone();
    }

    GrayImage::from_fn(width + 2 * border, height + 2 * border, |x, y| {
        let sx = x.saturating_sub(border).min(width - 1);
        let sy = y.saturating_sub(border).min(height - 1);
        *mask.get_pixel(sx, sy)
    })
}

/// Crops the centre back out of a mask produced by [`pad_replicate`].
pub fn crop_border(mask: &GrayImage, border: u32, width: u32, height: u32) -> GrayImage {
    image::imageops::crop_imm(mask, border, border, width, height).to_image()
}

/// Morphological opening followed by closing: removes specks, then fills small gaps.
///
/// The mask is padded with its own edge values first so that the image border is not
/// treated as background.
pub fn denoise(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return mask.clone();
    }

    let border = u32::from(DENOISE_RADIUS);
    let padded = pad_replicate(mask, border);
    let opened = morphology::open(&padded, Norm::LInf, DENOISE_RADIUS);
    let closed = morphology::close(&opened, Norm::LInf, DENOISE_RADIUS);
    crop_border(&closed, border, width, height)
}

pub fn count_on(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|Luma([v])| *v > 0).count() as u64
}
