pub mod color;
pub mod draw;
pub mod mask;
pub mod regions;

use std::borrow::Cow;

use image::{imageops, imageops::FilterType, RgbImage};

/// Shrinks `image` so that its longest side is at most `max_side`, preserving the aspect
/// ratio. Images already within bounds are borrowed unchanged.
pub fn fit_within(image: &RgbImage, max_side: u32) -> Cow<'_, RgbImage> {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return Cow::Borrowed(image);
    }

    let scale = f64::from(max_side) / f64::from(longest);
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max_side);
    Cow::Owned(imageops::resize(
        image,
        scaled(width),
        scaled(height),
        FilterType::Triangle,
    ))
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
