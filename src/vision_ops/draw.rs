use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::vision_ops::color::Rgb8;

pub const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;
pub const LABEL_HEIGHT: u32 = 12;
/// Approximate advance of one label character, used to size the label tab.
const LABEL_CHAR_WIDTH: u32 = 7;
/// Weight of the highlight color when blending a mask over an image.
const MASK_BLEND: f32 = 0.3;

/// Renders a horizontal bar where each `(color, count)` segment takes a width
/// proportional to its share of `total`. Segments are contiguous and laid out in order;
/// the last boundary is always the full width.
pub fn color_bar(segments: &[(Rgb8, u64)], total: u64, width: u32, height: u32) -> RgbImage {
    let mut bar = RgbImage::new(width, height);
    if total == 0 || width == 0 || height == 0 {
        return bar;
    }

    let mut cumulative = 0u64;
    let mut start = 0u32;
    for (index, (color, count)) in segments.iter().enumerate() {
        cumulative += count;
        let end = if index + 1 == segments.len() {
            width
        } else {
            ((u128::from(width) * u128::from(cumulative) + u128::from(total) / 2)
                / u128::from(total)) as u32
        }
        .min(width);

        for x in start..end {
            for y in 0..height {
                bar.put_pixel(x, y, Rgb(*color));
            }
        }
        start = end.max(start);
    }
    bar
}

/// Lightens the masked pixels of a copy of `image`.
pub fn highlight_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = image.clone();
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        if m[0] > 0 {
            for channel in pixel.0.iter_mut() {
                let blended = f32::from(*channel) * (1.0 - MASK_BLEND) + 255.0 * MASK_BLEND;
                *channel = blended.round().min(255.0) as u8;
            }
        }
    }
    out
}

/// Draws a hollow rectangle `BOX_THICKNESS` pixels thick, growing inwards.
pub fn draw_box(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32) {
    for inset in 0..BOX_THICKNESS {
        let (w, h) = (
            width.saturating_sub(2 * inset),
            height.saturating_sub(2 * inset),
        );
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, ANNOTATION_COLOR);
    }
}

/// Draws the filled tab that marks a box label: above the box when there is room,
/// inside its top edge otherwise. No glyphs are rasterized; the width follows the
/// length of `label` and callers report the text itself alongside the image.
pub fn draw_label_tab(image: &mut RgbImage, x: u32, y: u32, box_width: u32, label: &str) {
    let tab_width = (label.chars().count() as u32 * LABEL_CHAR_WIDTH + 4).min(box_width.max(1));
    let tab_y = y.checked_sub(LABEL_HEIGHT).unwrap_or(y);
    let rect = Rect::at(x as i32, tab_y as i32).of_size(tab_width, LABEL_HEIGHT);
    draw_filled_rect_mut(image, rect, ANNOTATION_COLOR);
}
