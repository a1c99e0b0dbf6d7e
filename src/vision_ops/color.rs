use std::fmt;
use std::str::FromStr;

use palette::{Hsv, IntoColor, Srgb};
use serde::Serialize;

use crate::errors::{Result, VisionError};

pub type Rgb8 = [u8; 3];

/// Largest hue value on the 8-bit half-degree scale (0..=179).
pub const HUE_MAX: u8 = 179;
/// Half-width of the hue window around a target hue.
pub const HUE_HALF_WIDTH: u8 = 10;
/// Targets with a hue below this value also match the top of the hue axis.
pub const WRAP_LOW: u8 = 10;
/// Targets with a hue above this value also match the bottom of the hue axis.
pub const WRAP_HIGH: u8 = 170;
pub const SATURATION_FLOOR: u8 = 70;
pub const VALUE_FLOOR: u8 = 70;

/// Parses `#rrggbb` or `rrggbb` into an RGB triple.
pub fn hex_to_rgb(hex: &str) -> Result<Rgb8> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(VisionError::validation(
            "color",
            format!("{hex:?} is not a 6-digit hex color"),
        ));
    }

    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|e| VisionError::validation("color", e.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

pub fn rgb_to_hex([r, g, b]: Rgb8) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Lowercases a hex color and gives it exactly one leading `#`.
pub fn normalize_hex(hex: &str) -> Result<String> {
    hex_to_rgb(hex).map(rgb_to_hex)
}

/// A validated `#rrggbb` color as received at the request boundary.
///
/// Unlike [`hex_to_rgb`], parsing is strict: the leading `#` is required and shorthand
/// forms such as `#fff` are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HexColor {
    hex: String,
    rgb: Rgb8,
}

impl HexColor {
    pub fn parse(input: &str) -> Result<Self> {
        if !input.starts_with('#') {
            return Err(VisionError::validation(
                "color",
                format!("{input:?} must start with '#' followed by 6 hex digits"),
            ));
        }
        let rgb = hex_to_rgb(input)?;
        Ok(Self {
            hex: rgb_to_hex(rgb),
            rgb,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    pub const fn rgb(&self) -> Rgb8 {
        self.rgb
    }
}

impl FromStr for HexColor {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Converts RGB to HSV on the 8-bit scale: hue in half degrees (0..=179),
/// saturation and value in 0..=255.
pub fn rgb_to_hsv([r, g, b]: Rgb8) -> [u8; 3] {
    let hsv: Hsv = Srgb::new(r, g, b).into_format::<f32>().into_color();
    let degrees = hsv.hue.into_positive_degrees();
    let hue = ((degrees / 2.0).round() as u16 % 180) as u8;
    let saturation = (hsv.saturation * 255.0).round().clamp(0.0, 255.0) as u8;
    let value = (hsv.value * 255.0).round().clamp(0.0, 255.0) as u8;
    [hue, saturation, value]
}

/// Inclusive HSV bounds used to threshold a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HueRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HueRange {
    const fn new(hue_low: u8, hue_high: u8) -> Self {
        Self {
            lower: [hue_low, SATURATION_FLOOR, VALUE_FLOOR],
            upper: [hue_high, 255, 255],
        }
    }

    pub fn contains(&self, [h, s, v]: [u8; 3]) -> bool {
        h >= self.lower[0]
            && h <= self.upper[0]
            && s >= self.lower[1]
            && s <= self.upper[1]
            && v >= self.lower[2]
            && v <= self.upper[2]
    }
}

/// Hue windows matching `hue`. Hue is circular, so targets close to either end of the
/// axis produce a second window on the opposite end.
pub fn hue_ranges(hue: u8) -> Vec<HueRange> {
    let hue = hue.min(HUE_MAX);
    if hue < WRAP_LOW {
        vec![
            HueRange::new(0, hue + HUE_HALF_WIDTH),
            HueRange::new(180 - (HUE_HALF_WIDTH - hue), HUE_MAX),
        ]
    } else if hue > WRAP_HIGH {
        vec![
            HueRange::new(hue - HUE_HALF_WIDTH, HUE_MAX),
            HueRange::new(0, (hue + HUE_HALF_WIDTH) - 180),
        ]
    } else {
        vec![HueRange::new(
            hue.saturating_sub(HUE_HALF_WIDTH),
            hue.saturating_add(HUE_HALF_WIDTH).min(HUE_MAX),
        )]
    }
}

pub fn hue_ranges_for_rgb(rgb: Rgb8) -> Vec<HueRange> {
    hue_ranges(rgb_to_hsv(rgb)[0])
}
