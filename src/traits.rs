use crate::errors::Result;
use crate::output::ResultMap;
use crate::vision_ops::color::HexColor;
use image::RgbImage;

/// Inputs a procedure declares beyond the image itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The image alone.
    Image,
    /// The image plus a `#rrggbb` target color.
    ImageAndColor,
}

impl InputKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::ImageAndColor => "image+color",
        }
    }
}

/// Validated auxiliary input handed to `predict`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxInput {
    TargetColor(HexColor),
}

/// Abstraction over an image-analysis procedure.
///
/// An instance lives for exactly one request: the registry constructs and loads it, the
/// orchestrator calls `predict` at most once and `cleanup` exactly once, then drops it.
/// Implementations may keep per-instance caches but never share state across instances.
pub trait VisionModel: Send {
    /// One-time setup. Must be cheap and idempotent.
    fn load(&mut self) -> Result<()>;

    /// Runs the procedure on `image`. `aux` is only present for procedures whose
    /// [`InputKind`] declares it.
    fn predict(&mut self, image: &RgbImage, aux: Option<&AuxInput>) -> Result<ResultMap>;

    /// Releases per-instance state. Called even when `predict` failed.
    fn cleanup(&mut self) -> Result<()>;
}
