pub mod color_analyzer;
pub mod color_detector;
pub mod edge_detector;

pub use color_analyzer::{ColorAnalyzer, ColorSwatch};
pub use color_detector::{BoundingBox, ColorDetector, DetectionMode, DetectorSettings};
pub use edge_detector::EdgeDetector;
