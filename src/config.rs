use clap::{Args, Parser};
use image::ImageFormat;
use std::path::PathBuf;
use std::thread;

use crate::errors::{Result, VisionError};

/// Tunables shared by every model the registry builds.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Number of clusters for the dominant color analysis
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub n_colors: u8,

    /// Regions smaller than this many pixels are discarded as noise
    #[arg(long, default_value_t = 100)]
    pub min_region_area: u64,

    /// Longest side of the working image used for color detection
    #[arg(long, default_value_t = 640)]
    pub max_working_side: u32,

    /// Maximum number of regions reported by the all-regions detector
    #[arg(long, default_value_t = 10)]
    pub max_regions: usize,

    #[arg(long, default_value_t = 100.0)]
    pub canny_low: f32,

    #[arg(long, default_value_t = 200.0)]
    pub canny_high: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            n_colors: 5,
            min_region_area: 100,
            max_working_side: 640,
            max_regions: 10,
            canny_low: 100.0,
            canny_high: 200.0,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(VisionError::Configuration { message });

        if !(1..=10).contains(&self.n_colors) {
            return fail(format!("n_colors must be in 1..=10, got {}", self.n_colors));
        }
        if self.max_working_side == 0 {
            return fail("max_working_side must be positive".to_string());
        }
        if self.max_regions == 0 {
            return fail("max_regions must be positive".to_string());
        }
        if !(self.canny_low >= 0.0 && self.canny_low <= self.canny_high) {
            return fail(format!(
                "canny thresholds must satisfy 0 <= low <= high, got {} / {}",
                self.canny_low, self.canny_high
            ));
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Procedure to run (color-analyzer, color-detector, color-regions, edge-detector)
    pub model_id: String,

    /// Image file or directory of images
    pub input: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    /// Target color for color detection procedures, as #RRGGBB
    #[arg(short, long)]
    pub color: Option<String>,

    /// Format used to write visualizations
    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(short = 'j', long, default_value_t = default_threads())]
    pub num_threads: usize,

    #[command(flatten)]
    pub models: ModelSettings,
}

fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}
