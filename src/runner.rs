use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::{Result, VisionError};
use crate::orchestrator::Orchestrator;

/// Outcome of a directory run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Runs one procedure over every image under a path, one independent request per file.
///
/// For `photos/a/cat.jpg` the runner writes `out/a/cat.json` (the response envelope with
/// image fields replaced by file names) plus `out/a/cat_<field>.<format>` per image field.
pub struct DirectoryRunner<'r> {
    orchestrator: Orchestrator<'r>,
    model_id: String,
    color: Option<String>,
    format: ImageFormat,
    extension: String,
}

impl<'r> DirectoryRunner<'r> {
    pub fn new(
        orchestrator: Orchestrator<'r>,
        model_id: impl Into<String>,
        color: Option<String>,
        extension: &str,
    ) -> Result<Self> {
        let format = ImageFormat::from_extension(extension)
            .filter(|f| f.writing_enabled())
            .ok_or_else(|| VisionError::Configuration {
                message: format!("cannot write images as {extension}"),
            })?;
        Ok(Self {
            orchestrator,
            model_id: model_id.into(),
            color,
            format,
            extension: extension.to_string(),
        })
    }

    /// Image files below `input`, or `input` itself when it is a file.
    pub fn collect_images(input: &Path) -> Result<Vec<PathBuf>> {
        if !input.exists() {
            return Err(VisionError::FileSystem {
                path: input.to_path_buf(),
                operation: "input lookup".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "input does not exist"),
            });
        }

        let mut files = WalkDir::new(input)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_supported_image_format(e.path()))
            .map(|e| e.into_path())
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    pub fn run(&self, input: &Path, output_dir: &Path) -> Result<RunSummary> {
        let files = Self::collect_images(input)?;
        if files.is_empty() {
            warn!(input = %input.display(), "no images found");
            return Ok(RunSummary::default());
        }

        let root = if input.is_file() {
            input.parent().unwrap_or(Path::new(""))
        } else {
            input
        };

        let progress_bar = ProgressBar::new(files.len() as u64);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );

        let failed = files
            .par_iter()
            .progress_with(progress_bar.clone())
            .filter(|file| match self.process_file(root, file, output_dir) {
                Ok(json_path) => {
                    info!(file = %file.display(), output = %json_path.display(), "processed");
                    false
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipped");
                    true
                }
            })
            .count();

        progress_bar.finish();
        Ok(RunSummary {
            processed: files.len() - failed,
            failed,
        })
    }

    fn process_file(&self, root: &Path, file: &Path, output_dir: &Path) -> Result<PathBuf> {
        let bytes = fs::read(file).map_err(|e| VisionError::FileSystem {
            path: file.to_path_buf(),
            operation: "read image".to_string(),
            source: e,
        })?;

        let response = self
            .orchestrator
            .infer_bytes(&self.model_id, &bytes, self.color.as_deref())
            .map_err(|e| VisionError::Model {
                operation: format!("inference on {}", file.display()),
                source: Box::new(e),
            })?;

        let json_path = output_dir.join(get_relative_path(root, file)?).with_extension("json");
        let parent = json_path.parent().unwrap_or(output_dir).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| VisionError::FileSystem {
            path: parent.clone(),
            operation: "create output directory".to_string(),
            source: e,
        })?;

        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        let (envelope, images) = response.into_json(|field, _| {
            Ok(Value::from(format!("{stem}_{field}.{}", self.extension)))
        })?;

        for (field, image) in images {
            let path = parent.join(format!("{stem}_{field}.{}", self.extension));
            self.save_image(image, &path)?;
        }

        let json = serde_json::to_string_pretty(&envelope)?;
        fs::write(&json_path, json).map_err(|e| VisionError::FileSystem {
            path: json_path.clone(),
            operation: "write result".to_string(),
            source: e,
        })?;
        Ok(json_path)
    }

    fn save_image(&self, image: DynamicImage, path: &Path) -> Result<()> {
        // jpeg has no alpha and some encoders reject single-channel buffers
        let keep = matches!(self.format, ImageFormat::Png | ImageFormat::Jpeg)
            || matches!(image, DynamicImage::ImageRgb8(_));
        let image = if keep {
            image
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };
        image
            .save_with_format(path, self.format)
            .map_err(|e| VisionError::ImageProcessing {
                operation: format!("save {}", path.display()),
                source: Box::new(e),
            })
    }
}

pub fn is_supported_image_format(path: &Path) -> bool {
    ImageFormat::from_path(path).is_ok_and(|f| f.reading_enabled())
}

pub fn get_relative_path(root: &Path, file: &Path) -> Result<PathBuf> {
    file.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| VisionError::FileSystem {
            path: file.to_path_buf(),
            operation: "relative path".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file is not inside the input directory",
            ),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        assert!(is_supported_image_format(Path::new("a/test.png")));
        assert!(is_supported_image_format(Path::new("test.JPG")));
        assert!(!is_supported_image_format(Path::new("test.txt")));
        assert!(!is_supported_image_format(Path::new("test")));
    }

    #[test]
    fn test_relative_path_calculation() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        let subdir = input_dir.join("subdir");
        fs::create_dir_all(&subdir)?;

        let relative = get_relative_path(&input_dir, &subdir.join("test.jpg"))?;
        assert_eq!(relative, Path::new("subdir/test.jpg"));
        assert!(get_relative_path(&subdir, &input_dir.join("x.png")).is_err());
        Ok(())
    }

    #[test]
    fn test_unwritable_format_is_rejected() {
        let orchestrator = Orchestrator::new(Registry::global());
        assert!(DirectoryRunner::new(orchestrator, "edge-detector", None, "txt").is_err());
    }

    #[test]
    fn test_missing_input() {
        let result = DirectoryRunner::collect_images(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(VisionError::FileSystem { .. })));
    }
}
