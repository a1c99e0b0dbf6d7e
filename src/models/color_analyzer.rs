use std::cmp::Reverse;

use image::RgbImage;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView1, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, VisionError};
use crate::output::ResultMap;
use crate::traits::{AuxInput, VisionModel};
use crate::vision_ops::color::{rgb_to_hex, Rgb8};
use crate::vision_ops::{draw, round_to};

/// Seed of the clustering RNG. Fixed so that a given image always yields the same palette.
pub const KMEANS_SEED: u64 = 42;
/// Independent k-means++ initialisations; the run with the lowest inertia wins.
pub const KMEANS_N_INIT: usize = 10;
pub const KMEANS_MAX_ITER: usize = 300;
/// Convergence threshold on the summed squared centroid shift.
pub const KMEANS_TOLERANCE: f32 = 1e-4;
pub const COLOR_BAR_HEIGHT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorSwatch {
    pub hex: String,
    pub rgb: Rgb8,
    pub percentage: f64,
}

/// Outcome of one k-means fit over an `n x 3` pixel matrix.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// `k x 3` centers.
    pub centroids: Array2<f32>,
    /// Cluster index per pixel.
    pub labels: Vec<usize>,
    pub inertia: f64,
}

impl Clustering {
    pub fn counts(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.centroids.nrows()];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }
}

fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest centroid of `point`; ties go to the lower index.
fn nearest(centroids: &Array2<f32>, point: ArrayView1<f32>) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (index, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best
}

fn assign(pixels: &Array2<f32>, centroids: &Array2<f32>) -> Vec<(usize, f32)> {
    pixels
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|point| nearest(centroids, point))
        .collect()
}

/// k-means++ seeding. When every pixel already coincides with a chosen center the
/// weights are all zero, and the next center is drawn uniformly instead.
fn init_plus_plus(pixels: &Array2<f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
    let n = pixels.nrows();
    let mut centroids = Array2::<f32>::zeros((k, 3));
    centroids
        .row_mut(0)
        .assign(&pixels.row(rng.gen_range(0..n)));

    let mut distances: Vec<f32> = pixels
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|point| squared_distance(point, centroids.row(0)))
        .collect();

    for c in 1..k {
        let next = match WeightedIndex::new(&distances) {
            Ok(weights) => weights.sample(rng),
            Err(_) => rng.gen_range(0..n),
        };
        centroids.row_mut(c).assign(&pixels.row(next));

        let center = centroids.row(c);
        distances
            .par_iter_mut()
            .zip(pixels.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(distance, point)| {
                *distance = distance.min(squared_distance(point, center));
            });
    }
    centroids
}

/// Cluster means; an empty cluster keeps its previous center.
fn recompute(
    pixels: &Array2<f32>,
    assignments: &[(usize, f32)],
    previous: &Array2<f32>,
) -> Array2<f32> {
    let k = previous.nrows();
    let mut sums = Array2::<f64>::zeros((k, 3));
    let mut counts = vec![0u64; k];
    for (point, &(label, _)) in pixels.axis_iter(Axis(0)).zip(assignments) {
        counts[label] += 1;
        for (channel, value) in point.iter().enumerate() {
            sums[[label, channel]] += f64::from(*value);
        }
    }

    let mut centroids = previous.clone();
    for (label, &count) in counts.iter().enumerate() {
        if count > 0 {
            for channel in 0..3 {
                centroids[[label, channel]] = (sums[[label, channel]] / count as f64) as f32;
            }
        }
    }
    centroids
}

fn lloyd(pixels: &Array2<f32>, mut centroids: Array2<f32>) -> Clustering {
    let mut assignments = assign(pixels, &centroids);
    for _ in 0..KMEANS_MAX_ITER {
        let updated = recompute(pixels, &assignments, &centroids);
        let shift: f32 = (&updated - &centroids).mapv(|v| v * v).sum();
        centroids = updated;
        assignments = assign(pixels, &centroids);
        if shift <= KMEANS_TOLERANCE {
            break;
        }
    }

    let inertia = assignments.iter().map(|&(_, d)| f64::from(d)).sum();
    Clustering {
        centroids,
        labels: assignments.into_iter().map(|(label, _)| label).collect(),
        inertia,
    }
}

/// Partitions the rows of `pixels` into `k` clusters, keeping the best of `n_init`
/// seeded runs. Always returns exactly `k` centers, some possibly without members.
pub fn kmeans(pixels: &Array2<f32>, k: usize, seed: u64, n_init: usize) -> Result<Clustering> {
    if pixels.nrows() == 0 || k == 0 {
        return Err(VisionError::Model {
            operation: "k-means".to_string(),
            source: format!("cannot form {k} clusters from {} pixels", pixels.nrows()).into(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<Clustering> = None;
    for _ in 0..n_init.max(1) {
        let centroids = init_plus_plus(pixels, k, &mut rng);
        let candidate = lloyd(pixels, centroids);
        if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
            best = Some(candidate);
        }
    }

    best.ok_or_else(|| VisionError::Model {
        operation: "k-means".to_string(),
        source: "no clustering run completed".into(),
    })
}

/// Dominant color analysis by k-means clustering of the pixel colors.
#[derive(Debug, Clone)]
pub struct ColorAnalyzer {
    n_colors: usize,
}

impl ColorAnalyzer {
    pub const fn new(n_colors: usize) -> Self {
        Self { n_colors }
    }

    /// Clusters `image` and returns the swatches, largest first, together with the
    /// pixel count behind each swatch.
    pub fn analyze(&self, image: &RgbImage) -> Result<Vec<(ColorSwatch, u64)>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::DegenerateImage { width, height });
        }

        let total = u64::from(width) * u64::from(height);
        let pixels = Array2::from_shape_vec(
            (total as usize, 3),
            image.as_raw().iter().map(|&v| f32::from(v)).collect(),
        )?;

        let clustering = kmeans(&pixels, self.n_colors, KMEANS_SEED, KMEANS_N_INIT)?;
        debug!(
            k = self.n_colors,
            pixels = total,
            inertia = clustering.inertia,
            "k-means finished"
        );

        let counts = clustering.counts();
        let mut order: Vec<usize> = (0..counts.len()).collect();
        order.sort_by_key(|&i| (Reverse(counts[i]), i));

        Ok(order
            .into_iter()
            .map(|i| {
                let row = clustering.centroids.row(i);
                let rgb = [0usize, 1, 2].map(|c| row[c].clamp(0.0, 255.0) as u8);
                let swatch = ColorSwatch {
                    hex: rgb_to_hex(rgb),
                    rgb,
                    percentage: round_to(counts[i] as f64 / total as f64 * 100.0, 2),
                };
                (swatch, counts[i])
            })
            .collect())
    }
}

impl VisionModel for ColorAnalyzer {
    fn load(&mut self) -> Result<()> {
        if self.n_colors == 0 {
            return Err(VisionError::Configuration {
                message: "color analyzer needs at least one cluster".to_string(),
            });
        }
        Ok(())
    }

    fn predict(&mut self, image: &RgbImage, _aux: Option<&AuxInput>) -> Result<ResultMap> {
        let analysis = self.analyze(image)?;
        let total = u64::from(image.width()) * u64::from(image.height());

        let segments = analysis
            .iter()
            .map(|(swatch, count)| (swatch.rgb, *count))
            .collect::<Vec<_>>();
        let preview = draw::color_bar(&segments, total, image.width(), COLOR_BAR_HEIGHT);

        let colors = analysis
            .into_iter()
            .map(|(swatch, _)| swatch)
            .collect::<Vec<_>>();
        let dominant = colors.first().map(|s| s.hex.clone());

        let mut output = ResultMap::new();
        output.insert_data("total_colors_detected", &colors.len())?;
        output.insert_data("dominant_color", &dominant)?;
        output.insert_data("colors", &colors)?;
        output.insert_image("preview", preview);
        Ok(output)
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn swatches(output: &ResultMap) -> Vec<ColorSwatch> {
        serde_json::from_value(output.data("colors").cloned().unwrap()).unwrap()
    }

    fn two_tone(width: u32, height: u32, split: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            if x < split {
                Rgb([200, 30, 30])
            } else {
                Rgb([20, 40, 220])
            }
        })
    }

    #[test]
    fn test_solid_image_yields_k_clusters() -> Result<()> {
        let image = RgbImage::from_pixel(50, 50, Rgb([0, 0, 255]));
        let output = ColorAnalyzer::new(3).predict(&image, None)?;

        let colors = swatches(&output);
        assert_eq!(colors.len(), 3);
        assert_eq!(colors[0].hex, "#0000ff");
        assert_eq!(colors[0].percentage, 100.0);
        assert_eq!(colors[1].percentage, 0.0);
        assert_eq!(colors[2].percentage, 0.0);
        assert_eq!(output.data("dominant_color"), Some(&"#0000ff".into()));
        assert_eq!(output.data("total_colors_detected"), Some(&3.into()));
        Ok(())
    }

    #[test]
    fn test_two_tone_proportions() -> Result<()> {
        let image = two_tone(40, 10, 30);
        let colors = swatches(&ColorAnalyzer::new(2).predict(&image, None)?);

        assert_eq!(colors[0].rgb, [200, 30, 30]);
        assert_eq!(colors[0].percentage, 75.0);
        assert_eq!(colors[1].rgb, [20, 40, 220]);
        assert_eq!(colors[1].percentage, 25.0);
        Ok(())
    }

    #[test]
    fn test_repeated_runs_are_identical() -> Result<()> {
        let image = RgbImage::from_fn(37, 23, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 5 % 256) as u8])
        });

        let first = swatches(&ColorAnalyzer::new(5).predict(&image, None)?);
        let second = swatches(&ColorAnalyzer::new(5).predict(&image, None)?);
        assert_eq!(first, second);

        let sum: f64 = first.iter().map(|s| s.percentage).sum();
        assert!((sum - 100.0).abs() <= 0.05, "sum was {sum}");
        assert!(first
            .windows(2)
            .all(|w| w[0].percentage >= w[1].percentage));
        Ok(())
    }

    #[test]
    fn test_clustering_constants_are_pinned() {
        assert_eq!(KMEANS_SEED, 42);
        assert_eq!(KMEANS_N_INIT, 10);
        assert_eq!(KMEANS_MAX_ITER, 300);
        assert_eq!(KMEANS_TOLERANCE, 1e-4);
    }

    #[test]
    fn test_three_color_palette() -> Result<()> {
        // 10x10 image in columns: 5 crimson, 3 teal, 2 gold
        let image = RgbImage::from_fn(10, 10, |x, _| match x {
            0..=4 => Rgb([220, 20, 60]),
            5..=7 => Rgb([0, 128, 128]),
            _ => Rgb([255, 215, 0]),
        });
        let output = ColorAnalyzer::new(3).predict(&image, None)?;

        let palette: Vec<(String, f64)> = swatches(&output)
            .into_iter()
            .map(|s| (s.hex, s.percentage))
            .collect();
        assert_eq!(
            palette,
            [
                ("#dc143c".to_string(), 50.0),
                ("#008080".to_string(), 30.0),
                ("#ffd700".to_string(), 20.0),
            ]
        );
        assert_eq!(output.data("dominant_color"), Some(&"#dc143c".into()));
        Ok(())
    }

    #[test]
    fn test_single_pixel_image() -> Result<()> {
        let image = RgbImage::from_pixel(1, 1, Rgb([12, 34, 56]));
        let colors = swatches(&ColorAnalyzer::new(5).predict(&image, None)?);

        assert_eq!(colors.len(), 5);
        assert_eq!(colors[0].rgb, [12, 34, 56]);
        assert_eq!(colors[0].percentage, 100.0);
        Ok(())
    }

    #[test]
    fn test_preview_bar_matches_image_width() -> Result<()> {
        let image = two_tone(40, 10, 30);
        let output = ColorAnalyzer::new(2).predict(&image, None)?;
        let preview = output.image("preview").unwrap().to_rgb8();

        assert_eq!(preview.dimensions(), (40, COLOR_BAR_HEIGHT));
        assert_eq!(preview.get_pixel(0, 0), &Rgb([200, 30, 30]));
        assert_eq!(preview.get_pixel(29, 50), &Rgb([200, 30, 30]));
        assert_eq!(preview.get_pixel(30, 50), &Rgb([20, 40, 220]));
        assert_eq!(preview.get_pixel(39, 99), &Rgb([20, 40, 220]));
        Ok(())
    }

    #[test]
    fn test_empty_image_is_degenerate() {
        let image = RgbImage::new(0, 0);
        let result = ColorAnalyzer::new(3).predict(&image, None);
        assert!(matches!(result, Err(VisionError::DegenerateImage { .. })));
    }

    #[test]
    fn test_kmeans_assigns_every_pixel() -> Result<()> {
        let pixels = Array2::from_shape_vec(
            (6, 3),
            vec![
                0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0, //
                250.0, 250.0, 250.0, 251.0, 250.0, 250.0, 249.0, 250.0, 250.0,
            ],
        )?;
        let clustering = kmeans(&pixels, 2, KMEANS_SEED, KMEANS_N_INIT)?;

        assert_eq!(clustering.labels.len(), 6);
        assert_eq!(clustering.labels[0], clustering.labels[2]);
        assert_ne!(clustering.labels[0], clustering.labels[3]);
        assert_eq!(clustering.counts().iter().sum::<u64>(), 6);
        Ok(())
    }
}
