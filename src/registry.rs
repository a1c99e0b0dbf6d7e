use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ModelSettings;
use crate::errors::InferenceError;
use crate::models::{ColorAnalyzer, ColorDetector, DetectionMode, DetectorSettings, EdgeDetector};
use crate::traits::{InputKind, VisionModel};

/// Builds a fresh, unloaded instance of a procedure.
pub type ModelFactory = Arc<dyn Fn(&ModelSettings) -> Box<dyn VisionModel> + Send + Sync>;

/// Catalog metadata of a registered procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub version: &'static str,
    #[serde(serialize_with = "serialize_input")]
    pub input: InputKind,
}

fn serialize_input<S: serde::Serializer>(
    input: &InputKind,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(input.as_str())
}

#[derive(Clone)]
pub struct ModelEntry {
    pub info: ModelInfo,
    factory: ModelFactory,
}

impl ModelEntry {
    pub fn new<F>(info: ModelInfo, factory: F) -> Self
    where
        F: Fn(&ModelSettings) -> Box<dyn VisionModel> + Send + Sync + 'static,
    {
        Self {
            info,
            factory: Arc::new(factory),
        }
    }

    pub fn build(&self, settings: &ModelSettings) -> Box<dyn VisionModel> {
        (self.factory)(settings)
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

fn detector_settings(settings: &ModelSettings) -> DetectorSettings {
    DetectorSettings {
        min_region_area: settings.min_region_area,
        max_working_side: settings.max_working_side,
        max_regions: settings.max_regions,
    }
}

fn builtin_entries() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new(
            ModelInfo {
                id: "color-analyzer",
                name: "Dominant Color Analyzer",
                description: "Clusters pixel colors with k-means and reports the dominant palette",
                category: "color",
                version: "1.0",
                input: InputKind::Image,
            },
            |s| Box::new(ColorAnalyzer::new(usize::from(s.n_colors))),
        ),
        ModelEntry::new(
            ModelInfo {
                id: "color-detector",
                name: "Color Detector",
                description: "Locates the largest region matching a target color",
                category: "color",
                version: "1.0",
                input: InputKind::ImageAndColor,
            },
            |s| Box::new(ColorDetector::new(DetectionMode::Largest, detector_settings(s))),
        ),
        ModelEntry::new(
            ModelInfo {
                id: "color-regions",
                name: "Color Region Finder",
                description: "Lists every sizeable region matching a target color",
                category: "color",
                version: "1.0",
                input: InputKind::ImageAndColor,
            },
            |s| Box::new(ColorDetector::new(DetectionMode::AllRegions, detector_settings(s))),
        ),
        ModelEntry::new(
            ModelInfo {
                id: "edge-detector",
                name: "Edge Detector",
                description: "Measures the share of edge pixels found by Canny",
                category: "structure",
                version: "1.0",
                input: InputKind::Image,
            },
            |s| Box::new(EdgeDetector::new(s.canny_low, s.canny_high)),
        ),
    ]
}

/// Immutable catalog of procedures, keyed by id.
#[derive(Debug, Clone)]
pub struct Registry {
    settings: ModelSettings,
    entries: BTreeMap<&'static str, ModelEntry>,
}

impl Registry {
    /// Registry with the built-in procedures.
    pub fn new(settings: ModelSettings) -> Self {
        Self::with_entries(settings, builtin_entries())
    }

    pub fn with_entries(
        settings: ModelSettings,
        entries: impl IntoIterator<Item = ModelEntry>,
    ) -> Self {
        Self {
            settings,
            entries: entries.into_iter().map(|e| (e.info.id, e)).collect(),
        }
    }

    /// Process-wide registry built from default settings on first use.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(ModelSettings::default()))
    }

    pub const fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn entry(&self, model_id: &str) -> Option<&ModelEntry> {
        self.entries.get(model_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ModelInfo> {
        self.entries.values().map(|e| &e.info)
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Constructs and loads a fresh instance of `model_id`.
    ///
    /// A failed load is reported as an execution failure after the half-built instance
    /// has been cleaned up.
    pub fn resolve(&self, model_id: &str) -> Result<Box<dyn VisionModel>, InferenceError> {
        let entry = self.entry(model_id).ok_or_else(|| InferenceError::NotFound {
            model_id: model_id.to_string(),
        })?;
        self.instantiate(entry)
    }

    pub(crate) fn instantiate(
        &self,
        entry: &ModelEntry,
    ) -> Result<Box<dyn VisionModel>, InferenceError> {
        let mut model = entry.build(&self.settings);
        debug!(model_id = entry.info.id, "model constructed");

        if let Err(source) = model.load() {
            if let Err(e) = model.cleanup() {
                warn!(model_id = entry.info.id, error = %e, "cleanup after failed load failed");
            }
            return Err(InferenceError::ExecutionFailure {
                model_id: entry.info.id.to_string(),
                source,
            });
        }
        Ok(model)
    }
}
