use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;

use crate::errors::{Result, VisionError};
use crate::output::ResultMap;
use crate::traits::{AuxInput, VisionModel};

/// Lifecycle counters shared between a probe factory and every instance it builds.
#[derive(Debug, Default)]
pub struct ProbeCounters {
    pub constructed: AtomicUsize,
    pub loaded: AtomicUsize,
    pub predicted: AtomicUsize,
    pub cleaned: AtomicUsize,
}

impl ProbeCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn predicted(&self) -> usize {
        self.predicted.load(Ordering::SeqCst)
    }

    pub fn cleaned(&self) -> usize {
        self.cleaned.load(Ordering::SeqCst)
    }
}

/// Which lifecycle step a probe should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeFailure {
    #[default]
    Never,
    Load,
    Predict,
    Cleanup,
}

/// Test model that records its lifecycle and echoes the input dimensions.
#[derive(Debug, Clone)]
pub struct ProbeModel {
    counters: Arc<ProbeCounters>,
    failure: ProbeFailure,
}

impl ProbeModel {
    pub fn new(counters: Arc<ProbeCounters>, failure: ProbeFailure) -> Self {
        counters.constructed.fetch_add(1, Ordering::SeqCst);
        Self { counters, failure }
    }

    fn fail(step: &str) -> VisionError {
        VisionError::Model {
            operation: step.to_string(),
            source: format!("probe configured to fail {step}").into(),
        }
    }
}

impl VisionModel for ProbeModel {
    fn load(&mut self) -> Result<()> {
        self.counters.loaded.fetch_add(1, Ordering::SeqCst);
        if self.failure == ProbeFailure::Load {
            return Err(Self::fail("load"));
        }
        Ok(())
    }

    fn predict(&mut self, image: &RgbImage, aux: Option<&AuxInput>) -> Result<ResultMap> {
        self.counters.predicted.fetch_add(1, Ordering::SeqCst);
        if self.failure == ProbeFailure::Predict {
            return Err(Self::fail("predict"));
        }

        let mut output = ResultMap::new();
        output.insert_data("width", &image.width())?;
        output.insert_data("height", &image.height())?;
        if let Some(AuxInput::TargetColor(color)) = aux {
            output.insert_data("color", color.as_str())?;
        }
        Ok(output)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.counters.cleaned.fetch_add(1, Ordering::SeqCst);
        if self.failure == ProbeFailure::Cleanup {
            return Err(Self::fail("cleanup"));
        }
        Ok(())
    }
}
