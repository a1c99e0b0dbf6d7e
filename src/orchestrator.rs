use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::decode::decode_image;
use crate::errors::InferenceError;
use crate::output::{InferenceMeta, InferenceResponse};
use crate::registry::{ModelEntry, Registry};
use crate::traits::{AuxInput, InputKind, VisionModel};
use crate::vision_ops::color::HexColor;
use crate::vision_ops::round_to;

/// Owns a loaded instance for the duration of one request and cleans it up on drop.
pub struct ModelLease {
    model_id: &'static str,
    model: Box<dyn VisionModel>,
}

impl ModelLease {
    pub fn new(model_id: &'static str, model: Box<dyn VisionModel>) -> Self {
        Self { model_id, model }
    }

    pub fn model(&mut self) -> &mut dyn VisionModel {
        self.model.as_mut()
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        match self.model.cleanup() {
            Ok(()) => debug!(model_id = self.model_id, "model cleaned up"),
            Err(e) => warn!(model_id = self.model_id, error = %e, "model cleanup failed"),
        }
    }
}

/// Runs single inference requests against a registry.
///
/// Every request gets its own instance, so one orchestrator can serve many threads.
#[derive(Debug, Clone, Copy)]
pub struct Orchestrator<'r> {
    registry: &'r Registry,
}

impl Default for Orchestrator<'static> {
    fn default() -> Self {
        Self::new(Registry::global())
    }
}

impl<'r> Orchestrator<'r> {
    pub const fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub const fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Runs `model_id` on a decoded image.
    ///
    /// `aux` is the raw target color for procedures that take one; it is parsed and
    /// validated before any instance is built.
    pub fn infer(
        &self,
        model_id: &str,
        image: &RgbImage,
        aux: Option<&str>,
    ) -> Result<InferenceResponse, InferenceError> {
        let _span = tracing::info_span!("inference", model_id).entered();
        let entry = self.lookup(model_id)?;
        self.run(entry, image, aux)
    }

    /// Like [`Orchestrator::infer`], but decodes `bytes` first. The id is checked before
    /// decoding, so an unknown id never pays for a decode.
    pub fn infer_bytes(
        &self,
        model_id: &str,
        bytes: &[u8],
        aux: Option<&str>,
    ) -> Result<InferenceResponse, InferenceError> {
        let _span = tracing::info_span!("inference", model_id).entered();
        let entry = self.lookup(model_id)?;
        let image = decode_image(bytes)?;
        debug!(width = image.width(), height = image.height(), "image decoded");
        self.run(entry, &image, aux)
    }

    fn lookup(&self, model_id: &str) -> Result<&'r ModelEntry, InferenceError> {
        self.registry.entry(model_id).ok_or_else(|| {
            debug!("unknown model id");
            InferenceError::NotFound {
                model_id: model_id.to_string(),
            }
        })
    }

    fn run(
        &self,
        entry: &ModelEntry,
        image: &RgbImage,
        aux: Option<&str>,
    ) -> Result<InferenceResponse, InferenceError> {
        let aux = validate_aux(entry.info.input, aux)?;

        let model = self.registry.instantiate(entry)?;
        let mut lease = ModelLease::new(entry.info.id, model);

        let started = Instant::now();
        let output = lease.model().predict(image, aux.as_ref());
        let elapsed_ms = round_to(started.elapsed().as_secs_f64() * 1000.0, 3);

        let output = output.map_err(|source| {
            error!(error = %source, "model execution failed");
            InferenceError::ExecutionFailure {
                model_id: entry.info.id.to_string(),
                source,
            }
        })?;
        info!(inference_time_ms = elapsed_ms, fields = output.len(), "inference finished");

        Ok(InferenceResponse {
            model_id: entry.info.id.to_string(),
            output,
            meta: InferenceMeta {
                inference_time_ms: elapsed_ms,
                model_version: entry.info.version.to_string(),
            },
        })
    }
}

fn validate_aux(input: InputKind, aux: Option<&str>) -> Result<Option<AuxInput>, InferenceError> {
    match input {
        InputKind::Image => {
            if aux.is_some() {
                debug!("ignoring auxiliary input for image-only procedure");
            }
            Ok(None)
        }
        InputKind::ImageAndColor => {
            let raw = aux.ok_or_else(|| InferenceError::InvalidInput {
                field: "color".to_string(),
                reason: "is required by this procedure".to_string(),
            })?;
            let color = HexColor::parse(raw)?;
            Ok(Some(AuxInput::TargetColor(color)))
        }
    }
}
