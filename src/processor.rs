//! Inference orchestration
//!
//! [`BackgroundRemovalProcessor`] validates a request, resolves the model through the
//! registry, gates refinement on the model's capabilities and hands the image to the
//! instance's adapter.

use crate::adapters::InvokeOptions;
use crate::config::{ModelConfig, Precision, RefinementPolicy};
use crate::error::{BgRemovalError, Result};
use crate::registry::ModelRegistry;
use image::{DynamicImage, ImageFormat, RgbaImage};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, instrument, span, Level};

/// One background removal request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Encoded image (PNG, JPEG, WebP, BMP, TIFF, GIF)
    pub image_bytes: Vec<u8>,
    /// Registered model name
    pub model: String,
    /// Refinement post-step, honoured by models that support it
    #[serde(default)]
    pub refine: bool,
    /// Precision override, applied by reconfiguring the model
    ///
    /// The override is stored for the model and stays in force for later requests that
    /// carry none; send another override or call [`ModelRegistry::reconfigure`] to change it.
    #[serde(default)]
    pub precision: Option<Precision>,
}

impl InferenceRequest {
    #[must_use]
    pub fn new<M: Into<String>>(image_bytes: Vec<u8>, model: M) -> Self {
        Self {
            image_bytes,
            model: model.into(),
            refine: false,
            precision: None,
        }
    }

    #[must_use]
    pub fn with_refinement(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Stage durations of one request in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub model_load_ms: u64,
    pub inference_ms: u64,
    pub total_ms: u64,
}

/// Successful result; `image` always has the input's dimensions
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub image: RgbaImage,
    pub model: String,
    pub precision: Precision,
    /// Whether the refinement post-step ran
    pub refined: bool,
    pub timings: ProcessingTimings,
}

impl InferenceResult {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Encode the RGBA result as PNG
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Inference orchestrator
#[derive(Debug, Clone)]
pub struct BackgroundRemovalProcessor {
    registry: Arc<ModelRegistry>,
    refinement_policy: RefinementPolicy,
}

impl BackgroundRemovalProcessor {
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        let refinement_policy = registry.config().refinement_policy;
        Self {
            registry,
            refinement_policy,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Decode request bytes
    ///
    /// # Errors
    /// - `InvalidInput` for empty or undecodable bytes
    pub fn decode(image_bytes: &[u8]) -> Result<DynamicImage> {
        if image_bytes.is_empty() {
            return Err(BgRemovalError::invalid_input("Image data is empty"));
        }
        let image = image::load_from_memory(image_bytes).map_err(|e| {
            BgRemovalError::invalid_input(format!("Failed to decode image from bytes: {e}"))
        })?;
        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::invalid_input("Image has zero dimensions"));
        }
        Ok(image)
    }

    /// Run one request end to end
    ///
    /// # Errors
    /// - `ModelNotFound` for unknown model names, before anything else happens
    /// - `InvalidInput` for unusable image bytes, before any model is resolved
    /// - `ModelUnavailable` when the model cannot be loaded
    /// - `InferenceFailed` when inference fails after the precision fallback
    #[instrument(
        skip(self, request),
        fields(
            model = %request.model,
            bytes = request.image_bytes.len(),
            refine = request.refine
        )
    )]
    pub fn process(&self, request: &InferenceRequest) -> Result<InferenceResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let descriptor = self
            .registry
            .descriptor(&request.model)
            .ok_or_else(|| BgRemovalError::model_not_found(&request.model))?;
        let supports_refinement = descriptor.capabilities.supports_refinement;

        let decode_start = Instant::now();
        let image = Self::decode(&request.image_bytes)?;
        timings.decode_ms = elapsed_ms(decode_start);

        let refine = match (request.refine, supports_refinement, self.refinement_policy) {
            (true, false, RefinementPolicy::Reject) => {
                return Err(BgRemovalError::invalid_input(format!(
                    "Model '{}' does not support refinement",
                    request.model
                )));
            },
            (true, false, RefinementPolicy::Ignore) => {
                debug!("refinement requested but not supported, ignoring");
                false
            },
            (refine, _, _) => refine,
        };

        if let Some(precision) = request.precision {
            self.registry
                .reconfigure(&request.model, ModelConfig::with_precision(precision))?;
        }

        let load_start = Instant::now();
        let instance = {
            let _span = span!(Level::DEBUG, "resolve", model = %request.model).entered();
            self.registry.get(&request.model)?
        };
        timings.model_load_ms = elapsed_ms(load_start);

        let inference_start = Instant::now();
        let rgba = {
            let _span = span!(
                Level::INFO,
                "invoke",
                width = image.width(),
                height = image.height()
            )
            .entered();
            instance.invoke(&image, &InvokeOptions { refine })?
        };
        timings.inference_ms = elapsed_ms(inference_start);

        if rgba.dimensions() != (image.width(), image.height()) {
            return Err(BgRemovalError::inference(format!(
                "Result size {:?} differs from input size {:?}",
                rgba.dimensions(),
                (image.width(), image.height())
            )));
        }

        timings.total_ms = elapsed_ms(total_start);
        info!(
            total_ms = timings.total_ms,
            inference_ms = timings.inference_ms,
            "background removed"
        );

        Ok(InferenceResult {
            image: rgba,
            model: request.model.clone(),
            precision: instance.current_precision(),
            refined: refine,
            timings,
        })
    }
}
