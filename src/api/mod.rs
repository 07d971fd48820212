//! Transport-facing service
//!
//! [`RemovalService`] exposes the registry and orchestrator operations a transport needs.
//! Every operation returns its payload or an [`ErrorResponse`].

pub mod responses;

pub use responses::{
    ErrorResponse, HealthResponse, LoadResponse, ModelsResponse, RemovalResponse, UnloadResponse,
};

use crate::error::{BgRemovalError, ErrorStatus};
use crate::processor::{BackgroundRemovalProcessor, InferenceRequest};
use crate::registry::ModelRegistry;
use std::sync::Arc;
use tracing::{error, warn};

const SUCCESS: &str = "success";

/// Result type of service operations
pub type ServiceResult<T> = std::result::Result<T, ErrorResponse>;

fn failure(error: BgRemovalError) -> ErrorResponse {
    match error.status() {
        ErrorStatus::Failed | ErrorStatus::Unavailable => error!(%error, "request failed"),
        ErrorStatus::NotFound | ErrorStatus::InvalidInput => warn!(%error, "request rejected"),
    }
    ErrorResponse::from(error)
}

#[derive(Debug, Clone)]
pub struct RemovalService {
    processor: BackgroundRemovalProcessor,
}

impl RemovalService {
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            processor: BackgroundRemovalProcessor::new(registry),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.processor.registry()
    }

    #[must_use]
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
        }
    }

    #[must_use]
    pub fn list_models(&self) -> ModelsResponse {
        ModelsResponse {
            models: self.registry().list(),
            status: SUCCESS.to_string(),
        }
    }

    /// Load `name` eagerly
    ///
    /// # Errors
    /// - `not_found` for unknown names
    /// - `unavailable` when the model cannot be constructed
    pub fn load_model(&self, name: &str) -> ServiceResult<LoadResponse> {
        self.registry().get(name).map_err(failure)?;
        Ok(LoadResponse {
            status: SUCCESS.to_string(),
            model: name.to_string(),
        })
    }

    /// Release `name`; succeeds when already unloaded
    ///
    /// # Errors
    /// - `not_found` for unknown names
    pub fn unload_model(&self, name: &str) -> ServiceResult<UnloadResponse> {
        let unloaded = self.registry().unload(name).map_err(failure)?;
        Ok(UnloadResponse {
            status: SUCCESS.to_string(),
            model: name.to_string(),
            unloaded,
        })
    }

    /// Remove the background of one image; blocks for the duration of inference
    ///
    /// # Errors
    /// - Structured failure for every error category
    pub fn remove_background(&self, request: &InferenceRequest) -> ServiceResult<RemovalResponse> {
        let result = self.processor.process(request).map_err(failure)?;
        let png = result.to_png_bytes().map_err(failure)?;
        let (width, height) = result.dimensions();
        Ok(RemovalResponse {
            status: SUCCESS.to_string(),
            model: result.model,
            width,
            height,
            png,
        })
    }

    /// [`RemovalService::remove_background`] on the blocking thread pool
    ///
    /// # Errors
    /// - Structured failure for every error category, including a panicked worker
    pub async fn remove_background_async(
        &self,
        request: InferenceRequest,
    ) -> ServiceResult<RemovalResponse> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.remove_background(&request))
            .await
            .map_err(|e| failure(BgRemovalError::inference(format!("Worker task failed: {e}"))))?
    }
}
