//! Model adapters
//!
//! One adapter per model family hides the family's input contract behind [`ModelAdapter`].
//! Network lifecycle, precision alignment and the single full precision retry are shared
//! through [`AdapterCore`].

pub mod ben2;
pub mod birefnet;
pub mod rmbg;

pub use ben2::Ben2Adapter;
pub use birefnet::BiRefNetAdapter;
pub use rmbg::RmbgAdapter;

use crate::config::{Device, Precision};
use crate::error::{BgRemovalError, Result};
use crate::inference::{InputTensor, InstanceConfig, NetworkLoader, SegmentationNetwork};
use crate::models::{ModelDescriptor, ModelKind, ModelMetadata};
use crate::utils::PreparedInput;
use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbaImage};
use ndarray::Array4;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, debug_span, info, warn};

/// Per-call options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Run the refinement post-step (only honoured by adapters that support it)
    pub refine: bool,
}

/// Activated single-channel probability map in network resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap(pub Array4<f32>);

impl ProbabilityMap {
    #[must_use]
    pub fn values(&self) -> &Array4<f32> {
        &self.0
    }

    /// `(height, width)` of the map
    #[must_use]
    pub fn spatial_dims(&self) -> (usize, usize) {
        let (_, _, height, width) = self.0.dim();
        (height, width)
    }
}

/// Uniform capability every model family implements
pub trait ModelAdapter: Send {
    fn descriptor(&self) -> &ModelDescriptor;

    /// Load the network; a no-op when already loaded
    ///
    /// # Errors
    /// - `ModelUnavailable` when the network cannot be constructed
    fn load(&mut self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Release the network and its device memory
    fn unload(&mut self);

    /// Mode and size normalization into the family's tensor space
    ///
    /// # Errors
    /// - `InvalidInput` for images that cannot be normalized
    fn preprocess(&mut self, image: &DynamicImage) -> Result<PreparedInput>;

    /// Run the network on a prepared input
    ///
    /// # Errors
    /// - `InferenceFailed` after the precision fallback is exhausted
    fn predict(&mut self, input: &PreparedInput) -> Result<ProbabilityMap>;

    /// Compose the RGBA result at the original resolution
    ///
    /// # Errors
    /// - Malformed probability maps
    fn postprocess(
        &self,
        map: &ProbabilityMap,
        input: &PreparedInput,
        options: &InvokeOptions,
    ) -> Result<RgbaImage>;

    /// Drop transient device allocations left by the last call
    fn release_scratch(&mut self);

    /// Instance metadata, `None` when not loaded
    fn metadata(&self) -> Option<ModelMetadata>;

    /// Preprocess, predict and postprocess in one call
    ///
    /// Scratch memory is released when the call returns, whether it succeeded or not.
    ///
    /// # Errors
    /// - Any stage failure, classified into the public taxonomy
    fn invoke(&mut self, image: &DynamicImage, options: &InvokeOptions) -> Result<RgbaImage> {
        let name = self.descriptor().name.clone();
        let mut scope = ScratchScope::new(self);

        let prepared = {
            let _span = debug_span!("preprocess", model = %name).entered();
            scope.preprocess(image)
        }
        .map_err(|e| e.classify(&name, false))?;

        let map = {
            let _span = debug_span!("inference", model = %name).entered();
            scope.predict(&prepared)
        }
        .map_err(|e| e.classify(&name, false))?;

        let _span = debug_span!("postprocess", model = %name).entered();
        scope
            .postprocess(&map, &prepared, options)
            .map_err(|e| e.classify(&name, false))
    }
}

/// Releases adapter scratch memory when dropped
pub struct ScratchScope<'a, A: ModelAdapter + ?Sized> {
    adapter: &'a mut A,
}

impl<'a, A: ModelAdapter + ?Sized> ScratchScope<'a, A> {
    pub fn new(adapter: &'a mut A) -> Self {
        Self { adapter }
    }
}

impl<A: ModelAdapter + ?Sized> Deref for ScratchScope<'_, A> {
    type Target = A;

    fn deref(&self) -> &A {
        self.adapter
    }
}

impl<A: ModelAdapter + ?Sized> DerefMut for ScratchScope<'_, A> {
    fn deref_mut(&mut self) -> &mut A {
        self.adapter
    }
}

impl<A: ModelAdapter + ?Sized> Drop for ScratchScope<'_, A> {
    fn drop(&mut self) {
        self.adapter.release_scratch();
    }
}

/// Build the adapter for `descriptor`'s family
#[must_use]
pub fn create_adapter(
    descriptor: ModelDescriptor,
    loader: Arc<dyn NetworkLoader>,
    config: InstanceConfig,
) -> Box<dyn ModelAdapter> {
    let core = AdapterCore::new(descriptor, loader, config);
    match core.descriptor().kind {
        ModelKind::Rmbg2 => Box::new(RmbgAdapter::new(core)),
        ModelKind::Ben2 => Box::new(Ben2Adapter::new(core)),
        ModelKind::BiRefNet => Box::new(BiRefNetAdapter::new(core)),
    }
}

fn into_inference_failure(error: BgRemovalError) -> BgRemovalError {
    match error {
        BgRemovalError::InferenceFailed(message) => BgRemovalError::InferenceFailed(message),
        other => BgRemovalError::inference(other.to_string()),
    }
}

/// Network lifecycle shared by all family adapters
pub struct AdapterCore {
    descriptor: ModelDescriptor,
    loader: Arc<dyn NetworkLoader>,
    config: InstanceConfig,
    network: Option<Box<dyn SegmentationNetwork>>,
    image_size: Option<(u32, u32)>,
    loaded_at: Option<DateTime<Utc>>,
}

impl AdapterCore {
    #[must_use]
    pub fn new(
        descriptor: ModelDescriptor,
        loader: Arc<dyn NetworkLoader>,
        config: InstanceConfig,
    ) -> Self {
        let image_size = descriptor.fixed_input_size().map(|size| (size, size));
        Self {
            descriptor,
            loader,
            config,
            network: None,
            image_size,
            loaded_at: None,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// Current precision; becomes `Full` after a fallback
    #[must_use]
    pub fn precision(&self) -> Precision {
        self.config.precision
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.config.device
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.network.is_some()
    }

    /// Record the network input size of a dynamically sized family
    pub fn set_image_size(&mut self, size: (u32, u32)) {
        self.image_size = Some(size);
    }

    /// Load the network at the current configuration
    ///
    /// # Errors
    /// - `ModelUnavailable` for any loader failure
    pub fn load(&mut self) -> Result<()> {
        if self.network.is_some() {
            return Ok(());
        }
        let network = self
            .loader
            .load(&self.descriptor, &self.config)
            .map_err(|e| e.classify(&self.descriptor.name, true))?;
        debug!(
            model = %self.descriptor.name,
            device = %network.device(),
            precision = %network.precision(),
            "network loaded"
        );
        self.network = Some(network);
        self.loaded_at = Some(Utc::now());
        Ok(())
    }

    pub fn unload(&mut self) {
        if self.network.take().is_some() {
            debug!(model = %self.descriptor.name, "network unloaded");
        }
        self.loaded_at = None;
    }

    pub fn release_scratch(&mut self) {
        if let Some(network) = self.network.as_mut() {
            network.release_scratch();
        }
    }

    /// Run the network, retrying once at full precision after a half precision failure
    ///
    /// A network dropped by a failed retry is reloaded at the current precision first.
    ///
    /// # Errors
    /// - `ModelUnavailable` when the network cannot be (re)loaded
    /// - `InferenceFailed` when the retry also fails or no retry applies
    pub fn predict(&mut self, tensor: &InputTensor) -> Result<ProbabilityMap> {
        let activation = self.descriptor.activation;
        let activate = |raw: Array4<f32>| ProbabilityMap(raw.mapv(|v| activation.apply(v)));

        if self.network.is_none() {
            info!(
                model = %self.descriptor.name,
                precision = %self.config.precision,
                "network missing, reloading"
            );
            self.load()?;
        }

        let error = match self.forward(tensor) {
            Ok(raw) => return Ok(activate(raw)),
            Err(error) => error,
        };
        if self.config.precision != Precision::Half {
            return Err(into_inference_failure(error));
        }

        let original = error.to_string();
        warn!(
            model = %self.descriptor.name,
            error = %original,
            "half precision inference failed, retrying at full precision"
        );

        self.unload();
        self.config.precision = Precision::Full;
        if let Err(reload) = self.load() {
            return Err(BgRemovalError::inference(format!(
                "{original} (full precision reload failed: {reload})"
            )));
        }

        self.forward(tensor).map(activate).map_err(|retry| {
            BgRemovalError::inference(format!("{original} (full precision retry: {retry})"))
        })
    }

    fn forward(&mut self, tensor: &InputTensor) -> Result<Array4<f32>> {
        let network = self.network.as_mut().ok_or_else(|| {
            BgRemovalError::model_unavailable(&self.descriptor.name, "model is not loaded")
        })?;
        let input = tensor.as_precision(network.precision());
        network.forward(&input)
    }

    #[must_use]
    pub fn metadata(&self) -> Option<ModelMetadata> {
        let network = self.network.as_ref()?;
        Some(ModelMetadata {
            name: self.descriptor.name.clone(),
            display_name: self.descriptor.display_name.clone(),
            model_type: self.descriptor.model_type.clone(),
            device: network.device(),
            precision: network.precision(),
            half_precision: network.precision() == Precision::Half,
            model_loaded: true,
            supports_refinement: self.descriptor.capabilities.supports_refinement,
            image_size: self.image_size,
            loaded_at: self.loaded_at.unwrap_or_else(Utc::now),
        })
    }
}

impl std::fmt::Debug for AdapterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCore")
            .field("model", &self.descriptor.name)
            .field("config", &self.config)
            .field("loaded", &self.network.is_some())
            .finish_non_exhaustive()
    }
}
