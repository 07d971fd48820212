//! Model registry
//!
//! The registry owns one slot per registered descriptor. A slot holds at most one live
//! [`ModelInstance`]; resolution loads it lazily under the slot's write lock so concurrent
//! first requests perform a single load. Unload and reconfiguration only detach the
//! instance from its slot: calls already holding the `Arc` finish on it and the network is
//! released when the last holder drops it.
//!
//! Each instance publishes a metadata snapshot after every call, so listing never waits on
//! an in-flight inference.

use crate::adapters::{create_adapter, InvokeOptions, ModelAdapter};
use crate::config::{ModelConfig, Precision, ServiceConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::{InstanceConfig, NetworkLoader};
use crate::models::{default_descriptors, ModelDescriptor, ModelMetadata};
use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbaImage};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// A loaded model
pub struct ModelInstance {
    descriptor: ModelDescriptor,
    config: InstanceConfig,
    adapter: Mutex<Box<dyn ModelAdapter>>,
    snapshot: RwLock<Option<ModelMetadata>>,
    created_at: DateTime<Utc>,
}

impl ModelInstance {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// Configuration the instance was created with
    #[must_use]
    pub fn config(&self) -> InstanceConfig {
        self.config
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run the adapter; calls on one instance are serialized
    ///
    /// # Errors
    /// - Any classified adapter failure
    pub fn invoke(&self, image: &DynamicImage, options: &InvokeOptions) -> Result<RgbaImage> {
        let mut adapter = self.adapter.lock();
        let result = adapter.invoke(image, options);
        *self.snapshot.write() = adapter.metadata();
        result
    }

    /// Precision currently in use, which differs from the creation config after a fallback
    #[must_use]
    pub fn current_precision(&self) -> Precision {
        self.snapshot
            .read()
            .as_ref()
            .map_or(self.config.precision, |metadata| metadata.precision)
    }

    /// Whether the instance holds a network
    ///
    /// False after a failed full precision reload; the next call reloads.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// Metadata as of the last completed call, `None` while no network is held
    #[must_use]
    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.snapshot.read().clone()
    }

    /// Identity comparison
    #[must_use]
    pub fn same_instance(a: &Arc<Self>, b: &Arc<Self>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

impl Drop for ModelInstance {
    fn drop(&mut self) {
        self.adapter.get_mut().unload();
        debug!(model = %self.descriptor.name, "model instance released");
    }
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("name", &self.descriptor.name)
            .field("config", &self.config)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Result of [`ModelRegistry::resolve`]
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Cached or freshly loaded instance
    Loaded(Arc<ModelInstance>),
    /// Descriptor only, no weights instantiated
    Placeholder(ModelDescriptor),
}

impl Resolved {
    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        match self {
            Self::Loaded(instance) => instance.descriptor(),
            Self::Placeholder(descriptor) => descriptor,
        }
    }

    #[must_use]
    pub fn instance(&self) -> Option<&Arc<ModelInstance>> {
        match self {
            Self::Loaded(instance) => Some(instance),
            Self::Placeholder(_) => None,
        }
    }
}

/// One entry of [`ModelRegistry::list`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub name: String,
    /// A network is held; `metadata` is present exactly when this is set
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
}

struct Slot {
    descriptor: ModelDescriptor,
    instance: RwLock<Option<Arc<ModelInstance>>>,
    overrides: Mutex<ModelConfig>,
}

/// Registry of known models and their live instances
pub struct ModelRegistry {
    slots: Vec<Slot>,
    loader: Arc<dyn NetworkLoader>,
    config: ServiceConfig,
}

impl ModelRegistry {
    /// Registry over `descriptors`, in the given order
    #[must_use]
    pub fn new(
        descriptors: Vec<ModelDescriptor>,
        loader: Arc<dyn NetworkLoader>,
        config: ServiceConfig,
    ) -> Self {
        let slots = descriptors
            .into_iter()
            .map(|descriptor| Slot {
                descriptor,
                instance: RwLock::new(None),
                overrides: Mutex::new(ModelConfig::default()),
            })
            .collect();
        Self {
            slots,
            loader,
            config,
        }
    }

    /// Registry over the built-in catalogue
    #[must_use]
    pub fn with_default_models(loader: Arc<dyn NetworkLoader>, config: ServiceConfig) -> Self {
        Self::new(default_descriptors(), loader, config)
    }

    /// Built-in catalogue backed by ONNX Runtime and the local artifact store
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Artifact store root cannot be determined
    #[cfg(feature = "onnx")]
    pub fn onnx(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let store = crate::cache::ModelCache::with_root(config.models_dir.as_ref())?;
        let loader = crate::backends::onnx::OnnxLoader::new(Arc::new(store), &config);
        Ok(Self::with_default_models(Arc::new(loader), config))
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn slot(&self, name: &str) -> Result<&Slot> {
        self.slots
            .iter()
            .find(|slot| slot.descriptor.name == name)
            .ok_or_else(|| BgRemovalError::model_not_found(name))
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.descriptor.name == name)
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&ModelDescriptor> {
        self.slots
            .iter()
            .map(|slot| &slot.descriptor)
            .find(|descriptor| descriptor.name == name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.slots
            .iter()
            .map(|slot| slot.descriptor.name.as_str())
            .collect()
    }

    /// Cached instance, or a new one when `load` is set, or a placeholder otherwise
    ///
    /// # Errors
    /// - `ModelNotFound` for unknown names
    /// - `ModelUnavailable` when construction fails
    pub fn resolve(&self, name: &str, load: bool) -> Result<Resolved> {
        let slot = self.slot(name)?;

        if let Some(instance) = slot.instance.read().as_ref() {
            return Ok(Resolved::Loaded(Arc::clone(instance)));
        }
        if !load {
            return Ok(Resolved::Placeholder(slot.descriptor.clone()));
        }

        let mut guard = slot.instance.write();
        if let Some(instance) = guard.as_ref() {
            return Ok(Resolved::Loaded(Arc::clone(instance)));
        }

        let instance = Arc::new(self.build_instance(slot)?);
        *guard = Some(Arc::clone(&instance));
        Ok(Resolved::Loaded(instance))
    }

    /// Shorthand for `resolve(name, true)` returning the instance
    ///
    /// # Errors
    /// - Any [`ModelRegistry::resolve`] failure
    pub fn get(&self, name: &str) -> Result<Arc<ModelInstance>> {
        match self.resolve(name, true)? {
            Resolved::Loaded(instance) => Ok(instance),
            Resolved::Placeholder(_) => Err(BgRemovalError::internal(format!(
                "Resolving '{name}' with load=true returned a placeholder"
            ))),
        }
    }

    /// Detach the live instance; returns whether one was present
    ///
    /// # Errors
    /// - `ModelNotFound` for unknown names
    pub fn unload(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name)?;
        let removed = slot.instance.write().take();
        let was_loaded = removed.is_some();
        drop(removed);
        if was_loaded {
            info!(model = name, "model unloaded");
        }
        Ok(was_loaded)
    }

    /// Store `config` for `name`, detaching the live instance when it differs
    ///
    /// The new configuration takes effect on the next resolve. Returns whether a live
    /// instance was detached.
    ///
    /// # Errors
    /// - `ModelNotFound` for unknown names
    /// - `ModelUnavailable` when the family cannot run at the requested precision
    pub fn reconfigure(&self, name: &str, config: ModelConfig) -> Result<bool> {
        let slot = self.slot(name)?;
        if let Some(precision) = config.precision {
            Self::check_precision(&slot.descriptor, precision)?;
        }

        let mut guard = slot.instance.write();
        *slot.overrides.lock() = config;

        let differs = guard
            .as_ref()
            .is_some_and(|instance| instance.config() != self.instance_config(slot));
        let removed = if differs { guard.take() } else { None };
        drop(guard);

        if removed.is_some() {
            info!(model = name, ?config, "configuration changed, instance detached");
        }
        Ok(removed.is_some())
    }

    /// Status of every registered model in registration order
    #[must_use]
    pub fn list(&self) -> Vec<ModelStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let metadata = slot
                    .instance
                    .read()
                    .as_ref()
                    .and_then(|instance| instance.metadata());
                ModelStatus {
                    name: slot.descriptor.name.clone(),
                    loaded: metadata.is_some(),
                    metadata,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.instance.read().as_ref().is_some_and(|i| i.is_live()))
            .count()
    }

    fn check_precision(descriptor: &ModelDescriptor, precision: Precision) -> Result<()> {
        if descriptor.supports_precision(precision) {
            Ok(())
        } else {
            Err(BgRemovalError::model_unavailable(
                &descriptor.name,
                format!("{precision} precision is not supported by this model"),
            ))
        }
    }

    fn instance_config(&self, slot: &Slot) -> InstanceConfig {
        let device = self.loader.detect_device(self.config.execution_provider);
        let precision = slot
            .overrides
            .lock()
            .precision
            .or(self.config.precision)
            .unwrap_or_else(|| slot.descriptor.default_precision(device));
        InstanceConfig { device, precision }
    }

    fn build_instance(&self, slot: &Slot) -> Result<ModelInstance> {
        let name = slot.descriptor.name.as_str();
        let config = self.instance_config(slot);
        let _span = info_span!(
            "load_model",
            model = name,
            device = %config.device,
            precision = %config.precision
        )
        .entered();

        Self::check_precision(&slot.descriptor, config.precision)?;

        let mut adapter =
            create_adapter(slot.descriptor.clone(), Arc::clone(&self.loader), config);
        adapter.load().map_err(|e| e.classify(name, true))?;
        info!("model loaded");

        Ok(ModelInstance {
            descriptor: slot.descriptor.clone(),
            config,
            snapshot: RwLock::new(adapter.metadata()),
            adapter: Mutex::new(adapter),
            created_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .field("loaded", &self.loaded_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockLoader;
    use crate::config::Device;

    fn registry(loader: &MockLoader) -> ModelRegistry {
        ModelRegistry::with_default_models(Arc::new(loader.clone()), ServiceConfig::default())
    }

    #[test]
    fn test_resolve_without_load_returns_placeholder() {
        let loader = MockLoader::new();
        let registry = registry(&loader);

        let resolved = registry.resolve("birefnet", false).unwrap();
        assert!(matches!(resolved, Resolved::Placeholder(_)));
        assert_eq!(resolved.descriptor().name, "birefnet");
        assert_eq!(loader.stats().loads(), 0);
        assert_eq!(registry.loaded_count(), 0);
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = registry(&MockLoader::new());
        let err = registry.resolve("unknown", true).unwrap_err();
        assert!(matches!(err, BgRemovalError::ModelNotFound { .. }));
    }

    #[test]
    fn test_accelerator_defaults_to_half_when_allowed() {
        let loader = MockLoader::new().with_device(Device::Cuda);
        let registry = registry(&loader);

        assert_eq!(registry.get("rmbg2").unwrap().config().precision, Precision::Half);
        assert_eq!(registry.get("ben2").unwrap().config().precision, Precision::Full);
    }

    #[test]
    fn test_service_precision_overrides_default() {
        let loader = MockLoader::new().with_device(Device::Cuda);
        let config = ServiceConfig::builder()
            .precision(Precision::Full)
            .build()
            .unwrap();
        let registry = ModelRegistry::with_default_models(Arc::new(loader), config);

        assert_eq!(registry.get("rmbg2").unwrap().config().precision, Precision::Full);
    }

    #[test]
    fn test_half_reconfigure_unsupported() {
        let registry = registry(&MockLoader::new());
        let err = registry
            .reconfigure("ben2", ModelConfig::with_precision(Precision::Half))
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_reconfigure_same_config_keeps_instance() {
        let loader = MockLoader::new();
        let registry = registry(&loader);
        let first = registry.get("rmbg2").unwrap();

        let detached = registry
            .reconfigure("rmbg2", ModelConfig::with_precision(Precision::Full))
            .unwrap();
        assert!(!detached);
        let second = registry.get("rmbg2").unwrap();
        assert!(ModelInstance::same_instance(&first, &second));
    }

    #[test]
    fn test_list_omits_metadata_when_not_loaded() {
        let registry = registry(&MockLoader::new());
        registry.get("ben2").unwrap();

        let statuses = registry.list();
        let names: Vec<_> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["rmbg2", "ben2", "birefnet"]);
        assert!(!statuses[0].loaded && statuses[0].metadata.is_none());
        assert!(statuses[1].loaded);
        assert_eq!(statuses[1].metadata.as_ref().unwrap().name, "ben2");

        let json = serde_json::to_value(&statuses[0]).unwrap();
        assert!(json.get("metadata").is_none());
    }
}
