//! ONNX Runtime implementation of the segmentation network contract
//!
//! Each model family ships a full precision graph and, optionally, a half precision graph
//! whose floating point initializers are stored as fp16. The loader picks the graph that
//! matches the requested precision and verifies the graph's input and output element types
//! before handing the session out.

use crate::cache::ArtifactStore;
use crate::config::{Device, ExecutionProvider, Precision, ServiceConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::{
    ensure_precision, InputTensor, InstanceConfig, NetworkLoader, SegmentationNetwork,
};
use crate::models::ModelDescriptor;
use half::f16;
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::TensorRef;
use std::sync::Arc;

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

fn element_type_for(precision: Precision) -> TensorElementType {
    match precision {
        Precision::Full => TensorElementType::Float32,
        Precision::Half => TensorElementType::Float16,
    }
}

fn unavailable<'a, E: std::fmt::Display>(
    model: &'a str,
    step: &'a str,
) -> impl Fn(E) -> BgRemovalError + 'a {
    move |e| BgRemovalError::model_unavailable(model, format!("Failed to {step}: {e}"))
}

/// ONNX Runtime session for one model instance
#[derive(Debug)]
pub struct OnnxNetwork {
    session: Session,
    device: Device,
    precision: Precision,
    /// The probability map is the graph's last output
    output_name: String,
    model: String,
}

impl SegmentationNetwork for OnnxNetwork {
    fn precision(&self) -> Precision {
        self.precision
    }

    fn device(&self) -> Device {
        self.device
    }

    fn forward(&mut self, input: &InputTensor) -> Result<Array4<f32>> {
        ensure_precision(self.precision, input)?;

        let inference_start = instant::Instant::now();
        log::debug!(
            "🚀 Starting {} inference with input shape: {:?} ({})",
            self.model,
            input.shape(),
            self.precision
        );

        let outputs = match input {
            InputTensor::Full(array) => {
                let tensor = TensorRef::from_array_view(array).map_err(|e| {
                    BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
                })?;
                self.session.run(ort::inputs![tensor])
            },
            InputTensor::Half(array) => {
                let tensor = TensorRef::from_array_view(array).map_err(|e| {
                    BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
                })?;
                self.session.run(ort::inputs![tensor])
            },
        }
        .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let value = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            BgRemovalError::inference(format!("Output tensor '{}' not found", self.output_name))
        })?;

        let mask = match self.precision {
            Precision::Full => value
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
                .into_dimensionality::<Ix4>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Expected 4D output tensor: {e}"))
                })?
                .to_owned(),
            Precision::Half => value
                .try_extract_array::<f16>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
                .into_dimensionality::<Ix4>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Expected 4D output tensor: {e}"))
                })?
                .mapv(f16::to_f32),
        };

        if mask.iter().any(|v| !v.is_finite()) {
            return Err(BgRemovalError::inference(format!(
                "Non-finite values in {} output",
                self.precision
            )));
        }

        log::info!(
            "📊 Inference complete: {:.2}ms total",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(mask)
    }

    fn release_scratch(&mut self) {
        // Run outputs are owned by `forward`; the device arena is bounded by the
        // disabled memory pattern and reclaimed when the session drops.
        log::trace!("🧹 Scratch released for {}", self.model);
    }
}

impl Drop for OnnxNetwork {
    fn drop(&mut self) {
        log::debug!(
            "♻️ Releasing ONNX session for {} ({}, {})",
            self.model,
            self.device,
            self.precision
        );
    }
}

/// Loader building [`OnnxNetwork`]s from artifacts in an [`ArtifactStore`]
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    store: Arc<dyn ArtifactStore>,
    intra_threads: usize,
    inter_threads: usize,
}

impl OnnxLoader {
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>, config: &ServiceConfig) -> Self {
        let (intra_threads, inter_threads) = config.resolved_threads();
        Self {
            store,
            intra_threads,
            inter_threads,
        }
    }

    /// List all ONNX Runtime execution providers with availability status and descriptions
    ///
    /// Returns a vector of tuples containing:
    /// - Provider name (String)
    /// - Availability status (bool)
    /// - Description (String)
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("🔍 System Hardware Analysis:");
        log::debug!("  - Platform: {os}", os = std::env::consts::OS);
        log::debug!("  - Architecture: {arch}", arch = std::env::consts::ARCH);

        let cuda = cuda_available();
        let coreml = coreml_available();
        #[cfg(target_os = "macos")]
        if !coreml {
            log::warn!("❌ CoreML execution provider is not available on this Mac");
        }

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }
}

impl NetworkLoader for OnnxLoader {
    fn detect_device(&self, preference: ExecutionProvider) -> Device {
        match preference {
            ExecutionProvider::Auto => {
                if cuda_available() {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    Device::Cuda
                } else if coreml_available() {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    Device::CoreMl
                } else {
                    log::warn!("⚠️ No hardware acceleration available, falling back to CPU");
                    Device::Cpu
                }
            },
            ExecutionProvider::Cpu => Device::Cpu,
            ExecutionProvider::Cuda => {
                if cuda_available() {
                    Device::Cuda
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Device::Cpu
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available() {
                    Device::CoreMl
                } else {
                    log::warn!(
                        "🚫 CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Device::Cpu
                }
            },
        }
    }

    fn load(
        &self,
        descriptor: &ModelDescriptor,
        config: &InstanceConfig,
    ) -> Result<Box<dyn SegmentationNetwork>> {
        let model_load_start = instant::Instant::now();
        let name = descriptor.name.as_str();

        let file = descriptor.artifact_for(config.precision).ok_or_else(|| {
            BgRemovalError::model_unavailable(
                name,
                format!("no {} artifact is published", config.precision),
            )
        })?;
        let path = self
            .store
            .fetch(&descriptor.repo_id, &[file])?
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::internal("Artifact store returned no paths"))?;

        let builder = Session::builder()
            .map_err(unavailable(name, "create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable(name, "set optimization level"))?;

        let builder = match config.device {
            Device::Cuda => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(unavailable(name, "set CUDA execution provider"))?,
            Device::CoreMl => builder
                .with_execution_providers([CoreMLExecutionProvider::default()
                    .with_subgraphs(true)
                    .build()])
                .map_err(unavailable(name, "set CoreML execution provider"))?,
            Device::Cpu => builder,
        };

        let session = builder
            .with_memory_pattern(!config.device.is_accelerator())
            .map_err(unavailable(name, "configure memory pattern"))?
            .with_intra_threads(self.intra_threads)
            .map_err(unavailable(name, "set intra threads"))?
            .with_inter_threads(self.inter_threads)
            .map_err(unavailable(name, "set inter threads"))?
            .commit_from_file(&path)
            .map_err(unavailable(name, "create session from model file"))?;

        let expected = element_type_for(config.precision);
        let input = session.inputs.first().ok_or_else(|| {
            BgRemovalError::model_unavailable(name, "graph declares no inputs")
        })?;
        if input.input_type.tensor_type() != Some(expected) {
            return Err(BgRemovalError::model_unavailable(
                name,
                format!(
                    "graph input '{}' is {:?}, expected {expected:?}",
                    input.name,
                    input.input_type.tensor_type()
                ),
            ));
        }
        let output = session.outputs.last().ok_or_else(|| {
            BgRemovalError::model_unavailable(name, "graph declares no outputs")
        })?;
        if output.output_type.tensor_type() != Some(expected) {
            return Err(BgRemovalError::model_unavailable(
                name,
                format!(
                    "graph output '{}' is {:?}, expected {expected:?}",
                    output.name,
                    output.output_type.tensor_type()
                ),
            ));
        }
        let output_name = output.name.clone();

        log::debug!("✅ ONNX Runtime session created successfully");
        log::debug!("Session configuration:");
        log::debug!("  - Model: {name} ({})", config.precision);
        log::debug!("  - Artifact: {}", path.display());
        log::debug!("  - Device: {}", config.device);
        log::debug!(
            "  - Threading: {} intra-op threads, {} inter-op threads",
            self.intra_threads,
            self.inter_threads
        );
        log::debug!("  - Output: {output_name}");
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Box::new(OnnxNetwork {
            session,
            device: config.device,
            precision: config.precision,
            output_name,
            model: name.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use crate::models::default_descriptors;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> OnnxLoader {
        let store = Arc::new(ModelCache::with_root(Some(dir.path())).unwrap());
        OnnxLoader::new(store, &ServiceConfig::default())
    }

    #[test]
    fn test_list_providers_includes_cpu() {
        let providers = OnnxLoader::list_providers();
        assert!(providers
            .iter()
            .any(|(name, available, _)| name == "CPU" && *available));
    }

    #[test]
    fn test_cpu_preference_is_cpu() {
        let dir = TempDir::new().unwrap();
        assert_eq!(loader(&dir).detect_device(ExecutionProvider::Cpu), Device::Cpu);
    }

    #[test]
    fn test_missing_artifact_fails_before_session() {
        let dir = TempDir::new().unwrap();
        let descriptor = default_descriptors().remove(0);
        let config = InstanceConfig {
            device: Device::Cpu,
            precision: Precision::Full,
        };

        let result = loader(&dir).load(&descriptor, &config);
        assert!(matches!(
            result,
            Err(BgRemovalError::ArtifactRetrieval { .. })
        ));
    }

    #[test]
    fn test_half_request_without_half_artifact() {
        let dir = TempDir::new().unwrap();
        let ben2 = default_descriptors()
            .into_iter()
            .find(|d| d.name == "ben2")
            .unwrap();
        let config = InstanceConfig {
            device: Device::Cuda,
            precision: Precision::Half,
        };

        let result = loader(&dir).load(&ben2, &config);
        assert!(matches!(
            result,
            Err(BgRemovalError::ModelUnavailable { .. })
        ));
    }
}
