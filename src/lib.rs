#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgremove-serve
//!
//! Core of a multi-model background removal service. Several segmentation networks are
//! registered under short names and loaded lazily on first use; a request names a model,
//! and the result is the input image with a soft alpha channel computed by that model.
//!
//! ## Features
//!
//! - **Multiple Models**: `rmbg2` (BRIA RMBG 2.0), `ben2` (BEN2) and `birefnet` (`BiRefNet`)
//! - **Lazy Lifecycle**: at most one live instance per model, explicit load/unload/reconfigure
//! - **Precision Fallback**: FP16 on accelerators with a single FP32 retry on failure
//! - **Hardware Acceleration**: CUDA, `CoreML` and CPU execution providers via ONNX Runtime
//! - **Refinement**: blur-fusion foreground colour estimation for models that support it
//! - **Transport Surface**: structured success and error payloads plus async dispatch
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_serve::{InferenceRequest, ModelRegistry, RemovalService, ServiceConfig};
//! use std::sync::Arc;
//!
//! # fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let config = ServiceConfig::from_env()?;
//! let registry = Arc::new(ModelRegistry::onnx(config)?);
//! let service = RemovalService::new(registry);
//!
//! let request = InferenceRequest::new(upload, "birefnet");
//! match service.remove_background(&request) {
//!     Ok(response) => std::fs::write("output.png", &response.png)?,
//!     Err(failure) => eprintln!("{} ({})", failure.error, failure.http_status()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `cli` (default): command-line interface and subscriber setup
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod adapters;
pub mod api;
pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod registry;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;

// Public API exports
pub use adapters::{create_adapter, InvokeOptions, ModelAdapter, ProbabilityMap};
pub use api::{ErrorResponse, RemovalService, ServiceResult};
pub use backends::{MockLoader, MockPattern};
#[cfg(feature = "onnx")]
pub use backends::OnnxLoader;
pub use cache::{format_size, ArtifactStore, ModelCache};
pub use config::{
    Device, ExecutionProvider, ModelConfig, Precision, RefinementPolicy, ServiceConfig,
    ServiceConfigBuilder,
};
pub use error::{BgRemovalError, ErrorStatus, Result};
pub use inference::{InputTensor, InstanceConfig, NetworkLoader, SegmentationNetwork};
pub use models::{default_descriptors, Capabilities, ModelDescriptor, ModelKind, ModelMetadata};
pub use processor::{
    BackgroundRemovalProcessor, InferenceRequest, InferenceResult, ProcessingTimings,
};
pub use registry::{ModelInstance, ModelRegistry, ModelStatus, Resolved};
pub use utils::{ImagePostprocessor, ImagePreprocessor, ResizePolicy};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
