//! Network backends
//!
//! This module provides the implementations of the segmentation network contract:
//! - ONNX Runtime backend (GPU acceleration via CUDA or `CoreML`)
//! - Mock backend (deterministic, no model files required)

#[cfg(feature = "onnx")]
pub mod onnx;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxLoader, OnnxNetwork};

pub use self::mock::{MockLoader, MockNetwork, MockPattern, MockStats};
