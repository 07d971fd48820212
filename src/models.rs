//! Model catalogue and per-instance metadata

use crate::config::{Device, Precision};
use crate::utils::preprocessing::ResizePolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// BRIA RMBG 2.0 (fixed 1024x1024 input)
    Rmbg2,
    /// BEN2 matting with optional foreground refinement
    Ben2,
    /// `BiRefNet` (input dimensions ceiled to a multiple of 32)
    BiRefNet,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rmbg2 => write!(f, "rmbg2"),
            Self::Ben2 => write!(f, "ben2"),
            Self::BiRefNet => write!(f, "birefnet"),
        }
    }
}

/// Capability flags checked before dispatching optional behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_refinement: bool,
    pub expects_fixed_size: bool,
}

/// Transform applied to the network's raw output to obtain probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Output is logits
    Sigmoid,
    /// Output is already in [0, 1]
    Identity,
}

impl OutputActivation {
    #[inline]
    #[must_use]
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-value).exp()),
            Self::Identity => value,
        }
    }
}

/// Immutable description of a registered model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry key
    pub name: String,
    /// Human readable name
    pub display_name: String,
    pub kind: ModelKind,
    /// "segmentation" or "matting"
    pub model_type: String,
    /// Artifact repository identifier, e.g. `briaai/RMBG-2.0`
    pub repo_id: String,
    /// Full precision graph
    pub full_precision_file: String,
    /// Reduced precision graph, if the family ships one
    pub half_precision_file: Option<String>,
    pub input_policy: ResizePolicy,
    pub activation: OutputActivation,
    pub capabilities: Capabilities,
    /// Whether accelerators default to half precision
    pub half_on_accelerator: bool,
}

impl ModelDescriptor {
    /// Artifact file for the requested precision
    #[must_use]
    pub fn artifact_for(&self, precision: Precision) -> Option<&str> {
        match precision {
            Precision::Full => Some(self.full_precision_file.as_str()),
            Precision::Half => self.half_precision_file.as_deref(),
        }
    }

    #[must_use]
    pub fn supports_precision(&self, precision: Precision) -> bool {
        self.artifact_for(precision).is_some()
    }

    /// Precision used when neither the service nor a reconfiguration forces one
    #[must_use]
    pub fn default_precision(&self, device: Device) -> Precision {
        if device.is_accelerator()
            && self.half_on_accelerator
            && self.supports_precision(Precision::Half)
        {
            Precision::Half
        } else {
            Precision::Full
        }
    }

    /// Fixed square input edge, if the family uses one
    #[must_use]
    pub fn fixed_input_size(&self) -> Option<u32> {
        match self.input_policy {
            ResizePolicy::Fixed(size) => Some(size),
            ResizePolicy::MultipleOf(_) => None,
        }
    }
}

/// Built-in catalogue in registration order
#[must_use]
pub fn default_descriptors() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            name: "rmbg2".to_string(),
            display_name: "BRIA RMBG 2.0".to_string(),
            kind: ModelKind::Rmbg2,
            model_type: "segmentation".to_string(),
            repo_id: "briaai/RMBG-2.0".to_string(),
            full_precision_file: "onnx/model.onnx".to_string(),
            half_precision_file: Some("onnx/model_fp16.onnx".to_string()),
            input_policy: ResizePolicy::Fixed(1024),
            activation: OutputActivation::Sigmoid,
            capabilities: Capabilities {
                supports_refinement: false,
                expects_fixed_size: true,
            },
            half_on_accelerator: true,
        },
        ModelDescriptor {
            name: "ben2".to_string(),
            display_name: "BEN2".to_string(),
            kind: ModelKind::Ben2,
            model_type: "matting".to_string(),
            repo_id: "PramaLLC/BEN2".to_string(),
            full_precision_file: "BEN2_Base.onnx".to_string(),
            half_precision_file: None,
            input_policy: ResizePolicy::Fixed(1024),
            activation: OutputActivation::Identity,
            capabilities: Capabilities {
                supports_refinement: true,
                expects_fixed_size: true,
            },
            half_on_accelerator: false,
        },
        ModelDescriptor {
            name: "birefnet".to_string(),
            display_name: "BiRefNet".to_string(),
            kind: ModelKind::BiRefNet,
            model_type: "segmentation".to_string(),
            repo_id: "onnx-community/BiRefNet-ONNX".to_string(),
            full_precision_file: "onnx/model.onnx".to_string(),
            half_precision_file: Some("onnx/model_fp16.onnx".to_string()),
            input_policy: ResizePolicy::MultipleOf(32),
            activation: OutputActivation::Sigmoid,
            capabilities: Capabilities {
                supports_refinement: false,
                expects_fixed_size: false,
            },
            half_on_accelerator: true,
        },
    ]
}

/// Metadata reported for a loaded instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub display_name: String,
    pub model_type: String,
    pub device: Device,
    pub precision: Precision,
    pub half_precision: bool,
    pub model_loaded: bool,
    pub supports_refinement: bool,
    /// Fixed input edge, or the last dynamic `[width, height]` seen
    pub image_size: Option<(u32, u32)>,
    pub loaded_at: DateTime<Utc>,
}
