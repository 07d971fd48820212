//! Segmentation network abstraction
//!
//! A [`NetworkLoader`] turns a [`ModelDescriptor`] plus an [`InstanceConfig`] into a
//! loaded [`SegmentationNetwork`]. Networks consume precision-tagged [`InputTensor`]s and
//! return the raw single-channel output map as `f32`.

use crate::config::{Device, ExecutionProvider, Precision};
use crate::error::{BgRemovalError, Result};
use crate::models::ModelDescriptor;
use half::f16;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Device and precision an instance is constructed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub device: Device,
    pub precision: Precision,
}

/// NCHW input tensor tagged with its element precision
#[derive(Debug, Clone, PartialEq)]
pub enum InputTensor {
    Full(Array4<f32>),
    Half(Array4<f16>),
}

impl InputTensor {
    #[must_use]
    pub fn precision(&self) -> Precision {
        match self {
            Self::Full(_) => Precision::Full,
            Self::Half(_) => Precision::Half,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Full(array) => array.shape(),
            Self::Half(array) => array.shape(),
        }
    }

    /// Spatial size as `(height, width)`
    #[must_use]
    pub fn spatial_dims(&self) -> (usize, usize) {
        let shape = self.shape();
        (
            shape.get(2).copied().unwrap_or(0),
            shape.get(3).copied().unwrap_or(0),
        )
    }

    /// Convert to `precision`, a no-op when already matching
    #[must_use]
    pub fn cast(self, precision: Precision) -> Self {
        match (self, precision) {
            (Self::Full(array), Precision::Half) => Self::Half(array.mapv(f16::from_f32)),
            (Self::Half(array), Precision::Full) => Self::Full(array.mapv(f16::to_f32)),
            (tensor, _) => tensor,
        }
    }

    /// Borrow when already at `precision`, otherwise convert into a new tensor
    #[must_use]
    pub fn as_precision(&self, precision: Precision) -> Cow<'_, Self> {
        match (self, precision) {
            (Self::Full(array), Precision::Half) => {
                Cow::Owned(Self::Half(array.mapv(f16::from_f32)))
            },
            (Self::Half(array), Precision::Full) => Cow::Owned(Self::Full(array.mapv(f16::to_f32))),
            (tensor, _) => Cow::Borrowed(tensor),
        }
    }
}

impl From<Array4<f32>> for InputTensor {
    fn from(array: Array4<f32>) -> Self {
        Self::Full(array)
    }
}

/// Refuse to run `input` against weights of a different precision
///
/// # Errors
/// - `InferenceFailed` on mismatch
pub fn ensure_precision(expected: Precision, input: &InputTensor) -> Result<()> {
    if input.precision() == expected {
        Ok(())
    } else {
        Err(BgRemovalError::inference(format!(
            "Input tensor precision {} does not match network precision {expected}",
            input.precision()
        )))
    }
}

/// A loaded segmentation network
pub trait SegmentationNetwork: Send {
    /// Precision of the loaded weights
    fn precision(&self) -> Precision;

    /// Device the network executes on
    fn device(&self) -> Device;

    /// Run the network; returns the raw `(1, 1, H, W)` output map
    ///
    /// # Errors
    /// - Input precision differs from [`SegmentationNetwork::precision`]
    /// - Runtime execution failures
    fn forward(&mut self, input: &InputTensor) -> Result<Array4<f32>>;

    /// Drop transient buffers retained by the last call
    fn release_scratch(&mut self);
}

/// Factory for [`SegmentationNetwork`]s
pub trait NetworkLoader: Send + Sync + std::fmt::Debug {
    /// Map a provider preference to the device that will actually be used
    fn detect_device(&self, preference: ExecutionProvider) -> Device;

    /// Load the artifact for `descriptor` at `config`
    ///
    /// # Errors
    /// - Artifact retrieval failures
    /// - Runtime session construction failures
    fn load(
        &self,
        descriptor: &ModelDescriptor,
        config: &InstanceConfig,
    ) -> Result<Box<dyn SegmentationNetwork>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_to_half_and_back() {
        let array = Array4::<f32>::from_elem((1, 3, 2, 2), 0.5);
        let tensor = InputTensor::from(array.clone());
        assert_eq!(tensor.precision(), Precision::Full);

        let half = tensor.cast(Precision::Half);
        assert_eq!(half.precision(), Precision::Half);
        assert_eq!(half.shape(), &[1, 3, 2, 2]);

        let full = half.cast(Precision::Full);
        assert_eq!(full, InputTensor::Full(array));
    }

    #[test]
    fn test_cast_same_precision_is_noop() {
        let tensor = InputTensor::Full(Array4::zeros((1, 3, 4, 8)));
        let cast = tensor.clone().cast(Precision::Full);
        assert_eq!(cast, tensor);
        assert_eq!(cast.spatial_dims(), (4, 8));
    }

    #[test]
    fn test_as_precision_borrows_when_matching() {
        let tensor = InputTensor::Full(Array4::from_elem((1, 3, 2, 2), 0.25));
        assert!(matches!(tensor.as_precision(Precision::Full), Cow::Borrowed(_)));

        let half = tensor.as_precision(Precision::Half);
        assert!(matches!(half, Cow::Owned(InputTensor::Half(_))));
        assert_eq!(half.shape(), &[1, 3, 2, 2]);
    }

    #[test]
    fn test_ensure_precision() {
        let tensor = InputTensor::Full(Array4::zeros((1, 3, 1, 1)));
        assert!(ensure_precision(Precision::Full, &tensor).is_ok());

        let err = ensure_precision(Precision::Half, &tensor).unwrap_err();
        assert!(matches!(err, BgRemovalError::InferenceFailed(_)));
    }
}
