//! `BiRefNet` adapter
//!
//! The patch-based encoder needs both input dimensions to be multiples of 32. Images are
//! ceiled to the next multiple with a Lanczos filter and the mask is resized back to the
//! original size, not the padded one.

use super::{AdapterCore, InvokeOptions, ModelAdapter, ProbabilityMap};
use crate::error::Result;
use crate::models::{ModelDescriptor, ModelMetadata, OutputActivation};
use crate::utils::{ImagePostprocessor, ImagePreprocessor, PreparedInput};
use image::{imageops::FilterType, DynamicImage, RgbaImage};
use tracing::debug;

#[derive(Debug)]
pub struct BiRefNetAdapter {
    core: AdapterCore,
}

impl BiRefNetAdapter {
    #[must_use]
    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }
}

impl ModelAdapter for BiRefNetAdapter {
    fn descriptor(&self) -> &ModelDescriptor {
        self.core.descriptor()
    }

    fn load(&mut self) -> Result<()> {
        self.core.load()
    }

    fn is_loaded(&self) -> bool {
        self.core.is_loaded()
    }

    fn unload(&mut self) {
        self.core.unload();
    }

    fn preprocess(&mut self, image: &DynamicImage) -> Result<PreparedInput> {
        let policy = self.core.descriptor().input_policy;
        let prepared = ImagePreprocessor::prepare(image, policy, FilterType::Lanczos3)?;
        let (width, height) = prepared.model_size;
        if (width, height) != prepared.original.dimensions() {
            debug!(
                from = ?prepared.original.dimensions(),
                to = ?prepared.model_size,
                patches = ?(width / 32, height / 32),
                "resized to patch grid"
            );
        }
        self.core.set_image_size(prepared.model_size);
        Ok(prepared)
    }

    fn predict(&mut self, input: &PreparedInput) -> Result<ProbabilityMap> {
        self.core.predict(&input.tensor)
    }

    fn postprocess(
        &self,
        map: &ProbabilityMap,
        input: &PreparedInput,
        _options: &InvokeOptions,
    ) -> Result<RgbaImage> {
        ImagePostprocessor::compose(map.values(), OutputActivation::Identity, &input.original)
    }

    fn release_scratch(&mut self) {
        self.core.release_scratch();
    }

    fn metadata(&self) -> Option<ModelMetadata> {
        self.core.metadata()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockLoader;
    use crate::config::{Device, Precision};
    use crate::inference::InstanceConfig;
    use crate::models::default_descriptors;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn adapter() -> BiRefNetAdapter {
        let descriptor = default_descriptors()
            .into_iter()
            .find(|d| d.name == "birefnet")
            .unwrap();
        let core = AdapterCore::new(
            descriptor,
            Arc::new(MockLoader::new()),
            InstanceConfig {
                device: Device::Cpu,
                precision: Precision::Full,
            },
        );
        BiRefNetAdapter::new(core)
    }

    #[test]
    fn test_preprocess_ceils_to_multiple_of_32() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(70, 33, Rgba([5, 5, 5, 255])));
        let prepared = adapter().preprocess(&image).unwrap();
        assert_eq!(prepared.tensor.shape(), &[1, 3, 64, 96]);
        assert_eq!(prepared.model_size, (96, 64));
    }

    #[test]
    fn test_result_uses_original_not_padded_size() {
        let mut adapter = adapter();
        adapter.load().unwrap();
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(70, 33, Rgba([5, 5, 5, 255])));

        let result = adapter.invoke(&image, &InvokeOptions::default()).unwrap();
        assert_eq!(result.dimensions(), (70, 33));
        assert_eq!(adapter.metadata().unwrap().image_size, Some((96, 64)));
    }

    #[test]
    fn test_no_image_size_before_first_call() {
        let mut adapter = adapter();
        adapter.load().unwrap();
        assert_eq!(adapter.metadata().unwrap().image_size, None);
    }
}
