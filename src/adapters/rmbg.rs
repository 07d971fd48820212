//! BRIA RMBG 2.0 adapter
//!
//! Fixed 1024x1024 input resized with a bilinear filter; the last graph output holds
//! logits.

use super::{AdapterCore, InvokeOptions, ModelAdapter, ProbabilityMap};
use crate::error::Result;
use crate::models::{ModelDescriptor, ModelMetadata, OutputActivation};
use crate::utils::{ImagePostprocessor, ImagePreprocessor, PreparedInput};
use image::{imageops::FilterType, DynamicImage, RgbaImage};

#[derive(Debug)]
pub struct RmbgAdapter {
    core: AdapterCore,
}

impl RmbgAdapter {
    #[must_use]
    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }
}

impl ModelAdapter for RmbgAdapter {
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
        ImagePreprocessor::prepare(image, policy, FilterType::Triangle)
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
