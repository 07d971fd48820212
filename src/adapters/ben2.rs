//! BEN2 adapter
//!
//! BEN2 produces an alpha matte at 1024x1024 and is the only family supporting the
//! foreground refinement post-step.

use super::{AdapterCore, InvokeOptions, ModelAdapter, ProbabilityMap};
use crate::error::Result;
use crate::models::{ModelDescriptor, ModelMetadata, OutputActivation};
use crate::utils::{ImagePostprocessor, ImagePreprocessor, PreparedInput};
use image::{imageops::FilterType, DynamicImage, RgbaImage};
use tracing::debug_span;

#[derive(Debug)]
pub struct Ben2Adapter {
    core: AdapterCore,
}

impl Ben2Adapter {
    #[must_use]
    pub fn new(core: AdapterCore) -> Self {
        Self { core }
    }
}

impl ModelAdapter for Ben2Adapter {
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
        options: &InvokeOptions,
    ) -> Result<RgbaImage> {
        let composed =
            ImagePostprocessor::compose(map.values(), OutputActivation::Identity, &input.original)?;
        if !options.refine {
            return Ok(composed);
        }

        let _span = debug_span!("refine_foreground").entered();
        Ok(ImagePostprocessor::refine_foreground(&composed))
    }

    fn release_scratch(&mut self) {
        self.core.release_scratch();
    }

    fn metadata(&self) -> Option<ModelMetadata> {
        self.core.metadata()
    }
}
