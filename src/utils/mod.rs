//! Image pipeline utilities shared by all model adapters

pub mod postprocessing;
pub mod preprocessing;

pub use postprocessing::ImagePostprocessor;
pub use preprocessing::{
    ImagePreprocessor, PreparedInput, ResizePolicy, NORMALIZATION_MEAN, NORMALIZATION_STD,
};
