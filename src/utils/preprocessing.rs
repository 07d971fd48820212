//! Shared image preprocessing utilities
//!
//! Every adapter runs the same three stages: mode normalization, size normalization
//! according to its [`ResizePolicy`], and conversion to a normalized NCHW tensor.

use crate::error::{BgRemovalError, Result};
use crate::inference::InputTensor;
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Per-channel mean used for tensor normalization
pub const NORMALIZATION_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation used for tensor normalization
pub const NORMALIZATION_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How an adapter sizes its network input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Constant square resolution
    Fixed(u32),
    /// Each dimension rounded up to a multiple of this value
    MultipleOf(u32),
}

impl ResizePolicy {
    /// Network input `(width, height)` for an image of the given size
    ///
    /// # Errors
    /// - Zero-sized image or zero multiple
    /// - Dimension overflow after rounding up
    pub fn target_dimensions(self, width: u32, height: u32) -> Result<(u32, u32)> {
        if width == 0 || height == 0 {
            return Err(BgRemovalError::invalid_input(format!(
                "Image has zero dimension: {width}x{height}"
            )));
        }
        match self {
            Self::Fixed(size) => Ok((size, size)),
            Self::MultipleOf(0) => Err(BgRemovalError::invalid_config(
                "Resize multiple must be greater than zero",
            )),
            Self::MultipleOf(multiple) => {
                let ceil = |v: u32| {
                    v.div_ceil(multiple).checked_mul(multiple).ok_or_else(|| {
                        BgRemovalError::invalid_input(format!(
                            "Dimension {v} overflows when rounded to a multiple of {multiple}"
                        ))
                    })
                };
                Ok((ceil(width)?, ceil(height)?))
            },
        }
    }
}

/// Output of the preprocessing stages for one request
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// Normalized `(1, 3, H, W)` full precision tensor
    pub tensor: InputTensor,
    /// Mode-normalized image at the original resolution
    pub original: RgbImage,
    /// Network input `(width, height)`
    pub model_size: (u32, u32),
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Convert any color mode to RGB
    ///
    /// Images with an alpha channel are composited onto opaque white first.
    #[must_use]
    pub fn normalize_mode(image: &DynamicImage) -> RgbImage {
        if !image.color().has_alpha() {
            return image.to_rgb8();
        }

        let rgba = image.to_rgba8();
        let mut rgb = RgbImage::new(rgba.width(), rgba.height());
        for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
            let [r, g, b, a] = src.0;
            let over_white = |c: u8| -> u8 {
                let a = u32::from(a);
                ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8
            };
            *dst = Rgb([over_white(r), over_white(g), over_white(b)]);
        }
        rgb
    }

    /// Resize to the dimensions `policy` requires
    ///
    /// # Errors
    /// - Any [`ResizePolicy::target_dimensions`] failure
    pub fn resize(rgb: &RgbImage, policy: ResizePolicy, filter: FilterType) -> Result<RgbImage> {
        let (width, height) = policy.target_dimensions(rgb.width(), rgb.height())?;
        if (width, height) == rgb.dimensions() {
            return Ok(rgb.clone());
        }
        Ok(image::imageops::resize(rgb, width, height, filter))
    }

    /// Convert to a normalized NCHW tensor with a batch dimension of one
    #[must_use]
    pub fn to_tensor(rgb: &RgbImage) -> Array4<f32> {
        let (width, height) = rgb.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match image size
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] = (f32::from(pixel[channel]) / 255.0
                    - NORMALIZATION_MEAN[channel])
                    / NORMALIZATION_STD[channel];
            }
        }

        tensor
    }

    /// Run all preprocessing stages
    ///
    /// # Errors
    /// - Zero-sized image
    /// - Dimension overflow for multiple-of policies
    pub fn prepare(
        image: &DynamicImage,
        policy: ResizePolicy,
        filter: FilterType,
    ) -> Result<PreparedInput> {
        let original = Self::normalize_mode(image);
        let resized = Self::resize(&original, policy, filter)?;
        let model_size = resized.dimensions();
        let tensor = InputTensor::Full(Self::to_tensor(&resized));
        Ok(PreparedInput {
            tensor,
            original,
            model_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, LumaA, Rgba, RgbaImage};

    fn create_test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(100, 60, Rgb([255, 0, 0])))
    }

    #[test]
    fn test_fixed_policy() {
        assert_eq!(
            ResizePolicy::Fixed(1024).target_dimensions(100, 60).unwrap(),
            (1024, 1024)
        );
    }

    #[test]
    fn test_multiple_of_policy_ceils_each_dimension() {
        let policy = ResizePolicy::MultipleOf(32);
        assert_eq!(policy.target_dimensions(100, 60).unwrap(), (128, 64));
        assert_eq!(policy.target_dimensions(64, 32).unwrap(), (64, 32));
        assert_eq!(policy.target_dimensions(1, 33).unwrap(), (32, 64));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let err = ResizePolicy::Fixed(1024).target_dimensions(0, 10).unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidInput(_)));
    }

    #[test]
    fn test_rgba_composited_on_white_matches_manual() {
        let mut rgba = RgbaImage::new(4, 1);
        rgba.put_pixel(0, 0, Rgba([200, 100, 50, 255]));
        rgba.put_pixel(1, 0, Rgba([200, 100, 50, 0]));
        rgba.put_pixel(2, 0, Rgba([0, 0, 0, 128]));
        rgba.put_pixel(3, 0, Rgba([10, 220, 90, 37]));

        let rgb = ImagePreprocessor::normalize_mode(&DynamicImage::ImageRgba8(rgba.clone()));

        for (src, dst) in rgba.pixels().zip(rgb.pixels()) {
            let alpha = f32::from(src[3]) / 255.0;
            for c in 0..3 {
                let manual = (f32::from(src[c]) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
                assert_eq!(dst[c], manual, "pixel {src:?}");
            }
        }
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([200, 100, 50]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_grayscale_and_luma_alpha_become_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([90])));
        assert_eq!(
            ImagePreprocessor::normalize_mode(&gray).get_pixel(1, 1),
            &Rgb([90, 90, 90])
        );

        let luma_alpha =
            DynamicImage::ImageLumaA8(ImageBuffer::from_pixel(2, 2, LumaA([0u8, 0u8])));
        assert_eq!(
            ImagePreprocessor::normalize_mode(&luma_alpha).get_pixel(0, 0),
            &Rgb([255, 255, 255])
        );
    }

    #[test]
    fn test_every_mode_yields_expected_tensor_shape() {
        let images = [
            create_test_image(),
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 60, Rgba([1, 2, 3, 4]))),
            DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 60, Luma([7]))),
            DynamicImage::ImageRgb16(ImageBuffer::from_pixel(100, 60, Rgb([1000u16, 0, 0]))),
        ];

        for image in &images {
            let fixed =
                ImagePreprocessor::prepare(image, ResizePolicy::Fixed(64), FilterType::Triangle)
                    .unwrap();
            assert_eq!(fixed.tensor.shape(), &[1, 3, 64, 64]);
            assert_eq!(fixed.original.dimensions(), (100, 60));

            let multiple = ImagePreprocessor::prepare(
                image,
                ResizePolicy::MultipleOf(32),
                FilterType::Lanczos3,
            )
            .unwrap();
            assert_eq!(multiple.tensor.shape(), &[1, 3, 64, 128]);
            assert_eq!(multiple.model_size, (128, 64));
        }
    }

    #[test]
    fn test_tensor_normalization() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([255, 0, 128]));
        let tensor = ImagePreprocessor::to_tensor(&rgb);

        let expected_r = (1.0 - 0.485) / 0.229;
        let expected_g = (0.0 - 0.456) / 0.224;
        let expected_b = (128.0 / 255.0 - 0.406) / 0.225;
        assert!((tensor[[0, 0, 1, 1]] - expected_r).abs() < 1e-5);
        assert!((tensor[[0, 1, 0, 0]] - expected_g).abs() < 1e-5);
        assert!((tensor[[0, 2, 0, 1]] - expected_b).abs() < 1e-5);
    }
}
