//! Probability map to RGBA compositing
//!
//! The network's probability map becomes the alpha channel directly. Values are clamped to
//! [0, 1] and scaled to 8 bits, never thresholded, so soft edges survive.

use crate::error::{BgRemovalError, Result};
use crate::models::OutputActivation;
use image::{imageops::FilterType, GrayImage, Luma, Rgba, RgbImage, RgbaImage};
use ndarray::{Array4, Axis};

/// Kernel sizes of the two blur-fusion passes
const REFINE_KERNELS: (usize, usize) = (90, 6);
const FUSION_EPSILON: f32 = 1e-5;

/// Shared image postprocessing utilities
pub struct ImagePostprocessor;

impl ImagePostprocessor {
    /// Convert a raw `(1, 1, H, W)` map into an 8-bit mask at the map's resolution
    ///
    /// # Errors
    /// - Map without exactly one batch and one channel
    /// - Map spatial size exceeding `u32`
    pub fn probability_to_mask(
        map: &Array4<f32>,
        activation: OutputActivation,
    ) -> Result<GrayImage> {
        let (batch, channels, height, width) = map.dim();
        if batch != 1 || channels != 1 || height == 0 || width == 0 {
            return Err(BgRemovalError::inference(format!(
                "Expected probability map of shape [1, 1, H, W], got {:?}",
                map.shape()
            )));
        }
        let mask_width = u32::try_from(width)
            .map_err(|_| BgRemovalError::inference("Probability map too wide"))?;
        let mask_height = u32::try_from(height)
            .map_err(|_| BgRemovalError::inference("Probability map too tall"))?;

        let plane = map.index_axis(Axis(0), 0);
        let plane = plane.index_axis(Axis(0), 0);
        let mut mask = GrayImage::new(mask_width, mask_height);
        for ((y, x), value) in plane.indexed_iter() {
            let probability = activation.apply(*value).clamp(0.0, 1.0);
            mask.put_pixel(x as u32, y as u32, Luma([(probability * 255.0).round() as u8]));
        }
        Ok(mask)
    }

    /// Resize a mask with a smooth filter, skipping identical sizes
    #[must_use]
    pub fn resize_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
        if mask.dimensions() == (width, height) {
            return mask.clone();
        }
        image::imageops::resize(mask, width, height, FilterType::Lanczos3)
    }

    /// Attach `mask` as the alpha channel of a copy of `rgb`
    ///
    /// # Errors
    /// - Mask and image sizes differ
    pub fn apply_alpha(rgb: &RgbImage, mask: &GrayImage) -> Result<RgbaImage> {
        if rgb.dimensions() != mask.dimensions() {
            return Err(BgRemovalError::internal(format!(
                "Mask size {:?} does not match image size {:?}",
                mask.dimensions(),
                rgb.dimensions()
            )));
        }

        let mut rgba = RgbaImage::new(rgb.width(), rgb.height());
        for ((src, alpha), dst) in rgb.pixels().zip(mask.pixels()).zip(rgba.pixels_mut()) {
            let [r, g, b] = src.0;
            *dst = Rgba([r, g, b, alpha[0]]);
        }
        Ok(rgba)
    }

    /// Probability map to RGBA at the resolution of `original`
    ///
    /// # Errors
    /// - Any [`ImagePostprocessor::probability_to_mask`] failure
    pub fn compose(
        map: &Array4<f32>,
        activation: OutputActivation,
        original: &RgbImage,
    ) -> Result<RgbaImage> {
        let mask = Self::probability_to_mask(map, activation)?;
        let mask = Self::resize_mask(&mask, original.width(), original.height());
        Self::apply_alpha(original, &mask)
    }

    /// Replace RGB with an estimate of the true foreground colour (blur fusion)
    ///
    /// Two passes of alpha-weighted box blurs separate foreground and background colour so
    /// background does not bleed into soft edges. Alpha is unchanged.
    #[must_use]
    pub fn refine_foreground(image: &RgbaImage) -> RgbaImage {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return image.clone();
        }

        let mut rgb = Vec::with_capacity(w * h * 3);
        let mut alpha = Vec::with_capacity(w * h);
        for pixel in image.pixels() {
            rgb.extend(pixel.0.iter().take(3).map(|c| f32::from(*c) / 255.0));
            alpha.push(f32::from(pixel[3]) / 255.0);
        }

        let (foreground, blurred_background) =
            blur_fusion(&rgb, &rgb, &rgb, &alpha, w, h, REFINE_KERNELS.0);
        let (foreground, _) = blur_fusion(
            &rgb,
            &foreground,
            &blurred_background,
            &alpha,
            w,
            h,
            REFINE_KERNELS.1,
        );

        let mut refined = image.clone();
        for (pixel, color) in refined.pixels_mut().zip(foreground.chunks_exact(3)) {
            for (channel, value) in pixel.0.iter_mut().zip(color) {
                *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
        refined
    }
}

/// One blur-fusion estimation step; returns `(foreground, blurred background)`
fn blur_fusion(
    image: &[f32],
    foreground: &[f32],
    background: &[f32],
    alpha: &[f32],
    width: usize,
    height: usize,
    kernel: usize,
) -> (Vec<f32>, Vec<f32>) {
    let blurred_alpha = box_blur(alpha, width, height, 1, kernel);
    let blurred_fa = box_blur(&weighted(foreground, alpha, |a| a), width, height, 3, kernel);
    let blurred_b1a = box_blur(
        &weighted(background, alpha, |a| 1.0 - a),
        width,
        height,
        3,
        kernel,
    );

    let mut estimated = Vec::with_capacity(image.len());
    let mut blurred_background = Vec::with_capacity(image.len());
    for (index, (&a, &blurred_a)) in alpha.iter().zip(&blurred_alpha).enumerate() {
        for channel in 0..3 {
            let i = index * 3 + channel;
            let (Some(&pixel), Some(&fa), Some(&b1a)) =
                (image.get(i), blurred_fa.get(i), blurred_b1a.get(i))
            else {
                continue;
            };
            let blurred_f = fa / (blurred_a + FUSION_EPSILON);
            let blurred_b = b1a / ((1.0 - blurred_a) + FUSION_EPSILON);
            let f = blurred_f + a * (pixel - a * blurred_f - (1.0 - a) * blurred_b);
            estimated.push(f.clamp(0.0, 1.0));
            blurred_background.push(blurred_b);
        }
    }
    (estimated, blurred_background)
}

fn weighted(source: &[f32], alpha: &[f32], weight: impl Fn(f32) -> f32) -> Vec<f32> {
    let mut output = Vec::with_capacity(source.len());
    for (color, &a) in source.chunks_exact(3).zip(alpha) {
        let w = weight(a);
        output.extend(color.iter().map(|c| c * w));
    }
    output
}

/// Normalized box filter over interleaved channels
///
/// Borders are mirrored without repeating the edge pixel (reflect-101), so every output
/// averages a full `kernel x kernel` window.
fn box_blur(data: &[f32], width: usize, height: usize, channels: usize, kernel: usize) -> Vec<f32> {
    let kernel = kernel.max(1);
    let rows = blur_lines(data, height * channels, width, kernel, |line, x| {
        (line / channels * width + x) * channels + line % channels
    });
    blur_lines(&rows, width * channels, height, kernel, |line, y| {
        (y * width + line / channels) * channels + line % channels
    })
}

/// One-dimensional running-sum box filter along `lines` independent lines of `len` samples
fn blur_lines(
    data: &[f32],
    lines: usize,
    len: usize,
    kernel: usize,
    index: impl Fn(usize, usize) -> usize,
) -> Vec<f32> {
    let before = kernel / 2;
    let after = kernel - 1 - before;
    let scale = 1.0 / kernel as f64;
    let sample = |line: usize, pos: isize| {
        let value = data.get(index(line, reflect_101(pos, len)));
        f64::from(value.copied().unwrap_or(0.0))
    };

    let mut output = vec![0.0; data.len()];
    for line in 0..lines {
        let mut sum: f64 = (-(before as isize)..=after as isize)
            .map(|offset| sample(line, offset))
            .sum();
        for pos in 0..len {
            if let Some(out) = output.get_mut(index(line, pos)) {
                *out = (sum * scale) as f32;
            }
            let pos = pos as isize;
            sum += sample(line, pos + after as isize + 1) - sample(line, pos - before as isize);
        }
    }
    output
}

/// Mirror `pos` into `0..len` excluding the edge sample; periodic for windows wider than `len`
fn reflect_101(pos: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let len = len as isize;
    let period = 2 * (len - 1);
    let wrapped = pos.rem_euclid(period);
    (if wrapped >= len { period - wrapped } else { wrapped }) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_map(height: usize, width: usize, value: f32) -> Array4<f32> {
        Array4::from_elem((1, 1, height, width), value)
    }

    #[test]
    fn test_soft_values_are_not_thresholded() {
        let map = constant_map(4, 4, 0.4);
        let mask =
            ImagePostprocessor::probability_to_mask(&map, OutputActivation::Identity).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 102));
    }

    #[test]
    fn test_sigmoid_activation_and_clamping() {
        let logits = constant_map(2, 2, 0.0);
        let mask =
            ImagePostprocessor::probability_to_mask(&logits, OutputActivation::Sigmoid).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 128));

        let over = constant_map(2, 2, 1.7);
        let mask =
            ImagePostprocessor::probability_to_mask(&over, OutputActivation::Identity).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_invalid_map_shape() {
        let map = Array4::<f32>::zeros((1, 2, 4, 4));
        let err =
            ImagePostprocessor::probability_to_mask(&map, OutputActivation::Identity).unwrap_err();
        assert!(matches!(err, BgRemovalError::InferenceFailed(_)));
    }

    #[test]
    fn test_compose_restores_original_resolution() {
        let original = RgbImage::from_pixel(100, 37, image::Rgb([10, 20, 30]));
        let map = constant_map(128, 64, 1.0);

        let rgba =
            ImagePostprocessor::compose(&map, OutputActivation::Identity, &original).unwrap();
        assert_eq!(rgba.dimensions(), (100, 37));
        assert_eq!(rgba.get_pixel(50, 20), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_box_blur_constant_is_identity() {
        let data = vec![0.25; 5 * 4 * 3];
        let blurred = box_blur(&data, 5, 4, 3, 3);
        assert!(blurred.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_box_blur_averages_window() {
        let data = vec![0.0, 0.0, 3.0];
        let blurred = box_blur(&data, 3, 1, 1, 3);
        assert!(blurred[0].abs() < 1e-6);
        assert!((blurred[1] - 1.0).abs() < 1e-6);
        assert!((blurred[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_blur_mirrors_borders_without_edge_repeat() {
        let data = vec![3.0, 0.0, 0.0, 0.0];
        let blurred = box_blur(&data, 4, 1, 1, 3);
        assert!((blurred[0] - 1.0).abs() < 1e-6);
        assert!((blurred[1] - 1.0).abs() < 1e-6);
        assert!(blurred[3].abs() < 1e-6);

        let column = box_blur(&data, 1, 4, 1, 3);
        assert_eq!(column, blurred);
    }

    #[test]
    fn test_reflect_101_wraps_wide_windows() {
        let mirrored: Vec<usize> = (-4..8).map(|pos| reflect_101(pos, 4)).collect();
        assert_eq!(mirrored, [2, 3, 2, 1, 0, 1, 2, 3, 2, 1, 0, 1]);
        assert_eq!(reflect_101(-7, 1), 0);
    }

    #[test]
    fn test_refine_keeps_alpha_and_opaque_colour() {
        let mut image = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 0]));
        for y in 4..12 {
            for x in 4..12 {
                image.put_pixel(x, y, Rgba([200, 40, 40, 255]));
            }
        }

        let refined = ImagePostprocessor::refine_foreground(&image);
        assert_eq!(refined.dimensions(), image.dimensions());
        for (before, after) in image.pixels().zip(refined.pixels()) {
            assert_eq!(before[3], after[3]);
        }
        assert_eq!(refined.get_pixel(8, 8), &Rgba([200, 40, 40, 255]));
    }
}
