//! Shared helpers for integration tests

#![allow(dead_code)]

use bgremove_serve::{MockLoader, ModelRegistry, ServiceConfig};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    buffer.into_inner()
}

pub fn solid_rgb_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width,
        height,
        Rgb(color),
    )))
}

pub fn registry(loader: &MockLoader) -> Arc<ModelRegistry> {
    registry_with(loader, ServiceConfig::default())
}

pub fn registry_with(loader: &MockLoader, config: ServiceConfig) -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::with_default_models(
        Arc::new(loader.clone()),
        config,
    ))
}

/// 8-bit indexed PNG
///
/// Pixel `(x, y)` uses palette entry `(x + y) % palette.len()`.
pub fn palette_png(width: u32, height: u32, palette: &[[u8; 3]]) -> Vec<u8> {
    assert!(!palette.is_empty() && palette.len() <= 256);

    let indices: Vec<u8> = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x + y) as usize % palette.len()) as u8))
        .collect();
    let plte: Vec<u8> = palette.iter().flatten().copied().collect();

    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(plte);
        let mut writer = encoder
            .write_header()
            .expect("Failed to write indexed PNG header");
        writer
            .write_image_data(&indices)
            .expect("Failed to write indexed PNG data");
    }
    bytes
}
