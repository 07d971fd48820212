use bgremove_serve::{
    models::OutputActivation, BackgroundRemovalProcessor, ImagePostprocessor, ImagePreprocessor,
    InferenceRequest, MockLoader, ModelRegistry, ResizePolicy, ServiceConfig,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{imageops::FilterType, DynamicImage, ImageFormat, Rgba, RgbaImage};
use ndarray::Array4;
use std::io::Cursor;
use std::sync::Arc;

const SIZES: [(u32, u32); 3] = [(320, 240), (1280, 720), (1920, 1080)];

fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 255 / width) as u8,
            (y * 255 / height) as u8,
            128,
            if (x + y) % 7 == 0 { 128 } else { 255 },
        ])
    });
    DynamicImage::ImageRgba8(image)
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");
    group.sample_size(20);

    for (width, height) in SIZES {
        let image = gradient_image(width, height);
        let label = format!("{width}x{height}");

        group.bench_with_input(BenchmarkId::new("fixed_1024", &label), &image, |b, image| {
            b.iter(|| {
                black_box(
                    ImagePreprocessor::prepare(
                        image,
                        ResizePolicy::Fixed(1024),
                        FilterType::Triangle,
                    )
                    .unwrap(),
                )
            });
        });

        group.bench_with_input(
            BenchmarkId::new("multiple_of_32", &label),
            &image,
            |b, image| {
                b.iter(|| {
                    black_box(
                        ImagePreprocessor::prepare(
                            image,
                            ResizePolicy::MultipleOf(32),
                            FilterType::Lanczos3,
                        )
                        .unwrap(),
                    )
                });
            },
        );
    }

    group.finish();
}

fn benchmark_postprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("postprocessing");
    group.sample_size(10);

    let map = Array4::<f32>::from_shape_fn((1, 1, 1024, 1024), |(_, _, y, x)| {
        ((x + y) % 256) as f32 / 255.0
    });

    for (width, height) in SIZES {
        let original = gradient_image(width, height).to_rgb8();
        let label = format!("{width}x{height}");

        group.bench_with_input(BenchmarkId::new("compose", &label), &original, |b, original| {
            b.iter(|| {
                black_box(
                    ImagePostprocessor::compose(&map, OutputActivation::Identity, original)
                        .unwrap(),
                )
            });
        });
    }

    let composed =
        ImagePostprocessor::compose(&map, OutputActivation::Identity, &gradient_image(640, 480).to_rgb8())
            .unwrap();
    group.bench_function("refine_foreground_640x480", |b| {
        b.iter(|| black_box(ImagePostprocessor::refine_foreground(&composed)));
    });

    group.finish();
}

fn benchmark_mock_pipeline(c: &mut Criterion) {
    let registry = Arc::new(ModelRegistry::with_default_models(
        Arc::new(MockLoader::new()),
        ServiceConfig::default(),
    ));
    let processor = BackgroundRemovalProcessor::new(registry);

    let mut png = Cursor::new(Vec::new());
    gradient_image(800, 600)
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();
    let png = png.into_inner();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    for model in ["rmbg2", "birefnet"] {
        let request = InferenceRequest::new(png.clone(), model);
        group.bench_with_input(BenchmarkId::new("mock", model), &request, |b, request| {
            b.iter(|| black_box(processor.process(request).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_preprocessing,
    benchmark_postprocessing,
    benchmark_mock_pipeline
);
criterion_main!(benches);
