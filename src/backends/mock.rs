//! Deterministic in-process networks for testing and demos
//!
//! [`MockLoader`] produces [`MockNetwork`]s that return a synthetic probability map at the
//! input's spatial size, expressed in the descriptor's output space (logits for sigmoid
//! models). Failure modes and call counters are configurable so lifecycle behaviour can be
//! verified without model files or ONNX Runtime.

use crate::{
    config::{Device, ExecutionProvider, Precision},
    error::{BgRemovalError, Result},
    inference::{ensure_precision, InputTensor, InstanceConfig, NetworkLoader, SegmentationNetwork},
    models::{ModelDescriptor, OutputActivation},
};
use ndarray::Array4;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Synthetic probability pattern
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockPattern {
    /// Centered disc with a soft linear falloff
    Circle,
    /// Same probability everywhere
    Constant(f32),
}

impl MockPattern {
    fn probability(self, x: usize, y: usize, width: usize, height: usize) -> f32 {
        match self {
            Self::Constant(p) => p,
            Self::Circle => {
                let center_x = width as f32 / 2.0;
                let center_y = height as f32 / 2.0;
                let radius = (width.min(height) as f32 / 3.0).max(1.0);
                let dx = x as f32 - center_x;
                let dy = y as f32 - center_y;
                let distance = (dx * dx + dy * dy).sqrt();
                ((radius - distance) / radius).clamp(0.0, 1.0)
            },
        }
    }
}

/// Counters shared between a loader and every network it creates
#[derive(Debug, Default)]
pub struct MockStats {
    load_attempts: AtomicUsize,
    loads: AtomicUsize,
    forwards: AtomicUsize,
    releases: AtomicUsize,
    live: AtomicUsize,
    load_log: Mutex<Vec<(String, Precision)>>,
    forward_log: Mutex<Vec<Precision>>,
}

impl MockStats {
    /// Every call to [`NetworkLoader::load`], failed ones included
    #[must_use]
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Networks created and not yet dropped
    #[must_use]
    pub fn live_networks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// `(model name, precision)` of every load, in order
    #[must_use]
    pub fn load_log(&self) -> Vec<(String, Precision)> {
        self.load_log.lock().clone()
    }

    /// Precision of every forward pass, in order
    #[must_use]
    pub fn forward_log(&self) -> Vec<Precision> {
        self.forward_log.lock().clone()
    }
}

/// Mock segmentation network
#[derive(Debug)]
pub struct MockNetwork {
    device: Device,
    precision: Precision,
    activation: OutputActivation,
    pattern: MockPattern,
    fail_half: bool,
    fail_always: bool,
    forward_delay: Option<Duration>,
    stats: Arc<MockStats>,
}

impl MockNetwork {
    fn to_output_space(&self, probability: f32) -> f32 {
        match self.activation {
            OutputActivation::Identity => probability,
            OutputActivation::Sigmoid => {
                let p = probability.clamp(1e-4, 1.0 - 1e-4);
                (p / (1.0 - p)).ln()
            },
        }
    }
}

impl SegmentationNetwork for MockNetwork {
    fn precision(&self) -> Precision {
        self.precision
    }

    fn device(&self) -> Device {
        self.device
    }

    fn forward(&mut self, input: &InputTensor) -> Result<Array4<f32>> {
        ensure_precision(self.precision, input)?;
        self.stats.forwards.fetch_add(1, Ordering::SeqCst);
        self.stats.forward_log.lock().push(self.precision);
        if let Some(delay) = self.forward_delay {
            std::thread::sleep(delay);
        }

        if self.fail_always {
            return Err(BgRemovalError::internal("Mock network forward failed"));
        }
        if self.fail_half && self.precision == Precision::Half {
            return Err(BgRemovalError::internal(
                "Mock network overflowed in half precision",
            ));
        }

        let (height, width) = input.spatial_dims();
        let mut output = Array4::<f32>::zeros((1, 1, height, width));
        for ((_, _, y, x), value) in output.indexed_iter_mut() {
            *value = self.to_output_space(self.pattern.probability(x, y, width, height));
        }
        Ok(output)
    }

    fn release_scratch(&mut self) {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockNetwork {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Loader producing [`MockNetwork`]s
#[derive(Debug, Clone)]
pub struct MockLoader {
    device: Device,
    pattern: MockPattern,
    fail_half: bool,
    fail_always: bool,
    failing_loads: Vec<String>,
    failing_attempts: Vec<usize>,
    forward_delay: Option<Duration>,
    stats: Arc<MockStats>,
}

impl MockLoader {
    /// CPU loader with the circle pattern and no failures
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            pattern: MockPattern::Circle,
            fail_half: false,
            fail_always: false,
            failing_loads: Vec::new(),
            failing_attempts: Vec::new(),
            forward_delay: None,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Pretend every provider preference resolves to `device`
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: MockPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Networks fail every half precision forward pass
    #[must_use]
    pub fn failing_half_precision(mut self) -> Self {
        self.fail_half = true;
        self
    }

    /// Networks fail every forward pass
    #[must_use]
    pub fn failing_inference(mut self) -> Self {
        self.fail_always = true;
        self
    }

    /// Loading `name` fails as if its artifact were missing
    #[must_use]
    pub fn failing_load_for(mut self, name: &str) -> Self {
        self.failing_loads.push(name.to_string());
        self
    }

    /// The given load attempts fail, counted from 1 across every model
    #[must_use]
    pub fn failing_load_attempts(mut self, attempts: &[usize]) -> Self {
        self.failing_attempts.extend_from_slice(attempts);
        self
    }

    /// Networks block for `delay` inside every forward pass
    #[must_use]
    pub fn with_forward_delay(mut self, delay: Duration) -> Self {
        self.forward_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for MockLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkLoader for MockLoader {
    fn detect_device(&self, preference: ExecutionProvider) -> Device {
        match preference {
            ExecutionProvider::Cpu => Device::Cpu,
            _ => self.device,
        }
    }

    fn load(
        &self,
        descriptor: &ModelDescriptor,
        config: &InstanceConfig,
    ) -> Result<Box<dyn SegmentationNetwork>> {
        let attempt = self.stats.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_attempts.contains(&attempt) {
            return Err(BgRemovalError::internal(format!(
                "simulated transient load failure (attempt {attempt})"
            )));
        }
        if self.failing_loads.iter().any(|n| n == &descriptor.name) {
            return Err(BgRemovalError::artifact(
                &descriptor.repo_id,
                &descriptor.full_precision_file,
                "simulated missing artifact",
            ));
        }

        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        self.stats
            .load_log
            .lock()
            .push((descriptor.name.clone(), config.precision));
        log::debug!(
            "🧪 Mock network loaded: {} ({}, {})",
            descriptor.name,
            config.device,
            config.precision
        );

        Ok(Box::new(MockNetwork {
            device: config.device,
            precision: config.precision,
            activation: descriptor.activation,
            pattern: self.pattern,
            fail_half: self.fail_half,
            fail_always: self.fail_always,
            forward_delay: self.forward_delay,
            stats: Arc::clone(&self.stats),
        }))
    }
}
