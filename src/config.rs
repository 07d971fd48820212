//! Configuration types for the model lifecycle and inference service

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable overriding the model artifact directory
pub const ENV_MODELS_DIR: &str = "BGREMOVE_MODELS_DIR";
/// Environment variable selecting the execution provider
pub const ENV_PROVIDER: &str = "BGREMOVE_PROVIDER";
/// Environment variable forcing a numeric precision for every model
pub const ENV_PRECISION: &str = "BGREMOVE_PRECISION";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Device a model instance actually runs on after availability probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    CoreMl,
}

impl Device {
    /// Whether reduced precision is worthwhile on this device
    #[must_use]
    pub fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Numeric precision of a model instance's weights and input tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floating point
    Full,
    /// 16-bit floating point
    Half,
}

impl Precision {
    /// Variant label used in artifact names and metadata
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Full => "fp32",
            Self::Half => "fp16",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Precision {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "fp32" | "float32" => Ok(Self::Full),
            "half" | "fp16" | "float16" => Ok(Self::Half),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown precision '{other}' (expected full/fp32 or half/fp16)"
            ))),
        }
    }
}

/// What to do with a refinement request for a model that cannot refine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefinementPolicy {
    /// Drop the flag and process normally
    #[default]
    Ignore,
    /// Fail the request with `InvalidInput`
    Reject,
}

/// Per-instance configuration requested through the registry
///
/// `None` fields fall back to the device-dependent defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub precision: Option<Precision>,
}

impl ModelConfig {
    #[must_use]
    pub fn with_precision(precision: Precision) -> Self {
        Self {
            precision: Some(precision),
        }
    }
}

/// Service-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root of the local artifact store (None = environment or XDG cache dir)
    pub models_dir: Option<PathBuf>,

    /// Preferred execution provider
    pub execution_provider: ExecutionProvider,

    /// Precision forced on every model (None = accelerator-dependent default)
    pub precision: Option<Precision>,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Handling of refinement requests for models without the capability
    pub refinement_policy: RefinementPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            execution_provider: ExecutionProvider::default(),
            precision: None,
            intra_threads: 0,
            inter_threads: 0,
            refinement_policy: RefinementPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Build a configuration from `BGREMOVE_*` environment variables on top of defaults
    ///
    /// # Errors
    /// - Unparseable provider or precision values
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] with an injectable variable source
    ///
    /// # Errors
    /// - Unparseable provider or precision values
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().apply_lookup(lookup)
    }

    /// Layer `BGREMOVE_*` environment variables over this configuration
    ///
    /// # Errors
    /// - Unparseable provider or precision values
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    fn apply_lookup<F>(self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self;

        if let Some(dir) = lookup(ENV_MODELS_DIR).filter(|v| !v.trim().is_empty()) {
            config.models_dir = Some(PathBuf::from(dir));
        }
        if let Some(provider) = lookup(ENV_PROVIDER).filter(|v| !v.trim().is_empty()) {
            config.execution_provider = provider.parse()?;
        }
        if let Some(precision) = lookup(ENV_PRECISION).filter(|v| !v.trim().is_empty()) {
            config.precision = Some(precision.parse()?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration; missing fields keep their defaults
    ///
    /// # Errors
    /// - Malformed JSON or unknown enum values
    /// - Any [`ServiceConfig::validate`] failure
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BgRemovalError::invalid_config(format!("Invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    ///
    /// # Errors
    /// - File cannot be read
    /// - Any [`ServiceConfig::from_json_str`] failure
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BgRemovalError::file_io_error("read config file", path, &e))?;
        Self::from_json_str(&content)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    /// - Thread counts above the supported maximum
    /// - Models directory that exists but is not a directory
    pub fn validate(&self) -> Result<()> {
        const MAX_THREADS: usize = 256;

        if self.intra_threads > MAX_THREADS {
            return Err(BgRemovalError::invalid_config(format!(
                "Invalid intra threads: {} (valid range: 0-{MAX_THREADS})",
                self.intra_threads
            )));
        }
        if self.inter_threads > MAX_THREADS {
            return Err(BgRemovalError::invalid_config(format!(
                "Invalid inter threads: {} (valid range: 0-{MAX_THREADS})",
                self.inter_threads
            )));
        }
        if let Some(dir) = &self.models_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(BgRemovalError::invalid_config(format!(
                    "Models path must be a directory: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolve intra/inter thread counts, replacing 0 with hardware-based values
    #[must_use]
    pub fn resolved_threads(&self) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        let intra = if self.intra_threads > 0 {
            self.intra_threads
        } else {
            cores
        };
        let inter = if self.inter_threads > 0 {
            self.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn models_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.models_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn precision(mut self, precision: Precision) -> Self {
        self.config.precision = Some(precision);
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn refinement_policy(mut self, policy: RefinementPolicy) -> Self {
        self.config.refinement_policy = policy;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any [`ServiceConfig::validate`] failure
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert!(config.precision.is_none());
        assert_eq!(config.refinement_policy, RefinementPolicy::Ignore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServiceConfig::builder()
            .execution_provider(ExecutionProvider::Cpu)
            .precision(Precision::Full)
            .intra_threads(4)
            .refinement_policy(RefinementPolicy::Reject)
            .build()
            .unwrap();
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.precision, Some(Precision::Full));
        assert_eq!(config.resolved_threads().0, 4);
    }

    #[test]
    fn test_thread_validation() {
        let result = ServiceConfig::builder().inter_threads(10_000).build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("inter threads"));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_MODELS_DIR, "/tmp/bgremove-models"),
            (ENV_PROVIDER, "CUDA"),
            (ENV_PRECISION, "fp16"),
        ]
        .into_iter()
        .collect();

        let config =
            ServiceConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(
            config.models_dir,
            Some(PathBuf::from("/tmp/bgremove-models"))
        );
        assert_eq!(config.execution_provider, ExecutionProvider::Cuda);
        assert_eq!(config.precision, Some(Precision::Half));
    }

    #[test]
    fn test_from_lookup_rejects_bad_precision() {
        let result = ServiceConfig::from_lookup(|key| {
            (key == ENV_PRECISION).then(|| "int8".to_string())
        });
        assert!(matches!(result, Err(BgRemovalError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            ServiceConfig::from_json_str(r#"{"execution_provider": "cpu", "precision": "full"}"#)
                .unwrap();
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.precision, Some(Precision::Full));
        assert_eq!(config.refinement_policy, RefinementPolicy::Ignore);
        assert!(config.models_dir.is_none());
    }

    #[test]
    fn test_json_file_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bgremove.json");
        std::fs::write(&path, r#"{"refinement_policy": "reject", "intra_threads": 4}"#).unwrap();
        let config = ServiceConfig::from_json_file(&path).unwrap();
        assert_eq!(config.refinement_policy, RefinementPolicy::Reject);
        assert_eq!(config.intra_threads, 4);

        std::fs::write(&path, r#"{"inter_threads": 999}"#).unwrap();
        assert!(matches!(
            ServiceConfig::from_json_file(&path),
            Err(BgRemovalError::InvalidConfig(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json_file(dir.path().join("missing.json")),
            Err(BgRemovalError::Io(_))
        ));
    }

    #[test]
    fn test_parse_round_trip_labels() {
        assert_eq!("coreml".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
        assert_eq!("half".parse::<Precision>().unwrap(), Precision::Half);
        assert_eq!(Precision::Half.to_string(), "fp16");
        assert!(Device::Cuda.is_accelerator());
        assert!(!Device::Cpu.is_accelerator());
    }
}
