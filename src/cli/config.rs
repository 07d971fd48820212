//! Conversion of command line arguments into a [`ServiceConfig`]

use crate::cli::main_impl::Cli;
use crate::config::{RefinementPolicy, ServiceConfig};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Config file, then environment, then command line flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServiceConfig> {
        let base = match &cli.config {
            Some(path) => ServiceConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        let base = base
            .with_env_overrides()
            .context("Invalid BGREMOVE_* environment")?;
        Self::apply(cli, base)
    }

    pub(crate) fn apply(cli: &Cli, mut config: ServiceConfig) -> Result<ServiceConfig> {
        if let Some(dir) = &cli.models_dir {
            config.models_dir = Some(dir.clone());
        }
        if let Some(provider) = cli.provider {
            config.execution_provider = provider;
        }
        if cli.threads > 0 {
            config.intra_threads = cli.threads;
        }
        if cli.strict_refinement {
            config.refinement_policy = RefinementPolicy::Reject;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionProvider, Precision};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_overrides_replace_environment_values() {
        let cli = Cli::try_parse_from([
            "bgremove-serve",
            "--models-dir",
            "/tmp/bgremove-models",
            "--provider",
            "cpu",
            "--threads",
            "4",
            "models",
        ])
        .unwrap();
        let base = ServiceConfig::builder()
            .execution_provider(ExecutionProvider::Cuda)
            .precision(Precision::Half)
            .build()
            .unwrap();

        let config = CliConfigBuilder::apply(&cli, base).unwrap();
        assert_eq!(config.models_dir, Some(PathBuf::from("/tmp/bgremove-models")));
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.precision, Some(Precision::Half));
        assert_eq!(config.refinement_policy, RefinementPolicy::Ignore);
    }

    #[test]
    fn test_missing_flags_keep_base() {
        let cli = Cli::try_parse_from(["bgremove-serve", "--strict-refinement", "providers"]).unwrap();
        let config = CliConfigBuilder::apply(&cli, ServiceConfig::default()).unwrap();
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.intra_threads, 0);
        assert_eq!(config.refinement_policy, RefinementPolicy::Reject);
    }

    #[test]
    fn test_thread_limit_is_validated() {
        let cli = Cli::try_parse_from(["bgremove-serve", "--threads", "1000", "models"]).unwrap();
        assert!(CliConfigBuilder::apply(&cli, ServiceConfig::default()).is_err());
    }
}
