//! bgremove-serve CLI
//!
//! Lists the model catalogue, reports execution providers and removes backgrounds from
//! single images through the same registry and orchestrator a service would use.

use super::config::CliConfigBuilder;
use crate::cache::{format_size, ModelCache};
use crate::config::{ExecutionProvider, ModelConfig, Precision, ServiceConfig};
use crate::processor::{BackgroundRemovalProcessor, InferenceRequest, InferenceResult};
use crate::registry::ModelRegistry;
use crate::tracing_config::init_cli_tracing;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Multi-model background removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-serve")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Plain log output without colors
    #[arg(long, global = true)]
    pub compact_logs: bool,

    /// JSON service configuration file, overridden by environment and flags
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Local model artifact directory [default: $BGREMOVE_MODELS_DIR or the user cache dir]
    #[arg(long, value_name = "PATH", global = true)]
    pub models_dir: Option<PathBuf>,

    /// Execution provider (auto, cpu, cuda, coreml) [default: $BGREMOVE_PROVIDER or auto]
    #[arg(long, global = true)]
    pub provider: Option<ExecutionProvider>,

    /// Number of intra-op inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0, global = true)]
    pub threads: usize,

    /// Fail refinement requests for models that cannot refine instead of ignoring the flag
    #[arg(long, global = true)]
    pub strict_refinement: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered models and their local artifacts
    Models,
    /// Show execution provider availability
    Providers,
    /// Remove the background of one image
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Input image (use "-" for stdin)
    #[arg(value_name = "INPUT")]
    pub input: String,

    /// Output PNG (use "-" for stdout) [default: <INPUT>_nobg.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Registered model name
    #[arg(short, long, default_value = "rmbg2")]
    pub model: String,

    /// Run the foreground refinement post-step (ben2 only)
    #[arg(long)]
    pub refine: bool,

    /// Numeric precision (full, half) [default: fp16 on accelerators where supported]
    #[arg(long)]
    pub precision: Option<Precision>,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.compact_logs).context("Failed to initialize tracing")?;
    let config = CliConfigBuilder::from_cli(&cli)?;
    debug!(?config, "resolved configuration");

    match &cli.command {
        Command::Models => list_models(&config),
        Command::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
        Command::Remove(args) => remove(args, config).await,
    }
}

#[cfg(feature = "onnx")]
fn build_registry(config: ServiceConfig) -> Result<ModelRegistry> {
    ModelRegistry::onnx(config).context("Failed to create model registry")
}

#[cfg(not(feature = "onnx"))]
fn build_registry(_config: ServiceConfig) -> Result<ModelRegistry> {
    anyhow::bail!("Inference requires the 'onnx' feature")
}

fn list_models(config: &ServiceConfig) -> Result<()> {
    let cache = ModelCache::with_root(config.models_dir.as_ref())
        .context("Failed to initialize model cache")?;
    let descriptors = crate::models::default_descriptors();

    println!("📦 Registered Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Artifact root: {}", cache.root().display());
    println!();

    for descriptor in &descriptors {
        println!("📁 {} ({})", descriptor.name, descriptor.display_name);
        println!("  └─ Type: {}", descriptor.model_type);
        println!("  └─ Repository: {}", descriptor.repo_id);
        let variants = [
            (Precision::Full, Some(descriptor.full_precision_file.as_str())),
            (Precision::Half, descriptor.half_precision_file.as_deref()),
        ];
        for (precision, file) in variants {
            let Some(file) = file else {
                println!("  └─ {precision}: not published");
                continue;
            };
            let status = match cache.artifact_size(&descriptor.repo_id, file) {
                Ok(size) => format!("✅ {} ({file})", format_size(size)),
                Err(_) => format!("❌ missing ({file})"),
            };
            println!("  └─ {precision}: {status}");
        }
        if descriptor.capabilities.supports_refinement {
            println!("  └─ Supports --refine");
        }
        println!();
    }

    println!("💡 Place artifacts under <root>/<repository with '/' replaced by '--'>/<file>");
    Ok(())
}

fn show_provider_diagnostics() {
    println!("🔍 Execution Provider Diagnostics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 Execution Providers:");
        for (name, available, description) in crate::backends::onnx::OnnxLoader::list_providers() {
            let status = if available {
                "✅ Available"
            } else {
                "❌ Not Available"
            };
            println!("  • {name}: {status} - {description}");
        }
    }
    #[cfg(not(feature = "onnx"))]
    println!("\n⚠️  Built without the 'onnx' feature; no execution providers");

    println!("\n💡 Usage Examples:");
    println!("  --provider auto    # CUDA, then CoreML, then CPU (default)");
    println!("  --provider cuda    # NVIDIA CUDA, falls back to CPU when unavailable");
    println!("  --provider coreml  # Apple CoreML (macOS)");
    println!("  --provider cpu     # Force CPU execution");
}

async fn remove(args: &RemoveArgs, config: ServiceConfig) -> Result<()> {
    let image_bytes = read_input(&args.input)?;
    let registry = Arc::new(build_registry(config)?);
    let processor = BackgroundRemovalProcessor::new(Arc::clone(&registry));

    if !registry.is_registered(&args.model) {
        anyhow::bail!(
            "Unknown model '{}' (available: {})",
            args.model,
            registry.names().join(", ")
        );
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Loading model '{}'", args.model));

    let load = {
        let registry = Arc::clone(&registry);
        let model = args.model.clone();
        let precision = args.precision;
        tokio::task::spawn_blocking(move || -> crate::error::Result<()> {
            if let Some(precision) = precision {
                registry.reconfigure(&model, ModelConfig::with_precision(precision))?;
            }
            registry.get(&model).map(|_| ())
        })
    };
    if let Err(e) = load.await.context("Model loading task failed")? {
        spinner.finish_and_clear();
        return Err(e).with_context(|| format!("Failed to load model '{}'", args.model));
    }

    spinner.set_message("Removing background");
    let mut request =
        InferenceRequest::new(image_bytes, args.model.clone()).with_refinement(args.refine);
    request.precision = args.precision;
    let outcome = tokio::task::spawn_blocking(move || processor.process(&request))
        .await
        .context("Inference task failed")?;
    spinner.finish_and_clear();

    let result = outcome.with_context(|| format!("Failed to process '{}'", args.input))?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    write_output(&output, &result)?;
    report(&output, &result);
    Ok(())
}

fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buffer = Vec::new();
        io::stdin()
            .read_to_end(&mut buffer)
            .context("Failed to read image from stdin")?;
        return Ok(buffer);
    }
    std::fs::read(input).with_context(|| format!("Failed to read input file: {input}"))
}

fn default_output_path(input: &str) -> String {
    if input == "-" {
        return "-".to_string();
    }
    let path = Path::new(input);
    let stem = path
        .file_stem()
        .map_or_else(|| "output".into(), |s| s.to_string_lossy());
    path.with_file_name(format!("{stem}_nobg.png"))
        .to_string_lossy()
        .into_owned()
}

fn write_output(output: &str, result: &InferenceResult) -> Result<()> {
    let png = result.to_png_bytes().context("Failed to encode PNG")?;
    if output == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&png).context("Failed to write to stdout")?;
        stdout.flush().context("Failed to flush stdout")?;
        return Ok(());
    }
    std::fs::write(output, &png).with_context(|| format!("Failed to write output file: {output}"))
}

fn report(output: &str, result: &InferenceResult) {
    let (width, height) = result.dimensions();
    info!(
        model = %result.model,
        precision = %result.precision,
        refined = result.refined,
        decode_ms = result.timings.decode_ms,
        load_ms = result.timings.model_load_ms,
        inference_ms = result.timings.inference_ms,
        total_ms = result.timings.total_ms,
        "✅ {width}x{height} written to {output}"
    );
    if output != "-" {
        eprintln!("✅ {output} ({width}x{height}, {}, {} ms)", result.precision, result.timings.total_ms);
    }
}
