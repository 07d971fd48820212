//! bgremove-serve CLI
//!
//! Command-line front end over the model registry and inference orchestrator.

#[cfg(feature = "cli")]
use bgremove_serve::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
