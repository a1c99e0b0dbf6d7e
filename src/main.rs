use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing_subscriber::EnvFilter;

use vision_hub_engine::{Config, DirectoryRunner, Orchestrator, Registry};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    config.models.validate()?;

    ensure!(config.input.exists(), "Input path does not exist");
    ensure!(config.num_threads > 0, "Thread count must be positive");

    let registry = Registry::new(config.models.clone());
    let entry = registry.entry(&config.model_id).with_context(|| {
        let known = registry.ids().collect::<Vec<_>>().join(", ");
        format!("Unknown model id {:?} (available: {known})", config.model_id)
    })?;
    tracing::info!(
        model_id = entry.info.id,
        version = entry.info.version,
        input = entry.info.input.as_str(),
        "procedure selected"
    );

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let runner = DirectoryRunner::new(
        Orchestrator::new(&registry),
        config.model_id.clone(),
        config.color.clone(),
        &config.format,
    )?;
    let summary = runner
        .run(&config.input, &config.output_dir)
        .with_context(|| format!("Failed to process {}", config.input.display()))?;

    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        output_dir = %config.output_dir.display(),
        "run finished"
    );
    ensure!(
        summary.failed == 0 || summary.processed > 0,
        "All {} images failed",
        summary.failed
    );
    Ok(())
}
