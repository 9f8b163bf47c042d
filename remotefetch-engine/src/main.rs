//! Remote fetch daemon
//!
//! Runs the fetch engine with the built-in components.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Components: Register the built-in repository manager, deployer and listener
//! - Services: Pipeline execution and report delivery
//! - Scheduler: Periodic dispatch of fetch runs until shutdown

use anyhow::{Context, Result};
use remotefetch_engine::components::register_builtin;
use remotefetch_engine::config::{Config, load_configurations};
use remotefetch_engine::scheduler::FetchTaskExecutor;
use remotefetch_engine::service::{
    CapabilityRegistry, JsonLinesReportSink, PipelineService, ReportSink, StandardPipelineService,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remotefetch_engine=info,remotefetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting remote fetch engine");

    // Load configuration
    let config = load_config()?;
    if !config.enabled {
        info!("Remote fetch is disabled, set REMOTEFETCH_ENABLED=true to enable it");
        return Ok(());
    }
    info!(
        "Loaded configuration: working_directory={}, reports_file={}",
        config.working_directory.display(),
        config.reports_file.display()
    );

    tokio::fs::create_dir_all(&config.working_directory)
        .await
        .with_context(|| {
            format!(
                "Failed to create working directory {}",
                config.working_directory.display()
            )
        })?;

    // Register components
    let mut registry = CapabilityRegistry::new();
    register_builtin(&mut registry).context("Failed to register built-in components")?;

    let components = registry.components();
    info!("Registered {} component(s)", components.len());
    for component in &components {
        info!(
            "  - {} '{}' ({})",
            component.kind, component.identifier, component.name
        );
    }
    let registry = Arc::new(registry);

    // Initialize services
    let pipeline: Arc<dyn PipelineService> = Arc::new(StandardPipelineService::new(
        Arc::clone(&registry),
        config.working_directory.clone(),
        config.run_timeout,
    ));
    let sink: Arc<dyn ReportSink> = Arc::new(JsonLinesReportSink::new(config.reports_file.clone()));

    let executor = FetchTaskExecutor::new(
        registry,
        pipeline,
        sink,
        config.max_parallel_runs,
        config.tick_interval,
    );

    if let Some(path) = &config.configurations_file {
        let configurations = load_configurations(path)?;
        info!(
            "Registering {} configuration(s) from {}",
            configurations.len(),
            path.display()
        );
        for configuration in configurations {
            executor.register_or_update(configuration);
        }
    }

    info!(
        "Engine initialized (tick interval: {:?}, max parallel runs: {}, run timeout: {:?})",
        config.tick_interval, config.max_parallel_runs, config.run_timeout
    );

    executor.run(shutdown_signal()).await;

    info!("Waiting for in-flight runs to finish");
    executor.wait_for_idle().await;
    info!("Remote fetch engine stopped");

    Ok(())
}

/// Loads configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid environment configuration")?;
    config.validate()?;
    Ok(config)
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
