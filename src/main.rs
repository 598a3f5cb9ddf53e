use clap::Parser;
use snapshot_export::{setup_logging, Cli, CliRunner, ExportConfig};
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    info!("Starting snapshot-export v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await?;

    let cli_runner = CliRunner::new(config, &args);
    let Cli { command, .. } = args;

    if let Err(e) = cli_runner.run(command).await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<ExportConfig> {
    let mut config = if let Some(config_path) = &args.config {
        // Load from file
        let config_content = tokio::fs::read_to_string(config_path).await?;
        ExportConfig::from_json(&config_content)?
    } else {
        // Use default configuration
        ExportConfig::default()
    };

    // Chrome path is applied by CliRunner; timeout also caps asset loads
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            anyhow::bail!("Timeout must be greater than 0");
        }
        config.image_load_timeout = config.image_load_timeout.min(Duration::from_secs(timeout));
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Region patterns: {}", config.regions.len());
    info!("Viewport width: {}", config.viewport_width);

    Ok(config)
}
