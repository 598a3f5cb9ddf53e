use crate::{
    dom, Document, ExportConfig, ExportMode, ModuleParts, RegionDiscovery, SnapshotModule,
};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "snapshot-export")]
#[command(about = "Export page regions as branded images")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Rasterization timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List exportable regions of a page
    List {
        #[arg(short, long, help = "HTML page to scan")]
        input: PathBuf,
    },

    /// Export one region of a page
    Export {
        #[arg(short, long, help = "HTML page to export from")]
        input: PathBuf,

        #[arg(long, help = "Heading text the region is listed under")]
        heading: String,

        #[arg(long, default_value = "0", help = "Region index within the heading")]
        index: usize,

        #[arg(long, default_value = "download", help = "Delivery mode (copy, download)")]
        mode: ExportMode,

        #[arg(short, long, help = "Download directory")]
        output: Option<PathBuf>,

        #[arg(long, help = "Page title shown in the header")]
        title: Option<String>,

        #[arg(long, help = "Device pixel ratio used for capture")]
        scale: Option<f64>,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CliRunner {
    pub config: ExportConfig,
    pub timeout: Duration,
}

impl CliRunner {
    pub fn new(mut config: ExportConfig, args: &Cli) -> Self {
        if let Some(chrome_path) = &args.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        let timeout = args.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);

        Self { config, timeout }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::List { input } => self.run_list(&input).await,
            Commands::Export {
                input,
                heading,
                index,
                mode,
                output,
                title,
                scale,
            } => {
                self.run_export(ExportOptions {
                    input,
                    heading,
                    index,
                    mode,
                    output,
                    title,
                    scale,
                })
                .await
            }
            Commands::Validate { config } => self.validate_config(&config).await,
        }
    }

    pub async fn run_list(&self, input: &Path) -> anyhow::Result<()> {
        let document = read_document(input).await?;
        let discovery = RegionDiscovery::new(&self.config)?;
        let groups = discovery.find_exportable_elements(&document);

        if groups.is_empty() {
            println!("No exportable regions found in {}", input.display());
            return Ok(());
        }

        for group in groups.iter() {
            println!("{}", group.heading_text);
            for (index, region) in group.regions.iter().enumerate() {
                let state = if discovery.is_visible(&document, region.element) {
                    "visible"
                } else {
                    "hidden"
                };
                match &region.title {
                    Some(title) => println!(
                        "  [{}] {} \"{}\" ({})",
                        index,
                        region.region_type.label(),
                        title,
                        state
                    ),
                    None => println!("  [{}] {} ({})", index, region.region_type.label(), state),
                }
            }
        }
        println!("\n{} headings, {} regions", groups.len(), groups.region_count());
        Ok(())
    }

    pub async fn run_export(&self, options: ExportOptions) -> anyhow::Result<()> {
        let mut config = self.config.clone();
        if let Some(output) = &options.output {
            config.download.directory = output.clone();
        }
        if let Some(scale) = options.scale {
            config.device_scale_factor = scale;
        }

        let document = dom::share(read_document(&options.input).await?);
        let mut parts = ModuleParts::desktop(&config, self.timeout)?;
        parts.page_title = options.title.clone();

        let module = SnapshotModule::new(&config, document, parts)?;
        let groups = module.init();
        let group = groups
            .iter()
            .find(|g| g.heading_text == options.heading)
            .ok_or_else(|| anyhow!("no exportable regions under heading \"{}\"", options.heading))?;
        let region = group.regions.get(options.index).ok_or_else(|| {
            anyhow!(
                "heading \"{}\" has {} regions, index {} out of range",
                group.heading_text,
                group.regions.len(),
                options.index
            )
        })?;

        let title = region
            .title
            .clone()
            .unwrap_or_else(|| group.heading_text.clone());
        info!("Exporting {} \"{}\" ({})", region.region_type.label(), title, options.mode);

        let result = module.exporter().export(region.element, &title, options.mode).await;
        debug!("Metrics: {:?}", module.metrics().snapshot());
        module.teardown();

        let outcome = result?;
        if let Some(notice) = outcome.notice() {
            println!("{}", notice.message);
        }
        if let crate::ExportOutcome::Downloaded { path, .. } = &outcome {
            println!("Saved {}", path.display());
        }
        Ok(())
    }

    pub async fn validate_config(&self, config_path: &Path) -> anyhow::Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config = ExportConfig::from_json(&content)?;
        RegionDiscovery::new(&config)?;

        println!("Configuration is valid:");
        println!("  Region patterns: {}", config.regions.len());
        println!("  Viewport width: {}", config.viewport_width);
        println!("  Image load timeout: {:?}", config.image_load_timeout);
        println!("  Download directory: {}", config.download.directory.display());
        if config.fonts.regular_path.is_none() {
            warn!("No font file configured, system fonts will be searched");
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub input: PathBuf,
    pub heading: String,
    pub index: usize,
    pub mode: ExportMode,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    pub scale: Option<f64>,
}

async fn read_document(path: &Path) -> anyhow::Result<Document> {
    let html = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Document::parse(&html))
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
