//! UNET development host

mod console;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::ConsoleBridge;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unet_runtime::{Host, HostConfig, LibraryLoader, UnloadReport};

#[derive(Parser)]
#[command(name = "unet")]
#[command(about = "Load UNET plugin bundles outside the engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct HostArgs {
    /// Plugins directory
    #[arg(short, long, env = "UNET_PLUGINS")]
    plugins: PathBuf,

    /// Configuration file (defaults to $UNET_CONFIG or <plugins>/unet.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Console log filter (overridden by UNET_LOG)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Also print messages as the native log would receive them
    #[arg(long)]
    native_log: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every plugin once, print what was registered, then unload
    Load {
        #[command(flatten)]
        host: HostArgs,

        /// Print loaded modules as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep plugins loaded and hot reload changed bundles until Ctrl-C
    Watch {
        #[command(flatten)]
        host: HostArgs,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "unet.toml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Load { host, json } => {
            let (host, bridge) = start_host(host)?;

            let count = host.load()?;
            let modules = host.modules()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
            } else {
                for module in &modules {
                    println!("{} ({})", module.name, module.bundle.display());
                }
            }
            tracing::info!(
                modules = count,
                classes = bridge.registered_classes(),
                "Load pass finished"
            );

            report_unload(&host.unload()?);
            Ok(())
        }

        Commands::Watch { host } => {
            let (host, _bridge) = start_host(host)?;
            let count = host.load()?;
            tracing::info!(modules = count, watching = host.is_watching(), "Press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;

            report_unload(&host.unload()?);
            Ok(())
        }

        Commands::Validate { config } => match HostConfig::load_from_file(&config) {
            Ok(cfg) => {
                println!("✓ Configuration is valid");
                println!("  Bundle extension: .{}", cfg.bundle_extension);
                println!("  Shadow copy: {}", cfg.shadow_copy);
                println!("  Refresh policy: {:?}", cfg.refresh);
                println!("  Hot reload: {}", cfg.hot_reload.enabled);
                Ok(())
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {e}");
                std::process::exit(1);
            }
        },

        Commands::Version => {
            println!("UNET plugin host");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Plugin ABI: {}", unet_runtime::ABI_VERSION);
            Ok(())
        }
    }
}

fn load_config(args: &HostArgs) -> Result<HostConfig> {
    let config = match &args.config {
        Some(path) => HostConfig::load_from_file(path),
        None => HostConfig::discover(&args.plugins),
    };
    config.with_context(|| format!("Invalid configuration for {}", args.plugins.display()))
}

fn start_host(args: HostArgs) -> Result<(Host, Arc<ConsoleBridge>)> {
    let mut config = load_config(&args)?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    let host = Host::new(Arc::new(LibraryLoader::new()));
    unet_runtime::init_logging(Arc::clone(host.core()), &config.log_level);

    let bridge = Arc::new(ConsoleBridge::new(args.native_log));
    host.initialize(bridge.clone(), absolute(&args.plugins), config);

    Ok((host, bridge))
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn report_unload(reports: &[UnloadReport]) {
    for report in reports.iter().filter(|report| !report.reclaimed) {
        tracing::warn!(bundle = %report.bundle.display(), "Module was not reclaimed");
    }
    tracing::info!(modules = reports.len(), "Plugins unloaded");
}
