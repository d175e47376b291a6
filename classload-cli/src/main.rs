//! Classload CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use classload_core::{ClassInfo, ClassLoader, LoaderConfig, MultiClassLoader};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "classload")]
#[command(about = "Inspect classload plugin libraries", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn", env = "CLASSLOAD_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open libraries and list the classes they register
    Inspect {
        /// Library names or paths
        #[arg(required = true)]
        libraries: Vec<String>,

        /// Directory to search for bare library names (repeatable)
        #[arg(short = 'L', long = "search-path")]
        search_paths: Vec<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate a loader configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "classload.toml")]
        config: PathBuf,

        /// Also open every configured library
        #[arg(long)]
        open: bool,
    },

    /// Show version information
    Version,
}

#[derive(Serialize)]
struct LibraryReport {
    library: String,
    classes: Vec<ClassInfo>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Inspect {
            libraries,
            search_paths,
            json,
        } => {
            let config = LoaderConfig {
                search_paths,
                libraries,
                ..Default::default()
            };
            config.validate()?;

            let mut reports = Vec::new();
            for path in config.resolved_libraries() {
                let loader = ClassLoader::new(path.as_str(), false)
                    .with_context(|| format!("Failed to inspect {path}"))?;
                reports.push(LibraryReport {
                    library: path,
                    classes: loader.all_classes(),
                });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    println!("{} ({} classes)", report.library, report.classes.len());
                    for class in &report.classes {
                        println!("  {:<24} {}", class.class_name, class.interface);
                    }
                }
            }
            Ok(())
        }

        Commands::CheckConfig { config, open } => {
            tracing::info!("Validating configuration: {}", config.display());

            let cfg = match LoaderConfig::from_file(&config) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!("Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            };

            println!("Configuration is valid");
            println!("  On demand: {}", cfg.on_demand);
            println!("  Unload policy: {:?}", cfg.unload_policy);
            for library in cfg.resolved_libraries() {
                println!("  Library: {library}");
            }

            if open {
                let multi = MultiClassLoader::from_config(&cfg)
                    .context("Failed to open configured libraries")?;
                println!("Opened {} libraries", multi.registered_libraries().len());
            }
            Ok(())
        }

        Commands::Version => {
            println!("classload");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(filter.into()))
        .init();

    Ok(())
}
