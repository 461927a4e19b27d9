//! Extension host command line.
//!
//! # Responsibility
//! - Load host configuration and start logging.
//! - Drive directory scans, single-package loads, and package builds.
//! - Always tear the registry down before exiting.

use clap::{Parser, Subcommand};
use extmgr_core::{
    init_logging_from_config, Extension, ExtensionEvents, ExtensionLoader, ExtensionManager,
    HostConfig, HostHandle, PackageBuilder, TeardownReport,
};
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Extension host command line interface
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Host configuration file (TOML)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every package in a directory, then shut down
    Scan {
        /// Directory to scan; falls back to `extensions_dir` from the config
        dir: Option<PathBuf>,
    },

    /// Load a single package, then shut down
    Load {
        /// Path to the package bundle
        package: PathBuf,
    },

    /// Build a package bundle
    Pack {
        /// Entry point named in the manifest
        #[clap(long)]
        class: String,

        /// Native library to embed; repeatable
        #[clap(long = "lib")]
        libs: Vec<PathBuf>,

        /// Output bundle path
        out: PathBuf,
    },
}

/// Prints one line per successful load.
#[derive(Default)]
struct PrintingEvents {
    seen: AtomicUsize,
}

impl ExtensionEvents for PrintingEvents {
    fn extension_loaded(&self, _extension: &Arc<dyn Extension>) {
        let ordinal = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        println!("loaded extension #{ordinal}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => HostConfig::from_file(path).map_err(|err| err.to_string())?,
        None => HostConfig::default(),
    };
    init_logging_from_config(&config)?;
    info!(
        "event=cli_start module=cli status=ok version={}",
        extmgr_core::core_version()
    );

    match cli.command {
        Commands::Scan { dir } => {
            let dir = dir
                .or_else(|| config.extensions_dir.clone())
                .ok_or_else(|| "no directory given and no extensions_dir configured".to_string())?;
            scan(&config, &dir)
        }
        Commands::Load { package } => load(&config, &package),
        Commands::Pack { class, libs, out } => pack(&class, &libs, &out),
    }
}

fn manager(config: &HostConfig) -> ExtensionManager {
    let loader = ExtensionLoader::new(HostHandle::new(config.clone()))
        .with_options(config.loader_options());
    ExtensionManager::new(loader, Arc::new(PrintingEvents::default()))
}

fn scan(config: &HostConfig, dir: &Path) -> Result<(), String> {
    let manager = manager(config);
    let report = manager.load_extensions_from_directory(dir);
    println!(
        "scanned {}: {} loaded, {} failed",
        dir.display(),
        report.loaded.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        println!(
            "  {} [{}] {}",
            failure.path.display(),
            failure.error.code(),
            failure.error
        );
    }
    print_teardown(&manager.close());
    Ok(())
}

fn load(config: &HostConfig, package: &Path) -> Result<(), String> {
    let manager = manager(config);
    let outcome = manager
        .load_extension_from_path(package)
        .map(|_| ())
        .map_err(|err| format!("{} [{}]", err, err.code()));
    print_teardown(&manager.close());
    outcome
}

fn pack(class: &str, libs: &[PathBuf], out: &Path) -> Result<(), String> {
    let builder = libs
        .iter()
        .fold(PackageBuilder::new().entry_point(class), |builder, lib| {
            builder.native_library(lib)
        });
    builder.write_to(out).map_err(|err| err.to_string())?;
    println!("wrote {} (entry point {class})", out.display());
    Ok(())
}

fn print_teardown(report: &TeardownReport) {
    println!(
        "teardown: {} attempted, {} unloaded, {} contexts released",
        report.attempted, report.unloaded, report.contexts_released
    );
    for failure in &report.failures {
        let origin = failure
            .source_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<host>".to_string());
        println!("  {origin} [{}] {}", failure.error.code(), failure.error);
    }
}
