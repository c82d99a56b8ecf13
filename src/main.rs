// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptorium::{ConversionResult, Library, ScriptoriumConfig};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "scriptorium")]
#[command(author, version, about = "Capsule store and format conversion for scripture corpora", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Capsule directory, overriding the configuration
    #[arg(long, global = true)]
    capsules_dir: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List capsules
    List,
    /// Report CAS layout and IR presence of every capsule
    Scan,
    /// Show a capsule's manifest
    Manifest { id: String },
    /// List the members of a capsule with their SHA-256
    Artifacts { id: String },
    /// Write one member of a capsule to stdout
    Cat { id: String, artifact: String },
    /// Extract a capsule into a directory
    Extract { id: String, dest: PathBuf },
    /// Detect the source format of a capsule
    Detect { id: String },
    /// Add intermediate representation to a capsule
    GenerateIr {
        /// Capsule ID (omit with --all)
        id: Option<String>,
        /// Every capsule without IR
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Rewrite a capsule in another format
    Convert { id: String, target: String },
    /// List available plugins
    Plugins,
    /// List capsules holding Bibles
    Bibles,
    /// List installed and installable SWORD modules
    Modules,
    /// List the external module directory
    ExternalModules,
    /// Copy an archive into the capsule directory
    Install { path: PathBuf },
    /// Remove a capsule
    Delete { id: String },
    /// Populate caches and show their counters
    CacheStats {
        /// Keep refreshing caches in the background until interrupted
        #[arg(long)]
        follow: bool,
    },
}

fn load_config(cli: &Cli) -> Result<ScriptoriumConfig> {
    let mut config = match &cli.config {
        Some(path) => ScriptoriumConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ScriptoriumConfig::default(),
    };
    if let Some(dir) = &cli.capsules_dir {
        config.storage.capsules_dir = dir.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_result(result: &ConversionResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    let status = if result.success { "ok" } else { "FAILED" };
    println!(
        "{:<24} {:<6} {:<4} {}",
        result.capsule_id, status, result.loss_class, result.message
    );
    if let Some(original) = &result.original_path {
        println!("  previous version kept at {}", original.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let json = cli.json;

    let Some(command) = cli.command else {
        // No command provided, show help
        println!("Scriptorium v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'scriptorium --help' for usage information");
        return Ok(());
    };

    let library = Library::open(&config).context("Failed to open library")?;

    match command {
        Commands::List => {
            let capsules = library.list()?;
            if json {
                return print_json(&*capsules);
            }
            for capsule in capsules.iter() {
                println!("{:<24} {:>12}  {}", capsule.id, capsule.size, capsule.file_name);
            }
            Ok(())
        }
        Commands::Scan => {
            let flags = library.scan_all()?;
            if json {
                return print_json(&flags);
            }
            for (path, flags) in &flags {
                println!(
                    "{:<40} cas={:<5} ir={}",
                    path.display(),
                    flags.is_cas,
                    flags.has_ir
                );
            }
            Ok(())
        }
        Commands::Manifest { id } => match library.manifest(&id)? {
            Some(manifest) => {
                println!("{}", manifest.to_json()?);
                Ok(())
            }
            None => {
                println!("{} has no manifest", id);
                Ok(())
            }
        },
        Commands::Artifacts { id } => {
            let artifacts = library.artifacts(&id)?;
            if json {
                return print_json(&artifacts);
            }
            for artifact in &artifacts {
                println!("{}  {:>10}  {}", artifact.sha256, artifact.size, artifact.id);
            }
            Ok(())
        }
        Commands::Cat { id, artifact } => {
            use std::io::Write;
            let content = library.read_artifact(&id, &artifact)?;
            std::io::stdout().write_all(&content)?;
            Ok(())
        }
        Commands::Extract { id, dest } => {
            let count = library.extract(&id, &dest)?;
            println!("Extracted {} entries to {}", count, dest.display());
            Ok(())
        }
        Commands::Detect { id } => {
            let detection = library.detect(&id)?;
            if json {
                return print_json(&detection);
            }
            println!("{} ({})", detection.format, detection.reason);
            Ok(())
        }
        Commands::GenerateIr { id, all } => {
            if all {
                let results = library.generate_ir_all()?;
                if json {
                    return print_json(&results);
                }
                let failed = results.iter().filter(|r| !r.success).count();
                for result in &results {
                    print_result(result, false)?;
                }
                info!("{} capsules processed, {} failed", results.len(), failed);
                return Ok(());
            }
            let id = id.context("Capsule ID required (or use --all)")?;
            print_result(&library.generate_ir(&id)?, json)
        }
        Commands::Convert { id, target } => print_result(&library.convert(&id, &target)?, json),
        Commands::Plugins => {
            let plugins = library.plugins();
            if json {
                return print_json(&plugins);
            }
            for plugin in &plugins {
                println!(
                    "{:<24} {:<8} {:<9} {} -> {}",
                    plugin.id(),
                    plugin.version,
                    plugin.source,
                    plugin.capabilities.inputs.join(","),
                    plugin.capabilities.outputs.join(",")
                );
            }
            Ok(())
        }
        Commands::Bibles => {
            let bibles = library.bibles()?;
            if json {
                return print_json(&*bibles);
            }
            for bible in bibles.iter() {
                println!(
                    "{:<24} {:<6} ir={:<5} {}",
                    bible.id, bible.language, bible.has_ir, bible.title
                );
            }
            Ok(())
        }
        Commands::Modules => {
            let modules = library.modules()?;
            if json {
                return print_json(&*modules);
            }
            println!("Installed:");
            for module in &modules.installed {
                println!("  {:<16} {}", module.name, module.description);
            }
            println!("Installable:");
            for module in &modules.installable {
                println!("  {:<16} {}", module.name, module.description);
            }
            Ok(())
        }
        Commands::ExternalModules => {
            let modules = library.external_modules()?;
            if json {
                return print_json(&*modules);
            }
            for module in modules.iter() {
                println!("{:<24} {}", module.name, module.path.display());
            }
            Ok(())
        }
        Commands::Install { path } => {
            let capsule = library.install(&path)?;
            println!("Installed {} as {}", path.display(), capsule.id);
            Ok(())
        }
        Commands::Delete { id } => {
            let removed = library.delete(&id)?;
            println!("Deleted {}", removed.display());
            Ok(())
        }
        Commands::CacheStats { follow } => {
            library.list()?;
            library.bibles()?;
            library.modules()?;
            if follow {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(async {
                    let handle = library.cache().clone().spawn_refresh_loop();
                    tokio::signal::ctrl_c().await?;
                    handle.shutdown().await;
                    anyhow::Ok(())
                })?;
            }
            print_json(&library.cache_stats())
        }
    }
}
