use anyhow::Context;
use clap::{Parser, Subcommand};
use multiversion_core::config::Settings;
use multiversion_core::logging::init_logging;
use multiversion_core::{ClassTreeStore, DirStore, VersionId};
use multiversion_engine::{HookRegistry, MergeOptions};
use multiversion_runner::{run_merge, run_split, MergeRun, RunReport, SplitRun};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "multiversion",
    about = "Merge per-version class trees into one and split them back per target version"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the settings file
    #[arg(long, default_value = "multiversion.json")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a settings file with defaults
    Init {
        /// Versions in provider order (e.g. a,b)
        #[arg(long, value_delimiter = ',')]
        versions: Vec<String>,
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
    /// Show settings and per-version class counts
    Status,
    /// Merge every class group of the configured versions
    Merge,
    /// Split the merged classes for one target version
    Split {
        /// Version to project for
        #[arg(long)]
        target: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { versions, force } => cmd_init(&cli, versions, *force).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Merge => cmd_merge(&cli).await,
        Commands::Split { target } => cmd_split(&cli, target).await,
    }
}

/// Load settings, with relative directories taken from the settings file's
/// location.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(&cli.config).with_context(|| {
        format!(
            "Failed to load {} (run 'multiversion init' first)",
            cli.config.display()
        )
    })?;
    let base = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    settings.resolve_paths(base);
    Ok(settings)
}

async fn cmd_init(cli: &Cli, versions: &[String], force: bool) -> anyhow::Result<()> {
    if cli.config.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            cli.config.display()
        );
    }
    let settings = Settings {
        versions: versions.iter().map(|v| VersionId::new(v.trim())).collect(),
        ..Default::default()
    };
    settings.save(&cli.config)?;
    println!("Settings written to {}", cli.config.display());
    if settings.versions.is_empty() {
        println!("  No versions yet: add them to \"versions\" before merging");
    }
    Ok(())
}

fn count_classes(settings: &Settings, dir: &Path, version: Option<&VersionId>) -> anyhow::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let store = DirStore::new(dir)?.with_versions(settings.versions.iter().cloned());
    Ok(store.list(version)?.len())
}

async fn cmd_status(cli: &Cli) -> anyhow::Result<()> {
    println!("Multiversion Status");
    println!("===================");
    println!();

    let settings = match load_settings(cli) {
        Ok(settings) => settings,
        Err(_) => {
            println!("Configuration: Not found");
            println!("  Run 'multiversion init' to configure");
            return Ok(());
        }
    };

    println!("Configuration: {}", cli.config.display());
    println!("  Input: {}", settings.store.input.display());
    println!("  Merged: {}", settings.store.merged.display());
    println!("  Split: {}", settings.store.split.display());
    println!("  Workers: {}", settings.workers.threads);
    println!("  Verify splits: {}", settings.split.verify);
    if !settings.merge.pinned_superclasses.is_empty() {
        println!("  Pinned superclasses: {}", settings.merge.pinned_superclasses.len());
    }
    println!();

    match settings.version_set() {
        Ok(versions) => {
            println!("Versions:");
            for version in &versions {
                let count = count_classes(&settings, &settings.store.input, Some(version))?;
                println!("  {version}: {count} classes");
            }
        }
        Err(e) => println!("Versions: {e}"),
    }
    println!(
        "Merged classes: {}",
        count_classes(&settings, &settings.store.merged, None)?
    );

    Ok(())
}

/// Print the run summary, save the report next to the logs and exit
/// non-zero when any group failed.
async fn finish(report: &RunReport, log_dir: &Path) -> anyhow::Result<bool> {
    println!("{}", report.summary());
    for group in report.failures() {
        println!(
            "  FAILED {}: {}",
            group.class,
            group.error.as_deref().unwrap_or("unknown error")
        );
    }
    let path = report.save(log_dir).await?;
    println!("Report: {}", path.display());
    Ok(!report.has_failures())
}

async fn cmd_merge(cli: &Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli)?;
    let versions = settings.version_set()?;
    let guard = init_logging(&settings.logging.dir, &settings.logging.filter)?;

    tracing::info!(versions = ?versions, "Merge run");

    let input = Arc::new(DirStore::new(&settings.store.input)?);
    let output = Arc::new(DirStore::new(&settings.store.merged)?.with_versions(versions.iter().cloned()));
    let run = MergeRun {
        versions,
        options: MergeOptions {
            pinned_superclasses: settings.merge.pinned_superclasses.clone(),
        },
        threads: settings.workers.threads,
    };

    let report = run_merge(input, output, run).await?;
    let ok = finish(&report, &settings.logging.dir).await?;
    if !ok {
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_split(cli: &Cli, target: &str) -> anyhow::Result<()> {
    let settings = load_settings(cli)?;
    let versions = settings.version_set()?;
    let guard = init_logging(&settings.logging.dir, &settings.logging.filter)?;

    let target = VersionId::new(target);
    tracing::info!(target = %target, "Split run");

    let merged = Arc::new(DirStore::new(&settings.store.merged)?.with_versions(versions.iter().cloned()));
    let output = Arc::new(DirStore::new(settings.store.split.join(target.as_str()))?);
    let run = SplitRun {
        versions,
        target,
        verify: settings.split.verify,
        threads: settings.workers.threads,
    };

    let report = run_split(merged, output, Arc::new(HookRegistry::new()), run).await?;
    let ok = finish(&report, &settings.logging.dir).await?;
    if !ok {
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}
