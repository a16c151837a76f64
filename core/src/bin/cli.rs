//! Small CLI demonstrating the same calls an embedding HTTP layer would
//! make against `Engine` (SPEC_FULL §1, §9): submit a directory of `.php`
//! files, stream progress to stdout, print the resulting artifact paths.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use phpl10n_engine::cache::NullCacheStore;
use phpl10n_engine::config::EngineConfig;
use phpl10n_engine::jobs::ProgressEvent;
use phpl10n_engine::registry::InMemoryJobStore;
use phpl10n_engine::Engine;

#[derive(Parser, Debug)]
#[command(name = "phpl10n-cli")]
#[command(about = "Translate a tree of $msg_arr PHP localization files to pt-BR")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a source directory into an output directory.
    Translate {
        /// Directory containing `.php` localization sources.
        source: PathBuf,
        /// Directory to write the translated tree and artifacts into.
        output: PathBuf,
        /// Owner identity recorded on the job.
        #[arg(long, default_value = "cli")]
        owner: String,
        /// Optional engine config file (YAML).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print aggregate engine stats (cache hit rates, provider health).
    Stats {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Translate {
            source,
            output,
            owner,
            config,
        } => translate(source, output, owner, config).await,
        Command::Stats { config } => stats(config).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_yaml_file(&path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn build_engine(config: EngineConfig) -> Result<Engine> {
    Engine::new(
        config,
        Box::new(NullCacheStore),
        Box::new(InMemoryJobStore::new()),
    )
    .map_err(|err| anyhow::anyhow!("failed to construct engine: {err}"))
}

async fn translate(
    source: PathBuf,
    output: PathBuf,
    owner: String,
    config: Option<PathBuf>,
) -> Result<()> {
    if !source.is_dir() {
        bail!("source path {} is not a directory", source.display());
    }

    let engine = build_engine(load_config(config)?)?;
    let job_id = engine.submit_job(owner, source, output).await;
    println!("job {job_id} submitted");

    let mut events = engine.subscribe(&job_id).await;
    loop {
        match events.recv().await {
            Ok(ProgressEvent::Progress(snapshot)) => {
                println!(
                    "[{job_id}] {:.1}% ({}/{} strings, {}/{} files){}",
                    snapshot.percent,
                    snapshot.translated_strings,
                    snapshot.total_strings,
                    snapshot.files_done,
                    snapshot.total_files,
                    snapshot
                        .current_file
                        .as_deref()
                        .map(|f| format!(" - {f}"))
                        .unwrap_or_default(),
                );
            }
            Ok(ProgressEvent::Complete(snapshot)) => {
                println!("job {job_id} completed");
                if let Some(path) = snapshot.primary_artifact {
                    println!("  primary artifact:   {}", path.display());
                }
                if let Some(path) = snapshot.secondary_artifact {
                    println!("  secondary artifact: {}", path.display());
                }
                if let Some(report) = snapshot.validation_report {
                    println!(
                        "  validation: {} ok, {} untranslated, {} issues logged",
                        report.counters.success,
                        report.counters.untranslated,
                        report.issues.len(),
                    );
                }
                break;
            }
            Ok(ProgressEvent::Error(snapshot)) => {
                println!("job {job_id} failed");
                for error in &snapshot.errors {
                    println!("  error: {error}");
                }
                bail!("job {job_id} did not complete successfully");
            }
            Err(_) => bail!("progress channel closed before the job reached a terminal state"),
        }
    }

    Ok(())
}

async fn stats(config: Option<PathBuf>) -> Result<()> {
    let engine = build_engine(load_config(config)?)?;
    let stats = engine.stats();
    println!("active provider: {:?}", stats.active_provider);
    println!(
        "cache: {} lookups, {:.1}% L1 hit rate, {:.1}% total hit rate ({}/{})",
        stats.cache.total_lookups,
        stats.cache.hit_rate_l1,
        stats.cache.hit_rate_total,
        stats.cache.l1_size,
        stats.cache.l1_max,
    );
    for (name, provider) in stats.providers {
        println!(
            "provider {name}: {} ({} total, {:.1}% success)",
            provider.status, provider.total_requests, provider.success_rate,
        );
    }
    Ok(())
}
