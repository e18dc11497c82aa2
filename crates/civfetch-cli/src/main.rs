//! civfetch - find and download missing model files.
//!
//! Thin front end over `civfetch-core`: loads configuration, installs
//! logging, and renders prompts and progress in the terminal.

mod progress;
mod prompt;

use anyhow::{bail, Context, Result};
use civfetch_core::download::partition_satisfied;
use civfetch_core::resolve::{select, SelectionMode, SelectionOutcome, UpsertOutcome};
use civfetch_core::{
    BatchOptions, BatchOrchestrator, CancellationToken, CivitaiClient, DownloadExecutor,
    DownloadTarget, JobDescriptor, KnownReferenceEntry, KnownReferenceStore, KnownReferences,
    ModelKind, ModelRegistry, RegistryJobRunner, ResolveRequest, Resolver, ResolverConfig,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "civfetch")]
#[command(about = "Resolve and download missing models from Civitai")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Known-reference mapping file
    #[arg(long, global = true)]
    known: Option<PathBuf>,

    /// Models root that per-type subdirectories live under
    #[arg(long, global = true, default_value = "models")]
    models_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the registry for a reference and pick a candidate
    Resolve {
        reference: String,
        /// Expected model type (checkpoint, lora, vae, ...)
        #[arg(long)]
        kind: Option<String>,
        /// Creator username to search when no earlier stage finds one
        #[arg(long)]
        creator: Option<String>,
        /// Take the top-ranked candidate without prompting
        #[arg(long)]
        auto: bool,
        /// Maximum number of ranked candidates
        #[arg(long)]
        limit: Option<usize>,
        /// Download the selected candidate
        #[arg(long)]
        download: bool,
    },
    /// Run every search stage and explain the outcome
    Diagnose {
        reference: String,
        #[arg(long)]
        kind: Option<String>,
    },
    /// Download a model by registry id
    Download {
        #[arg(long)]
        model_id: u64,
        #[arg(long)]
        version_id: Option<u64>,
        /// Destination file or directory
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long)]
        kind: Option<String>,
    },
    /// Run a batch of download jobs from a JSON file
    Batch {
        jobs: PathBuf,
        /// Stop at the first failed job
        #[arg(long)]
        fail_fast: bool,
        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
        /// File listing model filenames already present, one per line
        #[arg(long)]
        present: Option<PathBuf>,
    },
    /// Maintain the known-reference mapping
    Known {
        #[command(subcommand)]
        action: KnownAction,
    },
}

#[derive(Subcommand, Debug)]
enum KnownAction {
    /// Add or replace a mapping after validating it against the registry
    Add {
        name: String,
        model_id: u64,
        #[arg(long)]
        version_id: Option<u64>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Print the current mapping
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match args.config {
        Some(ref path) => ResolverConfig::load(path),
        None => ResolverConfig::load_default(),
    }
    .context("Failed to load configuration")?;

    let known_path = match args.known {
        Some(ref path) => path.clone(),
        None => ResolverConfig::known_references_path()?,
    };
    let store = KnownReferenceStore::new(known_path);

    let registry: Arc<dyn ModelRegistry> = Arc::new(CivitaiClient::new(&config.registry)?);

    match args.command {
        Command::Resolve {
            reference,
            kind,
            creator,
            auto,
            limit,
            download,
        } => {
            let mut config = config;
            if let Some(limit) = limit {
                config.cascade.result_limit = limit;
            }
            let resolver = resolver(&registry, &store, &config)?;
            let mut request = request(reference, kind.as_deref());
            if let Some(creator) = creator {
                request = request.with_creator(creator);
            }
            resolve(&resolver, &request, auto, download, &args.models_root, &config).await
        }
        Command::Diagnose { reference, kind } => {
            let resolver = resolver(&registry, &store, &config)?;
            let report = resolver.diagnose(&request(reference, kind.as_deref())).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Download {
            model_id,
            version_id,
            dest,
            kind,
        } => {
            let target = DownloadTarget::Direct {
                model_id,
                version_id,
            };
            let kind = kind.as_deref().map(ModelKind::from_hint).unwrap_or(ModelKind::Other);
            download(registry, &config, &target, dest, kind, &args.models_root).await
        }
        Command::Batch {
            jobs,
            fail_fast,
            summary,
            present,
        } => {
            let mut config = config;
            if fail_fast {
                config.download.continue_on_failure = false;
            }
            let resolver = resolver(&registry, &store, &config)?;
            batch(
                registry,
                resolver,
                &config,
                &jobs,
                present.as_deref(),
                summary.as_deref(),
                &args.models_root,
            )
            .await
        }
        Command::Known { action } => known(registry.as_ref(), &store, action).await,
    }
}

fn resolver(
    registry: &Arc<dyn ModelRegistry>,
    store: &KnownReferenceStore,
    config: &ResolverConfig,
) -> Result<Resolver> {
    let known = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;
    info!("Loaded {} known reference(s)", known.len());
    Ok(Resolver::new(
        registry.clone(),
        Arc::new(known),
        config.cascade.clone(),
    ))
}

fn request(reference: String, kind: Option<&str>) -> ResolveRequest {
    let request = ResolveRequest::new(reference);
    match kind {
        Some(hint) => request.with_kind(ModelKind::from_hint(hint)),
        None => request,
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn resolve(
    resolver: &Resolver,
    request: &ResolveRequest,
    auto: bool,
    download_selected: bool,
    models_root: &Path,
    config: &ResolverConfig,
) -> Result<()> {
    let resolution = resolver.resolve(request).await;
    for record in &resolution.stages {
        info!("{} {:?} ({} ms)", record.stage, record.outcome, record.elapsed_ms);
    }

    let mode = if auto {
        SelectionMode::Auto
    } else {
        SelectionMode::Interactive
    };
    if auto {
        println!("{}", prompt::candidate_table(&resolution.candidates));
    }

    let candidates = resolution.candidates;
    let outcome = tokio::task::spawn_blocking(move || {
        let mut terminal = prompt::TerminalPrompt::new();
        select(&candidates, mode, Some(&mut terminal))
    })
    .await??;

    let candidate = match outcome {
        SelectionOutcome::Selected(candidate) => candidate,
        SelectionOutcome::Cancelled => {
            println!("Selection cancelled");
            return Ok(());
        }
        SelectionOutcome::NoCandidates => {
            bail!(
                "No candidates for '{}'; try `civfetch diagnose`",
                request.reference
            );
        }
    };

    println!(
        "Selected: {} (model {}, score {}, {})",
        candidate.name(),
        candidate.model_id(),
        candidate.score(),
        candidate.tier()
    );

    if download_selected {
        let kind = request.kind.unwrap_or(ModelKind::Other);
        let dest = Path::new(&request.reference)
            .file_name()
            .map(|name| kind.destination_dir(models_root).join(name));
        download(
            resolver.registry().clone(),
            config,
            &DownloadTarget::Candidate(candidate),
            dest,
            kind,
            models_root,
        )
        .await?;
    }
    Ok(())
}

async fn download(
    registry: Arc<dyn ModelRegistry>,
    config: &ResolverConfig,
    target: &DownloadTarget,
    dest: Option<PathBuf>,
    kind: ModelKind,
    models_root: &Path,
) -> Result<()> {
    let (bar, callback) = progress::progress_bar();
    let executor = DownloadExecutor::new(registry, config)?.with_progress(callback);

    let file = executor.resolve(target).await?;
    let destination = match dest {
        Some(path) if path.extension().is_some() => path,
        Some(dir) => dir.join(&file.file_name),
        None => kind.destination_dir(models_root).join(&file.file_name),
    };
    info!("Downloading {} -> {}", file.url, destination.display());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let staged = executor.transfer(&file, &destination, &cancel).await;
    bar.finish_and_clear();
    let path = executor
        .verify_and_commit(staged?, file.expected_hash.as_ref())
        .await?;
    println!("Saved {}", path.display());
    Ok(())
}

async fn batch(
    registry: Arc<dyn ModelRegistry>,
    resolver: Resolver,
    config: &ResolverConfig,
    jobs_path: &Path,
    present: Option<&Path>,
    summary_path: Option<&Path>,
    models_root: &Path,
) -> Result<()> {
    let raw = std::fs::read_to_string(jobs_path)
        .with_context(|| format!("Failed to read {}", jobs_path.display()))?;
    let mut jobs: Vec<JobDescriptor> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid job list in {}", jobs_path.display()))?;

    if let Some(present) = present {
        let listing = std::fs::read_to_string(present)
            .with_context(|| format!("Failed to read {}", present.display()))?;
        let names = listing.lines().map(str::trim).filter(|l| !l.is_empty());
        let (remaining, skipped) = partition_satisfied(jobs, names);
        for reference in &skipped {
            info!("Already present, skipping: {}", reference);
        }
        jobs = remaining;
    }

    let (bar, callback) = progress::progress_bar();
    let executor = DownloadExecutor::new(registry, config)?.with_progress(callback);
    let runner = RegistryJobRunner::new(resolver, executor, models_root);
    let orchestrator =
        BatchOrchestrator::new(runner, BatchOptions::from(&config.download));
    cancel_on_interrupt(orchestrator.cancellation_token());

    let summary = orchestrator.run(jobs).await;
    bar.finish_and_clear();

    for job in &summary.jobs {
        match job.reason {
            Some(ref reason) => {
                println!("{:<10} {} ({})", job.status.as_str(), job.reference, reason)
            }
            None => println!("{:<10} {}", job.status.as_str(), job.reference),
        }
    }
    println!(
        "{} completed, {} failed, {} not started in {} ms",
        summary.completed, summary.failed, summary.not_started, summary.duration_ms
    );

    if let Some(path) = summary_path {
        std::fs::write(path, summary.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if summary.failed > 0 || summary.cancelled {
        bail!("batch finished with failures");
    }
    Ok(())
}

async fn known(
    registry: &dyn ModelRegistry,
    store: &KnownReferenceStore,
    action: KnownAction,
) -> Result<()> {
    match action {
        KnownAction::Add {
            name,
            model_id,
            version_id,
            notes,
        } => {
            let entry = KnownReferenceEntry {
                model_id,
                version_id,
                notes,
            };
            let outcome = store.upsert(registry, &name, entry).await?;
            let verb = match outcome {
                UpsertOutcome::Added => "Added",
                UpsertOutcome::Updated => "Updated",
            };
            println!("{} '{}' in {}", verb, name, store.path().display());
        }
        KnownAction::List => {
            let known: KnownReferences = store.load()?;
            for (key, entry) in known.iter() {
                match entry.version_id {
                    Some(version) => println!("{} -> {} @ {}", key, entry.model_id, version),
                    None => println!("{} -> {}", key, entry.model_id),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_arguments_parse() {
        let args = Args::try_parse_from([
            "civfetch",
            "batch",
            "jobs.json",
            "--fail-fast",
            "--summary",
            "out.json",
            "--models-root",
            "/srv/models",
        ])
        .unwrap();

        assert_eq!(args.models_root, PathBuf::from("/srv/models"));
        match args.command {
            Command::Batch {
                jobs,
                fail_fast,
                summary,
                present,
            } => {
                assert_eq!(jobs, PathBuf::from("jobs.json"));
                assert!(fail_fast);
                assert_eq!(summary, Some(PathBuf::from("out.json")));
                assert!(present.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_known_add_arguments_parse() {
        let args = Args::try_parse_from([
            "civfetch",
            "known",
            "add",
            "Better_Detailed_Anatomy_v3.safetensors",
            "1091495",
            "--version-id",
            "1226600",
        ])
        .unwrap();

        match args.command {
            Command::Known {
                action:
                    KnownAction::Add {
                        model_id,
                        version_id,
                        notes,
                        ..
                    },
            } => {
                assert_eq!(model_id, 1091495);
                assert_eq!(version_id, Some(1226600));
                assert!(notes.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_request_applies_kind_hint() {
        let req = request("x.safetensors".to_string(), Some("lora"));
        assert_eq!(req.kind, Some(ModelKind::Lora));
        assert!(request("x".to_string(), None).kind.is_none());
    }
}
