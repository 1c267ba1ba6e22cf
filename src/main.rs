//! CodeSmriti CLI - semantic repository indexing and retrieval.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use codesmriti::{
    Container, ContainerConfig, EngineConfig, JobKind, JobRequest, JobStatus, SearchLevel,
    SearchRequest,
};

/// CodeSmriti - persistent multi-tenant semantic index over source repositories
#[derive(Parser)]
#[command(name = "codesmriti")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tenant id carried by every request
    #[arg(short, long, global = true, default_value = "default")]
    tenant: String,

    /// Use HTTP LLM/embedding backends instead of the deterministic mocks
    #[arg(long, global = true)]
    live: bool,

    /// Use the OpenSearch store instead of the in-memory store
    #[arg(long, global = true)]
    opensearch: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a repository checkout
    Ingest {
        /// Path to the repository working tree
        path: PathBuf,

        /// Repository id; defaults to the directory name
        #[arg(short, long)]
        repo: Option<String>,

        /// Force a full re-ingestion instead of an incremental run
        #[arg(short, long)]
        full: bool,
    },

    /// Search the index
    Search {
        /// The search query
        query: String,

        /// Target level: symbol, file, module, repo, doc (default: inferred)
        #[arg(short, long)]
        level: Option<String>,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Restrict to one repository
        #[arg(short, long)]
        repo: Option<String>,

        /// Truncate summaries to previews
        #[arg(short, long)]
        preview: bool,
    },

    /// List indexed repositories
    Repos,

    /// Show folder structure for a repository path
    Structure {
        #[arg(short, long)]
        repo: String,

        /// Folder path inside the repo (empty for the root)
        #[arg(default_value = "")]
        path: String,
    },

    /// Print source from the on-disk checkout
    Cat {
        #[arg(short, long)]
        repo: String,

        path: String,

        #[arg(long)]
        start: Option<u32>,

        #[arg(long)]
        end: Option<u32>,
    },

    /// Delete an indexed repository
    Delete {
        #[arg(short, long)]
        repo: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .init();

    let container = Container::new(ContainerConfig {
        engine: EngineConfig::default(),
        mock_backends: !cli.live,
        memory_store: !cli.opensearch,
    })
    .await?;

    match cli.command {
        Commands::Ingest { path, repo, full } => {
            let repo_id = match repo {
                Some(repo) => repo,
                None => path
                    .canonicalize()?
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            };
            let kind = if full {
                JobKind::Full
            } else {
                JobKind::Incremental
            };

            let orchestrator = container.orchestrator();
            let job_id = orchestrator.submit(JobRequest {
                tenant_id: cli.tenant.clone(),
                repo_id: repo_id.clone(),
                kind,
                repo_path: path.canonicalize()?,
            });

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.green} {bar:40.green/dim} {pos}/{len} {msg:.dim}")
                    .expect("Invalid progress bar template")
                    .progress_chars("━━─"),
            );

            let job = loop {
                let Some(job) = orchestrator.status(&job_id) else {
                    bail!("Job {} vanished", job_id);
                };
                let progress = job.progress();
                bar.set_length(progress.total_files);
                bar.set_position(progress.processed_files + progress.skipped_files);
                if let Some(current) = &progress.current_file {
                    bar.set_message(current.clone());
                }
                if job.status().is_terminal() {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
            };
            bar.finish_and_clear();

            match job.status() {
                JobStatus::Completed => {
                    let progress = job.progress();
                    println!(
                        "Ingested {}: {} files processed, {} skipped, {} chunks",
                        repo_id,
                        progress.processed_files,
                        progress.skipped_files,
                        progress.total_chunks
                    );
                }
                JobStatus::Cancelled => println!("Ingestion cancelled."),
                _ => bail!(
                    "Ingestion failed: {}",
                    job.error().unwrap_or("unknown error")
                ),
            }
        }

        Commands::Search {
            query,
            level,
            limit,
            repo,
            preview,
        } => {
            let mut request = SearchRequest::new(&cli.tenant, &query)
                .with_limit(limit)
                .with_preview_mode(preview);
            if let Some(level) = level {
                let Some(level) = SearchLevel::parse(&level) else {
                    bail!("Unknown level '{}'", level);
                };
                request = request.with_level(level);
            }
            if let Some(repo) = repo {
                request = request.with_repo_filter(repo);
            }

            let hits = container.search().execute(request).await?;
            if hits.is_empty() {
                println!("No results found.");
            } else {
                println!("Found {} results:\n", hits.len());
                for (i, hit) in hits.iter().enumerate() {
                    println!("{}. {}", i + 1, hit.display_line());
                    println!("   {}", hit.summary_text());
                    println!();
                }
            }
        }

        Commands::Repos => {
            let repos = container.list_repositories().execute(&cli.tenant).await?;
            if repos.is_empty() {
                println!("No repositories indexed.");
            } else {
                println!("Indexed repositories:\n");
                for repo in repos {
                    println!("  {} [{}]", repo.repo_id, repo.languages.join(", "));
                    for (kind, count) in &repo.doc_counts {
                        println!("    {}: {}", kind, count);
                    }
                    println!();
                }
            }
        }

        Commands::Structure { repo, path } => {
            let view = container
                .explore()
                .execute(&cli.tenant, &repo, &path)
                .await?;
            if let Some(summary) = &view.summary {
                println!("{}\n", summary);
            }
            for dir in &view.directories {
                println!("  {}/", dir);
            }
            for file in &view.files {
                println!("  {} ({}, {} lines)", file.path, file.language, file.line_count);
            }
        }

        Commands::Cat {
            repo,
            path,
            start,
            end,
        } => {
            let slice = container
                .fetch_source()
                .execute(&cli.tenant, &repo, &path, start, end)
                .await?;
            print!("{}", slice.code);
            if slice.truncated {
                eprintln!("... (truncated, {} total lines)", slice.total_lines);
            }
        }

        Commands::Delete { repo } => {
            let deleted = container
                .delete_repository()
                .execute(&cli.tenant, &repo)
                .await?;
            println!("Deleted {} documents for {}.", deleted, repo);
        }
    }

    Ok(())
}
