//! # Codehive admin CLI
//!
//! Runs the engine, and inspects and feeds the shared task queue and status
//! table.
//!
//! Usage:
//!   codehive run                            # worker + periodic sync until ctrl-c
//!   codehive add https://host/repo.git      # register a repository
//!   codehive pipeline new-repository 42     # clone + sync at user priority
//!   codehive enqueue repository.sync 42     # one operation
//!   codehive list --limit 20                # pending tasks in dequeue order
//!   codehive drain 42                       # drop queued work for a repository
//!   codehive status 42                      # recorded statuses
//!   codehive config                         # effective config as TOML

mod handlers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codehive_core::{CodehiveConfig, Operation, TrackableType};
use codehive_queue::{
    Engine, ListParams, Payload, PrescribedOperations, Priority, Queue, SqliteRepositoryStore,
    SqliteTaskStore, Task,
};
use codehive_tracking::SqliteStatusStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codehive", version, about = "🐝 Codehive: repository indexing task queue")]
struct Cli {
    /// Config file (default: ~/.codehive/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker and periodic sync until ctrl-c
    Run,

    /// Register a repository and print its ID
    Add { remote_uri: String },

    /// Queue a single operation for a repository
    Enqueue {
        /// Operation code, e.g. repository.sync
        operation: Operation,
        repository_id: i64,
        /// Commit SHA, for commit operations
        #[arg(long)]
        commit: Option<String>,
        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,
    },

    /// Queue a prescribed pipeline for a repository
    Pipeline {
        #[arg(value_enum)]
        pipeline: PipelineArg,
        repository_id: i64,
        /// Commit SHA, for commit pipelines
        #[arg(long)]
        commit: Option<String>,
        #[arg(long, value_enum, default_value = "user-initiated")]
        priority: PriorityArg,
    },

    /// List pending tasks in dequeue order
    List {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Only this operation
        #[arg(long)]
        operation: Option<Operation>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Number of pending tasks
    Count,

    /// Delete every pending task for a repository
    Drain { repository_id: i64 },

    /// Show recorded statuses for a repository
    Status {
        repository_id: i64,
        #[arg(long)]
        json: bool,
    },

    /// Return tasks claimed by a crashed worker to the queue
    ReleaseClaims,

    /// Print the effective configuration
    Config {
        /// Write it to the default config path
        #[arg(long)]
        write: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Background,
    Normal,
    UserInitiated,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Background => Priority::Background,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::UserInitiated => Priority::UserInitiated,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PipelineArg {
    NewRepository,
    Sync,
    Delete,
    IndexCommit,
    ScanCommit,
}

impl PipelineArg {
    fn operations(self) -> Vec<Operation> {
        match self {
            PipelineArg::NewRepository => PrescribedOperations::create_new_repository(),
            PipelineArg::Sync => PrescribedOperations::sync_repository(),
            PipelineArg::Delete => PrescribedOperations::delete_repository(),
            PipelineArg::IndexCommit => PrescribedOperations::index_commit(),
            PipelineArg::ScanCommit => PrescribedOperations::scan_and_index_commit(),
        }
    }

    fn needs_commit(self) -> bool {
        matches!(self, PipelineArg::IndexCommit | PipelineArg::ScanCommit)
    }
}

fn payload_for(repository_id: i64, commit: Option<&str>) -> Payload {
    match commit {
        Some(sha) => Payload::for_commit(repository_id, sha),
        None => Payload::for_repository(repository_id),
    }
}

fn open_queue(db_path: &Path) -> Result<(Arc<SqliteTaskStore>, Queue)> {
    let store = Arc::new(
        SqliteTaskStore::open(db_path)
            .with_context(|| format!("opening task queue at {}", db_path.display()))?,
    );
    let queue = Queue::new(store.clone());
    Ok((store, queue))
}

async fn run(config: &CodehiveConfig, db_path: &Path) -> Result<()> {
    let (store, queue) = open_queue(db_path)?;
    let repositories = Arc::new(SqliteRepositoryStore::open(db_path)?);
    let statuses = Arc::new(SqliteStatusStore::open(db_path)?);
    let registry = Arc::new(handlers::registry(
        repositories.clone(),
        statuses.clone(),
        queue,
    ));

    let unhandled: Vec<&str> = Operation::ALL
        .iter()
        .filter(|op| !registry.has_handler(**op))
        .map(|op| op.as_str())
        .collect();
    if !unhandled.is_empty() {
        tracing::warn!("⚠️ No handler for: {} (such tasks are dropped)", unhandled.join(", "));
    }

    let mut engine = Engine::new(config, store, repositories, statuses, registry);
    engine.start();
    tracing::info!("🐝 Codehive running on {} (ctrl-c to stop)", db_path.display());

    let signal = tokio::signal::ctrl_c().await;
    engine.shutdown().await;
    signal.context("waiting for ctrl-c")?;
    Ok(())
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("📭 Queue is empty");
        return;
    }
    println!("{:>6}  {:>6}  {:<36}  PAYLOAD", "ID", "PRIO", "OPERATION");
    for task in tasks {
        let payload = task.payload.to_json().unwrap_or_default();
        println!(
            "{:>6}  {:>6}  {:<36}  {payload}",
            task.id,
            task.priority,
            task.operation.as_str()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "codehive=debug" } else { "codehive=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CodehiveConfig::load_from(path)?,
        None => CodehiveConfig::load()?,
    };

    if let Commands::Config { write } = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        if write {
            config.save()?;
            println!("\n✅ Saved to {}", CodehiveConfig::default_path().display());
        }
        return Ok(());
    }

    let db_path = config.database.resolved_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match cli.command {
        Commands::Run => run(&config, &db_path).await?,
        Commands::Add { remote_uri } => {
            let repo = SqliteRepositoryStore::open(&db_path)?.create(&remote_uri)?;
            println!("✅ Repository {} registered (id={})", repo.remote_uri, repo.id);
        }
        Commands::Enqueue {
            operation,
            repository_id,
            commit,
            priority,
        } => {
            if operation.is_commit_scoped() && commit.is_none() {
                anyhow::bail!("{operation} needs --commit");
            }
            let (_, queue) = open_queue(&db_path)?;
            let task = Task::new(
                operation,
                Priority::from(priority).value(),
                payload_for(repository_id, commit.as_deref()),
            );
            let saved = queue.enqueue(task).await?;
            println!("✅ {} queued (id={}, priority={})", saved.operation, saved.id, saved.priority);
        }
        Commands::Pipeline {
            pipeline,
            repository_id,
            commit,
            priority,
        } => {
            if pipeline.needs_commit() && commit.is_none() {
                anyhow::bail!("this pipeline needs --commit");
            }
            let (_, queue) = open_queue(&db_path)?;
            let tasks = queue
                .enqueue_operations(
                    &pipeline.operations(),
                    Priority::from(priority).value(),
                    &payload_for(repository_id, commit.as_deref()),
                )
                .await?;
            println!("✅ Queued {} task(s) for repository {repository_id}", tasks.len());
            print_tasks(&tasks);
        }
        Commands::List {
            limit,
            offset,
            operation,
            json,
        } => {
            let (_, queue) = open_queue(&db_path)?;
            let tasks = queue
                .list(&ListParams {
                    limit,
                    offset,
                    operation,
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print_tasks(&tasks);
            }
        }
        Commands::Count => {
            let (_, queue) = open_queue(&db_path)?;
            println!("{}", queue.count().await?);
        }
        Commands::Drain { repository_id } => {
            let (_, queue) = open_queue(&db_path)?;
            let drained = queue.drain_for_repository(repository_id).await?;
            println!("🧹 Removed {drained} pending task(s) for repository {repository_id}");
        }
        Commands::Status {
            repository_id,
            json,
        } => {
            let statuses = SqliteStatusStore::open(&db_path)?
                .find_by_trackable(TrackableType::Repository, repository_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else if statuses.is_empty() {
                println!("No status recorded for repository {repository_id}");
            } else {
                for s in &statuses {
                    let detail = if s.error.is_empty() { &s.message } else { &s.error };
                    println!(
                        "{:<10} {:>5.1}%  {}  {detail}",
                        s.state.as_str(),
                        s.completion_percent(),
                        s.id
                    );
                }
            }
        }
        Commands::ReleaseClaims => {
            let (store, _) = open_queue(&db_path)?;
            let released = store.release_stale_claims()?;
            println!("♻️ Released {released} claimed task(s)");
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
