//! Tasksync - command line front end for the offline-first task list.
//!
//! Each invocation loads the local snapshot, probes the server, replays
//! whatever was queued while offline, runs one command and writes the
//! snapshot back.

use clap::{Parser, Subcommand, ValueEnum};
use tasksync_client::{
    Config, ConnectivityMonitor, FetchOutcome, FileStorage, HttpTaskService, Mutation,
    RemoteTaskService, SyncCoordinator,
};
use tasksync_engine::{Filter, Seq, Task, TaskDraft};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "Offline-first task list synced with a REST server", long_about = None)]
struct Cli {
    /// Server base URL (overrides TASKSYNC_API_URL)
    #[arg(short, long)]
    server: Option<String>,

    /// Treat the server as unreachable and only queue changes
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show tasks, newest first
    List {
        /// Only tasks with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Only tasks of these users
        #[arg(long = "user")]
        users: Vec<String>,

        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Create a task
    Add {
        title: String,

        /// Owner of the task
        #[arg(long)]
        user: String,
    },
    /// Flip a task between open and done
    Toggle { id: String },
    /// Rename a task
    Edit {
        id: String,

        #[arg(long)]
        title: String,
    },
    /// Delete a task
    Delete { id: String },
    /// Replay queued changes
    Sync,
    /// List users
    Users,
    /// Show changes the server kept refusing
    Failed,
    /// Drop a refused change
    Ack { seq: Seq },
    /// Retry a refused change
    Retry { seq: Seq },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Done,
    Open,
}

type Coordinator = SyncCoordinator<HttpTaskService, FileStorage>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasksync_client=info,tasksync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(server) = cli.server {
        config.api_url = server;
    }

    tracing::debug!(api_url = %config.api_url, data_dir = %config.data_dir.display(), "Starting");

    let remote = HttpTaskService::new(&config.api_url, config.sync.request_timeout)?;
    let reachable = !cli.offline && probe(&remote).await;
    if !reachable {
        tracing::warn!("Server unreachable, changes will be queued");
    }

    let coordinator =
        SyncCoordinator::new(remote, FileStorage::new(&config.data_dir), config.sync).await;
    let monitor = ConnectivityMonitor::new(reachable);
    coordinator.attach(&monitor).await;

    let result = run(&coordinator, cli.command).await;
    coordinator.shutdown().await;
    result
}

async fn probe(remote: &HttpTaskService) -> bool {
    match remote.list_users().await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Connectivity probe failed");
            false
        }
    }
}

async fn run(coordinator: &Coordinator, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List {
            status,
            users,
            pages,
        } => {
            load_pages(coordinator, pages).await;
            let mut filter = Filter::all();
            if let Some(status) = status {
                filter = filter.with_status(matches!(status, StatusArg::Done));
            }
            for user in users {
                filter = filter.with_user(user);
            }
            coordinator.set_filter(filter).await;

            let tasks = coordinator.visible_tasks().await;
            for task in &tasks {
                print_task(task);
            }
            let state = coordinator.sync_state().await;
            println!(
                "{} shown, {} pending{}",
                tasks.len(),
                state.pending,
                if state.online { "" } else { " (offline)" }
            );
        }
        Command::Add { title, user } => {
            let mutation = coordinator.add(TaskDraft::new(title, user)).await;
            print_mutation("add", &mutation);
        }
        Command::Toggle { id } => {
            load_pages(coordinator, 1).await;
            let mutation = coordinator.toggle_status(&id).await?;
            print_mutation("toggle", &mutation);
        }
        Command::Edit { id, title } => {
            load_pages(coordinator, 1).await;
            let mut task = coordinator
                .task(&id)
                .await
                .ok_or_else(|| tasksync_client::ClientError::TaskNotFound(id.clone()))?;
            task.title = title;
            let mutation = coordinator.update(task).await?;
            print_mutation("edit", &mutation);
        }
        Command::Delete { id } => {
            load_pages(coordinator, 1).await;
            let mutation = coordinator.delete(&id).await;
            print_mutation("delete", &mutation);
        }
        Command::Sync => {
            let summary = coordinator.sync_pending().await;
            println!(
                "synced {}, deferred {}, parked {}",
                summary.synced, summary.deferred, summary.parked
            );
        }
        Command::Users => {
            if let FetchOutcome::Failed(e) = coordinator.fetch_users().await {
                eprintln!("could not refresh users: {e}");
            }
            for user in coordinator.users().await {
                println!("{}\t{}", user.id, user.name);
            }
        }
        Command::Failed => {
            for failed in coordinator.failed_operations().await {
                println!(
                    "#{}\t{} {}\t{}",
                    failed.entry.seq,
                    failed.entry.operation.kind(),
                    failed.entry.task_id(),
                    failed.reason
                );
            }
        }
        Command::Ack { seq } => {
            let failed = coordinator.acknowledge_failure(seq).await?;
            println!("dropped #{} ({})", failed.entry.seq, failed.reason);
        }
        Command::Retry { seq } => {
            let summary = coordinator.retry_failed(seq).await?;
            println!(
                "synced {}, deferred {}, parked {}",
                summary.synced, summary.deferred, summary.parked
            );
        }
    }
    Ok(())
}

async fn load_pages(coordinator: &Coordinator, pages: u32) {
    match coordinator.fetch_first_page().await {
        FetchOutcome::Failed(e) => {
            eprintln!("could not refresh tasks: {e}");
            return;
        }
        FetchOutcome::Offline => return,
        _ => {}
    }
    for _ in 1..pages {
        if !matches!(coordinator.fetch_next_page().await, FetchOutcome::Loaded(_)) {
            break;
        }
    }
}

fn print_task(task: &Task) {
    let mark = if task.status { "x" } else { " " };
    println!("[{mark}] {}\t{}\t({})", task.title, task.user_id, task.id);
}

fn print_mutation(action: &str, mutation: &Mutation) {
    println!("{action} {}: {:?}", mutation.task_id, mutation.outcome);
}
