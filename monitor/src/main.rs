//! Treeline Monitor - live git worktree status watcher.
//!
//! This binary watches one git worktree and prints a snapshot every time
//! its state changes.
//!
//! # Commands
//!
//! - `treeline-monitor watch [PATH]`: Monitor a worktree until interrupted
//! - `treeline-monitor status [PATH]`: Run one forced cycle and print the result
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options. Command
//! line flags take precedence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::process::Command as ProcessCommand;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use treeline_monitor::bus::{BroadcastPublisher, WorktreeEvent};
use treeline_monitor::config::Config;
use treeline_monitor::git::GitCliFetcher;
use treeline_monitor::issue::NoopIssueResolver;
use treeline_monitor::monitor::{Collaborators, WorktreeMonitor};
use treeline_monitor::mood::HeuristicMoodClassifier;
use treeline_monitor::summary::DisabledSummaryGenerator;
use treeline_monitor::types::{WorktreeIdentity, WorktreeState};

/// Namespace UUID for deriving stable worktree ids from canonical paths.
const TREELINE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x74, 0x72, 0x65, 0x65, // "tree"
    0x6c, 0x69, 0x6e, 0x65, // "line"
    0x2d, 0x77, 0x6f, 0x72, // "-wor"
    0x6b, 0x74, 0x72, 0x65, // "ktre"
]);

/// Treeline Monitor - live git worktree status watcher.
#[derive(Parser, Debug)]
#[command(name = "treeline-monitor")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TREELINE_POLL_INTERVAL_MS      Base poll interval (default: 2000)
    TREELINE_MAX_POLL_INTERVAL_MS  Maximum poll interval (default: 30000)
    TREELINE_ADAPTIVE_BACKOFF      Scale interval with cycle time (default: true)
    TREELINE_BREAKER_THRESHOLD     Failures before polling stops (default: 3)
    TREELINE_SUMMARY_DEBOUNCE_MS   Summary debounce delay (default: 10000)
    TREELINE_NOTE_ENABLED          Read the status note (default: true)
    TREELINE_NOTE_FILENAME         Note filename (default: treeline-note)
    TREELINE_MAIN_BRANCH           Reference branch (default: main)

EXAMPLES:
    # Watch the current directory
    treeline-monitor watch

    # Watch a linked worktree, printing JSON lines
    treeline-monitor watch ../feature --json

    # Print the state of a worktree once
    treeline-monitor status ../feature
")]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor a worktree and print every published snapshot.
    Watch(WatchArgs),

    /// Run one forced update cycle and print the resulting snapshot.
    Status(TargetArgs),
}

/// Which worktree to monitor and how to print it.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Worktree directory.
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Worktree id (default: derived from the canonical path).
    #[arg(long)]
    id: Option<String>,

    /// Display name (default: directory name).
    #[arg(long)]
    name: Option<String>,

    /// Reference branch name.
    #[arg(long)]
    main_branch: Option<String>,

    /// Print snapshots as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Base poll interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Maximum poll interval in milliseconds.
    #[arg(long)]
    max_interval_ms: Option<u64>,

    /// Always poll at the base interval.
    #[arg(long)]
    no_adaptive: bool,

    /// Consecutive failures before polling stops.
    #[arg(long)]
    breaker_threshold: Option<u32>,

    /// Summary debounce delay in milliseconds.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Do not read the status note.
    #[arg(long)]
    no_note: bool,

    /// Status note filename inside the git metadata directory.
    #[arg(long)]
    note_file: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Command::Watch(args) => runtime.block_on(run_watch(args)),
        Command::Status(args) => runtime.block_on(run_status(args)),
    }
}

/// Runs the watch command until a shutdown signal arrives.
async fn run_watch(args: WatchArgs) -> Result<()> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    apply_watch_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let bus = BroadcastPublisher::new();
    let monitor = build_monitor(&args.target, config, &bus).await?;
    let mut events = bus.subscribe();
    monitor.listen_for_refresh(bus.subscribe_refresh());

    info!(
        worktree = %monitor.identity().id,
        path = %monitor.identity().path.display(),
        "Monitor running. Press Ctrl+C to stop."
    );

    let starter = monitor.clone();
    tokio::spawn(async move { starter.start().await });

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }

            received = events.recv() => match received {
                Ok(event) => print_event(&event, args.target.json)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Output fell behind, some snapshots were skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.stop();
    info!("Monitor stopped");
    Ok(())
}

/// Runs the status command.
async fn run_status(args: TargetArgs) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let bus = BroadcastPublisher::new();
    let monitor = build_monitor(&args, config, &bus).await?;

    let outcome = monitor
        .update(true)
        .await
        .context("Failed to inspect worktree")?;
    debug!(?outcome, "Status cycle finished");

    print_state(&monitor.get_state(), args.json)?;
    monitor.stop();
    Ok(())
}

fn apply_watch_overrides(config: &mut Config, args: &WatchArgs) {
    if let Some(ms) = args.interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = args.max_interval_ms {
        config.max_poll_interval = Duration::from_millis(ms);
    }
    if args.no_adaptive {
        config.adaptive_backoff = false;
    }
    if let Some(threshold) = args.breaker_threshold {
        config.breaker_threshold = threshold;
    }
    if let Some(ms) = args.debounce_ms {
        config.summary_debounce = Duration::from_millis(ms);
    }
    if args.no_note {
        config.note_enabled = false;
    }
    if let Some(ref name) = args.note_file {
        config.note_filename = name.clone();
    }
}

async fn build_monitor(
    target: &TargetArgs,
    mut config: Config,
    bus: &BroadcastPublisher,
) -> Result<WorktreeMonitor> {
    if let Some(ref branch) = target.main_branch {
        config.main_branch = branch.clone();
    }

    let path = tokio::fs::canonicalize(&target.path)
        .await
        .with_context(|| format!("Worktree path {} is not accessible", target.path.display()))?;
    let id = target
        .id
        .clone()
        .unwrap_or_else(|| derive_worktree_id(&path));
    let name = target.name.clone().unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone())
    });
    let branch = current_branch(&path).await;

    let identity = WorktreeIdentity::new(id, path);
    let initial = WorktreeState::initial(&identity, name, branch);

    WorktreeMonitor::new(
        identity,
        initial,
        config,
        Collaborators {
            fetcher: Arc::new(GitCliFetcher::new()),
            classifier: Arc::new(HeuristicMoodClassifier::new()),
            generator: Arc::new(DisabledSummaryGenerator),
            issue_resolver: Arc::new(NoopIssueResolver),
            publisher: Arc::new(bus.clone()),
        },
    )
    .context("Failed to create monitor")
}

/// Derives a stable id from the canonical worktree path.
fn derive_worktree_id(path: &Path) -> String {
    Uuid::new_v5(&TREELINE_NAMESPACE, path.to_string_lossy().as_bytes()).to_string()
}

/// Reads the checked-out branch, `None` when detached or unknown.
async fn current_branch(path: &Path) -> Option<String> {
    let output = ProcessCommand::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}

fn print_event(event: &WorktreeEvent, json: bool) -> Result<()> {
    print_state(&event.snapshot, json)
}

fn print_state(state: &WorktreeState, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(state).context("Failed to serialize snapshot")?;
        println!("{line}");
        return Ok(());
    }

    let branch = state.branch.as_deref().unwrap_or("(detached)");
    let (insertions, deletions) = state
        .changes
        .as_ref()
        .map_or((0, 0), |c| (c.insertions, c.deletions));
    let issue = state
        .issue_number
        .map(|n| format!(" #{n}"))
        .unwrap_or_default();

    println!(
        "{} [{}{}] {:?} {} files (+{} -{}) | {}",
        state.name,
        branch,
        issue,
        state.mood,
        state.modified_count,
        insertions,
        deletions,
        state.summary
    );
    if let Some(ref note) = state.note {
        println!("    note: {}", note.text);
    }
    Ok(())
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr so stdout carries only snapshots.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
    });
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worktree_id_is_stable() {
        let a = derive_worktree_id(Path::new("/repo/feature"));
        let b = derive_worktree_id(Path::new("/repo/feature"));
        let c = derive_worktree_id(Path::new("/repo/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cli_parses_watch_overrides() {
        let cli = Cli::parse_from([
            "treeline-monitor",
            "watch",
            "/repo/wt",
            "--interval-ms",
            "500",
            "--no-adaptive",
            "--note-file",
            "agent-status",
            "--json",
        ]);
        let Command::Watch(args) = cli.command else {
            panic!("expected watch command");
        };
        assert_eq!(args.target.path, PathBuf::from("/repo/wt"));
        assert!(args.target.json);

        let mut config = Config::default();
        apply_watch_overrides(&mut config, &args);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(!config.adaptive_backoff);
        assert_eq!(config.note_filename, "agent-status");
        assert!(config.note_enabled);
    }

    #[test]
    fn test_cli_status_defaults_to_current_dir() {
        let cli = Cli::parse_from(["treeline-monitor", "status"]);
        let Command::Status(args) = cli.command else {
            panic!("expected status command");
        };
        assert_eq!(args.path, PathBuf::from("."));
        assert!(!args.json);
    }

    #[test]
    fn test_log_json_is_global() {
        let cli = Cli::parse_from(["treeline-monitor", "status", "--log-json"]);
        assert!(cli.log_json);
        assert!(!Cli::parse_from(["treeline-monitor", "status"]).log_json);
    }
}
