// CLI Interface
//
// This module provides the command-line interface for the coordination engine.

use crate::config::EngineConfig;
use crate::engine::{ContextUpdateParams, Engine};
use crate::mcp::McpServer;
use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use lecontexte::{ReindexOptions, TriggerType};
use lecycle::{ApprovalDecision, CoordinationEvent, OperationType, PlanRequest};
use letravail::ProgressReporter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// lecoord - Lifecycle coordination and context maintenance engine
#[derive(Parser, Debug)]
#[command(name = "lecoord")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Coordinate document lifecycle operations and keep derived context in sync", long_about = None)]
#[command(subcommand_required = false)]
#[command(arg_required_else_help = false)]
pub struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(global = true, long = "workspace", short = 'w')]
    pub workspace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Compatibility flag for some AI tools (defaults to MCP stdio mode)
    #[arg(long = "stdio")]
    pub stdio: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the MCP tool server on stdio
    Mcp {
        /// Compatibility flag for some AI tools
        #[arg(long = "stdio")]
        stdio: bool,
    },

    /// Build a coordination plan and print it without executing
    Plan {
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Plan and execute a coordinated operation
    Execute {
        #[command(flatten)]
        plan: PlanArgs,

        /// Approve every gate under this approver name
        #[arg(long = "approve-as", value_name = "NAME")]
        approve_as: Option<String>,
    },

    /// Show snapshots that can still be rolled back
    Status,

    /// Restore the files captured by a holistic update
    Rollback {
        /// Update (snapshot) identifier
        #[arg(value_name = "UPDATE_ID")]
        update_id: String,

        /// Skip the integrity check before restoring
        #[arg(long = "no-validate")]
        no_validate: bool,
    },

    /// Regenerate context for a set of changed files
    Update {
        /// Changed files, relative to the workspace root
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Commit that produced the change
        #[arg(long = "commit")]
        commit: Option<String>,

        /// Performance budget in seconds
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },

    /// Regenerate context for every domain
    Reindex {
        /// Files per batch
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,

        /// Overall budget in seconds
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },

    /// Purge expired snapshots and trim update history
    Maintenance {
        /// Report what would be purged without deleting
        #[arg(long = "dry-run")]
        dry_run: bool,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long = "force")]
        force: bool,
    },
}

/// Plan arguments shared by `plan` and `execute`
#[derive(clap::Args, Debug, Clone)]
pub struct PlanArgs {
    /// Operation type (newconcepts-migration, placeholder-conversion, document-restructure, full-lifecycle)
    #[arg(value_name = "TYPE")]
    pub operation_type: OperationType,

    /// Document to include (repeatable)
    #[arg(long = "doc", value_name = "PATH")]
    pub documents: Vec<PathBuf>,

    /// Placeholder to convert (repeatable)
    #[arg(long = "placeholder", value_name = "ID")]
    pub placeholders: Vec<String>,

    /// Destination domain
    #[arg(long = "domain")]
    pub target_domain: Option<String>,

    /// Recorded on migrated documents
    #[arg(long = "reason")]
    pub reason: Option<String>,
}

impl From<PlanArgs> for PlanRequest {
    fn from(args: PlanArgs) -> Self {
        PlanRequest {
            operation_type: args.operation_type,
            placeholder_ids: args.placeholders,
            document_paths: args.documents,
            target_domain: args.target_domain,
            migration_reason: args.reason,
        }
    }
}

impl Cli {
    /// Run the CLI
    pub async fn run(self) -> AnyhowResult<()> {
        init_logging_impl(self.verbose);

        let workspace = get_workspace_path(self.workspace)?;

        // Default to Mcp if no command is provided or if --stdio is set
        let command = if self.stdio {
            Commands::Mcp { stdio: true }
        } else {
            self.command.unwrap_or(Commands::Mcp { stdio: false })
        };

        match command {
            Commands::Mcp { .. } => cmd_mcp_stdio_impl(workspace).await,
            Commands::Plan { plan } => cmd_plan_impl(workspace, plan),
            Commands::Execute { plan, approve_as } => {
                cmd_execute_impl(workspace, plan, approve_as).await
            }
            Commands::Status => cmd_status_impl(workspace),
            Commands::Rollback {
                update_id,
                no_validate,
            } => cmd_rollback_impl(workspace, update_id, !no_validate),
            Commands::Update {
                files,
                commit,
                timeout,
            } => cmd_update_impl(workspace, files, commit, timeout).await,
            Commands::Reindex {
                batch_size,
                timeout,
            } => cmd_reindex_impl(workspace, batch_size, timeout).await,
            Commands::Maintenance { dry_run } => cmd_maintenance_impl(workspace, dry_run),
            Commands::InitConfig { force } => cmd_init_config_impl(workspace, force),
        }
    }
}

/// Initialize logging implementation
///
/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so stdout stays free for
/// JSON-RPC and command output.
fn init_logging_impl(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Get workspace path from explicit path or current directory
fn get_workspace_path(explicit: Option<PathBuf>) -> AnyhowResult<PathBuf> {
    let path = match explicit {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    path.canonicalize()
        .with_context(|| format!("Failed to canonicalize workspace path: {}", path.display()))
}

fn open_engine(workspace: PathBuf) -> AnyhowResult<Engine> {
    Engine::load(&workspace)
        .with_context(|| format!("Failed to open workspace {}", workspace.display()))
}

fn print_json<T: Serialize>(value: &T) -> AnyhowResult<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", text);
    Ok(())
}

/// MCP stdio command implementation
/// Lets AI tools start the engine as a subprocess
async fn cmd_mcp_stdio_impl(workspace: PathBuf) -> AnyhowResult<()> {
    let engine = Arc::new(open_engine(workspace)?);
    let _events = engine.spawn_event_log();

    info!("Reading JSON-RPC from stdin, writing to stdout");
    McpServer::new(engine).run_stdio().await
}

fn cmd_plan_impl(workspace: PathBuf, args: PlanArgs) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let plan = engine
        .coordinator()
        .create_coordination_plan(args.into())
        .context("Failed to create coordination plan")?;
    print_json(&plan)
}

async fn cmd_execute_impl(
    workspace: PathBuf,
    args: PlanArgs,
    approve_as: Option<String>,
) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let _events = engine.spawn_event_log();

    let plan = engine
        .coordinator()
        .create_coordination_plan(args.into())
        .context("Failed to create coordination plan")?;

    if !plan.approval_gates.is_empty() && approve_as.is_none() {
        warn!(
            "Plan {} has {} approval gate(s) and no --approve-as; execution will wait until the approval deadline",
            plan.plan_id,
            plan.approval_gates.len()
        );
    }
    let approver = approve_as.map(|name| spawn_auto_approver(&engine, name));

    let outcome = engine
        .coordinator()
        .execute_coordinated_operation(&plan.plan_id, None)
        .await;

    if let Some(handle) = approver {
        handle.abort();
    }

    let operation = outcome.context("Failed to execute coordinated operation")?;
    print_json(&operation)?;

    match &operation.error {
        Some(error) => anyhow::bail!(
            "Operation {} ended {}: {} ({})",
            operation.operation_id,
            operation.status,
            error.message,
            error.kind
        ),
        None => Ok(()),
    }
}

/// Approve every gate the coordinator raises
fn spawn_auto_approver(engine: &Engine, approver: String) -> JoinHandle<()> {
    let mut events = engine.coordinator().subscribe();
    let approvals = Arc::clone(engine.coordinator().approvals());

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoordinationEvent::ApprovalRequested { approval_id, .. }) => {
                    match approvals.submit_response(
                        &approval_id,
                        &approver,
                        ApprovalDecision::Approved,
                        Some("approved from the command line".to_string()),
                    ) {
                        Ok(request) => info!("Approved {} ({:?})", approval_id, request.status),
                        Err(e) => warn!("Failed to approve {}: {}", approval_id, e),
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn cmd_status_impl(workspace: PathBuf) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let pending = engine.rollback().get_pending_rollbacks();
    print_json(&serde_json::json!({
        "workspace": engine.workspace_root(),
        "configFile": EngineConfig::path(engine.workspace_root()),
        "snapshotStore": engine.rollback().store_root(),
        "pendingRollbacks": pending,
    }))
}

fn cmd_rollback_impl(workspace: PathBuf, update_id: String, validate: bool) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let report = engine
        .context()
        .rollback_update(&update_id, validate)
        .with_context(|| format!("Failed to roll back update {}", update_id))?;
    print_json(&report)
}

async fn cmd_update_impl(
    workspace: PathBuf,
    files: Vec<PathBuf>,
    commit: Option<String>,
    timeout: Option<u64>,
) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let request = ContextUpdateParams {
        changed_files: files,
        git_commit_hash: commit,
        trigger_type: TriggerType::Manual,
        performance_timeout: timeout,
    }
    .into_request(engine.context().config().default_timeout());

    let result = engine
        .context()
        .execute_holistic_update(request, None)
        .await;
    print_json(&result)?;

    match &result.error {
        Some(error) if !result.success => {
            anyhow::bail!("Update {} failed: {}", result.update_id, error)
        }
        _ => Ok(()),
    }
}

async fn cmd_reindex_impl(
    workspace: PathBuf,
    batch_size: Option<usize>,
    timeout: Option<u64>,
) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let progress = ProgressReporter::new(|current, message| {
        info!("[{:>3}%] {}", current, message);
    });

    let options = ReindexOptions {
        batch_size,
        timeout: timeout.map(Duration::from_secs),
    };
    let report = engine
        .context()
        .full_repository_reindex(options, None, &progress)
        .await
        .context("Reindex failed")?;
    print_json(&report)
}

fn cmd_maintenance_impl(workspace: PathBuf, dry_run: bool) -> AnyhowResult<()> {
    let engine = open_engine(workspace)?;
    let report = engine
        .perform_maintenance(dry_run)
        .context("Maintenance failed")?;
    print_json(&report)
}

fn cmd_init_config_impl(workspace: PathBuf, force: bool) -> AnyhowResult<()> {
    let path = EngineConfig::path(&workspace);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let written = EngineConfig::default().save(&workspace)?;
    println!("Wrote {}", written.display());
    Ok(())
}

/// Main entry point for the CLI
pub async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();
    cli.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_mcp() {
        let cli = Cli::try_parse_from(["lecoord"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["lecoord", "--stdio"]).unwrap();
        assert!(cli.stdio);

        let cli = Cli::try_parse_from(["lecoord", "mcp"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Mcp { .. })));
    }

    #[test]
    fn test_execute_command() {
        let cli = Cli::try_parse_from([
            "lecoord",
            "-w",
            "/tmp/ws",
            "execute",
            "newconcepts-migration",
            "--doc",
            "docs/newconcepts/a.md",
            "--domain",
            "analysis",
            "--approve-as",
            "alice",
        ])
        .unwrap();

        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
        match cli.command {
            Some(Commands::Execute { plan, approve_as }) => {
                assert_eq!(plan.operation_type, OperationType::NewconceptsMigration);
                assert_eq!(plan.documents, vec![PathBuf::from("docs/newconcepts/a.md")]);
                assert_eq!(approve_as.as_deref(), Some("alice"));

                let request = PlanRequest::from(plan);
                assert_eq!(request.target_domain.as_deref(), Some("analysis"));
            }
            other => panic!("Expected Execute command, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_operation_type_is_rejected() {
        assert!(Cli::try_parse_from(["lecoord", "plan", "teleport"]).is_err());
    }

    #[test]
    fn test_update_requires_files() {
        assert!(Cli::try_parse_from(["lecoord", "update"]).is_err());

        let cli =
            Cli::try_parse_from(["lecoord", "update", "src/a.rs", "--timeout", "15"]).unwrap();
        match cli.command {
            Some(Commands::Update { files, timeout, .. }) => {
                assert_eq!(files, vec![PathBuf::from("src/a.rs")]);
                assert_eq!(timeout, Some(15));
            }
            other => panic!("Expected Update command, got {:?}", other),
        }
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().to_path_buf();
        cmd_init_config_impl(ws.clone(), false).unwrap();
        assert!(EngineConfig::path(&ws).exists());
        assert!(cmd_init_config_impl(ws.clone(), false).is_err());
        cmd_init_config_impl(ws, true).unwrap();
    }
}
