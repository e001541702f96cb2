//! `maestro` command-line tool.
//!
//! Inspects procedures and plans, validates configuration, and shows saved
//! workflow snapshots and incident reports. It does not execute agents.

use clap::{Parser, Subcommand};
use maestro_orchestrator::{
    procedures, FileReportStore, FileWorkflowStore, OrchestratorConfig, Procedure, WorkRequest,
    WorkflowPlan, WorkflowStore,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro — multi-agent workflow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in procedures
    Templates,
    /// Validate the config file and, optionally, a procedure
    Validate {
        /// Built-in procedure name or path to a procedure TOML file
        #[arg(short, long)]
        procedure: Option<String>,
    },
    /// Build and print the task plan for a procedure without running it
    Plan {
        /// Built-in procedure name or path to a procedure TOML file
        procedure: String,
        /// The work request text
        #[arg(short, long, default_value = "")]
        request: String,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show stored run artifacts
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// A saved workflow snapshot
    Workflow {
        /// Workflow id
        id: String,
        /// Directory holding workflow snapshots
        #[arg(long, default_value = ".maestro/workflows")]
        dir: PathBuf,
    },
    /// An incident report, rendered as Markdown
    Incident {
        /// Incident id
        id: Uuid,
        /// Directory holding incident reports (defaults to `diagnostics.report_dir`)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List saved workflows and incidents
    List {
        /// Directory holding workflow snapshots
        #[arg(long, default_value = ".maestro/workflows")]
        dir: PathBuf,
    },
}

fn resolve_procedure(spec: &str) -> anyhow::Result<Procedure> {
    if let Some(procedure) = procedures::by_name(spec) {
        return Ok(procedure);
    }
    let path = Path::new(spec);
    if !path.exists() {
        anyhow::bail!(
            "'{spec}' is neither a built-in procedure ({}) nor an existing file",
            procedures::builtin()
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(Procedure::load(path)?)
}

fn report_dir(config: &OrchestratorConfig, dir: Option<PathBuf>) -> PathBuf {
    dir.or_else(|| config.diagnostics.report_dir.clone())
        .unwrap_or_else(|| PathBuf::from(".maestro/incidents"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(&cli.config).map_err(|e| {
        anyhow::anyhow!("Failed to load config '{}': {}", cli.config.display(), e)
    })?;

    match cli.command {
        Commands::Templates => {
            for procedure in procedures::builtin() {
                let agents: Vec<String> =
                    procedure.agents().iter().map(ToString::to_string).collect();
                println!(
                    "{:<10} v{}  {} [{}]",
                    procedure.name,
                    procedure.version,
                    procedure.description,
                    agents.join(", ")
                );
            }
        }
        Commands::Validate { procedure } => {
            info!(config = %cli.config.display(), "Config is valid");
            println!("config: ok ({})", cli.config.display());
            if let Some(spec) = procedure {
                let procedure = resolve_procedure(&spec)?;
                procedure.validate()?;
                println!(
                    "procedure '{}': ok ({} steps)",
                    procedure.name,
                    procedure.steps.len()
                );
            }
        }
        Commands::Plan {
            procedure,
            request,
            json,
        } => {
            let procedure = resolve_procedure(&procedure)?;
            let request = WorkRequest::new(procedure, request).with_workflow_id("plan");
            let plan = WorkflowPlan::build(&request, &config)?;

            if json {
                let tasks = plan.graph.snapshot();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "procedure": plan.procedure,
                        "tasks": tasks,
                        "critical_path": plan.critical_path,
                    }))?
                );
                return Ok(());
            }

            println!("procedure: {} ({} tasks)", plan.procedure, plan.total_steps());
            for task in plan.graph.iter() {
                let settings = config.agent(task.agent);
                let state = if settings.enabled { "" } else { " [disabled]" };
                println!(
                    "  {:<16} {:<8} {}{}",
                    task.id,
                    task.priority.to_string(),
                    task.action,
                    state
                );
                if !task.dependencies.is_empty() {
                    println!("      after: {}", task.dependencies.join(", "));
                }
                if !task.parallel_with.is_empty() {
                    println!("      alongside: {}", task.parallel_with.join(", "));
                }
            }
            println!("critical path: {}", plan.critical_path.join(" -> "));
        }
        Commands::Show { what } => match what {
            ShowTarget::Workflow { id, dir } => {
                let store = FileWorkflowStore::new(dir).await?;
                let Some(state) = store.load(&id).await? else {
                    anyhow::bail!("workflow '{id}' not found");
                };
                println!(
                    "workflow {} ({}) status={} step {}/{}",
                    state.id, state.procedure, state.status, state.current_step, state.total_steps
                );
                for line in state.progress_lines() {
                    println!("  {line}");
                }
                if let Some(error) = &state.error {
                    println!("error: {error}");
                }
            }
            ShowTarget::Incident { id, dir } => {
                let reports = FileReportStore::new(report_dir(&config, dir)).await?;
                let Some(report) = reports.load(id).await? else {
                    anyhow::bail!("incident '{id}' not found");
                };
                println!("{}", report.to_markdown());
            }
            ShowTarget::List { dir } => {
                let store = FileWorkflowStore::new(dir).await?;
                for id in store.list().await? {
                    println!("workflow {id}");
                }
                let reports = FileReportStore::new(report_dir(&config, None)).await?;
                for id in reports.list().await? {
                    println!("incident {id}");
                }
            }
        },
    }

    Ok(())
}
