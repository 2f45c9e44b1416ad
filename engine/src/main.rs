//! CLI entrypoint for the routing engine: decomposes tasks into plans and
//! runs them against whichever backend the router selects. Everything
//! here is orchestration over
//! `router-core`/`router-planner`/`router-scheduler`/`router-shadowbench`;
//! none of those crates know a CLI exists.

mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use router_core::RouteOutcome;
use router_observability::{init_process_logging, ProcessKind};
use router_types::{BackendId, Task, TaskType, Urgency};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use state::AppState;

#[derive(Parser)]
#[command(name = "router-engine", version, about = "Routes tasks across subscription, API, and local backends")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route a task end to end: plan it, execute each step, report results.
    Route {
        description: String,
        #[arg(long, value_name = "TYPE")]
        task_type: Option<String>,
        #[arg(long, value_name = "BACKEND")]
        force: Option<String>,
        #[arg(long, value_name = "LEVEL", default_value = "normal")]
        urgency: String,
        #[arg(long)]
        plan_only: bool,
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        #[arg(long)]
        approve: bool,
    },
    /// Decompose a task into a plan without executing it.
    Plan {
        description: String,
        #[arg(long, value_name = "LEVEL", default_value = "normal")]
        urgency: String,
    },
    /// Estimate cost and wall-clock time for a task without running it.
    Estimate { description: String },
    /// Print ledger, backend health, and scheduler queue summaries.
    Status,
    /// Inspect or drive the subscription dispatch queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Print recently completed scheduler items.
    History {
        #[arg(long, value_name = "BACKEND")]
        backend: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Tail the live active-context event stream a dashboard would consume.
    Dashboard,
}

#[derive(Subcommand)]
enum QueueAction {
    /// Enqueue a task against a specific subscription backend.
    Enqueue {
        description: String,
        #[arg(long, value_name = "BACKEND", default_value = "claude-code")]
        backend: String,
        #[arg(long, value_name = "LEVEL", default_value = "normal")]
        urgency: String,
    },
    /// Print the current queue snapshot.
    List,
    /// Remove a queued item or flag an active one as cancelled.
    Cancel { id: String },
    Pause,
    Resume,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logs_dir = router_observability::canonical_logs_dir_from_root(&router_core::paths::data_dir());
    let _guard = init_process_logging(ProcessKind::Engine, &logs_dir, 30).ok();

    match run(cli.command).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Route { description, task_type, force, urgency, plan_only, output, approve } => {
            let state = AppState::open().await?;
            let mut task = Task::new(description);
            task.task_type = task_type.as_deref().map(parse_task_type).transpose()?;
            task.urgency = parse_urgency(&urgency)?;
            task.force_backend = force.as_deref().map(str::parse).transpose().map_err(|e: String| anyhow::anyhow!(e))?;
            task.output_path = output.as_ref().map(|p| p.display().to_string());

            let options = router_core::RouteOptions { plan_only, pre_approved: approve };
            let outcome = state.router.route(task, options).await.map_err(|e| anyhow::anyhow!(e.message))?;
            print_route_outcome(&outcome);
            Ok(())
        }
        Command::Plan { description, urgency } => {
            let state = AppState::open().await?;
            let mut task = Task::new(description);
            task.urgency = parse_urgency(&urgency)?;
            let outcome = state
                .router
                .route(task, router_core::RouteOptions { plan_only: true, pre_approved: false })
                .await
                .map_err(|e| anyhow::anyhow!(e.message))?;
            print_route_outcome(&outcome);
            Ok(())
        }
        Command::Estimate { description } => {
            use router_planner::Planner;
            let planner = Planner::new();
            let task = Task::new(description);
            let plan = planner.decompose(&task);
            let breakdown = planner.estimate_cost(&plan);
            println!("estimated tokens: {}", breakdown.total_tokens);
            println!("estimated cost: ${:.2}", breakdown.total_api_cost);
            println!("estimated wall clock: {:.0} min", breakdown.total_wall_clock_minutes);
            println!("needs approval: {}", plan.needs_approval);
            Ok(())
        }
        Command::Status => {
            let state = AppState::open().await?;
            let report = state.router.ledger_report().await;
            println!("ledger:");
            println!("  claude-code tasks: {}", report.claude_code.tasks_completed);
            println!("  codex tasks:       {}", report.codex.tasks_completed);
            println!("  api tasks:         {} (${:.2} saved total)", report.api.tasks_completed, report.total_saved_usd);
            println!("  local tasks:       {}", report.local.tasks_completed);
            println!("backends:");
            for backend in BackendId::ALL {
                let health = state.router.health_of(backend).await;
                println!("  {backend}: {health:?} (score {})", health.score());
            }
            let snapshot = state.scheduler.snapshot().await;
            println!(
                "scheduler: {} queued, {} active, {} completed, paused={}",
                snapshot.queue.len(),
                snapshot.active.len(),
                snapshot.completed.len(),
                snapshot.paused
            );
            Ok(())
        }
        Command::Queue { action } => run_queue(action).await,
        Command::History { backend, limit } => {
            let state = AppState::open().await?;
            let snapshot = state.scheduler.snapshot().await;
            let backend_filter =
                backend.as_deref().map(str::parse::<BackendId>).transpose().map_err(|e: String| anyhow::anyhow!(e))?;
            for item in
                snapshot.completed.iter().filter(|c| backend_filter.map(|b| b == c.item.backend).unwrap_or(true)).take(limit)
            {
                println!(
                    "{} [{}] {} -> {}",
                    item.completed_at.to_rfc3339(),
                    item.item.backend,
                    item.item.task.description,
                    item.final_error.as_deref().unwrap_or("ok")
                );
            }
            Ok(())
        }
        Command::Dashboard => {
            let state = AppState::open().await?;
            println!("data dir: {}", state.data_dir.display());
            let mut events = BroadcastStream::new(state.events.subscribe());
            while let Some(event) = events.next().await {
                match event {
                    Ok(timestamped) => println!("{} {:?}", timestamped.at.to_rfc3339(), timestamped.event),
                    Err(_lagged) => println!("(dropped events, receiver lagged behind)"),
                }
            }
            Ok(())
        }
    }
}

async fn run_queue(action: QueueAction) -> anyhow::Result<()> {
    let state = AppState::open().await?;
    match action {
        QueueAction::Enqueue { description, backend, urgency } => {
            let mut task = Task::new(description);
            task.urgency = parse_urgency(&urgency)?;
            let backend: BackendId = backend.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let id = state.scheduler.enqueue(task, backend).await;
            println!("queued {id}");
            Ok(())
        }
        QueueAction::List => {
            let snapshot = state.scheduler.snapshot().await;
            for item in &snapshot.queue {
                println!("{} [{}] priority={} {}", item.id, item.backend, item.priority, item.task.description);
            }
            Ok(())
        }
        QueueAction::Cancel { id } => {
            let cancelled = state.scheduler.cancel(&id).await?;
            println!("{}", if cancelled { "cancelled" } else { "not found" });
            Ok(())
        }
        QueueAction::Pause => {
            state.scheduler.pause().await?;
            println!("paused");
            Ok(())
        }
        QueueAction::Resume => {
            state.scheduler.resume().await?;
            println!("resumed");
            Ok(())
        }
    }
}

fn print_route_outcome(outcome: &RouteOutcome) {
    match outcome {
        RouteOutcome::SelfHandle { reason } => println!("self-handled: {reason}"),
        RouteOutcome::DedupSkip { existing_task_id } => println!("duplicate of in-flight task {existing_task_id}"),
        RouteOutcome::Plan(plan) => {
            use router_planner::Planner;
            print!("{}", Planner::new().format_for_user(plan));
        }
        RouteOutcome::NeedsApproval { plan_id } => {
            println!("plan {plan_id} exceeds the approval threshold; re-run with --approve to proceed")
        }
        RouteOutcome::Completed(result) => {
            println!("plan {} completed, ${:.4} spent", result.plan_id, result.total_cost_usd);
            for step in &result.steps {
                let status = if step.success { "ok" } else { "failed" };
                println!(
                    "  [{}] {} via {} ({status})",
                    step.step_id,
                    step.error.as_deref().unwrap_or(&step.response),
                    step.backend
                );
            }
        }
    }
}

fn parse_task_type(raw: &str) -> anyhow::Result<TaskType> {
    Ok(match raw {
        "code" => TaskType::Code,
        "review" => TaskType::Review,
        "analysis" => TaskType::Analysis,
        "research" => TaskType::Research,
        "writing" => TaskType::Writing,
        "file-ops" => TaskType::FileOps,
        "docs" => TaskType::Docs,
        "testing" => TaskType::Testing,
        "other" => TaskType::Other,
        other => anyhow::bail!("unknown task type: {other}"),
    })
}

fn parse_urgency(raw: &str) -> anyhow::Result<Urgency> {
    Ok(match raw {
        "urgent" => Urgency::Urgent,
        "normal" => Urgency::Normal,
        "background" => Urgency::Background,
        other => anyhow::bail!("unknown urgency level: {other}"),
    })
}
