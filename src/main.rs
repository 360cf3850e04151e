use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use waggle::config::Config;
use waggle::core::{initial_node, ExecutionGraph, PlanGraph, TaskStatus};
use waggle::orchestration::{Coordinator, RunEvent, RunFailure, RunOutcome, RunParams};
use waggle::plan::parse_plan;
use waggle::{zlog, Result};

/// Waggle - streams a plan for a goal and executes it as a task graph
#[derive(Parser, Debug)]
#[command(name = "waggle")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WAGGLE_DEBUG=1      Enable debug logging (alternative to --debug)\n    WAGGLE_DEBUG=trace  Also log raw plan chunks and every packet")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.waggle/waggle.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Plan a goal and execute every task of the plan
    Run {
        /// The goal in natural language
        goal: String,

        /// Goal id sent to the services (default: random)
        #[arg(long)]
        goal_id: Option<String>,

        /// Execution id sent to the services (default: random)
        #[arg(long)]
        execution_id: Option<String>,

        /// Print the outcome as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Parse a plan document and print the graph a run would execute as JSON
    Parse {
        /// File holding a "levels" plan (YAML or JSON)
        file: PathBuf,

        /// Goal shown on the plan node (default: the file name)
        #[arg(long)]
        goal: Option<String>,
    },
    /// Show the effective configuration
    Config {
        /// Write the configuration file if it does not exist yet
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    waggle::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            goal,
            goal_id,
            execution_id,
            json,
        } => run_goal(goal, goal_id, execution_id, json),
        Command::Parse { file, goal } => run_parse(file, goal),
        Command::Config { init } => run_config(init),
    }
}

fn run_goal(
    goal: String,
    goal_id: Option<String>,
    execution_id: Option<String>,
    json: bool,
) -> Result<()> {
    let config = Config::load()?;
    let mut params = RunParams::new(goal).with_agents(config.agents.clone());
    if let Some(id) = goal_id {
        params.goal_id = id;
    }
    if let Some(id) = execution_id {
        params.execution_id = id;
    }
    zlog!(
        "Run command: goal={:?}, goal_id={}, execution_id={}",
        params.goal,
        params.goal_id,
        params.execution_id
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let coordinator = Coordinator::from_config(&config)?;
        let run = coordinator.start(params.clone());

        let signal = run.signal();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                zlog!("Interrupted, cancelling run");
                signal.cancel();
            }
        });

        let mut events = run.subscribe();
        let progress = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if !json => print_event(&event),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let result = run.execute().await;
        interrupt.abort();
        progress.abort();
        Ok::<_, waggle::Error>(result)
    })?;

    if json {
        print_json(&params, &result)?;
    } else {
        print_summary(&result);
    }
    result.map(|_| ()).map_err(|failure| failure.error)
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::TaskDispatched { node_id } => eprintln!("  → {}", node_id),
        RunEvent::PacketInjected {
            node_id, status, ..
        } if *status != TaskStatus::Working => eprintln!("  {} {}", node_id, status),
        RunEvent::GraphUpdated { nodes, edges } => {
            eprintln!("  plan: {} nodes, {} edges", nodes, edges)
        }
        RunEvent::GoalReached { completed } => eprintln!("  goal reached ({} tasks)", completed),
        RunEvent::RunAborted { reason } => eprintln!("  aborted: {}", reason),
        RunEvent::PacketInjected { .. } => {}
    }
}

fn sorted_results(outcome: &RunOutcome) -> BTreeMap<&str, Option<&str>> {
    outcome
        .task_results
        .iter()
        .map(|(id, packet)| (id.as_str(), packet.terminal_value()))
        .collect()
}

fn print_summary(result: &std::result::Result<RunOutcome, RunFailure>) {
    let (status, outcome) = match result {
        Ok(outcome) => ("DONE".to_string(), outcome),
        Err(failure) if failure.is_cancellation() => ("CANCELLED".to_string(), &failure.partial),
        Err(failure) => (format!("ERROR: {}", failure.error), &failure.partial),
    };
    println!();
    println!("  Status:  {}", status);
    println!("  Tasks:   {}", outcome.task_results.len());
    println!();
    for (id, value) in sorted_results(outcome) {
        println!("[{}]", id);
        println!("{}", value.unwrap_or_default());
        println!();
    }
}

fn print_json(params: &RunParams, result: &std::result::Result<RunOutcome, RunFailure>) -> Result<()> {
    let (status, error, outcome) = match result {
        Ok(outcome) => ("DONE", None, outcome),
        Err(failure) if failure.is_cancellation() => ("CANCELLED", None, &failure.partial),
        Err(failure) => ("ERROR", Some(failure.error.to_string()), &failure.partial),
    };
    let json_output = serde_json::json!({
        "goalId": params.goal_id,
        "executionId": params.execution_id,
        "status": status,
        "error": error,
        "results": sorted_results(outcome),
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);
    Ok(())
}

/// The graph a run would execute for plan `text`, root hookups included.
fn plan_graph(text: &str, goal: &str) -> Result<PlanGraph> {
    let mut graph = ExecutionGraph::new(initial_node(goal));
    graph.merge(&parse_plan(text)?)?;
    Ok(graph.snapshot())
}

fn run_parse(file: PathBuf, goal: Option<String>) -> Result<()> {
    let text = std::fs::read_to_string(&file)?;
    let goal = goal.unwrap_or_else(|| file.display().to_string());
    let graph = plan_graph(&text, &goal)?;
    zlog!(
        "Parsed {}: {} nodes, {} edges",
        file.display(),
        graph.nodes.len(),
        graph.edges.len()
    );
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

fn run_config(init: bool) -> Result<()> {
    let path = Config::config_path()?;
    let config = Config::load_from(&path)?;
    if init && !path.exists() {
        config.save()?;
        zlog!("Wrote default config to {}", path.display());
    }
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
