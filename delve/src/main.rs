//! `delve`: recursive research runs from the command line.
//!
//! Configuration lives in `.delve/config.toml`; every run writes its state,
//! event log, and collaborator transcripts under `.delve/runs/<run-id>/`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use delve::exit_codes;
use delve::io::layout::init_delve;
use delve::logging;
use delve::start::{LimitOverrides, StartOptions, start_research};
use delve::state::ResearchStatus;
use delve::validate::{show_state_file, validate_state_file};

#[derive(Parser)]
#[command(name = "delve", version, about = "Recursive research orchestrator")]
struct Cli {
    /// Log run lifecycle to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.delve/config.toml` with defaults.
    Init {
        /// Overwrite an existing `.delve/`.
        #[arg(short, long)]
        force: bool,
    },
    /// Research an objective with the configured collaborators.
    Run(RunArgs),
    /// Check a state file against the schema and invariants.
    Validate {
        /// Path to a `state.json`.
        path: PathBuf,
    },
    /// Print the tree outline, findings, and final answer of a state file.
    Show {
        /// Path to a `state.json`.
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// The research objective.
    #[arg(long)]
    objective: String,

    /// What a complete answer must cover.
    #[arg(long)]
    success_criteria: Option<String>,

    #[arg(long)]
    max_nodes: Option<usize>,

    #[arg(long)]
    max_concurrency: Option<usize>,

    #[arg(long)]
    max_time_secs: Option<u64>,

    #[arg(long)]
    max_depth: Option<u32>,
}

impl RunArgs {
    fn into_options(self) -> StartOptions {
        StartOptions {
            objective: self.objective,
            success_criteria: self.success_criteria,
            overrides: LimitOverrides {
                max_nodes: self.max_nodes,
                max_concurrency: self.max_concurrency,
                max_time_secs: self.max_time_secs,
                max_depth: self.max_depth,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(command: Command) -> Result<i32> {
    let root = Path::new(".");
    match command {
        Command::Init { force } => {
            let paths = init_delve(root, force)?;
            println!("wrote {}", paths.config_path.display());
            Ok(exit_codes::OK)
        }
        Command::Run(args) => cmd_run(root, args).await,
        Command::Validate { path } => {
            let outcome = validate_state_file(&path)?;
            println!(
                "ok: {} ({} nodes, {} findings, {} decisions)",
                outcome.run_id, outcome.nodes, outcome.findings, outcome.decisions
            );
            Ok(exit_codes::OK)
        }
        Command::Show { path } => {
            print!("{}", show_state_file(&path)?);
            Ok(exit_codes::OK)
        }
    }
}

async fn cmd_run(root: &Path, args: RunArgs) -> Result<i32> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping research");
            trigger.cancel();
        }
    });

    let outcome = start_research(root, args.into_options(), cancel).await?;
    if let Some(answer) = &outcome.state.final_answer {
        println!("{}", answer.trim_end());
    }
    eprintln!("state: {}", outcome.paths.state_path.display());
    Ok(match outcome.state.status {
        ResearchStatus::Stopped => exit_codes::STOPPED,
        _ => exit_codes::OK,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["delve", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "delve",
            "-v",
            "run",
            "--objective",
            "Explain tokio",
            "--max-nodes",
            "5",
            "--max-time-secs",
            "30",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = args.into_options();
        assert_eq!(options.objective, "Explain tokio");
        assert_eq!(options.overrides.max_nodes, Some(5));
        assert_eq!(options.overrides.max_time_secs, Some(30));
        assert_eq!(options.overrides.max_depth, None);
    }

    #[test]
    fn run_requires_an_objective() {
        assert!(Cli::try_parse_from(["delve", "run"]).is_err());
    }
}
