//! `workloop`: run a coding agent over a queue of work items until the work is
//! done or a limit is hit.
//!
//! State lives in `.workloop/` under the current directory; see `workloop init`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use workloop::controller::{LoopController, LoopOptions, PlanOutcome, RunMode};
use workloop::core::machine::{LoopOutcome, LoopStop};
use workloop::exit_codes;
use workloop::init::{InitOptions, init_workloop};
use workloop::io::agent::CommandAgent;
use workloop::io::config::{ConfigOverrides, SourceKind, WorkloopConfig, load_merged_config};
use workloop::io::lock::RunLock;
use workloop::io::operator::StdioOperator;
use workloop::io::paths::WorkloopPaths;
use workloop::io::progress::ProgressLog;
use workloop::io::session::SessionStore;
use workloop::io::vcs::{GitVcs, NoVcs, Vcs};
use workloop::io::work_items::{WorkItemSource, build_source};
use workloop::logging;
use workloop::select::rank_items;
use workloop::status::status_report;

#[derive(Parser)]
#[command(
    name = "workloop",
    version,
    about = "Drive a coding agent through ranked work items"
)]
struct Cli {
    /// Work item source (overrides `source.kind`).
    #[arg(long, global = true, value_enum)]
    source: Option<SourceKind>,
    /// Directory of work item files (overrides `files.dir`).
    #[arg(long, global = true, value_name = "DIR")]
    specs_dir: Option<PathBuf>,
    /// Iteration budget for this invocation (overrides `max_iterations`).
    #[arg(long, global = true, value_name = "N")]
    max_iterations: Option<u32>,
    /// Per-invocation agent timeout (overrides `agent.timeout_secs`).
    #[arg(long, global = true, value_name = "SECS")]
    agent_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.workloop/` with a default config and work item directory.
    Init {
        /// Overwrite the existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// List actionable work items in selection order.
    Rank,
    /// Commit to a work item (the top ranked one unless ITEM_ID is given).
    Plan {
        item_id: Option<String>,
        /// Replace an active session.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a single iteration.
    Once,
    /// Run iterations, confirming before each one.
    Run {
        #[arg(long, value_name = "N")]
        max: Option<u32>,
    },
    /// Run iterations without confirmation (away from keyboard).
    Afk {
        #[arg(long, value_name = "N")]
        max: Option<u32>,
    },
    /// Show the session, progress log and next work item.
    Status,
    /// Discard the session, progress log and any stale run lock.
    Reset {
        /// Remove the run lock even if its recorded process is still running.
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    fn overrides(&self, max: Option<u32>) -> ConfigOverrides {
        ConfigOverrides {
            source: self.source,
            specs_dir: self.specs_dir.clone(),
            max_iterations: max.or(self.max_iterations),
            agent_timeout_secs: self.agent_timeout,
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve working directory")?;
    let paths = WorkloopPaths::new(&root);
    match &cli.command {
        Command::Init { force } => cmd_init(&root, *force),
        Command::Rank => cmd_rank(&cli, &paths),
        Command::Plan { item_id, force } => cmd_plan(&cli, &paths, item_id.as_deref(), *force),
        Command::Once => cmd_loop(&cli, &paths, LoopKind::Once),
        Command::Run { max } => cmd_loop(&cli, &paths, LoopKind::Interactive(*max)),
        Command::Afk { max } => cmd_loop(&cli, &paths, LoopKind::Autonomous(*max)),
        Command::Status => cmd_status(&cli, &paths),
        Command::Reset { force } => cmd_reset(&paths, *force),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workloop(root, &InitOptions { force })?;
    println!(
        "initialised {} (add work items to {})",
        paths.state_dir.display(),
        paths.default_specs_dir.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_rank(cli: &Cli, paths: &WorkloopPaths) -> Result<i32> {
    let config = load_merged_config(&paths.config_path, &cli.overrides(None))?;
    let source = build_source(&config, paths)?;
    let rows = rank_items(source.as_ref(), &config.ranking.policy())?;
    if rows.is_empty() {
        println!("no actionable work items");
        return Ok(exit_codes::NO_WORK);
    }
    println!(
        "{:<3} {:<24} {:<12} {:>5} {:>9} {:<8} TITLE",
        "#", "ID", "STATUS", "RISK", "PROGRESS", "PRIORITY"
    );
    for (idx, row) in rows.iter().enumerate() {
        println!(
            "{:<3} {:<24} {:<12} {:>5.2} {:>8}% {:<8} {}",
            idx + 1,
            row.id,
            row.status.as_str(),
            row.risk,
            row.progress,
            row.priority.map_or("-", |p| p.as_str()),
            row.title
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_plan(cli: &Cli, paths: &WorkloopPaths, item_id: Option<&str>, force: bool) -> Result<i32> {
    let config = load_merged_config(&paths.config_path, &cli.overrides(None))?;
    let source = build_source(&config, paths)?;
    let agent = CommandAgent::from_config(&config.agent);
    let options = LoopOptions::from_config(&config, RunMode::Interactive);
    let outcome = with_vcs(&config, paths, |vcs| {
        LoopController::new(paths, source.as_ref(), &agent, vcs, &StdioOperator, options)
            .plan(item_id, force)
    })?;
    match outcome {
        PlanOutcome::NoWork => {
            println!("no actionable work items");
            Ok(exit_codes::NO_WORK)
        }
        PlanOutcome::Planned(session) => {
            println!("planned {} ({})", session.item_id, session.item_title);
            if let Some(branch) = &session.branch_ref {
                println!("branch  {branch}");
            }
            Ok(exit_codes::OK)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LoopKind {
    Once,
    Interactive(Option<u32>),
    Autonomous(Option<u32>),
}

fn cmd_loop(cli: &Cli, paths: &WorkloopPaths, kind: LoopKind) -> Result<i32> {
    let (mode, max) = match kind {
        LoopKind::Once => (RunMode::Interactive, Some(1)),
        LoopKind::Interactive(max) => (RunMode::Interactive, max),
        LoopKind::Autonomous(max) => (RunMode::Autonomous, max),
    };
    let config = load_merged_config(&paths.config_path, &cli.overrides(max))?;
    let source = build_source(&config, paths)?;
    let agent = CommandAgent::from_config(&config.agent);
    let mut options = LoopOptions::from_config(&config, mode);
    if matches!(kind, LoopKind::Once) {
        options.chain = false;
    }

    let outcome = with_vcs(&config, paths, |vcs| {
        LoopController::new(paths, source.as_ref(), &agent, vcs, &StdioOperator, options)
            .run()
    })?;
    Ok(report_outcome(&outcome, matches!(kind, LoopKind::Once)))
}

/// Run `f` with the configured VCS collaborator.
fn with_vcs<T>(
    config: &WorkloopConfig,
    paths: &WorkloopPaths,
    f: impl FnOnce(&dyn Vcs) -> Result<T>,
) -> Result<T> {
    if config.vcs.enabled {
        f(&GitVcs::new(&paths.root, &config.vcs))
    } else {
        f(&NoVcs)
    }
}

fn report_outcome(outcome: &LoopOutcome, single_iteration: bool) -> i32 {
    for id in &outcome.completed {
        println!("completed {id}");
    }
    match &outcome.stop {
        LoopStop::NoWorkAvailable => {
            println!("no actionable work items");
            exit_codes::NO_WORK
        }
        LoopStop::Completed => {
            println!("done after {} iteration(s)", outcome.iterations_run);
            exit_codes::OK
        }
        LoopStop::MaxIterationsReached {
            item_id,
            iteration_count,
        } => {
            println!("{item_id}: {iteration_count} iteration(s) so far; resume with `workloop run`");
            if single_iteration {
                exit_codes::OK
            } else {
                exit_codes::MAX_ITERATIONS
            }
        }
        LoopStop::UserCancelled { item_id } => {
            println!("stopped; session for {item_id} kept");
            exit_codes::CANCELLED
        }
        LoopStop::Failed(err) => {
            eprintln!("{err}");
            eprintln!("session kept; fix the problem and run again to resume");
            exit_codes::INVALID
        }
    }
}

fn cmd_status(cli: &Cli, paths: &WorkloopPaths) -> Result<i32> {
    let config = load_merged_config(&paths.config_path, &cli.overrides(None))?;
    let policy = config.ranking.policy();
    let report = match build_source(&config, paths) {
        Ok(source) => status_report(paths, Ok(source.as_ref()), &policy),
        Err(err) => status_report::<dyn WorkItemSource>(paths, Err(err), &policy),
    };
    print!("{report}");
    Ok(exit_codes::OK)
}

fn cmd_reset(paths: &WorkloopPaths, force: bool) -> Result<i32> {
    // Refuse before touching anything a live run still owns.
    let had_lock = RunLock::remove_stale(&paths.lock_path, force)?;
    let sessions = SessionStore::new(&paths.session_path);
    let had_session = sessions.load().is_some() || paths.session_path.exists();
    sessions.clear()?;
    ProgressLog::new(&paths.progress_path).delete()?;
    println!(
        "reset: session {}, progress log removed{}",
        if had_session { "cleared" } else { "absent" },
        if had_lock { ", stale lock removed" } else { "" }
    );
    Ok(exit_codes::OK)
}
