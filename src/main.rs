//! # Push-Puzzle Search Engine
//!
//! Command line front end for the search library.
//!
//! ## Usage
//! ```text
//! play go --fen-file level.txt --moves "up left" --movetime-ms 2000
//! play --threads 8 selfplay --games 100 --parallelism 4 --training
//! ```
//!
//! Settings come from `soko.toml` (or `--config`), then `SOKO_*` environment
//! variables, then the flags below.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mcts::action::parse_actions;
use mcts::config::{load_config, EngineConfig};
use mcts::engine::EngineController;
use mcts::mcts::SearchParams;
use mcts::neural::create_network;
use mcts::selfplay::SelfPlayTournament;
use mcts::soko::SokoBoard;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::reload;
use tracing_subscriber::{EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Configuration file, `soko.toml` when present otherwise
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Search worker threads; 0 uses every core
    #[clap(short, long)]
    threads: Option<usize>,

    /// Estimator backend (random, uniform)
    #[clap(short, long)]
    backend: Option<String>,

    #[clap(long)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search one position and print the best move
    Go {
        /// Level to search, the built-in level otherwise
        #[clap(long)]
        fen_file: Option<PathBuf>,

        /// Moves played from the level before searching
        #[clap(long, default_value = "")]
        moves: String,

        #[clap(long, default_value_t = 1000)]
        movetime_ms: u64,
    },
    /// Play a self-play tournament
    Selfplay {
        #[clap(long)]
        fen_file: Option<PathBuf>,

        #[clap(long)]
        games: Option<usize>,

        #[clap(long)]
        parallelism: Option<usize>,

        #[clap(long)]
        movetime_ms: Option<u64>,

        /// Write one training file per game
        #[clap(long, action = clap::ArgAction::SetTrue)]
        training: bool,

        #[clap(long)]
        output_dir: Option<PathBuf>,
    },
}

/// Level logged at while the configuration is being loaded.
fn bootstrap_level(flag: Option<&str>, env: Option<String>) -> String {
    flag.map(str::to_string)
        .or(env)
        .unwrap_or_else(|| "info".to_string())
}

fn init_tracing(level: &str) -> FilterHandle {
    use tracing_subscriber::{fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    handle
}

/// Switches to the configured level. `RUST_LOG` keeps precedence.
fn apply_log_level(handle: &FilterHandle, level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        warn!(error = %e, "could not apply the configured log level");
    }
}

fn read_fen(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|p| {
        fs::read_to_string(p).with_context(|| format!("Failed to read level from {}", p.display()))
    })
    .transpose()
}

fn apply_global_flags(config: &mut EngineConfig, args: &Args) {
    if let Some(threads) = args.threads {
        config.threads = if threads == 0 { num_cpus::get() } else { threads };
    }
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
}

fn run_go(config: EngineConfig, fen: Option<String>, moves: &str, movetime_ms: u64) -> Result<()> {
    let moves = parse_actions(moves)?;
    let mut engine = EngineController::new(config)?;
    engine.set_position(fen.as_deref(), &moves)?;

    let rx = engine.go(Some(Duration::from_millis(movetime_ms)))?;
    engine.wait()?;
    let best = rx.try_recv().context("Search ended without a best move")?;

    if let Some(board) = engine.position() {
        println!("{board}");
    }
    for stats in engine.root_stats() {
        let line = format!(
            "{:>6}  n={:<8} q={:+.3}  p={:.3}",
            stats.action.to_string(),
            stats.n,
            stats.q,
            stats.prior
        );
        if Some(stats.action) == best.best_move {
            println!("{}", line.bold());
        } else {
            println!("{}", line.dimmed());
        }
    }
    match best.best_move {
        Some(action) => println!(
            "{} {} (visits {}, q {:+.3})",
            "bestmove".green().bold(),
            action,
            best.visits,
            best.q
        ),
        None => println!("{} none", "bestmove".red().bold()),
    }
    Ok(())
}

fn run_selfplay(config: EngineConfig, fen: Option<String>) -> Result<()> {
    let start = match fen {
        Some(fen) => SokoBoard::from_fen(&fen)?,
        None => SokoBoard::startpos(),
    };
    let network = create_network(&config.backend)?;
    let params = SearchParams::new(&config.search)?;
    let tournament =
        SelfPlayTournament::new(start, network, config.selfplay.clone(), config.threads, params)?;
    let summary = tournament.run()?;

    println!(
        "{} games: {} {}, {} {}, {} undecided, {} moves",
        summary.games,
        summary.wins.to_string().green().bold(),
        "solved".green(),
        summary.losses.to_string().red().bold(),
        "failed".red(),
        summary.undecided,
        summary.moves
    );
    for file in &summary.files {
        println!("  {}", file.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = init_tracing(&bootstrap_level(
        args.log_level.as_deref(),
        std::env::var("SOKO_LOG_LEVEL").ok(),
    ));
    let mut config = load_config(args.config.as_deref())?;
    apply_global_flags(&mut config, &args);

    match args.command {
        Command::Go {
            fen_file,
            moves,
            movetime_ms,
        } => {
            config.validate()?;
            apply_log_level(&filter, &config.log_level);
            info!(threads = config.threads, backend = %config.backend, "engine ready");
            let fen = read_fen(fen_file.as_deref())?;
            run_go(config, fen, &moves, movetime_ms)
        }
        Command::Selfplay {
            fen_file,
            games,
            parallelism,
            movetime_ms,
            training,
            output_dir,
        } => {
            let selfplay = &mut config.selfplay;
            if let Some(games) = games {
                selfplay.games = games;
            }
            if let Some(parallelism) = parallelism {
                selfplay.parallelism = parallelism;
            }
            if let Some(movetime_ms) = movetime_ms {
                selfplay.movetime_ms = movetime_ms;
            }
            selfplay.training |= training;
            if output_dir.is_some() {
                selfplay.output_dir = output_dir;
            }
            config.validate()?;
            apply_log_level(&filter, &config.log_level);
            info!(threads = config.threads, backend = %config.backend, "engine ready");
            let fen = read_fen(fen_file.as_deref())?;
            run_selfplay(config, fen)
        }
    }
}
