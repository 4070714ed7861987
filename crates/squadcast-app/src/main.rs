// squadcast entry point.
//
// Every subcommand loads config, opens the store, runs one pipeline step for
// a round, and prints the result. Logs go to stderr so stdout stays clean
// for `--json`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use squadcast_app::config;
use squadcast_app::data;
use squadcast_app::db::Store;
use squadcast_app::pipeline;
use squadcast_core::{
    Lineup, Money, ReplacementOutcome, RoundId, ScenarioReport, Selection, TransferReport,
    TransferStatus,
};

#[derive(Parser)]
#[command(name = "squadcast")]
#[command(about = "Fantasy squad selection, transfer advice, and forecast accuracy tracking")]
#[command(version)]
struct Cli {
    /// Directory holding defaults/, config/ and data/
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the player snapshot CSV into the store
    Import,

    /// Forecast every player for a round with the configured provider
    Forecast {
        #[arg(short, long)]
        round: u32,
    },

    /// Select the best squad and lineup for a round
    Select {
        #[arg(short, long)]
        round: u32,
        /// Override the configured budget (e.g. 95.5)
        #[arg(short, long)]
        budget: Option<f64>,
    },

    /// Suggest transfers for your squad
    Suggest {
        #[arg(short, long)]
        round: u32,
        /// Squad file (TOML with `bank`, `players`, optional `free_transfers`)
        #[arg(short, long)]
        squad: PathBuf,
        #[arg(short, long, default_value = "me")]
        user: String,
    },

    /// Project your squad with a set of swaps over the next rounds
    Scenario {
        #[arg(short, long)]
        round: u32,
        #[arg(short, long)]
        squad: PathBuf,
        /// Swap as OUT:IN player ids; repeat for several
        #[arg(long = "swap", required = true)]
        swaps: Vec<String>,
    },

    /// Score a concluded round against realized points
    Score {
        #[arg(short, long)]
        round: u32,
        /// Results CSV (defaults to <results_dir>/round_<n>.csv)
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Show stored accuracy history
    History,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = config::load_config_in(&cli.base_dir).context("failed to load configuration")?;
    let db_path = cli.base_dir.join(&config.db_path);
    let store = Store::open(&db_path.to_string_lossy()).context("failed to open database")?;
    info!("database opened at {}", db_path.display());

    match cli.command {
        Commands::Import => {
            let count = pipeline::import_players(&config, &store, &cli.base_dir)?;
            println!("imported {count} players");
        }
        Commands::Forecast { round } => {
            let run = pipeline::run_forecasts(&config, &store, &cli.base_dir, RoundId(round)).await?;
            println!(
                "{} forecasts stored for round {round}; {} unscored, {} failed batches ({} via fallback)",
                run.forecasts.len(),
                run.unscored.len(),
                run.failed_batches,
                run.fallback_batches
            );
        }
        Commands::Select { round, budget } => {
            let budget = budget
                .map(|b| Money::from_decimal(b).context("budget must be a finite number"))
                .transpose()?;
            let (selection, lineup) = pipeline::select(&config, &store, RoundId(round), budget)?;
            if cli.json {
                print_json(&SelectionOutput { selection: &selection, lineup: &lineup })?;
            } else {
                print_selection(&selection, &lineup);
            }
        }
        Commands::Suggest { round, squad, user } => {
            let squad = data::load_user_squad(&squad)?;
            let report = pipeline::suggest(&config, &store, RoundId(round), &user, &squad)?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }
        Commands::Scenario { round, squad, swaps } => {
            let squad = data::load_user_squad(&squad)?;
            let swaps = swaps
                .iter()
                .map(|s| pipeline::parse_swap(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = pipeline::scenario(&config, &store, RoundId(round), &squad, &swaps)?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_scenario(&report);
            }
        }
        Commands::Score { round, results } => {
            let round = RoundId(round);
            let realized = match results {
                Some(path) => data::load_results(&path)?,
                None => pipeline::load_round_results(&config, &cli.base_dir, round)?,
            };
            let score = pipeline::score(&config, &store, round, &realized)?;
            if cli.json {
                print_json(&score.record)?;
            } else {
                let r = &score.record;
                println!(
                    "{round}: {} players, {} correct, MAE {:.2}, accuracy {:.1}%",
                    r.players_analyzed, r.correct_predictions, r.mean_absolute_error, r.accuracy
                );
                if r.unscored > 0 || r.missing_results > 0 {
                    println!("  {} unscored, {} without results", r.unscored, r.missing_results);
                }
                if let Some(l) = r.lineup {
                    println!(
                        "  lineup: predicted {:.1}, realized {:.1} (captain {})",
                        l.predicted_points, l.realized_points, l.captain
                    );
                }
            }
        }
        Commands::History => {
            let (history, summary) = pipeline::history(&store)?;
            if cli.json {
                print_json(&summary)?;
            } else {
                for r in history.records() {
                    println!(
                        "{:>9}  {:>3} players  {:>3} correct  MAE {:>5.2}  {:>5.1}%",
                        r.round.to_string(),
                        r.players_analyzed,
                        r.correct_predictions,
                        r.mean_absolute_error,
                        r.accuracy
                    );
                }
                println!(
                    "{} rounds, {} predictions, overall accuracy {:.1}%, MAE {:.2}",
                    summary.rounds,
                    summary.players_analyzed,
                    summary.accuracy,
                    summary.mean_absolute_error
                );
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct SelectionOutput<'a> {
    selection: &'a Selection,
    lineup: &'a Lineup,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn print_selection(selection: &Selection, lineup: &Lineup) {
    println!(
        "squad: {:.1} forecast points, {} of {} spent",
        selection.total_forecast,
        selection.budget_used(),
        selection.budget_cap
    );
    for p in selection.squad.players() {
        let role = if p.id == lineup.captain {
            " (C)"
        } else if p.id == lineup.vice_captain {
            " (V)"
        } else if lineup.bench.contains(&p.id) {
            " [bench]"
        } else {
            ""
        };
        println!("  {} {:<24} {:>5}  {}{role}", p.position, p.name, p.price.to_string(), p.team);
    }
    println!(
        "lineup {}: {:.1} predicted points",
        lineup.formation, lineup.predicted_points
    );
    if !selection.forecast_issues.is_empty() {
        println!(
            "note: {} players had no usable forecast and were ranked at zero",
            selection.forecast_issues.len()
        );
    }
}

fn print_report(report: &TransferReport) {
    match report.status {
        TransferStatus::SuggestionsAvailable => {
            for s in &report.suggestions {
                println!(
                    "[{:<6}] {} -> {}  {:+.1} pts  {}",
                    s.priority.to_string(),
                    s.player_out,
                    s.player_in,
                    s.points_impact,
                    s.rationale
                );
            }
        }
        TransferStatus::NoTransfersNeeded => println!("no transfers needed"),
        TransferStatus::SwapsUnavailable => println!("transfer swap unavailable"),
    }
    let blocked = report
        .reviews
        .iter()
        .filter(|r| r.outcome == ReplacementOutcome::NoLegalReplacement)
        .count();
    if blocked > 0 && report.status == TransferStatus::SuggestionsAvailable {
        println!("{blocked} squad players have no affordable replacement");
    }
    if let Some(caveat) = &report.caveat {
        println!(
            "warning: {} high-priority moves but {} free transfers; extra moves cost {:.0} points",
            caveat.high_priority, caveat.free_transfers, caveat.points_cost
        );
    }
}

fn print_scenario(report: &ScenarioReport) {
    for p in &report.projections {
        println!(
            "{:>9}  current {:>5.1}  with swaps {:>5.1}  ({:+.1})",
            p.round.to_string(),
            p.baseline_points,
            p.scenario_points,
            p.delta()
        );
    }
    println!("net spend {}", report.net_spend);
    if report.is_legal() {
        return;
    }
    println!("warning: this squad could not be fielded");
    for violation in &report.violations {
        println!("  {violation}");
    }
    if let Some(shortfall) = report.bank_shortfall {
        println!("  swaps cost {shortfall} more than the bank holds");
    }
}

/// Initialize tracing to stderr.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("squadcast=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
