// Integration tests for the squadcast pipeline.
//
// Each test builds a scratch project directory (defaults, player snapshot,
// results) and drives the same pipeline steps the CLI subcommands run:
// import, forecast, select, suggest, scenario, score, history.

use std::fs;
use std::path::{Path, PathBuf};

use squadcast_app::config::{self, Config};
use squadcast_app::data;
use squadcast_app::db::Store;
use squadcast_app::pipeline;
use squadcast_core::rules::team_count;
use squadcast_core::{
    is_legal_squad, Money, PlayerId, RoundId, SquadViolation, Swap, TeamId, TransferStatus,
};

// ===========================================================================
// Test helpers
// ===========================================================================

const FIXTURES: &str = "tests/fixtures";

fn crate_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Fresh project directory with `defaults/` and the fixture data files laid
/// out where the default strategy config expects them.
fn scratch_project(name: &str) -> PathBuf {
    let root = crate_root();
    let tmp = std::env::temp_dir().join(name);
    let _ = fs::remove_dir_all(&tmp);
    fs::create_dir_all(tmp.join("defaults")).unwrap();
    fs::create_dir_all(tmp.join("data/results")).unwrap();

    for file in ["rules.toml", "strategy.toml"] {
        fs::copy(root.join("defaults").join(file), tmp.join("defaults").join(file)).unwrap();
    }
    let fixtures = root.join(FIXTURES);
    fs::copy(fixtures.join("players.csv"), tmp.join("data/players.csv")).unwrap();
    fs::copy(
        fixtures.join("results/round_1.csv"),
        tmp.join("data/results/round_1.csv"),
    )
    .unwrap();
    tmp
}

fn setup(name: &str) -> (PathBuf, Config, Store) {
    let dir = scratch_project(name);
    let config = config::load_config_in(&dir).expect("defaults should load");
    let store = Store::open(":memory:").unwrap();
    (dir, config, store)
}

fn fixture_squad() -> data::UserSquad {
    data::load_user_squad(&crate_root().join(FIXTURES).join("squad.toml")).unwrap()
}

// ===========================================================================
// Import and forecast
// ===========================================================================

#[test]
fn import_loads_fixture_snapshot() {
    let (dir, config, store) = setup("squadcast_it_import");
    let count = pipeline::import_players(&config, &store, &dir).unwrap();
    assert_eq!(count, 60);
    assert_eq!(store.load_players().unwrap().len(), 60);

    // Re-importing replaces rather than duplicates.
    pipeline::import_players(&config, &store, &dir).unwrap();
    assert_eq!(store.load_players().unwrap().len(), 60);
}

#[tokio::test]
async fn formula_forecast_covers_every_player() {
    let (dir, config, store) = setup("squadcast_it_forecast");

    // The store is empty, so forecasting imports the snapshot first.
    let run = pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    assert_eq!(run.forecasts.len(), 60);
    assert!(run.unscored.is_empty());
    assert_eq!(run.failed_batches, 0);
    assert_eq!(run.fallback_batches, 0);

    let predictions = store.load_predictions(RoundId(1)).unwrap();
    assert_eq!(predictions.len(), 60);
    assert!(predictions.iter().all(|p| p.predicted.is_some()));

    // Injured and suspended players forecast zero.
    let injured = predictions.iter().find(|p| p.player == PlayerId(7)).unwrap();
    assert_eq!(injured.predicted, Some(0.0));

    // Forecasting again for the same round replaces the stored values.
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    assert_eq!(store.load_predictions(RoundId(1)).unwrap().len(), 60);
}

// ===========================================================================
// Select, suggest, scenario
// ===========================================================================

#[tokio::test]
async fn selected_squad_and_lineup_are_legal() {
    let (dir, config, store) = setup("squadcast_it_select");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();

    let (selection, lineup) = pipeline::select(&config, &store, RoundId(1), None).unwrap();
    let players = selection.squad.players();
    assert_eq!(players.len(), 15);
    assert!(is_legal_squad(players, &config.rules.squad));
    assert!(selection.budget_used() <= config.rules.squad.budget_cap);
    for p in players {
        assert!(team_count(players, p.team) <= config.rules.squad.max_per_team);
    }

    assert_eq!(lineup.starters.len(), 11);
    assert_eq!(lineup.bench.len(), 4);
    assert!(lineup.starters.contains(&lineup.captain));
    assert!(lineup.starters.contains(&lineup.vice_captain));
    assert_ne!(lineup.captain, lineup.vice_captain);
    assert!(lineup.is_legal(&selection.squad, &config.rules.lineup));

    let stored = store.load_lineup(RoundId(1)).unwrap().expect("lineup stored");
    assert_eq!(stored.captain, lineup.captain);
    assert_eq!(stored.starters, lineup.starters);
}

#[tokio::test]
async fn tighter_budget_never_scores_higher() {
    let (dir, config, store) = setup("squadcast_it_budget");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();

    let (full, _) = pipeline::select(&config, &store, RoundId(1), None).unwrap();
    let tight = Money::from_decimal(85.0).unwrap();
    let (cheap, _) = pipeline::select(&config, &store, RoundId(1), Some(tight)).unwrap();
    assert!(cheap.budget_used() <= tight);
    assert!(cheap.total_forecast <= full.total_forecast + 1e-9);
}

#[tokio::test]
async fn suggestions_are_stored_and_legal_swaps() {
    let (dir, config, store) = setup("squadcast_it_suggest");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    let squad = fixture_squad();

    let report = pipeline::suggest(&config, &store, RoundId(1), "tester", &squad).unwrap();
    assert_eq!(report.reviews.len(), 15);
    assert!(report.suggestions.len() <= config.strategy.transfers.max_suggestions);

    let pool = pipeline::load_pool(&store, RoundId(1)).unwrap();
    for s in &report.suggestions {
        assert!(squad.players.contains(&s.player_out));
        assert!(!squad.players.contains(&s.player_in));
        assert_eq!(
            pool.player(s.player_out).unwrap().position,
            pool.player(s.player_in).unwrap().position
        );
        assert!(s.points_impact > 0.0);
        assert!(s.price_delta <= squad.bank);
    }
    for pair in report.suggestions.windows(2) {
        assert!(pair[0].points_impact >= pair[1].points_impact);
    }
    if report.suggestions.is_empty() {
        assert_ne!(report.status, TransferStatus::SuggestionsAvailable);
    } else {
        assert_eq!(report.status, TransferStatus::SuggestionsAvailable);
    }

    let stored = store.load_suggestions("tester", RoundId(1)).unwrap();
    assert_eq!(stored, report.suggestions);

    // Another user's suggestions are kept apart.
    assert!(store.load_suggestions("someone-else", RoundId(1)).unwrap().is_empty());
}

#[tokio::test]
async fn scenario_projects_stored_rounds() {
    let (dir, config, store) = setup("squadcast_it_scenario");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    let squad = fixture_squad();
    let swaps = [pipeline::parse_swap("49:52").unwrap()];

    let report = pipeline::scenario(&config, &store, RoundId(1), &squad, &swaps).unwrap();
    // Only round 1 has stored predictions inside the horizon.
    assert_eq!(report.projections.len(), 1);
    let p = &report.projections[0];
    assert_eq!(p.round, RoundId(1));
    assert!(p.baseline_points > 0.0);
    assert!((p.delta() - (p.scenario_points - p.baseline_points)).abs() < 1e-9);

    // Round 2 forecasts bring a second projection in.
    pipeline::run_forecasts(&config, &store, &dir, RoundId(2))
        .await
        .unwrap();
    let report = pipeline::scenario(&config, &store, RoundId(1), &squad, &swaps).unwrap();
    assert_eq!(report.projections.len(), 2);
    assert_eq!(report.projections[1].round, RoundId(2));
}

#[tokio::test]
async fn scenario_flags_squads_that_break_the_rules() {
    let (dir, config, store) = setup("squadcast_it_scenario_rules");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    let squad = fixture_squad();
    let run = |args: &[&str]| {
        let swaps: Vec<Swap> = args.iter().map(|a| pipeline::parse_swap(a).unwrap()).collect();
        pipeline::scenario(&config, &store, RoundId(1), &squad, &swaps).unwrap()
    };

    // The fixture squad already fields four players from team 2; bringing in
    // #52 makes a fourth from team 3 as well.
    let crowded = run(&["49:52"]);
    assert!(!crowded.is_legal());
    assert_eq!(
        crowded.violations,
        vec![
            SquadViolation::TeamLimit { team: TeamId(2), count: 4, max: 3 },
            SquadViolation::TeamLimit { team: TeamId(3), count: 4, max: 3 },
        ]
    );
    assert_eq!(crowded.net_spend, Money::from_tenths(-71));
    assert_eq!(crowded.bank_shortfall, None);

    // 8.0 out, 13.7 in with 0.5 in the bank.
    let pricey = run(&["50:54"]);
    assert_eq!(pricey.bank_shortfall, Some(Money::from_tenths(52)));
    assert!(pricey.violations.contains(&SquadViolation::OverBudget {
        cap: Money::from_tenths(1000),
        total: Money::from_tenths(1113),
    }));
    assert_eq!(pricey.projections.len(), 1);

    // Selling a team 2 forward and the priciest forward fixes both.
    let fixed = run(&["49:53", "51:57"]);
    assert!(fixed.is_legal(), "{:?}", fixed.violations);
    assert_eq!(fixed.net_spend, Money::from_tenths(-85));
}

#[tokio::test]
async fn scenario_horizon_stops_at_the_last_round_id() {
    let (dir, config, store) = setup("squadcast_it_scenario_last_round");
    let last = RoundId(u32::MAX);
    pipeline::run_forecasts(&config, &store, &dir, last)
        .await
        .unwrap();
    let squad = fixture_squad();
    let swaps = [pipeline::parse_swap("49:53").unwrap()];

    let report = pipeline::scenario(&config, &store, last, &squad, &swaps).unwrap();
    assert_eq!(report.projections.len(), 1);
    assert_eq!(report.projections[0].round, last);
}

#[tokio::test]
async fn scenario_rejects_bad_swaps() {
    let (dir, config, store) = setup("squadcast_it_scenario_bad");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    let squad = fixture_squad();

    let bad = [
        // Forward out, defender in.
        Swap {
            player_out: PlayerId(49),
            player_in: PlayerId(14),
        },
        // Player 52 is not in the squad.
        Swap {
            player_out: PlayerId(52),
            player_in: PlayerId(53),
        },
        // Player 9 is already owned.
        Swap {
            player_out: PlayerId(10),
            player_in: PlayerId(9),
        },
        // No such player.
        Swap {
            player_out: PlayerId(49),
            player_in: PlayerId(999),
        },
    ];
    for swap in bad {
        assert!(
            pipeline::scenario(&config, &store, RoundId(1), &squad, &[swap]).is_err(),
            "swap {} -> {} should be rejected",
            swap.player_out,
            swap.player_in
        );
    }
}

// ===========================================================================
// Score and history
// ===========================================================================

#[tokio::test]
async fn scoring_a_round_is_idempotent() {
    let (dir, config, store) = setup("squadcast_it_score");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();
    let (_, lineup) = pipeline::select(&config, &store, RoundId(1), None).unwrap();

    let realized = pipeline::load_round_results(&config, &dir, RoundId(1)).unwrap();
    assert_eq!(realized.len(), 60);

    let first = pipeline::score(&config, &store, RoundId(1), &realized).unwrap();
    assert_eq!(first.record.players_analyzed, 60);
    assert_eq!(first.record.unscored, 0);
    assert_eq!(first.record.missing_results, 0);
    assert!(first.record.correct_predictions <= 60);
    assert!((0.0..=100.0).contains(&first.record.accuracy));
    let lineup_score = first.record.lineup.expect("lineup was selected");
    assert_eq!(lineup_score.captain, lineup.captain);
    assert!((lineup_score.predicted_points - lineup.predicted_points).abs() < 1e-6);

    let second = pipeline::score(&config, &store, RoundId(1), &realized).unwrap();
    assert_eq!(first, second);

    let (history, summary) = pipeline::history(&store).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.get(RoundId(1)), Some(&first.record));
    assert_eq!(summary.rounds, 1);
    assert_eq!(summary.players_analyzed, 60);
    assert_eq!(summary.best_round, Some(RoundId(1)));
}

#[tokio::test]
async fn scoring_without_a_selection_skips_lineup() {
    let (dir, config, store) = setup("squadcast_it_score_no_lineup");
    pipeline::run_forecasts(&config, &store, &dir, RoundId(1))
        .await
        .unwrap();

    let mut realized = pipeline::load_round_results(&config, &dir, RoundId(1)).unwrap();
    realized.remove(&PlayerId(1));
    realized.remove(&PlayerId(2));

    let score = pipeline::score(&config, &store, RoundId(1), &realized).unwrap();
    assert!(score.record.lineup.is_none());
    assert_eq!(score.record.players_analyzed, 58);
    assert_eq!(score.record.missing_results, 2);
}

#[test]
fn missing_results_file_is_an_error() {
    let (dir, config, _store) = setup("squadcast_it_no_results");
    assert!(pipeline::load_round_results(&config, &dir, RoundId(7)).is_err());
}

#[test]
fn history_starts_empty() {
    let store = Store::open(":memory:").unwrap();
    let (history, summary) = pipeline::history(&store).unwrap();
    assert!(history.is_empty());
    assert_eq!(summary.rounds, 0);
    assert_eq!(summary.best_round, None);
}

#[test]
fn fixture_squad_parses() {
    let squad = fixture_squad();
    assert_eq!(squad.players.len(), 15);
    assert_eq!(squad.free_transfers, Some(1));
    assert!(Path::new(&crate_root().join(FIXTURES).join("players.csv")).exists());
}
