// End-to-end checks of the core pipeline: select a squad, derive its lineup,
// look for transfers, then score the round.
//
// Pools come from a seeded ChaCha generator so every run sees the same data.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use squadcast_core::*;

// ===========================================================================
// Test helpers
// ===========================================================================

const ROUND: RoundId = RoundId(12);

/// 14 players per position spread across 20 clubs, prices 4.0-13.0,
/// forecasts 0.0-12.0, roughly one in ten unavailable.
fn random_pool(seed: u64) -> PlayerPool {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut players = Vec::new();
    let mut forecasts = Vec::new();
    let mut id = 1;
    for position in Position::ALL {
        for _ in 0..14 {
            let status = match rng.gen_range(0..10) {
                0 => Availability::Injured,
                1 => Availability::Doubtful,
                _ => Availability::Available,
            };
            players.push(Player {
                id: PlayerId(id),
                name: format!("Player {id}"),
                team: TeamId(rng.gen_range(1..=20)),
                position,
                price: Money::from_tenths(rng.gen_range(40..=130)),
                status,
            });
            forecasts.push(Forecast {
                player: PlayerId(id),
                round: ROUND,
                points: f64::from(rng.gen_range(0..=120u32)) / 10.0,
            });
            id += 1;
        }
    }
    PlayerPool::new(ROUND, players, forecasts)
}

fn uniform_pool(per_position: u32) -> PlayerPool {
    let mut players = Vec::new();
    let mut forecasts = Vec::new();
    let mut id = 1;
    for position in Position::ALL {
        for k in 0..per_position {
            players.push(Player {
                id: PlayerId(id),
                name: format!("{position} {k}"),
                team: TeamId(id),
                position,
                price: Money::from_tenths(50),
                status: Availability::Available,
            });
            forecasts.push(Forecast {
                player: PlayerId(id),
                round: ROUND,
                points: (k % 7) as f64,
            });
            id += 1;
        }
    }
    PlayerPool::new(ROUND, players, forecasts)
}

// ===========================================================================
// Selection
// ===========================================================================

#[test]
fn uniform_price_pool_fills_every_quota() {
    let pool = uniform_pool(20);
    let rules = SquadRules::default();
    let selection = select_squad(&pool, &rules, rules.budget_cap).unwrap();

    let squad = &selection.squad;
    assert_eq!(squad.players().len(), 15);
    assert_eq!(squad.by_position(Position::Goalkeeper).count(), 2);
    assert_eq!(squad.by_position(Position::Defender).count(), 5);
    assert_eq!(squad.by_position(Position::Midfielder).count(), 5);
    assert_eq!(squad.by_position(Position::Forward).count(), 3);
    assert!(squad.total_price() <= rules.budget_cap);
    // Forecasts cycle 0..=6, so the top of each position is 6, 6, 5, 5, 5.
    assert!((selection.total_forecast - (12.0 + 27.0 + 27.0 + 17.0)).abs() < 1e-9);
}

#[test]
fn selected_squads_are_always_legal() {
    let rules = SquadRules::default();
    for seed in 1..=25 {
        let pool = random_pool(seed);
        let selection = select_squad(&pool, &rules, rules.budget_cap)
            .unwrap_or_else(|e| panic!("seed {seed}: {e}"));
        assert!(
            is_legal_squad(selection.squad.players(), &rules),
            "seed {seed} produced an illegal squad"
        );
        assert!(selection
            .squad
            .players()
            .iter()
            .all(|p| p.status.is_selectable(rules.allow_doubtful)));
    }
}

#[test]
fn raising_the_budget_never_lowers_the_forecast() {
    let rules = SquadRules::default();
    for seed in [3, 8, 21] {
        let pool = random_pool(seed);
        let mut previous = f64::NEG_INFINITY;
        for cap in (750..=1100).step_by(50) {
            let Ok(selection) = select_squad(&pool, &rules, Money::from_tenths(cap)) else {
                continue;
            };
            assert!(
                selection.total_forecast + 1e-9 >= previous,
                "seed {seed}: cap {cap} dropped to {} from {previous}",
                selection.total_forecast
            );
            previous = selection.total_forecast;
        }
    }
}

#[test]
fn starved_position_is_reported() {
    let pool = uniform_pool(20);
    let players: Vec<Player> = pool
        .entries()
        .iter()
        .map(|e| e.player.clone())
        .enumerate()
        .map(|(i, mut p)| {
            if p.position == Position::Defender && i % 20 >= 2 {
                p.status = Availability::Suspended;
            }
            p
        })
        .collect();
    let pool = PlayerPool::new(ROUND, players, Vec::new());

    let err = select_squad(&pool, &SquadRules::default(), Money::from_tenths(1000)).unwrap_err();
    assert_eq!(
        err,
        SelectionError::InsufficientCandidates {
            position: Position::Defender,
            needed: 5,
            found: 2,
        }
    );
}

// ===========================================================================
// Lineup
// ===========================================================================

#[test]
fn derived_lineups_are_legal_and_double_the_captain() {
    let squad_rules = SquadRules::default();
    let lineup_rules = LineupRules::default();
    for seed in 1..=25 {
        let pool = random_pool(seed);
        let selection = select_squad(&pool, &squad_rules, squad_rules.budget_cap).unwrap();
        let lineup = derive_lineup(&selection.squad, &pool, &lineup_rules)
            .unwrap_or_else(|e| panic!("seed {seed}: {e}"));

        assert!(lineup.is_legal(&selection.squad, &lineup_rules), "seed {seed}");
        assert_ne!(lineup.captain, lineup.vice_captain);
        assert_eq!(lineup.starters.len() + lineup.bench.len(), 15);

        let members: f64 = lineup.starters.iter().map(|&id| pool.ranking_points(id)).sum();
        let expected = members + pool.ranking_points(lineup.captain);
        assert!((lineup.predicted_points - expected).abs() < 1e-9, "seed {seed}");
    }
}

// ===========================================================================
// Transfers
// ===========================================================================

#[test]
fn suggestions_improve_and_stay_legal() {
    let rules = SquadRules::default();
    for seed in 1..=15 {
        // Pick the squad from one round's forecasts, then look for transfers
        // against a different pool with the same players.
        let base = random_pool(seed);
        let selection = select_squad(&base, &rules, rules.budget_cap).unwrap();
        let next_week = {
            let reshuffled = random_pool(seed + 1000);
            let forecasts: Vec<Forecast> = base
                .entries()
                .iter()
                .zip(reshuffled.entries())
                .filter_map(|(e, r)| {
                    r.forecast.points().map(|points| Forecast {
                        player: e.player.id,
                        round: ROUND,
                        points,
                    })
                })
                .collect();
            let players = base.entries().iter().map(|e| e.player.clone()).collect();
            PlayerPool::new(ROUND, players, forecasts)
        };

        let current = selection.squad.players();
        let options = TransferOptions {
            bank: selection.budget_remaining(),
            max_suggestions: 50,
            ..TransferOptions::default()
        };
        let report =
            suggest_transfers(current, &next_week, &options, &rules, &Thresholds::default());

        for suggestion in &report.suggestions {
            assert!(suggestion.points_impact > 0.0);
            let swap = Swap {
                player_out: suggestion.player_out,
                player_in: suggestion.player_in,
            };
            let after = apply_swaps(current, &[swap], &next_week).unwrap();
            assert!(is_legal_squad(&after, &rules), "seed {seed}: {suggestion:?}");
        }
    }
}

#[test]
fn optimal_squad_needs_no_transfers() {
    let pool = uniform_pool(20);
    let rules = SquadRules::default();
    let selection = select_squad(&pool, &rules, rules.budget_cap).unwrap();
    let report = suggest_transfers(
        selection.squad.players(),
        &pool,
        &TransferOptions {
            bank: selection.budget_remaining(),
            ..TransferOptions::default()
        },
        &rules,
        &Thresholds::default(),
    );
    assert!(report.suggestions.is_empty());
    assert_eq!(report.status, TransferStatus::NoTransfersNeeded);
}

// ===========================================================================
// Accuracy
// ===========================================================================

#[test]
fn scoring_the_selected_lineup_is_idempotent() {
    let pool = random_pool(5);
    let rules = SquadRules::default();
    let selection = select_squad(&pool, &rules, rules.budget_cap).unwrap();
    let lineup = derive_lineup(&selection.squad, &pool, &LineupRules::default()).unwrap();

    let predictions: Vec<Prediction> = pool
        .entries()
        .iter()
        .map(|e| Prediction {
            player: e.player.id,
            round: ROUND,
            predicted: e.forecast.points(),
        })
        .collect();
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let realized: HashMap<PlayerId, f64> = pool
        .entries()
        .iter()
        .map(|e| (e.player.id, f64::from(rng.gen_range(0..=15u32))))
        .collect();

    let thresholds = Thresholds::default();
    let first = score_round(ROUND, &predictions, &realized, Some(&lineup), &thresholds);
    let second = score_round(ROUND, &predictions, &realized, Some(&lineup), &thresholds);
    assert_eq!(first, second);

    let mut history = AccuracyHistory::new();
    history.upsert(first.record.clone());
    history.upsert(second.record);
    assert_eq!(history.len(), 1);
    assert_eq!(history.summary().players_analyzed, first.record.players_analyzed);

    let lineup_score = first.record.lineup.unwrap();
    let members: f64 = lineup.starters.iter().map(|id| realized[id]).sum();
    assert!(
        (lineup_score.realized_points - (members + realized[&lineup.captain])).abs() < 1e-9
    );
}
