// Starting XI, bench order, and captaincy for a squad.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Player, PlayerId, PlayerPool, Position};
use crate::rules::{is_legal_lineup, LineupRules, Squad};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineupError {
    /// The squad cannot supply a position's formation floor.
    #[error("formation infeasible: need {required} starting {position}, only {available} available")]
    FormationInfeasible {
        position: Position,
        required: usize,
        available: usize,
    },

    /// Floors are met but there are not enough available players to field a full side.
    #[error("formation infeasible: need {required} starters, only {available} available")]
    ShortOfStarters { required: usize, available: usize },
}

/// Outfield shape of a lineup, e.g. 3-4-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formation {
    pub defenders: usize,
    pub midfielders: usize,
    pub forwards: usize,
}

impl fmt::Display for Formation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.defenders, self.midfielders, self.forwards)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineup {
    /// Keeper first, then defenders, midfielders, forwards; forecast
    /// descending within each position.
    pub starters: Vec<PlayerId>,
    /// Backup keeper first, then outfield by forecast.
    pub bench: Vec<PlayerId>,
    pub captain: PlayerId,
    pub vice_captain: PlayerId,
    pub formation: Formation,
    /// Predicted points with the captain counted twice.
    pub predicted_points: f64,
}

impl Lineup {
    /// Lineup total under the captaincy convention: every starter's points
    /// once, plus the captain's points a second time.
    ///
    /// Both predicted and realized totals go through this function.
    pub fn total_points(&self, points: impl Fn(PlayerId) -> f64) -> f64 {
        let starters: f64 = self.starters.iter().map(|&id| points(id)).sum();
        starters + points(self.captain)
    }

    /// Full legality check: lineup rules plus captain/vice-captain membership.
    pub fn is_legal(&self, squad: &Squad, rules: &LineupRules) -> bool {
        is_legal_lineup(squad, &self.starters, rules)
            && self.captain != self.vice_captain
            && self.starters.contains(&self.captain)
            && self.starters.contains(&self.vice_captain)
    }
}

/// Derive the best lineup for `squad` using the forecasts in `pool`.
///
/// Squad members missing from the pool rank with zero points.
pub fn derive_lineup(
    squad: &Squad,
    pool: &PlayerPool,
    rules: &LineupRules,
) -> Result<Lineup, LineupError> {
    let members: Vec<&Player> = squad.players().iter().collect();
    derive_from_members(&members, |id| pool.ranking_points(id), rules)
}

/// Lineup derivation over an arbitrary set of members.
///
/// Used directly for what-if scenarios, where the member list has not been
/// validated as a squad.
pub(crate) fn derive_from_members(
    members: &[&Player],
    points: impl Fn(PlayerId) -> f64,
    rules: &LineupRules,
) -> Result<Lineup, LineupError> {
    let rank = |a: &&Player, b: &&Player| -> Ordering { points(b.id).total_cmp(&points(a.id)) };

    let mut by_position: [Vec<&Player>; 4] = Default::default();
    for &player in members {
        if player.status.can_start() {
            by_position[player.position.sort_order()].push(player);
        }
    }
    for group in by_position.iter_mut() {
        group.sort_by(rank);
    }

    // Minimum legal formation first.
    let mut chosen: [Vec<&Player>; 4] = Default::default();
    for position in Position::ALL {
        let slot = position.sort_order();
        let required = rules.floor(position);
        let available = by_position[slot].len();
        if available < required {
            return Err(LineupError::FormationInfeasible {
                position,
                required,
                available,
            });
        }
        chosen[slot].extend(by_position[slot].iter().take(required).copied());
    }

    // Free slots go to the best remaining outfield players, any position.
    let floor_total: usize = chosen.iter().map(Vec::len).sum();
    let open = rules.size.saturating_sub(floor_total);
    let mut remaining: Vec<&Player> = Position::ALL
        .iter()
        .filter(|p| p.is_outfield())
        .flat_map(|p| by_position[p.sort_order()].iter().skip(rules.floor(*p)).copied())
        .collect();
    remaining.sort_by(rank);
    if remaining.len() < open {
        return Err(LineupError::ShortOfStarters {
            required: rules.size,
            available: floor_total + remaining.len(),
        });
    }
    for player in remaining.into_iter().take(open) {
        chosen[player.position.sort_order()].push(player);
    }
    for group in chosen.iter_mut() {
        group.sort_by(rank);
    }

    let starters: Vec<PlayerId> = chosen.iter().flatten().map(|p| p.id).collect();

    // Captain and vice: the two highest forecasts, earliest starter on ties.
    let mut ranked_starters: Vec<&Player> = chosen.iter().flatten().copied().collect();
    ranked_starters.sort_by(rank);
    let (captain, vice_captain) = match ranked_starters.as_slice() {
        [first, second, ..] => (first.id, second.id),
        _ => {
            return Err(LineupError::ShortOfStarters {
                required: 2,
                available: ranked_starters.len(),
            })
        }
    };

    let mut bench_keepers: Vec<&Player> = Vec::new();
    let mut bench_outfield: Vec<&Player> = Vec::new();
    for &player in members {
        if starters.contains(&player.id) {
            continue;
        }
        if player.position == Position::Goalkeeper {
            bench_keepers.push(player);
        } else {
            bench_outfield.push(player);
        }
    }
    bench_keepers.sort_by(rank);
    // Players who cannot start sink to the end of the bench.
    bench_outfield.sort_by(|a, b| {
        b.status
            .can_start()
            .cmp(&a.status.can_start())
            .then_with(|| rank(a, b))
    });
    let bench: Vec<PlayerId> = bench_keepers
        .into_iter()
        .chain(bench_outfield)
        .map(|p| p.id)
        .collect();

    let formation = Formation {
        defenders: chosen[Position::Defender.sort_order()].len(),
        midfielders: chosen[Position::Midfielder.sort_order()].len(),
        forwards: chosen[Position::Forward.sort_order()].len(),
    };

    let mut lineup = Lineup {
        starters,
        bench,
        captain,
        vice_captain,
        formation,
        predicted_points: 0.0,
    };
    lineup.predicted_points = lineup.total_points(&points);
    debug!(
        "derived {} lineup, captain {}, {:.1} predicted points",
        lineup.formation, lineup.captain, lineup.predicted_points
    );
    Ok(lineup)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
