// Constraint model: squad/lineup rules, thresholds, and legality predicates.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Money, Player, PlayerId, Position, TeamId};

// ---------------------------------------------------------------------------
// Rule sets
// ---------------------------------------------------------------------------

/// Required number of squad players per position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionQuotas {
    pub goalkeepers: usize,
    pub defenders: usize,
    pub midfielders: usize,
    pub forwards: usize,
}

impl PositionQuotas {
    pub fn get(&self, position: Position) -> usize {
        match position {
            Position::Goalkeeper => self.goalkeepers,
            Position::Defender => self.defenders,
            Position::Midfielder => self.midfielders,
            Position::Forward => self.forwards,
        }
    }

    pub fn total(&self) -> usize {
        self.goalkeepers + self.defenders + self.midfielders + self.forwards
    }
}

impl Default for PositionQuotas {
    fn default() -> Self {
        PositionQuotas {
            goalkeepers: 2,
            defenders: 5,
            midfielders: 5,
            forwards: 3,
        }
    }
}

/// Budget, quota, and team-concentration rules for a squad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadRules {
    pub budget_cap: Money,
    pub quotas: PositionQuotas,
    pub max_per_team: usize,
    /// Whether doubtful players may be bought.
    pub allow_doubtful: bool,
}

impl SquadRules {
    pub fn squad_size(&self) -> usize {
        self.quotas.total()
    }

    /// The same rules with a different budget cap.
    pub fn with_budget(&self, budget_cap: Money) -> Self {
        SquadRules {
            budget_cap,
            ..self.clone()
        }
    }
}

impl Default for SquadRules {
    fn default() -> Self {
        SquadRules {
            budget_cap: Money::from_tenths(1000),
            quotas: PositionQuotas::default(),
            max_per_team: 3,
            allow_doubtful: true,
        }
    }
}

/// Formation floors for a starting lineup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupRules {
    pub size: usize,
    /// Exact number of starting keepers.
    pub keepers: usize,
    pub min_defenders: usize,
    pub min_midfielders: usize,
    pub min_forwards: usize,
}

impl LineupRules {
    /// Minimum starters for a position (exact count for keepers).
    pub fn floor(&self, position: Position) -> usize {
        match position {
            Position::Goalkeeper => self.keepers,
            Position::Defender => self.min_defenders,
            Position::Midfielder => self.min_midfielders,
            Position::Forward => self.min_forwards,
        }
    }
}

impl Default for LineupRules {
    fn default() -> Self {
        LineupRules {
            size: 11,
            keepers: 1,
            min_defenders: 3,
            min_midfielders: 2,
            min_forwards: 1,
        }
    }
}

/// Product judgement calls kept configurable rather than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// A prediction is "correct" when its absolute error is at most this.
    pub correct_within: f64,
    /// Transfer impact strictly above this is high priority.
    pub high_impact_above: f64,
    /// Transfer impact strictly above this (and not high) is medium priority.
    pub medium_impact_above: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            correct_within: 2.0,
            high_impact_above: 3.0,
            medium_impact_above: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SquadViolation {
    #[error("squad has {found} players, expected {expected}")]
    WrongSize { expected: usize, found: usize },

    #[error("player {0} appears more than once")]
    DuplicatePlayer(PlayerId),

    #[error("squad has {found} {position} players, expected {expected}")]
    QuotaMismatch {
        position: Position,
        expected: usize,
        found: usize,
    },

    #[error("squad costs {total}, over the {cap} budget cap")]
    OverBudget { cap: Money, total: Money },

    #[error("{team} supplies {count} players, limit is {max}")]
    TeamLimit { team: TeamId, count: usize, max: usize },
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Number of players in `players` affiliated with `team`.
pub fn team_count(players: &[Player], team: TeamId) -> usize {
    players.iter().filter(|p| p.team == team).count()
}

pub fn total_price(players: &[Player]) -> Money {
    players.iter().map(|p| p.price).sum()
}

/// Every rule `players` breaks, in a stable order. Empty means legal.
pub fn squad_violations(players: &[Player], rules: &SquadRules) -> Vec<SquadViolation> {
    let mut violations = Vec::new();

    if players.len() != rules.squad_size() {
        violations.push(SquadViolation::WrongSize {
            expected: rules.squad_size(),
            found: players.len(),
        });
    }

    let mut seen = HashSet::new();
    for p in players {
        if !seen.insert(p.id) {
            violations.push(SquadViolation::DuplicatePlayer(p.id));
        }
    }

    for position in Position::ALL {
        let expected = rules.quotas.get(position);
        let found = players.iter().filter(|p| p.position == position).count();
        if found != expected {
            violations.push(SquadViolation::QuotaMismatch {
                position,
                expected,
                found,
            });
        }
    }

    let total = total_price(players);
    if total > rules.budget_cap {
        violations.push(SquadViolation::OverBudget {
            cap: rules.budget_cap,
            total,
        });
    }

    let mut per_team: HashMap<TeamId, usize> = HashMap::new();
    for p in players {
        *per_team.entry(p.team).or_default() += 1;
    }
    let mut over: Vec<(TeamId, usize)> = per_team
        .into_iter()
        .filter(|&(_, count)| count > rules.max_per_team)
        .collect();
    over.sort();
    for (team, count) in over {
        violations.push(SquadViolation::TeamLimit {
            team,
            count,
            max: rules.max_per_team,
        });
    }

    violations
}

pub fn is_legal_squad(players: &[Player], rules: &SquadRules) -> bool {
    squad_violations(players, rules).is_empty()
}

/// Whether `starters` is a legal starting lineup drawn from `squad`.
///
/// Checks membership, distinctness, lineup size, the exact keeper count, and
/// the outfield floors.
pub fn is_legal_lineup(squad: &Squad, starters: &[PlayerId], rules: &LineupRules) -> bool {
    if starters.len() != rules.size {
        return false;
    }
    let mut seen = HashSet::new();
    let mut counts = [0usize; 4];
    for id in starters {
        if !seen.insert(*id) {
            return false;
        }
        let Some(player) = squad.get(*id) else {
            return false;
        };
        counts[player.position.sort_order()] += 1;
    }

    Position::ALL.iter().all(|&pos| {
        let count = counts[pos.sort_order()];
        match pos {
            Position::Goalkeeper => count == rules.keepers,
            _ => count >= rules.floor(pos),
        }
    })
}

// ---------------------------------------------------------------------------
// Squad
// ---------------------------------------------------------------------------

/// A complete squad that satisfied every `SquadRules` constraint when built.
///
/// Players are kept in canonical position order, preserving input order
/// within a position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Squad {
    players: Vec<Player>,
}

impl Squad {
    /// Validate and build a squad. Returns the first violated rule.
    pub fn new(mut players: Vec<Player>, rules: &SquadRules) -> Result<Self, SquadViolation> {
        if let Some(violation) = squad_violations(&players, rules).into_iter().next() {
            return Err(violation);
        }
        players.sort_by_key(|p| p.position.sort_order());
        Ok(Squad { players })
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.get(id).is_some()
    }

    pub fn total_price(&self) -> Money {
        total_price(&self.players)
    }

    pub fn by_position(&self, position: Position) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(move |p| p.position == position)
    }

    pub fn into_players(self) -> Vec<Player> {
        self.players
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
