// Transfer recommendations and what-if scenario evaluation.
//
// The search side proposes, for each owned player, the best affordable
// same-position replacement that keeps the incoming club under the team cap.
// The evaluator side takes an explicit list of swaps and projects lineup
// points per upcoming round, before and after.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::lineup::{derive_from_members, LineupError};
use crate::model::{Money, Player, PlayerId, PlayerPool, Position, RoundId, TeamId};
use crate::rules::{squad_violations, total_price, LineupRules, SquadRules, SquadViolation, Thresholds};

// ---------------------------------------------------------------------------
// Suggestion types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Band a points impact. Boundary values fall into the lower band.
    pub fn from_impact(impact: f64, thresholds: &Thresholds) -> Self {
        if impact > thresholds.high_impact_above {
            Priority::High
        } else if impact > thresholds.medium_impact_above {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_str_priority(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

/// One independently valid swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSuggestion {
    pub player_out: PlayerId,
    pub player_in: PlayerId,
    pub priority: Priority,
    /// Incoming forecast minus outgoing forecast.
    pub points_impact: f64,
    /// Incoming price minus outgoing price.
    pub price_delta: Money,
    pub rationale: String,
}

/// What the search concluded for one owned player.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplacementOutcome {
    Improving { player_in: PlayerId, points_impact: f64 },
    /// Legal replacements exist, but none beats the owned player.
    NoImprovingSwap { best_legal: PlayerId, points_impact: f64 },
    /// Nothing affordable in the position without breaking the team cap.
    NoLegalReplacement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingReview {
    pub player_out: PlayerId,
    pub outcome: ReplacementOutcome,
}

/// Report-level state, kept distinct for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    SuggestionsAvailable,
    /// Legal swaps exist, none improves the squad.
    NoTransfersNeeded,
    /// No owned player has any legal replacement.
    SwapsUnavailable,
}

/// Raised when more high-priority swaps are suggested than free transfers allow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtraTransferCaveat {
    pub high_priority: usize,
    pub free_transfers: u32,
    pub extra_transfers: usize,
    /// Points deducted if every extra high-priority swap is made.
    pub points_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReport {
    /// Ranked by points impact, descending.
    pub suggestions: Vec<TransferSuggestion>,
    /// One entry per owned player, in squad order.
    pub reviews: Vec<OutgoingReview>,
    pub status: TransferStatus,
    pub caveat: Option<ExtraTransferCaveat>,
}

/// The user's transfer state for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOptions {
    pub bank: Money,
    pub free_transfers: u32,
    pub max_suggestions: usize,
    /// Points deducted per transfer beyond the free allowance.
    pub transfer_hit_cost: f64,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            bank: Money::ZERO,
            free_transfers: 1,
            max_suggestions: 10,
            transfer_hit_cost: 4.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Propose single-swap transfers for `current`.
///
/// `current` is taken as-is: it may already break the squad rules (e.g. an
/// over-budget squad after price rises). Each suggestion is checked only
/// against the bank and the team cap for the incoming club.
pub fn suggest_transfers(
    current: &[Player],
    pool: &PlayerPool,
    options: &TransferOptions,
    rules: &SquadRules,
    thresholds: &Thresholds,
) -> TransferReport {
    let owned: Vec<PlayerId> = current.iter().map(|p| p.id).collect();
    let mut team_counts: HashMap<TeamId, usize> = HashMap::new();
    for p in current {
        *team_counts.entry(p.team).or_default() += 1;
    }

    let mut reviews = Vec::with_capacity(current.len());
    let mut candidates: Vec<(usize, TransferSuggestion)> = Vec::new();

    for (squad_order, out) in current.iter().enumerate() {
        let out_points = pool.ranking_points(out.id);
        let best = best_replacement(out, pool, &owned, &team_counts, options.bank, rules);

        let outcome = match best {
            None => ReplacementOutcome::NoLegalReplacement,
            Some(incoming) => {
                let impact = pool.ranking_points(incoming.id) - out_points;
                if impact > 0.0 {
                    let suggestion = build_suggestion(out, incoming, impact, options, thresholds);
                    candidates.push((squad_order, suggestion));
                    ReplacementOutcome::Improving {
                        player_in: incoming.id,
                        points_impact: impact,
                    }
                } else {
                    ReplacementOutcome::NoImprovingSwap {
                        best_legal: incoming.id,
                        points_impact: impact,
                    }
                }
            }
        };
        debug!(player = %out.id, ?outcome, "reviewed outgoing player");
        reviews.push(OutgoingReview {
            player_out: out.id,
            outcome,
        });
    }

    candidates.sort_by(|(oa, a), (ob, b)| {
        b.points_impact
            .total_cmp(&a.points_impact)
            .then(oa.cmp(ob))
    });
    let suggestions: Vec<TransferSuggestion> = candidates
        .into_iter()
        .take(options.max_suggestions)
        .map(|(_, s)| s)
        .collect();

    let status = if !suggestions.is_empty() {
        TransferStatus::SuggestionsAvailable
    } else if reviews
        .iter()
        .any(|r| matches!(r.outcome, ReplacementOutcome::NoImprovingSwap { .. }))
        || reviews.is_empty()
    {
        TransferStatus::NoTransfersNeeded
    } else {
        TransferStatus::SwapsUnavailable
    };

    let high_priority = suggestions
        .iter()
        .filter(|s| s.priority == Priority::High)
        .count();
    let caveat = (high_priority > options.free_transfers as usize).then(|| {
        let extra = high_priority - options.free_transfers as usize;
        ExtraTransferCaveat {
            high_priority,
            free_transfers: options.free_transfers,
            extra_transfers: extra,
            points_cost: extra as f64 * options.transfer_hit_cost,
        }
    });

    info!(
        "transfer search for {}: {} suggestions ({} high priority), status {:?}",
        pool.round(),
        suggestions.len(),
        high_priority,
        status
    );

    TransferReport {
        suggestions,
        reviews,
        status,
        caveat,
    }
}

/// Best same-position, unowned, selectable player whose price fits the bank
/// and whose club stays within the team cap after the swap.
fn best_replacement<'a>(
    out: &Player,
    pool: &'a PlayerPool,
    owned: &[PlayerId],
    team_counts: &HashMap<TeamId, usize>,
    bank: Money,
    rules: &SquadRules,
) -> Option<&'a Player> {
    let mut best: Option<(&Player, f64)> = None;
    for entry in pool.entries() {
        let incoming = &entry.player;
        if incoming.position != out.position
            || owned.contains(&incoming.id)
            || !incoming.status.is_selectable(rules.allow_doubtful)
        {
            continue;
        }
        if incoming.price - out.price > bank {
            continue;
        }
        let current = team_counts.get(&incoming.team).copied().unwrap_or(0);
        let after = if incoming.team == out.team { current } else { current + 1 };
        if after > rules.max_per_team {
            continue;
        }

        let points = entry.ranking_points();
        let better = match best {
            None => true,
            Some((held, held_points)) => {
                points > held_points || (points == held_points && incoming.price < held.price)
            }
        };
        if better {
            best = Some((incoming, points));
        }
    }
    best.map(|(p, _)| p)
}

fn build_suggestion(
    out: &Player,
    incoming: &Player,
    impact: f64,
    options: &TransferOptions,
    thresholds: &Thresholds,
) -> TransferSuggestion {
    let price_delta = incoming.price - out.price;
    let money = if price_delta > Money::ZERO {
        format!("costs {} of {} in the bank", price_delta, options.bank)
    } else {
        format!("frees {}", Money::ZERO - price_delta)
    };
    let rationale = format!(
        "{} ({}, {}) is forecast {:+.1} points over {}; {}",
        incoming.name, incoming.position, incoming.price, impact, out.name, money
    );
    TransferSuggestion {
        player_out: out.id,
        player_in: incoming.id,
        priority: Priority::from_impact(impact, thresholds),
        points_impact: impact,
        price_delta,
        rationale,
    }
}

// ---------------------------------------------------------------------------
// Scenario evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub player_out: PlayerId,
    pub player_in: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError {
    #[error("player {0} is not in the current squad")]
    NotOwned(PlayerId),

    #[error("player {0} is already in the squad")]
    AlreadyOwned(PlayerId),

    #[error("player {0} is not in the player pool")]
    UnknownPlayer(PlayerId),

    #[error("cannot swap {out_position} {player_out} for {in_position} {player_in}")]
    PositionMismatch {
        player_out: PlayerId,
        out_position: Position,
        player_in: PlayerId,
        in_position: Position,
    },

    #[error("{round}: {source}")]
    Lineup {
        round: RoundId,
        #[source]
        source: LineupError,
    },
}

/// Projected lineup points for one round, with and without the swaps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoundProjection {
    pub round: RoundId,
    pub baseline_points: f64,
    pub scenario_points: f64,
}

impl RoundProjection {
    pub fn delta(&self) -> f64 {
        self.scenario_points - self.baseline_points
    }
}

/// Outcome of a what-if: whether the swapped squad could actually be fielded,
/// and how it would score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    /// Squad rules the swapped squad breaks, in `squad_violations` order.
    pub violations: Vec<SquadViolation>,
    /// Incoming prices minus outgoing prices.
    pub net_spend: Money,
    /// Amount by which `net_spend` exceeds the bank.
    pub bank_shortfall: Option<Money>,
    pub projections: Vec<RoundProjection>,
}

impl ScenarioReport {
    /// True when the swapped squad keeps every rule and fits the bank.
    pub fn is_legal(&self) -> bool {
        self.violations.is_empty() && self.bank_shortfall.is_none()
    }
}

/// Apply `swaps` in order to a copy of `current`. Incoming player attributes
/// come from `pool`.
pub fn apply_swaps(
    current: &[Player],
    swaps: &[Swap],
    pool: &PlayerPool,
) -> Result<Vec<Player>, ScenarioError> {
    let mut squad = current.to_vec();
    for swap in swaps {
        let Some(slot) = squad.iter().position(|p| p.id == swap.player_out) else {
            return Err(ScenarioError::NotOwned(swap.player_out));
        };
        if squad.iter().any(|p| p.id == swap.player_in) {
            return Err(ScenarioError::AlreadyOwned(swap.player_in));
        }
        let incoming = pool
            .player(swap.player_in)
            .ok_or(ScenarioError::UnknownPlayer(swap.player_in))?;
        if incoming.position != squad[slot].position {
            return Err(ScenarioError::PositionMismatch {
                player_out: swap.player_out,
                out_position: squad[slot].position,
                player_in: swap.player_in,
                in_position: incoming.position,
            });
        }
        squad[slot] = incoming.clone();
    }
    Ok(squad)
}

/// Project lineup points per round for `current` and for `current` with
/// `swaps` applied, and check the swapped squad against `rules` and `bank`.
///
/// Rule breaks do not stop the projection; they are reported alongside it.
/// Each round pool supplies that round's forecasts and the latest
/// availability of its players; squad members missing from a round pool keep
/// their snapshot status and rank as zero.
pub fn evaluate_scenario(
    current: &[Player],
    swaps: &[Swap],
    pool: &PlayerPool,
    rounds: &[PlayerPool],
    rules: &SquadRules,
    lineup_rules: &LineupRules,
    bank: Money,
) -> Result<ScenarioReport, ScenarioError> {
    let scenario = apply_swaps(current, swaps, pool)?;

    let violations = squad_violations(&scenario, rules);
    let net_spend = total_price(&scenario) - total_price(current);
    let bank_shortfall = (net_spend > bank).then(|| net_spend - bank);
    if !violations.is_empty() || bank_shortfall.is_some() {
        info!(
            violations = violations.len(),
            shortfall = ?bank_shortfall,
            "scenario squad breaks the squad rules"
        );
    }

    let projections = rounds
        .iter()
        .map(|round_pool| {
            let round = round_pool.round();
            let baseline = round_points(current, round_pool, lineup_rules)
                .map_err(|source| ScenarioError::Lineup { round, source })?;
            let with_swaps = round_points(&scenario, round_pool, lineup_rules)
                .map_err(|source| ScenarioError::Lineup { round, source })?;
            Ok(RoundProjection {
                round,
                baseline_points: baseline,
                scenario_points: with_swaps,
            })
        })
        .collect::<Result<Vec<_>, ScenarioError>>()?;

    Ok(ScenarioReport {
        violations,
        net_spend,
        bank_shortfall,
        projections,
    })
}

fn round_points(
    members: &[Player],
    round_pool: &PlayerPool,
    rules: &LineupRules,
) -> Result<f64, LineupError> {
    let refreshed: Vec<Player> = members
        .iter()
        .map(|p| match round_pool.player(p.id) {
            Some(latest) => Player {
                status: latest.status,
                ..p.clone()
            },
            None => p.clone(),
        })
        .collect();
    let refs: Vec<&Player> = refreshed.iter().collect();
    let lineup = derive_from_members(&refs, |id| round_pool.ranking_points(id), rules)?;
    Ok(lineup.predicted_points)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
