// Squad selection: greedy-with-quota under budget and team-concentration caps.
//
// Exact selection under a per-team cap is a constrained knapsack and is
// NP-hard in general. The greedy selector accepts an approximate answer:
//
// 1. Partition selectable players by position, sort each partition by
//    forecast descending (ties: cheaper first, then input order).
// 2. Walk positions in canonical order (GKP, DEF, MID, FWD) and take the best
//    candidates that fit the remaining budget and the team cap, skipping the
//    ones that don't.
// 3. While filling, hold back the cheapest possible cost of every slot still
//    open, so early positions cannot spend the money later positions need.
// 4. Re-run the pass at every lower budget (in tenths) down to the cheapest
//    conceivable squad and keep the best total. A bigger cap can only widen
//    that search, so the selected total never drops when the cap rises.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ForecastIssue, Money, Player, PlayerPool, Position, TeamId};
use crate::rules::{Squad, SquadRules, SquadViolation};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// A position quota cannot be filled under the current constraints.
    #[error("cannot fill {position}: need {needed}, could only place {found}")]
    InsufficientCandidates {
        position: Position,
        needed: usize,
        found: usize,
    },

    /// The picked players broke a squad rule the greedy pass should have
    /// enforced.
    #[error("selected squad breaks the squad rules: {0}")]
    RuleViolation(#[from] SquadViolation),
}

/// Result of a successful selection run.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub squad: Squad,
    /// Sum of ranking points over the squad (unscored players count as 0).
    pub total_forecast: f64,
    pub budget_cap: Money,
    /// Pool entries whose forecast was missing, stale, or invalid.
    pub forecast_issues: Vec<ForecastIssue>,
}

impl Selection {
    pub fn budget_used(&self) -> Money {
        self.squad.total_price()
    }

    pub fn budget_remaining(&self) -> Money {
        self.budget_cap - self.budget_used()
    }
}

/// Anything that can turn a player pool into a legal squad. The greedy
/// selector is the default; an exact solver can sit behind the same trait.
pub trait SquadSelector {
    fn select(&self, pool: &PlayerPool, budget_cap: Money) -> Result<Selection, SelectionError>;
}

// ---------------------------------------------------------------------------
// GreedySelector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GreedySelector {
    rules: SquadRules,
    sweep_budgets: bool,
}

impl GreedySelector {
    pub fn new(rules: SquadRules) -> Self {
        GreedySelector {
            rules,
            sweep_budgets: true,
        }
    }

    /// Run only the single greedy pass at the requested cap. Faster, but the
    /// result is no longer guaranteed monotone in the budget.
    pub fn without_budget_sweep(mut self) -> Self {
        self.sweep_budgets = false;
        self
    }

    pub fn rules(&self) -> &SquadRules {
        &self.rules
    }
}

impl SquadSelector for GreedySelector {
    fn select(&self, pool: &PlayerPool, budget_cap: Money) -> Result<Selection, SelectionError> {
        let ranked = Ranked::new(pool, &self.rules);
        ranked.check_supply(&self.rules)?;

        let floor = ranked.completion_from(0);
        // Holds the full-cap pass error until some pass succeeds.
        let mut best: Result<(Vec<Candidate>, f64), SelectionError> = ranked
            .greedy_pass(&self.rules, budget_cap)
            .map(|picks| {
                let total = total_points(&picks);
                (picks, total)
            });

        if self.sweep_budgets && floor < budget_cap {
            let mut budget = budget_cap.tenths() - 1;
            while budget >= floor.tenths() {
                if let Ok(picks) = ranked.greedy_pass(&self.rules, Money::from_tenths(budget)) {
                    let total = total_points(&picks);
                    let improves = match &best {
                        Ok((_, best_total)) => total > best_total + 1e-9,
                        Err(_) => true,
                    };
                    if improves {
                        debug!(budget, total, "budget sweep found a better squad");
                        best = Ok((picks, total));
                    }
                }
                budget -= 1;
            }
        }

        let (picks, total_forecast) = best?;
        let players: Vec<Player> = picks.iter().map(|c| c.player.clone()).collect();
        let squad = Squad::new(players, &self.rules.with_budget(budget_cap)).map_err(|violation| {
            warn!("greedy pass produced an illegal squad: {violation}");
            SelectionError::RuleViolation(violation)
        })?;

        let forecast_issues = pool.forecast_issues();
        if !forecast_issues.is_empty() {
            warn!(
                "{} of {} pool players have no usable forecast for {}",
                forecast_issues.len(),
                pool.len(),
                pool.round()
            );
        }

        info!(
            "selected squad for {}: {:.1} forecast points, {} of {} spent",
            pool.round(),
            total_forecast,
            squad.total_price(),
            budget_cap
        );

        Ok(Selection {
            squad,
            total_forecast,
            budget_cap,
            forecast_issues,
        })
    }
}

/// Convenience wrapper using the default greedy selector.
pub fn select_squad(
    pool: &PlayerPool,
    rules: &SquadRules,
    budget_cap: Money,
) -> Result<Selection, SelectionError> {
    GreedySelector::new(rules.clone()).select(pool, budget_cap)
}

// ---------------------------------------------------------------------------
// Greedy internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    player: &'a Player,
    points: f64,
    order: usize,
}

/// Forecast descending, then cheapest, then input order.
fn candidate_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.points
        .total_cmp(&a.points)
        .then(a.player.price.cmp(&b.player.price))
        .then(a.order.cmp(&b.order))
}

/// Selectable candidates per position (indexed by `Position::sort_order()`),
/// plus each partition's indices re-sorted by price for budget reservation.
struct Ranked<'a> {
    by_forecast: [Vec<Candidate<'a>>; 4],
    by_price: [Vec<usize>; 4],
    /// Cheapest cost of filling each position's quota, team caps ignored.
    min_cost: [Money; 4],
}

impl<'a> Ranked<'a> {
    fn new(pool: &'a PlayerPool, rules: &SquadRules) -> Self {
        let mut by_forecast: [Vec<Candidate<'a>>; 4] = Default::default();
        for (order, entry) in pool.entries().iter().enumerate() {
            if !entry.player.status.is_selectable(rules.allow_doubtful) {
                continue;
            }
            by_forecast[entry.player.position.sort_order()].push(Candidate {
                player: &entry.player,
                points: entry.ranking_points(),
                order,
            });
        }

        let mut by_price: [Vec<usize>; 4] = Default::default();
        let mut min_cost = [Money::ZERO; 4];
        for position in Position::ALL {
            let slot = position.sort_order();
            by_forecast[slot].sort_by(candidate_order);

            let partition = &by_forecast[slot];
            let mut indices: Vec<usize> = (0..partition.len()).collect();
            indices.sort_by_key(|&i| (partition[i].player.price, i));
            min_cost[slot] = indices
                .iter()
                .take(rules.quotas.get(position))
                .map(|&i| partition[i].player.price)
                .sum();
            by_price[slot] = indices;
        }

        Ranked {
            by_forecast,
            by_price,
            min_cost,
        }
    }

    fn check_supply(&self, rules: &SquadRules) -> Result<(), SelectionError> {
        for position in Position::ALL {
            let needed = rules.quotas.get(position);
            let found = self.by_forecast[position.sort_order()].len();
            if found < needed {
                return Err(SelectionError::InsufficientCandidates {
                    position,
                    needed,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Lower bound on the cost of filling every position from `slot` on.
    fn completion_from(&self, slot: usize) -> Money {
        self.min_cost[slot.min(4)..].iter().sum()
    }

    /// Sum of the `count` cheapest prices in a partition, skipping the
    /// candidates at the excluded forecast-order indices.
    fn cheapest_excluding(&self, slot: usize, count: usize, excluded: &[usize]) -> Money {
        let partition = &self.by_forecast[slot];
        self.by_price[slot]
            .iter()
            .filter(|&&i| !excluded.contains(&i))
            .take(count)
            .map(|&i| partition[i].player.price)
            .sum()
    }

    fn greedy_pass(&self, rules: &SquadRules, budget: Money) -> Result<Vec<Candidate<'a>>, SelectionError> {
        let mut picks: Vec<Candidate<'a>> = Vec::with_capacity(rules.squad_size());
        let mut spent = Money::ZERO;
        let mut team_counts: HashMap<TeamId, usize> = HashMap::new();

        for (slot, &position) in Position::ALL.iter().enumerate() {
            let quota = rules.quotas.get(position);
            let later_reserve = self.completion_from(slot + 1);
            // Forecast-order indices taken (or being considered) in this position.
            let mut taken: Vec<usize> = Vec::with_capacity(quota + 1);

            for (idx, candidate) in self.by_forecast[slot].iter().enumerate() {
                if taken.len() == quota {
                    break;
                }
                let team_count = team_counts.get(&candidate.player.team).copied().unwrap_or(0);
                if team_count >= rules.max_per_team {
                    continue;
                }

                let open_after = quota - taken.len() - 1;
                taken.push(idx);
                let same_position_reserve = self.cheapest_excluding(slot, open_after, &taken);
                taken.pop();

                let committed = spent + candidate.player.price + same_position_reserve + later_reserve;
                if committed > budget {
                    continue;
                }

                spent += candidate.player.price;
                *team_counts.entry(candidate.player.team).or_default() += 1;
                taken.push(idx);
                picks.push(*candidate);
            }

            if taken.len() < quota {
                return Err(SelectionError::InsufficientCandidates {
                    position,
                    needed: quota,
                    found: taken.len(),
                });
            }
        }

        Ok(picks)
    }
}

fn total_points(picks: &[Candidate]) -> f64 {
    picks.iter().map(|c| c.points).sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
