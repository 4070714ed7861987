// Forecast providers and the batched fetch that feeds the player pool.
//
// A provider turns a batch of roster records into per-player expected points
// for one round. Batches run concurrently; a failed batch is either re-scored
// with the formula fallback or left unscored. It is never filled with zeros.

pub mod formula;
pub mod llm;

use std::collections::HashSet;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use squadcast_core::{Forecast, PlayerId, RoundId};

use crate::data::RosterRecord;

pub use formula::FormulaForecaster;
pub use llm::LlmForecaster;

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not parse provider reply: {0}")]
    Parse(String),
}

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Forecast every player in `batch` for `round`. Players the provider
    /// has nothing to say about may be left out of the result.
    async fn forecast_batch(
        &self,
        round: RoundId,
        batch: &[RosterRecord],
    ) -> Result<Vec<Forecast>, ForecastError>;
}

// ---------------------------------------------------------------------------
// Batched fetch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub batch_size: usize,
    pub concurrency: usize,
}

/// Outcome of a forecasting run over a roster.
#[derive(Debug, Clone, Default)]
pub struct ForecastRun {
    /// In roster order.
    pub forecasts: Vec<Forecast>,
    pub failed_batches: usize,
    /// Failed batches that were re-scored by the fallback.
    pub fallback_batches: usize,
    /// Players with no forecast after the run.
    pub unscored: Vec<PlayerId>,
}

/// Run `provider` over `roster` in batches.
pub async fn fetch_forecasts(
    provider: &dyn ForecastProvider,
    fallback: Option<&FormulaForecaster>,
    round: RoundId,
    roster: &[RosterRecord],
    options: FetchOptions,
) -> ForecastRun {
    let batches: Vec<&[RosterRecord]> = roster.chunks(options.batch_size.max(1)).collect();
    info!(
        "forecasting {} players for {} with {} in {} batches",
        roster.len(),
        round,
        provider.name(),
        batches.len()
    );

    let mut results: Vec<(usize, Result<Vec<Forecast>, ForecastError>)> =
        stream::iter(batches.iter().copied().enumerate())
            .map(|(index, batch)| async move {
                (index, provider.forecast_batch(round, batch).await)
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(index, _)| *index);

    let mut run = ForecastRun::default();
    for (index, result) in results {
        let batch = batches[index];
        let members: HashSet<PlayerId> = batch.iter().map(|r| r.player.id).collect();
        let forecasts = match result {
            Ok(forecasts) => forecasts,
            Err(e) => {
                run.failed_batches += 1;
                match fallback {
                    Some(formula) => {
                        warn!(
                            "{} batch {} failed ({}); using formula fallback",
                            provider.name(),
                            index,
                            e
                        );
                        run.fallback_batches += 1;
                        formula.forecast_all(round, batch)
                    }
                    None => {
                        warn!(
                            "{} batch {} failed ({}); {} players left unscored",
                            provider.name(),
                            index,
                            e,
                            batch.len()
                        );
                        Vec::new()
                    }
                }
            }
        };

        let mut seen = HashSet::new();
        for forecast in forecasts {
            if !members.contains(&forecast.player) {
                debug!("ignoring forecast for {} outside batch {}", forecast.player, index);
                continue;
            }
            if forecast.round != round || !seen.insert(forecast.player) {
                continue;
            }
            run.forecasts.push(forecast);
        }
        run.unscored
            .extend(batch.iter().map(|r| r.player.id).filter(|id| !seen.contains(id)));
    }

    // Back into roster order.
    let order: std::collections::HashMap<PlayerId, usize> = roster
        .iter()
        .enumerate()
        .map(|(i, r)| (r.player.id, i))
        .collect();
    run.forecasts
        .sort_by_key(|f| order.get(&f.player).copied().unwrap_or(usize::MAX));

    if !run.unscored.is_empty() {
        warn!("{} players have no forecast for {}", run.unscored.len(), round);
    }
    info!(
        "forecast run for {}: {} forecasts, {} failed batches ({} via fallback)",
        round,
        run.forecasts.len(),
        run.failed_batches,
        run.fallback_batches
    );
    run
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use squadcast_core::{Availability, Money, Player, Position, TeamId};

    fn roster(n: u32) -> Vec<RosterRecord> {
        (1..=n)
            .map(|i| RosterRecord {
                player: Player {
                    id: PlayerId(i),
                    name: format!("P{i}"),
                    team: TeamId(i % 5),
                    position: Position::Midfielder,
                    price: Money::from_tenths(50),
                    status: Availability::Available,
                },
                form: 4.0,
                fixture_difficulty: 3,
            })
            .collect()
    }

    /// Scores every player at 6.0, fails any batch containing `poison`, and
    /// skips player `silent`.
    struct StubProvider {
        poison: Option<PlayerId>,
        silent: Option<PlayerId>,
    }

    #[async_trait]
    impl ForecastProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn forecast_batch(
            &self,
            round: RoundId,
            batch: &[RosterRecord],
        ) -> Result<Vec<Forecast>, ForecastError> {
            if batch.iter().any(|r| Some(r.player.id) == self.poison) {
                return Err(ForecastError::Parse("poisoned batch".into()));
            }
            Ok(batch
                .iter()
                .filter(|r| Some(r.player.id) != self.silent)
                .map(|r| Forecast {
                    player: r.player.id,
                    round,
                    points: 6.0,
                })
                .chain(std::iter::once(Forecast {
                    player: PlayerId(999),
                    round,
                    points: 1.0,
                }))
                .collect())
        }
    }

    const OPTIONS: FetchOptions = FetchOptions {
        batch_size: 4,
        concurrency: 3,
    };

    #[tokio::test]
    async fn all_batches_succeed_in_roster_order() {
        let roster = roster(10);
        let provider = StubProvider { poison: None, silent: None };
        let run = fetch_forecasts(&provider, None, RoundId(3), &roster, OPTIONS).await;

        assert_eq!(run.forecasts.len(), 10);
        assert_eq!(run.failed_batches, 0);
        assert!(run.unscored.is_empty());
        let ids: Vec<u32> = run.forecasts.iter().map(|f| f.player.0).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failed_batch_without_fallback_is_unscored() {
        let roster = roster(10);
        let provider = StubProvider { poison: Some(PlayerId(6)), silent: None };
        let run = fetch_forecasts(&provider, None, RoundId(3), &roster, OPTIONS).await;

        // Batch 5-8 failed.
        assert_eq!(run.failed_batches, 1);
        assert_eq!(run.fallback_batches, 0);
        assert_eq!(run.forecasts.len(), 6);
        assert_eq!(
            run.unscored,
            vec![PlayerId(5), PlayerId(6), PlayerId(7), PlayerId(8)]
        );
    }

    #[tokio::test]
    async fn failed_batch_uses_fallback() {
        let roster = roster(10);
        let provider = StubProvider { poison: Some(PlayerId(6)), silent: None };
        let formula = FormulaForecaster::default();
        let run = fetch_forecasts(&provider, Some(&formula), RoundId(3), &roster, OPTIONS).await;

        assert_eq!(run.failed_batches, 1);
        assert_eq!(run.fallback_batches, 1);
        assert_eq!(run.forecasts.len(), 10);
        assert!(run.unscored.is_empty());
        let fallback = run.forecasts.iter().find(|f| f.player == PlayerId(6)).unwrap();
        assert!((fallback.points - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn omitted_players_are_unscored_not_zero() {
        let roster = roster(5);
        let provider = StubProvider { poison: None, silent: Some(PlayerId(2)) };
        let run = fetch_forecasts(&provider, None, RoundId(3), &roster, OPTIONS).await;

        assert_eq!(run.unscored, vec![PlayerId(2)]);
        assert!(run.forecasts.iter().all(|f| f.player != PlayerId(2)));
        assert!(run.forecasts.iter().all(|f| f.player != PlayerId(999)));
    }
}
