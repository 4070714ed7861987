// Form-times-fixture forecast. Needs no network, so it doubles as the
// fallback for failed provider batches.

use async_trait::async_trait;

use squadcast_core::model::MAX_PLAUSIBLE_POINTS;
use squadcast_core::{Availability, Forecast, RoundId};

use super::{ForecastError, ForecastProvider};
use crate::data::RosterRecord;

#[derive(Debug, Clone)]
pub struct FormulaForecaster {
    /// Multiplier per fixture difficulty, index 0 = difficulty 1.
    pub difficulty_multipliers: [f64; 5],
    /// Share of expected points a doubtful player is credited with.
    pub doubtful_factor: f64,
}

impl Default for FormulaForecaster {
    fn default() -> Self {
        FormulaForecaster {
            difficulty_multipliers: [1.3, 1.15, 1.0, 0.85, 0.7],
            doubtful_factor: 0.5,
        }
    }
}

impl FormulaForecaster {
    pub fn forecast_one(&self, round: RoundId, record: &RosterRecord) -> Forecast {
        let difficulty = usize::from(record.fixture_difficulty.clamp(1, 5)) - 1;
        let availability = match record.player.status {
            Availability::Available => 1.0,
            Availability::Doubtful => self.doubtful_factor,
            _ => 0.0,
        };
        let raw = record.form.max(0.0) * self.difficulty_multipliers[difficulty] * availability;
        Forecast {
            player: record.player.id,
            round,
            points: (raw.min(MAX_PLAUSIBLE_POINTS) * 10.0).round() / 10.0,
        }
    }

    pub fn forecast_all(&self, round: RoundId, batch: &[RosterRecord]) -> Vec<Forecast> {
        batch.iter().map(|r| self.forecast_one(round, r)).collect()
    }
}

#[async_trait]
impl ForecastProvider for FormulaForecaster {
    fn name(&self) -> &'static str {
        "formula"
    }

    async fn forecast_batch(
        &self,
        round: RoundId,
        batch: &[RosterRecord],
    ) -> Result<Vec<Forecast>, ForecastError> {
        Ok(self.forecast_all(round, batch))
    }
}
