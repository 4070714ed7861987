// Forecast accuracy scoring for concluded rounds.
//
// Scoring is a pure function of its inputs: the same predictions and realized
// points always produce the same `RoundScore`, so re-scoring a round and
// replacing the stored record is safe.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::lineup::Lineup;
use crate::model::{PlayerId, RoundId, MAX_PLAUSIBLE_POINTS, MIN_PLAUSIBLE_POINTS};
use crate::rules::Thresholds;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A stored forecast. `predicted` is `None` when the provider never
/// delivered a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub player: PlayerId,
    pub round: RoundId,
    pub predicted: Option<f64>,
}

impl Prediction {
    /// The predicted value if it is usable for scoring `round`.
    fn scorable_value(&self, round: RoundId) -> Option<f64> {
        if self.round != round {
            return None;
        }
        self.predicted
            .filter(|v| v.is_finite() && (MIN_PLAUSIBLE_POINTS..=MAX_PLAUSIBLE_POINTS).contains(v))
    }
}

/// Per-prediction accuracy fields written back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPrediction {
    pub player: PlayerId,
    pub round: RoundId,
    pub predicted: f64,
    pub actual: f64,
    pub absolute_error: f64,
    /// 0..=100.
    pub accuracy: f64,
    pub correct: bool,
}

/// How the chosen lineup fared, with the captain counted twice on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineupScore {
    pub captain: PlayerId,
    pub predicted_points: f64,
    pub realized_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub round: RoundId,
    pub total_predicted: f64,
    pub total_actual: f64,
    pub total_absolute_error: f64,
    pub players_analyzed: usize,
    pub correct_predictions: usize,
    pub mean_absolute_error: f64,
    /// Aggregate accuracy from total error over total predicted points.
    pub accuracy: f64,
    /// Predictions with no usable value (missing, out of range, wrong round).
    pub unscored: usize,
    /// Usable predictions with no realized result.
    pub missing_results: usize,
    pub lineup: Option<LineupScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundScore {
    pub record: AccuracyRecord,
    pub predictions: Vec<ScoredPrediction>,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Accuracy of a single forecast, 0..=100.
///
/// Positive forecasts lose accuracy in proportion to their relative error.
/// A forecast of zero or below has no scale to be relative to, so it is
/// either exact (100) or wrong (0).
pub fn prediction_accuracy(predicted: f64, actual: f64) -> f64 {
    let error = (predicted - actual).abs();
    if predicted > 0.0 {
        (100.0 - error / predicted * 100.0).max(0.0)
    } else if error == 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Aggregate accuracy: total absolute error relative to total predicted points.
fn aggregate_accuracy(total_predicted: f64, total_absolute_error: f64, analyzed: usize) -> f64 {
    if analyzed == 0 {
        0.0
    } else if total_predicted > 0.0 {
        (100.0 - total_absolute_error / total_predicted * 100.0).max(0.0)
    } else if total_absolute_error == 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Score `round`.
///
/// `realized` maps players to their actual points. Starters of `lineup`
/// with no realized entry are taken to have scored zero.
pub fn score_round(
    round: RoundId,
    predictions: &[Prediction],
    realized: &HashMap<PlayerId, f64>,
    lineup: Option<&Lineup>,
    thresholds: &Thresholds,
) -> RoundScore {
    let mut seen: HashSet<PlayerId> = HashSet::with_capacity(predictions.len());
    let mut scored = Vec::with_capacity(predictions.len());
    let mut unscored = 0usize;
    let mut missing_results = 0usize;

    for prediction in predictions {
        if !seen.insert(prediction.player) {
            warn!(
                "duplicate prediction for {} in {}, keeping first",
                prediction.player, round
            );
            continue;
        }
        let Some(predicted) = prediction.scorable_value(round) else {
            unscored += 1;
            continue;
        };
        let Some(&actual) = realized.get(&prediction.player) else {
            missing_results += 1;
            continue;
        };

        let absolute_error = (predicted - actual).abs();
        scored.push(ScoredPrediction {
            player: prediction.player,
            round,
            predicted,
            actual,
            absolute_error,
            accuracy: prediction_accuracy(predicted, actual),
            correct: absolute_error <= thresholds.correct_within,
        });
    }

    let total_predicted: f64 = scored.iter().map(|s| s.predicted).sum();
    let total_actual: f64 = scored.iter().map(|s| s.actual).sum();
    let total_absolute_error: f64 = scored.iter().map(|s| s.absolute_error).sum();
    let players_analyzed = scored.len();
    let correct_predictions = scored.iter().filter(|s| s.correct).count();
    let mean_absolute_error = if players_analyzed == 0 {
        0.0
    } else {
        total_absolute_error / players_analyzed as f64
    };

    let lineup = lineup.map(|lineup| LineupScore {
        captain: lineup.captain,
        predicted_points: lineup.predicted_points,
        realized_points: lineup.total_points(|id| realized.get(&id).copied().unwrap_or(0.0)),
    });

    let record = AccuracyRecord {
        round,
        total_predicted,
        total_actual,
        total_absolute_error,
        players_analyzed,
        correct_predictions,
        mean_absolute_error,
        accuracy: aggregate_accuracy(total_predicted, total_absolute_error, players_analyzed),
        unscored,
        missing_results,
        lineup,
    };

    if unscored > 0 || missing_results > 0 {
        warn!(
            "{}: {} predictions unscored, {} without realized points",
            round, unscored, missing_results
        );
    }
    info!(
        "scored {}: {} players, {} correct, MAE {:.2}, accuracy {:.1}%",
        round, players_analyzed, correct_predictions, mean_absolute_error, record.accuracy
    );

    RoundScore {
        record,
        predictions: scored,
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One accuracy record per round. Inserting a round that is already present
/// replaces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyHistory {
    rounds: BTreeMap<RoundId, AccuracyRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub rounds: usize,
    pub players_analyzed: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    pub mean_absolute_error: f64,
    pub best_round: Option<RoundId>,
    pub worst_round: Option<RoundId>,
}

impl AccuracyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for its round. Returns the replaced record.
    pub fn upsert(&mut self, record: AccuracyRecord) -> Option<AccuracyRecord> {
        self.rounds.insert(record.round, record)
    }

    pub fn get(&self, round: RoundId) -> Option<&AccuracyRecord> {
        self.rounds.get(&round)
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Records in round order.
    pub fn records(&self) -> impl Iterator<Item = &AccuracyRecord> {
        self.rounds.values()
    }

    pub fn summary(&self) -> HistorySummary {
        let analyzed: Vec<&AccuracyRecord> =
            self.records().filter(|r| r.players_analyzed > 0).collect();

        let players_analyzed: usize = analyzed.iter().map(|r| r.players_analyzed).sum();
        let correct_predictions: usize = analyzed.iter().map(|r| r.correct_predictions).sum();
        let total_predicted: f64 = analyzed.iter().map(|r| r.total_predicted).sum();
        let total_error: f64 = analyzed.iter().map(|r| r.total_absolute_error).sum();

        let by_accuracy = |a: &&&AccuracyRecord, b: &&&AccuracyRecord| {
            a.accuracy.total_cmp(&b.accuracy).then(b.round.cmp(&a.round))
        };

        HistorySummary {
            rounds: self.len(),
            players_analyzed,
            correct_predictions,
            accuracy: aggregate_accuracy(total_predicted, total_error, players_analyzed),
            mean_absolute_error: if players_analyzed == 0 {
                0.0
            } else {
                total_error / players_analyzed as f64
            },
            best_round: analyzed.iter().max_by(by_accuracy).map(|r| r.round),
            worst_round: analyzed.iter().min_by(by_accuracy).map(|r| r.round),
        }
    }
}

impl FromIterator<AccuracyRecord> for AccuracyHistory {
    fn from_iter<I: IntoIterator<Item = AccuracyRecord>>(iter: I) -> Self {
        let mut history = AccuracyHistory::new();
        for record in iter {
            history.upsert(record);
        }
        history
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
