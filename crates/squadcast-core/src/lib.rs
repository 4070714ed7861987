// Library root: the decision-support core.
//
// Everything here is synchronous and works on in-memory snapshots passed in
// by the caller. Loading data, calling forecast providers and persisting
// results live in the application crate.

pub mod accuracy;
pub mod lineup;
pub mod model;
pub mod rules;
pub mod selection;
pub mod transfers;

pub use accuracy::{
    prediction_accuracy, score_round, AccuracyHistory, AccuracyRecord, HistorySummary,
    LineupScore, Prediction, RoundScore, ScoredPrediction,
};
pub use lineup::{derive_lineup, Formation, Lineup, LineupError};
pub use model::{
    Availability, Forecast, ForecastIssue, ForecastStatus, Money, Player, PlayerId, PlayerPool,
    PoolEntry, Position, RoundId, TeamId,
};
pub use rules::{
    is_legal_lineup, is_legal_squad, LineupRules, PositionQuotas, Squad, SquadRules,
    SquadViolation, Thresholds,
};
pub use selection::{select_squad, GreedySelector, Selection, SelectionError, SquadSelector};
pub use transfers::{
    apply_swaps, evaluate_scenario, suggest_transfers, ExtraTransferCaveat, OutgoingReview,
    Priority, ReplacementOutcome, RoundProjection, ScenarioError, ScenarioReport, Swap,
    TransferOptions, TransferReport, TransferStatus, TransferSuggestion,
};
