// SQLite persistence for players, predictions, and the core's outputs.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use squadcast_core::{
    AccuracyHistory, AccuracyRecord, Availability, Forecast, Lineup, LineupScore, Money, Player,
    PlayerId, Position, Prediction, Priority, RoundId, RoundScore, Selection, TeamId,
    TransferReport, TransferSuggestion,
};

use crate::data::RosterRecord;

/// SQLite-backed store. All state lives here between invocations.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and ensure all tables exist.
    /// Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS players (
                id                 INTEGER PRIMARY KEY,
                name               TEXT NOT NULL,
                team               INTEGER NOT NULL,
                position           TEXT NOT NULL,
                price              INTEGER NOT NULL,
                status             TEXT NOT NULL,
                form               REAL NOT NULL DEFAULT 0,
                fixture_difficulty INTEGER NOT NULL DEFAULT 3,
                updated_at         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS predictions (
                player_id      INTEGER NOT NULL REFERENCES players(id),
                round          INTEGER NOT NULL,
                predicted      REAL,
                source         TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                actual         REAL,
                absolute_error REAL,
                accuracy       REAL,
                correct        INTEGER,
                PRIMARY KEY (player_id, round)
            );

            CREATE TABLE IF NOT EXISTS selected_squads (
                round          INTEGER PRIMARY KEY,
                budget_cap     INTEGER NOT NULL,
                budget_used    INTEGER NOT NULL,
                total_forecast REAL NOT NULL,
                players        TEXT NOT NULL,
                lineup         TEXT NOT NULL,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transfer_suggestions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       TEXT NOT NULL,
                round         INTEGER NOT NULL,
                rank          INTEGER NOT NULL,
                player_out    INTEGER NOT NULL,
                player_in     INTEGER NOT NULL,
                priority      TEXT NOT NULL,
                points_impact REAL NOT NULL,
                price_delta   INTEGER NOT NULL,
                rationale     TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                UNIQUE (user_id, round, rank)
            );

            CREATE TABLE IF NOT EXISTS accuracy_history (
                round                INTEGER PRIMARY KEY,
                total_predicted      REAL NOT NULL,
                total_actual         REAL NOT NULL,
                total_absolute_error REAL NOT NULL,
                players_analyzed     INTEGER NOT NULL,
                correct_predictions  INTEGER NOT NULL,
                mean_absolute_error  REAL NOT NULL,
                accuracy             REAL NOT NULL,
                unscored             INTEGER NOT NULL,
                missing_results      INTEGER NOT NULL,
                lineup_captain       INTEGER,
                lineup_predicted     REAL,
                lineup_realized      REAL,
                scored_at            TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection. A poisoned lock still holds a usable
    /// connection since every write runs inside a transaction.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Insert or refresh the player snapshot in a single transaction.
    pub fn upsert_players(&self, records: &[RosterRecord]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin player import")?;
        let now = Self::now();
        for r in records {
            let p = &r.player;
            tx.execute(
                "INSERT INTO players (id, name, team, position, price, status, form, fixture_difficulty, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    name               = excluded.name,
                    team               = excluded.team,
                    position           = excluded.position,
                    price              = excluded.price,
                    status             = excluded.status,
                    form               = excluded.form,
                    fixture_difficulty = excluded.fixture_difficulty,
                    updated_at         = excluded.updated_at",
                params![
                    p.id.0,
                    p.name,
                    p.team.0,
                    p.position.display_str(),
                    p.price.tenths(),
                    p.status.display_str(),
                    r.form,
                    r.fixture_difficulty,
                    now,
                ],
            )
            .context("failed to upsert player")?;
        }
        tx.commit().context("failed to commit player import")?;
        Ok(())
    }

    /// Load the stored player snapshot, ordered by id.
    pub fn load_players(&self) -> Result<Vec<RosterRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, team, position, price, status, form, fixture_difficulty
                 FROM players ORDER BY id",
            )
            .context("failed to prepare load_players query")?;

        type Row = (u32, String, u32, String, i64, String, f64, u8);
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .context("failed to query players")?
            .collect::<std::result::Result<Vec<Row>, _>>()
            .context("failed to map player rows")?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, name, team, position, price, status, form, fixture_difficulty) in rows {
            let (Some(position), Some(status)) = (
                Position::from_str_pos(&position),
                Availability::from_str_status(&status),
            ) else {
                warn!("skipping stored player {id}: bad position or status");
                continue;
            };
            records.push(RosterRecord {
                player: Player {
                    id: PlayerId(id),
                    name,
                    team: TeamId(team),
                    position,
                    price: Money::from_tenths(price),
                    status,
                },
                form,
                fixture_difficulty,
            });
        }
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    /// Store a forecasting run for `round`. Players in `unscored` get a NULL
    /// prediction so they are counted, not silently dropped, when scoring.
    /// Re-running replaces earlier predictions for the same round.
    pub fn save_forecasts(
        &self,
        round: RoundId,
        forecasts: &[Forecast],
        unscored: &[PlayerId],
        source: &str,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin forecast save")?;
        let now = Self::now();
        let rows = forecasts
            .iter()
            .filter(|f| f.round == round)
            .map(|f| (f.player, Some(f.points)))
            .chain(unscored.iter().map(|&id| (id, None)));
        for (player, predicted) in rows {
            tx.execute(
                "INSERT INTO predictions (player_id, round, predicted, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(player_id, round) DO UPDATE SET
                    predicted      = excluded.predicted,
                    source         = excluded.source,
                    created_at     = excluded.created_at,
                    actual         = NULL,
                    absolute_error = NULL,
                    accuracy       = NULL,
                    correct        = NULL",
                params![player.0, round.0, predicted, source, now],
            )
            .with_context(|| format!("failed to save prediction for {player}"))?;
        }
        tx.commit().context("failed to commit forecasts")?;
        Ok(())
    }

    /// Every stored prediction row for `round`, including unscored ones.
    pub fn load_predictions(&self, round: RoundId) -> Result<Vec<Prediction>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT player_id, predicted FROM predictions
                 WHERE round = ?1 ORDER BY player_id",
            )
            .context("failed to prepare load_predictions query")?;
        let predictions = stmt
            .query_map(params![round.0], |row| {
                Ok(Prediction {
                    player: PlayerId(row.get(0)?),
                    round,
                    predicted: row.get(1)?,
                })
            })
            .context("failed to query predictions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map prediction rows")?;
        Ok(predictions)
    }

    /// Forecasts for `round`, skipping unscored rows.
    pub fn load_forecasts(&self, round: RoundId) -> Result<Vec<Forecast>> {
        Ok(self
            .load_predictions(round)?
            .into_iter()
            .filter_map(|p| {
                p.predicted.map(|points| Forecast {
                    player: p.player,
                    round,
                    points,
                })
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Selected squads
    // ------------------------------------------------------------------

    /// Store the selected squad and its lineup for `round`, replacing any
    /// earlier selection.
    pub fn save_selection(&self, round: RoundId, selection: &Selection, lineup: &Lineup) -> Result<()> {
        let players = serde_json::to_string(&selection.squad.ids())
            .context("failed to serialize squad")?;
        let lineup_json = serde_json::to_string(lineup).context("failed to serialize lineup")?;
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO selected_squads
                (round, budget_cap, budget_used, total_forecast, players, lineup, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                round.0,
                selection.budget_cap.tenths(),
                selection.budget_used().tenths(),
                selection.total_forecast,
                players,
                lineup_json,
                Self::now(),
            ],
        )
        .context("failed to save selected squad")?;
        Ok(())
    }

    /// The lineup chosen for `round`, if a squad was selected.
    pub fn load_lineup(&self, round: RoundId) -> Result<Option<Lineup>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT lineup FROM selected_squads WHERE round = ?1",
                params![round.0],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query selected squad")?;
        json.map(|j| serde_json::from_str(&j).context("failed to deserialize lineup"))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Transfer suggestions
    // ------------------------------------------------------------------

    /// Replace the stored suggestions for (`user_id`, `round`).
    pub fn save_suggestions(&self, user_id: &str, round: RoundId, report: &TransferReport) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin suggestion save")?;
        tx.execute(
            "DELETE FROM transfer_suggestions WHERE user_id = ?1 AND round = ?2",
            params![user_id, round.0],
        )
        .context("failed to clear old suggestions")?;
        let now = Self::now();
        for (rank, s) in report.suggestions.iter().enumerate() {
            tx.execute(
                "INSERT INTO transfer_suggestions
                    (user_id, round, rank, player_out, player_in, priority, points_impact, price_delta, rationale, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user_id,
                    round.0,
                    rank as i64,
                    s.player_out.0,
                    s.player_in.0,
                    s.priority.display_str(),
                    s.points_impact,
                    s.price_delta.tenths(),
                    s.rationale,
                    now,
                ],
            )
            .context("failed to insert suggestion")?;
        }
        tx.commit().context("failed to commit suggestions")?;
        Ok(())
    }

    pub fn load_suggestions(&self, user_id: &str, round: RoundId) -> Result<Vec<TransferSuggestion>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT player_out, player_in, priority, points_impact, price_delta, rationale
                 FROM transfer_suggestions WHERE user_id = ?1 AND round = ?2 ORDER BY rank",
            )
            .context("failed to prepare load_suggestions query")?;
        let rows = stmt
            .query_map(params![user_id, round.0], |row| {
                let priority: String = row.get(2)?;
                Ok((
                    TransferSuggestion {
                        player_out: PlayerId(row.get(0)?),
                        player_in: PlayerId(row.get(1)?),
                        priority: Priority::Low,
                        points_impact: row.get(3)?,
                        price_delta: Money::from_tenths(row.get(4)?),
                        rationale: row.get(5)?,
                    },
                    priority,
                ))
            })
            .context("failed to query suggestions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map suggestion rows")?;

        Ok(rows
            .into_iter()
            .map(|(mut s, priority)| {
                s.priority = Priority::from_str_priority(&priority).unwrap_or(Priority::Low);
                s
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Accuracy
    // ------------------------------------------------------------------

    /// Write a round's score: the history row plus per-prediction accuracy
    /// fields, in one transaction. Re-scoring a round overwrites both.
    pub fn save_round_score(&self, score: &RoundScore) -> Result<()> {
        let r = &score.record;
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin score save")?;

        tx.execute(
            "INSERT INTO accuracy_history
                (round, total_predicted, total_actual, total_absolute_error, players_analyzed,
                 correct_predictions, mean_absolute_error, accuracy, unscored, missing_results,
                 lineup_captain, lineup_predicted, lineup_realized, scored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(round) DO UPDATE SET
                total_predicted      = excluded.total_predicted,
                total_actual         = excluded.total_actual,
                total_absolute_error = excluded.total_absolute_error,
                players_analyzed     = excluded.players_analyzed,
                correct_predictions  = excluded.correct_predictions,
                mean_absolute_error  = excluded.mean_absolute_error,
                accuracy             = excluded.accuracy,
                unscored             = excluded.unscored,
                missing_results      = excluded.missing_results,
                lineup_captain       = excluded.lineup_captain,
                lineup_predicted     = excluded.lineup_predicted,
                lineup_realized      = excluded.lineup_realized,
                scored_at            = excluded.scored_at",
            params![
                r.round.0,
                r.total_predicted,
                r.total_actual,
                r.total_absolute_error,
                r.players_analyzed as i64,
                r.correct_predictions as i64,
                r.mean_absolute_error,
                r.accuracy,
                r.unscored as i64,
                r.missing_results as i64,
                r.lineup.map(|l| l.captain.0),
                r.lineup.map(|l| l.predicted_points),
                r.lineup.map(|l| l.realized_points),
                Self::now(),
            ],
        )
        .context("failed to upsert accuracy history")?;

        tx.execute(
            "UPDATE predictions
             SET actual = NULL, absolute_error = NULL, accuracy = NULL, correct = NULL
             WHERE round = ?1",
            params![r.round.0],
        )
        .context("failed to reset prediction accuracy")?;
        for p in &score.predictions {
            tx.execute(
                "UPDATE predictions
                 SET actual = ?3, absolute_error = ?4, accuracy = ?5, correct = ?6
                 WHERE player_id = ?1 AND round = ?2",
                params![
                    p.player.0,
                    p.round.0,
                    p.actual,
                    p.absolute_error,
                    p.accuracy,
                    p.correct
                ],
            )
            .context("failed to update prediction accuracy")?;
        }

        tx.commit().context("failed to commit round score")?;
        info!("stored accuracy for {}", r.round);
        Ok(())
    }

    /// All stored accuracy records.
    pub fn load_history(&self) -> Result<AccuracyHistory> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT round, total_predicted, total_actual, total_absolute_error,
                        players_analyzed, correct_predictions, mean_absolute_error, accuracy,
                        unscored, missing_results, lineup_captain, lineup_predicted,
                        lineup_realized
                 FROM accuracy_history ORDER BY round",
            )
            .context("failed to prepare load_history query")?;
        let records = stmt
            .query_map([], |row| {
                let captain: Option<u32> = row.get(10)?;
                let predicted: Option<f64> = row.get(11)?;
                let realized: Option<f64> = row.get(12)?;
                let lineup = match (captain, predicted, realized) {
                    (Some(c), Some(p), Some(r)) => Some(LineupScore {
                        captain: PlayerId(c),
                        predicted_points: p,
                        realized_points: r,
                    }),
                    _ => None,
                };
                Ok(AccuracyRecord {
                    round: RoundId(row.get(0)?),
                    total_predicted: row.get(1)?,
                    total_actual: row.get(2)?,
                    total_absolute_error: row.get(3)?,
                    players_analyzed: row.get::<_, i64>(4)? as usize,
                    correct_predictions: row.get::<_, i64>(5)? as usize,
                    mean_absolute_error: row.get(6)?,
                    accuracy: row.get(7)?,
                    unscored: row.get::<_, i64>(8)? as usize,
                    missing_results: row.get::<_, i64>(9)? as usize,
                    lineup,
                })
            })
            .context("failed to query accuracy history")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map accuracy rows")?;
        Ok(records.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squadcast_core::{score_round, Formation, Thresholds};
    use std::collections::HashMap;

    const ROUND: RoundId = RoundId(4);

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Store {
        Store::open(":memory:").expect("in-memory database should open")
    }

    fn record(id: u32, position: Position) -> RosterRecord {
        RosterRecord {
            player: Player {
                id: PlayerId(id),
                name: format!("Player {id}"),
                team: TeamId(id % 4),
                position,
                price: Money::from_tenths(55),
                status: Availability::Available,
            },
            form: 3.5,
            fixture_difficulty: 2,
        }
    }

    fn seeded_db() -> Store {
        let db = test_db();
        let records: Vec<RosterRecord> = (1..=4).map(|i| record(i, Position::Midfielder)).collect();
        db.upsert_players(&records).unwrap();
        db
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        for table in [
            "players",
            "predictions",
            "selected_squads",
            "transfer_suggestions",
            "accuracy_history",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn players_round_trip_and_update() {
        let db = seeded_db();
        let mut changed = record(2, Position::Midfielder);
        changed.player.status = Availability::Injured;
        changed.player.price = Money::from_tenths(60);
        db.upsert_players(&[changed.clone()]).unwrap();

        let players = db.load_players().unwrap();
        assert_eq!(players.len(), 4);
        assert_eq!(players[1], changed);
    }

    #[test]
    fn unscored_predictions_are_stored_as_null() {
        let db = seeded_db();
        let forecasts = vec![
            Forecast { player: PlayerId(1), round: ROUND, points: 5.0 },
            Forecast { player: PlayerId(2), round: ROUND, points: 0.0 },
        ];
        db.save_forecasts(ROUND, &forecasts, &[PlayerId(3)], "formula").unwrap();

        let predictions = db.load_predictions(ROUND).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[1].predicted, Some(0.0));
        assert_eq!(predictions[2].predicted, None);
        assert_eq!(db.load_forecasts(ROUND).unwrap().len(), 2);
    }

    #[test]
    fn predictions_require_known_players() {
        let db = test_db();
        let forecasts = vec![Forecast { player: PlayerId(77), round: ROUND, points: 1.0 }];
        assert!(db.save_forecasts(ROUND, &forecasts, &[], "formula").is_err());
    }

    #[test]
    fn lineup_round_trip() {
        let db = test_db();
        assert!(db.load_lineup(ROUND).unwrap().is_none());

        let lineup = Lineup {
            starters: (1..=11).map(PlayerId).collect(),
            bench: (12..=15).map(PlayerId).collect(),
            captain: PlayerId(5),
            vice_captain: PlayerId(6),
            formation: Formation { defenders: 4, midfielders: 4, forwards: 2 },
            predicted_points: 61.5,
        };
        let conn = db.conn();
        conn.execute(
            "INSERT INTO selected_squads VALUES (?1, 1000, 950, 58.0, '[]', ?2, 'now')",
            params![ROUND.0, serde_json::to_string(&lineup).unwrap()],
        )
        .unwrap();
        drop(conn);

        assert_eq!(db.load_lineup(ROUND).unwrap(), Some(lineup));
    }

    #[test]
    fn rescoring_overwrites_history() {
        let db = seeded_db();
        let forecasts = vec![
            Forecast { player: PlayerId(1), round: ROUND, points: 5.0 },
            Forecast { player: PlayerId(2), round: ROUND, points: 5.0 },
        ];
        db.save_forecasts(ROUND, &forecasts, &[], "formula").unwrap();

        let predictions = db.load_predictions(ROUND).unwrap();
        let realized: HashMap<PlayerId, f64> =
            [(PlayerId(1), 5.0), (PlayerId(2), 9.0)].into_iter().collect();
        let score = score_round(ROUND, &predictions, &realized, None, &Thresholds::default());

        db.save_round_score(&score).unwrap();
        db.save_round_score(&score).unwrap();

        let history = db.load_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.get(ROUND), Some(&score.record));

        let conn = db.conn();
        let (accuracy, correct): (f64, bool) = conn
            .query_row(
                "SELECT accuracy, correct FROM predictions WHERE player_id = 2 AND round = ?1",
                params![ROUND.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!((accuracy - 20.0).abs() < 1e-9);
        assert!(!correct);
    }

    #[test]
    fn suggestions_replace_previous_run() {
        let db = test_db();
        let suggestion = |out: u32, impact: f64| TransferSuggestion {
            player_out: PlayerId(out),
            player_in: PlayerId(out + 100),
            priority: Priority::High,
            points_impact: impact,
            price_delta: Money::from_tenths(-5),
            rationale: format!("swap {out}"),
        };
        let report = |suggestions| TransferReport {
            suggestions,
            reviews: Vec::new(),
            status: squadcast_core::TransferStatus::SuggestionsAvailable,
            caveat: None,
        };

        db.save_suggestions("me", ROUND, &report(vec![suggestion(1, 5.0), suggestion(2, 4.0)]))
            .unwrap();
        db.save_suggestions("me", ROUND, &report(vec![suggestion(3, 6.0)])).unwrap();

        let stored = db.load_suggestions("me", ROUND).unwrap();
        assert_eq!(stored, vec![suggestion(3, 6.0)]);
        assert!(db.load_suggestions("someone-else", ROUND).unwrap().is_empty());
    }
}
