// Data file loading: player snapshot CSV, realized points CSV, and the user's
// squad file.
//
// Rows that fail to parse are skipped with a warning rather than failing the
// whole import; a snapshot with a handful of bad rows is still usable.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use squadcast_core::{Availability, Money, Player, PlayerId, Position, RoundId, TeamId};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A player plus the inputs the formula forecaster needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRecord {
    pub player: Player,
    /// Recent points per game.
    pub form: f64,
    /// 1 (easiest) to 5 (hardest).
    pub fixture_difficulty: u8,
}

/// The user's current squad and transfer state.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSquad {
    pub players: Vec<PlayerId>,
    pub bank: Money,
    pub free_transfers: Option<u32>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("failed to parse {path}: {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Raw serde structs (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawPlayer {
    id: u32,
    name: String,
    team: u32,
    position: String,
    price: f64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    form: f64,
    #[serde(default = "default_difficulty")]
    fixture_difficulty: u8,
}

fn default_difficulty() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
struct RawResult {
    player_id: u32,
    points: f64,
}

#[derive(Debug, Deserialize)]
struct RawSquadFile {
    bank: f64,
    #[serde(default)]
    free_transfers: Option<u32>,
    players: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

fn parse_player(raw: RawPlayer) -> Result<RosterRecord, String> {
    let name = raw.name.trim().to_string();
    let position = Position::from_str_pos(&raw.position)
        .ok_or_else(|| format!("unknown position '{}'", raw.position.trim()))?;
    // An empty status column means the player is fit.
    let status = if raw.status.trim().is_empty() {
        Availability::Available
    } else {
        Availability::from_str_status(&raw.status)
            .ok_or_else(|| format!("unknown status '{}'", raw.status.trim()))?
    };
    let price = Money::from_decimal(raw.price)
        .filter(|p| *p > Money::ZERO)
        .ok_or_else(|| format!("invalid price {}", raw.price))?;
    if !raw.form.is_finite() {
        return Err("non-finite form".into());
    }
    if !(1..=5).contains(&raw.fixture_difficulty) {
        return Err(format!(
            "fixture difficulty {} outside 1-5",
            raw.fixture_difficulty
        ));
    }

    Ok(RosterRecord {
        player: Player {
            id: PlayerId(raw.id),
            name,
            team: TeamId(raw.team),
            position,
            price,
            status,
        },
        form: raw.form,
        fixture_difficulty: raw.fixture_difficulty,
    })
}

pub fn load_players_from_reader<R: Read>(rdr: R) -> Result<Vec<RosterRecord>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut records = Vec::new();
    for result in reader.deserialize::<RawPlayer>() {
        match result {
            Ok(raw) => {
                let id = raw.id;
                match parse_player(raw) {
                    Ok(record) => records.push(record),
                    Err(reason) => warn!("skipping player {}: {}", id, reason),
                }
            }
            Err(e) => warn!("skipping malformed player row: {}", e),
        }
    }
    Ok(records)
}

/// Realized points per player. Later rows for the same player win.
pub fn load_results_from_reader<R: Read>(rdr: R) -> Result<HashMap<PlayerId, f64>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut results = HashMap::new();
    for result in reader.deserialize::<RawResult>() {
        match result {
            Ok(raw) if raw.points.is_finite() => {
                results.insert(PlayerId(raw.player_id), raw.points);
            }
            Ok(raw) => warn!("skipping result for {}: non-finite points", raw.player_id),
            Err(e) => warn!("skipping malformed result row: {}", e),
        }
    }
    Ok(results)
}

pub fn parse_user_squad(text: &str) -> Result<UserSquad, toml::de::Error> {
    let raw: RawSquadFile = toml::from_str(text)?;
    Ok(UserSquad {
        players: raw.players.into_iter().map(PlayerId).collect(),
        // Non-finite bank values are clamped to zero rather than rejected.
        bank: Money::from_decimal(raw.bank).unwrap_or(Money::ZERO),
        free_transfers: raw.free_transfers,
    })
}

// ---------------------------------------------------------------------------
// Path-based loaders
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File, DataError> {
    std::fs::File::open(path).map_err(|e| DataError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn load_players(path: &Path) -> Result<Vec<RosterRecord>, DataError> {
    let records = load_players_from_reader(open(path)?).map_err(|e| DataError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    if records.is_empty() {
        return Err(DataError::Validation(format!(
            "no usable players in {}",
            path.display()
        )));
    }
    Ok(records)
}

pub fn load_results(path: &Path) -> Result<HashMap<PlayerId, f64>, DataError> {
    load_results_from_reader(open(path)?).map_err(|e| DataError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Realized-points file for `round` inside `dir`.
pub fn results_path(dir: &Path, round: RoundId) -> std::path::PathBuf {
    dir.join(format!("round_{}.csv", round.0))
}

pub fn load_user_squad(path: &Path) -> Result<UserSquad, DataError> {
    let text = std::fs::read_to_string(path).map_err(|e| DataError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_user_squad(&text).map_err(|e| DataError::Toml {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
