// Domain types: players, positions, money, forecasts, and the per-round pool.

use std::collections::HashMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team {}", self.0)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// The four disjoint playing positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    /// Canonical processing order. Squad selection walks positions in this
    /// order, so results are reproducible for identical input.
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    /// Parse a position string.
    ///
    /// Accepts the short codes used by the data provider ("GKP", "DEF", "MID",
    /// "FWD"), the common aliases ("GK", "FW") and full words.
    pub fn from_str_pos(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GKP" | "GK" | "G" | "GOALKEEPER" | "KEEPER" => Some(Position::Goalkeeper),
            "DEF" | "D" | "DEFENDER" => Some(Position::Defender),
            "MID" | "M" | "MIDFIELDER" => Some(Position::Midfielder),
            "FWD" | "FW" | "F" | "FORWARD" => Some(Position::Forward),
            _ => None,
        }
    }

    /// Return the display string for this position.
    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GKP",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }

    /// Index into `Position::ALL`.
    pub fn sort_order(&self) -> usize {
        match self {
            Position::Goalkeeper => 0,
            Position::Defender => 1,
            Position::Midfielder => 2,
            Position::Forward => 3,
        }
    }

    pub fn is_outfield(&self) -> bool {
        !matches!(self, Position::Goalkeeper)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Doubtful,
    Injured,
    Suspended,
    Unavailable,
}

impl Availability {
    /// Parse a status string. Accepts full words and the single-letter codes
    /// the roster provider uses (`a`, `d`, `i`, `s`, `u`).
    pub fn from_str_status(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "a" | "available" => Some(Availability::Available),
            "d" | "doubtful" => Some(Availability::Doubtful),
            "i" | "injured" => Some(Availability::Injured),
            "s" | "suspended" => Some(Availability::Suspended),
            "u" | "n" | "unavailable" => Some(Availability::Unavailable),
            _ => None,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Doubtful => "doubtful",
            Availability::Injured => "injured",
            Availability::Suspended => "suspended",
            Availability::Unavailable => "unavailable",
        }
    }

    /// Whether a player with this status may be picked. Doubtful players are
    /// pickable only when the caller allows it.
    pub fn is_selectable(&self, allow_doubtful: bool) -> bool {
        match self {
            Availability::Available => true,
            Availability::Doubtful => allow_doubtful,
            _ => false,
        }
    }

    /// Whether a squad member with this status can be named in a starting XI.
    pub fn can_start(&self) -> bool {
        self.is_selectable(true)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Fixed-point currency with one decimal place, stored as integer tenths so
/// that summing fifteen prices never drifts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_tenths(tenths: i64) -> Self {
        Money(tenths)
    }

    /// Convert a decimal amount (e.g. `5.5`) by rounding to the nearest tenth.
    /// Returns `None` for NaN or infinite input.
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Some(Money((value * 10.0).round() as i64))
    }

    pub const fn tenths(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A player as supplied by the roster source. Immutable for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub team: TeamId,
    pub position: Position,
    pub price: Money,
    pub status: Availability,
}

// ---------------------------------------------------------------------------
// Forecasts
// ---------------------------------------------------------------------------

/// Forecasts outside this range are treated as provider garbage.
pub const MIN_PLAUSIBLE_POINTS: f64 = -10.0;
pub const MAX_PLAUSIBLE_POINTS: f64 = 40.0;

/// Expected points for one player in one round, as delivered by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub player: PlayerId,
    pub round: RoundId,
    pub points: f64,
}

/// How a pool entry's forecast should be interpreted.
///
/// Only `Scored` carries usable points. Every other variant ranks as zero but
/// stays distinguishable from a deliberate zero forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ForecastStatus {
    Scored(f64),
    /// No forecast delivered yet (provider failure or batch still pending).
    Missing,
    /// A forecast exists, but for another round.
    WrongRound(RoundId),
    /// Non-finite or implausible value.
    Invalid(f64),
}

impl ForecastStatus {
    /// Classify the best available forecast for `round`.
    pub fn classify(round: RoundId, forecast: Option<&Forecast>) -> Self {
        match forecast {
            None => ForecastStatus::Missing,
            Some(f) if f.round != round => ForecastStatus::WrongRound(f.round),
            Some(f)
                if !f.points.is_finite()
                    || !(MIN_PLAUSIBLE_POINTS..=MAX_PLAUSIBLE_POINTS).contains(&f.points) =>
            {
                ForecastStatus::Invalid(f.points)
            }
            Some(f) => ForecastStatus::Scored(f.points),
        }
    }

    pub fn points(&self) -> Option<f64> {
        match self {
            ForecastStatus::Scored(p) => Some(*p),
            _ => None,
        }
    }

    /// Points used for ranking: unscored entries count as zero.
    pub fn ranking_points(&self) -> f64 {
        self.points().unwrap_or(0.0)
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, ForecastStatus::Scored(_))
    }
}

/// A pool entry whose forecast could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastIssue {
    pub player: PlayerId,
    pub status: ForecastStatus,
}

// ---------------------------------------------------------------------------
// PlayerPool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolEntry {
    pub player: Player,
    pub forecast: ForecastStatus,
}

impl PoolEntry {
    pub fn ranking_points(&self) -> f64 {
        self.forecast.ranking_points()
    }
}

/// One round's snapshot of players and their forecast status.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerPool {
    round: RoundId,
    entries: Vec<PoolEntry>,
    #[serde(skip)]
    index: HashMap<PlayerId, usize>,
}

impl PlayerPool {
    /// Build a pool for `round`.
    ///
    /// A forecast for the pool's round always wins over forecasts for other
    /// rounds. Duplicate player ids keep the first occurrence.
    pub fn new(
        round: RoundId,
        players: Vec<Player>,
        forecasts: impl IntoIterator<Item = Forecast>,
    ) -> Self {
        let mut by_player: HashMap<PlayerId, Forecast> = HashMap::new();
        for forecast in forecasts {
            match by_player.get(&forecast.player) {
                Some(existing) if existing.round == round => {}
                _ => {
                    by_player.insert(forecast.player, forecast);
                }
            }
        }

        let mut entries = Vec::with_capacity(players.len());
        let mut index = HashMap::with_capacity(players.len());
        for player in players {
            if index.contains_key(&player.id) {
                warn!("duplicate player {} ({}) in pool, keeping first", player.id, player.name);
                continue;
            }
            let forecast = ForecastStatus::classify(round, by_player.get(&player.id));
            index.insert(player.id, entries.len());
            entries.push(PoolEntry { player, forecast });
        }

        PlayerPool {
            round,
            entries,
            index,
        }
    }

    pub fn round(&self) -> RoundId {
        self.round
    }

    /// Entries in input order.
    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: PlayerId) -> Option<&PoolEntry> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.get(id).map(|e| &e.player)
    }

    /// Ranking points for a player; zero when absent or unscored.
    pub fn ranking_points(&self, id: PlayerId) -> f64 {
        self.get(id).map_or(0.0, PoolEntry::ranking_points)
    }

    /// Every entry whose forecast is not usable, in input order.
    pub fn forecast_issues(&self) -> Vec<ForecastIssue> {
        self.entries
            .iter()
            .filter(|e| !e.forecast.is_scored())
            .map(|e| ForecastIssue {
                player: e.player.id,
                status: e.forecast,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
