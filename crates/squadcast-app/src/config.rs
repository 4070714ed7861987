// Configuration loading and parsing (rules.toml, strategy.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use squadcast_core::{LineupRules, Money, PositionQuotas, SquadRules, Thresholds};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub rules: RulesConfig,
    pub strategy: StrategyConfig,
    pub credentials: CredentialsConfig,
    pub db_path: String,
    pub data_paths: DataPaths,
}

// ---------------------------------------------------------------------------
// rules.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    squad: SquadSection,
    lineup: LineupRules,
    thresholds: Thresholds,
}

/// `[squad]` as written by hand: the budget is a decimal amount.
#[derive(Debug, Clone, Deserialize)]
struct SquadSection {
    budget: f64,
    max_per_team: usize,
    #[serde(default = "default_allow_doubtful")]
    allow_doubtful: bool,
    quotas: PositionQuotas,
}

fn default_allow_doubtful() -> bool {
    true
}

/// Game rules handed to the core.
#[derive(Debug, Clone)]
pub struct RulesConfig {
    pub squad: SquadRules,
    pub lineup: LineupRules,
    pub thresholds: Thresholds,
}

// ---------------------------------------------------------------------------
// strategy.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct StrategyFile {
    forecast: ForecastConfig,
    transfers: TransferConfig,
    llm: LlmConfig,
    database: DatabaseSection,
    data_paths: DataPaths,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub forecast: ForecastConfig,
    pub transfers: TransferConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Formula,
    Llm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    pub provider: ProviderKind,
    pub batch_size: usize,
    pub concurrency: usize,
    pub fallback_to_formula: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub free_transfers: u32,
    pub max_suggestions: usize,
    pub hit_cost: f64,
    pub horizon: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPaths {
    pub players: String,
    /// Directory of `round_<n>.csv` realized-points files.
    pub results_dir: String,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub anthropic_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/rules.toml`,
/// `config/strategy.toml`, and (optionally) `config/credentials.toml`,
/// all relative to `base_dir`. Does not copy defaults.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    let rules_path = config_dir.join("rules.toml");
    let rules_file: RulesFile = parse_file(&rules_path)?;
    let budget_cap =
        Money::from_decimal(rules_file.squad.budget).ok_or_else(|| ConfigError::ValidationError {
            field: "squad.budget".into(),
            message: format!("must be a finite amount, got {}", rules_file.squad.budget),
        })?;
    let rules = RulesConfig {
        squad: SquadRules {
            budget_cap,
            quotas: rules_file.squad.quotas,
            max_per_team: rules_file.squad.max_per_team,
            allow_doubtful: rules_file.squad.allow_doubtful,
        },
        lineup: rules_file.lineup,
        thresholds: rules_file.thresholds,
    };

    let strategy_path = config_dir.join("strategy.toml");
    let strategy_file: StrategyFile = parse_file(&strategy_path)?;
    let strategy = StrategyConfig {
        forecast: strategy_file.forecast,
        transfers: strategy_file.transfers,
        llm: strategy_file.llm,
    };

    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        parse_file(&credentials_path)?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        rules,
        strategy,
        credentials,
        db_path: strategy_file.database.path,
        data_paths: strategy_file.data_paths,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy every default file that has no counterpart in `config/` yet, so a
/// fresh checkout runs without setup. Files ending in `.example` stay behind.
/// Existing config files are never overwritten. Returns the copied paths.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        return if config_dir.is_dir() {
            Ok(Vec::new())
        } else {
            Err(copy_error(format!(
                "no defaults/ or config/ directory under {}",
                base_dir.display()
            )))
        };
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("cannot create {}: {e}", config_dir.display())))?;
    let entries = std::fs::read_dir(&defaults_dir)
        .map_err(|e| copy_error(format!("cannot list {}: {e}", defaults_dir.display())))?;

    let mut copied = Vec::new();
    for entry in entries {
        let source = entry
            .map_err(|e| copy_error(format!("cannot list {}: {e}", defaults_dir.display())))?
            .path();
        if !source.is_file() || source.extension().is_some_and(|ext| ext == "example") {
            continue;
        }
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if target.exists() {
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| {
            copy_error(format!(
                "cannot copy {} to {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        copied.push(target);
    }

    Ok(copied)
}

/// Load config relative to `base_dir`, copying defaults first.
pub fn load_config_in(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_files(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = read_file(path)?;
    toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn copy_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let squad = &config.rules.squad;
    if squad.budget_cap <= Money::ZERO {
        return Err(invalid(
            "squad.budget",
            format!("must be > 0, got {}", squad.budget_cap),
        ));
    }
    if squad.max_per_team == 0 {
        return Err(invalid("squad.max_per_team", "must be > 0"));
    }

    let quotas = &squad.quotas;
    if quotas.goalkeepers == 0 {
        return Err(invalid("squad.quotas.goalkeepers", "must be > 0"));
    }
    if quotas.total() == 0 {
        return Err(invalid("squad.quotas", "squad must have at least one player"));
    }

    // Lineup floors must be fillable from the squad quotas.
    let lineup = &config.rules.lineup;
    let floors: &[(&str, usize, usize)] = &[
        ("lineup.keepers", lineup.keepers, quotas.goalkeepers),
        ("lineup.min_defenders", lineup.min_defenders, quotas.defenders),
        ("lineup.min_midfielders", lineup.min_midfielders, quotas.midfielders),
        ("lineup.min_forwards", lineup.min_forwards, quotas.forwards),
    ];
    for (name, floor, quota) in floors {
        if floor > quota {
            return Err(invalid(
                name,
                format!("floor {floor} exceeds squad quota {quota}"),
            ));
        }
    }
    if lineup.keepers != 1 {
        return Err(invalid("lineup.keepers", "exactly one keeper must start"));
    }
    let floor_total =
        lineup.keepers + lineup.min_defenders + lineup.min_midfielders + lineup.min_forwards;
    let outfield_quota = quotas.total() - quotas.goalkeepers;
    if lineup.size < floor_total || lineup.size > lineup.keepers + outfield_quota {
        return Err(invalid(
            "lineup.size",
            format!(
                "must be between {floor_total} and {}, got {}",
                lineup.keepers + outfield_quota,
                lineup.size
            ),
        ));
    }

    let t = &config.rules.thresholds;
    let threshold_fields: &[(&str, f64)] = &[
        ("thresholds.correct_within", t.correct_within),
        ("thresholds.high_impact_above", t.high_impact_above),
        ("thresholds.medium_impact_above", t.medium_impact_above),
    ];
    for (name, val) in threshold_fields {
        if !val.is_finite() || *val < 0.0 {
            return Err(invalid(name, format!("must be >= 0, got {val}")));
        }
    }
    if t.medium_impact_above > t.high_impact_above {
        return Err(invalid(
            "thresholds.medium_impact_above",
            format!(
                "must not exceed high_impact_above ({}), got {}",
                t.high_impact_above, t.medium_impact_above
            ),
        ));
    }

    let forecast = &config.strategy.forecast;
    if forecast.batch_size == 0 {
        return Err(invalid("forecast.batch_size", "must be > 0"));
    }
    if forecast.concurrency == 0 {
        return Err(invalid("forecast.concurrency", "must be > 0"));
    }

    let transfers = &config.strategy.transfers;
    if transfers.max_suggestions == 0 {
        return Err(invalid("transfers.max_suggestions", "must be > 0"));
    }
    if !transfers.hit_cost.is_finite() || transfers.hit_cost < 0.0 {
        return Err(invalid(
            "transfers.hit_cost",
            format!("must be >= 0, got {}", transfers.hit_cost),
        ));
    }

    if config.strategy.llm.max_tokens == 0 {
        return Err(invalid("llm.max_tokens", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
