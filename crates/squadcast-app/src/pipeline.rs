// Per-round orchestration: load snapshots from the store, run the core, and
// persist what it returns. Each step is one CLI subcommand.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use squadcast_core::{
    derive_lineup, evaluate_scenario, score_round, suggest_transfers, AccuracyHistory,
    GreedySelector, HistorySummary, Lineup, Money, Player, PlayerId, PlayerPool, RoundId,
    RoundScore, ScenarioReport, Selection, SquadSelector, Swap, TransferOptions, TransferReport,
};

use crate::config::{Config, ProviderKind};
use crate::data::{self, RosterRecord, UserSquad};
use crate::db::Store;
use crate::forecast::{
    fetch_forecasts, FetchOptions, ForecastProvider, ForecastRun, FormulaForecaster,
    LlmForecaster,
};

// ---------------------------------------------------------------------------
// Players and pools
// ---------------------------------------------------------------------------

/// Import the player snapshot CSV into the store.
pub fn import_players(config: &Config, store: &Store, base_dir: &Path) -> Result<usize> {
    let path = base_dir.join(&config.data_paths.players);
    let records = data::load_players(&path)
        .with_context(|| format!("failed to load players from {}", path.display()))?;
    store.upsert_players(&records)?;
    info!("imported {} players from {}", records.len(), path.display());
    Ok(records.len())
}

/// Stored players, importing the snapshot CSV first if the store is empty.
fn roster(config: &Config, store: &Store, base_dir: &Path) -> Result<Vec<RosterRecord>> {
    let records = store.load_players()?;
    if !records.is_empty() {
        return Ok(records);
    }
    import_players(config, store, base_dir)?;
    store.load_players()
}

/// Player pool for `round` from the stored snapshot and predictions.
pub fn load_pool(store: &Store, round: RoundId) -> Result<PlayerPool> {
    let players: Vec<Player> = store.load_players()?.into_iter().map(|r| r.player).collect();
    if players.is_empty() {
        bail!("no players stored; run `import` first");
    }
    let forecasts = store.load_forecasts(round)?;
    Ok(PlayerPool::new(round, players, forecasts))
}

fn resolve_squad(pool: &PlayerPool, ids: &[PlayerId]) -> Result<Vec<Player>> {
    ids.iter()
        .map(|&id| {
            pool.player(id)
                .cloned()
                .with_context(|| format!("squad player {id} is not in the player snapshot"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

/// Forecast every stored player for `round` and store the results.
pub async fn run_forecasts(
    config: &Config,
    store: &Store,
    base_dir: &Path,
    round: RoundId,
) -> Result<ForecastRun> {
    let roster = roster(config, store, base_dir)?;
    let formula = FormulaForecaster::default();

    let llm = match config.strategy.forecast.provider {
        ProviderKind::Llm => {
            let llm = LlmForecaster::from_config(config);
            if llm.is_none() {
                warn!("llm provider selected but no API key configured; using formula");
            }
            llm
        }
        ProviderKind::Formula => None,
    };
    let provider: &dyn ForecastProvider = match &llm {
        Some(llm) => llm,
        None => &formula,
    };
    let fallback = (llm.is_some() && config.strategy.forecast.fallback_to_formula).then_some(&formula);

    let options = FetchOptions {
        batch_size: config.strategy.forecast.batch_size,
        concurrency: config.strategy.forecast.concurrency,
    };
    let run = fetch_forecasts(provider, fallback, round, &roster, options).await;
    store.save_forecasts(round, &run.forecasts, &run.unscored, provider.name())?;
    Ok(run)
}

// ---------------------------------------------------------------------------
// Select
// ---------------------------------------------------------------------------

/// Select the best squad for `round`, derive its lineup, and store both.
pub fn select(
    config: &Config,
    store: &Store,
    round: RoundId,
    budget: Option<Money>,
) -> Result<(Selection, Lineup)> {
    let pool = load_pool(store, round)?;
    let rules = &config.rules;
    let budget_cap = budget.unwrap_or(rules.squad.budget_cap);

    let selector = GreedySelector::new(rules.squad.clone());
    let selection = selector
        .select(&pool, budget_cap)
        .with_context(|| format!("cannot build a squad for {round}"))?;
    let lineup = derive_lineup(&selection.squad, &pool, &rules.lineup)
        .with_context(|| format!("cannot field a lineup for {round}"))?;

    store.save_selection(round, &selection, &lineup)?;
    Ok((selection, lineup))
}

// ---------------------------------------------------------------------------
// Suggest and scenario
// ---------------------------------------------------------------------------

/// Suggest transfers for the user's squad and store them.
pub fn suggest(
    config: &Config,
    store: &Store,
    round: RoundId,
    user_id: &str,
    squad: &UserSquad,
) -> Result<TransferReport> {
    let pool = load_pool(store, round)?;
    let current = resolve_squad(&pool, &squad.players)?;

    let transfers = &config.strategy.transfers;
    let options = TransferOptions {
        bank: squad.bank,
        free_transfers: squad.free_transfers.unwrap_or(transfers.free_transfers),
        max_suggestions: transfers.max_suggestions,
        transfer_hit_cost: transfers.hit_cost,
    };
    let report = suggest_transfers(
        &current,
        &pool,
        &options,
        &config.rules.squad,
        &config.rules.thresholds,
    );
    store.save_suggestions(user_id, round, &report)?;
    Ok(report)
}

/// Project the user's squad with `swaps` over `round` and the following
/// rounds in the configured horizon that have stored predictions, and check
/// the swapped squad against the squad rules and the user's bank.
pub fn scenario(
    config: &Config,
    store: &Store,
    round: RoundId,
    squad: &UserSquad,
    swaps: &[Swap],
) -> Result<ScenarioReport> {
    let pool = load_pool(store, round)?;
    let current = resolve_squad(&pool, &squad.players)?;

    let horizon = config.strategy.transfers.horizon.max(1);
    let mut rounds = vec![pool.clone()];
    for offset in 1..horizon {
        let Some(next) = round.0.checked_add(offset).map(RoundId) else {
            break;
        };
        if store.load_predictions(next)?.is_empty() {
            continue;
        }
        rounds.push(load_pool(store, next)?);
    }

    let report = evaluate_scenario(
        &current,
        swaps,
        &pool,
        &rounds,
        &config.rules.squad,
        &config.rules.lineup,
        squad.bank,
    )?;
    if !report.is_legal() {
        warn!(
            "scenario for {round} breaks {} squad rules{}",
            report.violations.len(),
            if report.bank_shortfall.is_some() { " and overspends the bank" } else { "" }
        );
    }
    Ok(report)
}

/// Parse `out:in` swap arguments.
pub fn parse_swap(arg: &str) -> Result<Swap> {
    let Some((out, incoming)) = arg.split_once(':') else {
        bail!("swap `{arg}` must look like OUT:IN");
    };
    let parse = |s: &str| -> Result<PlayerId> {
        s.trim()
            .parse::<u32>()
            .map(PlayerId)
            .with_context(|| format!("`{s}` in swap `{arg}` is not a player id"))
    };
    Ok(Swap {
        player_out: parse(out)?,
        player_in: parse(incoming)?,
    })
}

// ---------------------------------------------------------------------------
// Score and history
// ---------------------------------------------------------------------------

/// Score `round` against realized points and store the result.
pub fn score(
    config: &Config,
    store: &Store,
    round: RoundId,
    realized: &HashMap<PlayerId, f64>,
) -> Result<RoundScore> {
    let predictions = store.load_predictions(round)?;
    if predictions.is_empty() {
        warn!("no stored predictions for {round}");
    }
    let lineup = store.load_lineup(round)?;
    if lineup.is_none() {
        info!("no selected squad for {round}; scoring predictions only");
    }

    let score = score_round(
        round,
        &predictions,
        realized,
        lineup.as_ref(),
        &config.rules.thresholds,
    );
    store.save_round_score(&score)?;
    Ok(score)
}

/// Realized points for `round` from the configured results directory.
pub fn load_round_results(
    config: &Config,
    base_dir: &Path,
    round: RoundId,
) -> Result<HashMap<PlayerId, f64>> {
    let path = data::results_path(&base_dir.join(&config.data_paths.results_dir), round);
    data::load_results(&path)
        .with_context(|| format!("failed to load results from {}", path.display()))
}

pub fn history(store: &Store) -> Result<(AccuracyHistory, HistorySummary)> {
    let history = store.load_history()?;
    let summary = history.summary();
    Ok((history, summary))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
