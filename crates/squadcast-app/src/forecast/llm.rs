// Claude-backed forecast provider.
//
// Sends one non-streaming request to the Anthropic Messages API per batch and
// expects a JSON array of `{"id": .., "points": ..}` objects somewhere in the
// reply text.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use squadcast_core::{Forecast, PlayerId, RoundId};

use super::{ForecastError, ForecastProvider};
use crate::config::Config;
use crate::data::RosterRecord;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are a fantasy football analyst. For each player \
listed, estimate the fantasy points they will score in the given round. Reply with \
only a JSON array of objects with integer `id` and numeric `points` fields, one per \
player, no commentary.";

// ---------------------------------------------------------------------------
// LlmForecaster
// ---------------------------------------------------------------------------

pub struct LlmForecaster {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmForecaster {
    pub fn new(api_key: String, model: String, max_tokens: u32, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key,
            model,
            max_tokens,
        }
    }

    /// Build from config. Returns `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        match &config.credentials.anthropic_api_key {
            Some(key) if !key.is_empty() => {
                let llm = &config.strategy.llm;
                Some(LlmForecaster::new(
                    key.clone(),
                    llm.model.clone(),
                    llm.max_tokens,
                    Duration::from_secs(llm.timeout_secs),
                ))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ForecastProvider for LlmForecaster {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn forecast_batch(
        &self,
        round: RoundId,
        batch: &[RosterRecord],
    ) -> Result<Vec<Forecast>, ForecastError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": build_prompt(round, batch) }]
        });

        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no error message")
                .to_string();
            return Err(ForecastError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response_text(&payload)
            .ok_or_else(|| ForecastError::Parse("reply has no text content".into()))?;
        debug!(chars = text.len(), "llm forecast reply received");
        parse_reply(round, &text)
    }
}

// ---------------------------------------------------------------------------
// Prompt and reply helpers
// ---------------------------------------------------------------------------

pub(crate) fn build_prompt(round: RoundId, batch: &[RosterRecord]) -> String {
    let mut prompt = format!("Forecast fantasy points for {round}.\n\n");
    prompt.push_str("id | name | position | team | price | status | form | fixture difficulty (1-5)\n");
    for r in batch {
        let p = &r.player;
        let _ = writeln!(
            prompt,
            "{} | {} | {} | {} | {} | {} | {:.1} | {}",
            p.id.0, p.name, p.position, p.team.0, p.price, p.status, r.form, r.fixture_difficulty
        );
    }
    prompt
}

/// Concatenate the `text` blocks of a Messages API response.
pub(crate) fn response_text(payload: &Value) -> Option<String> {
    let blocks = payload.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Deserialize)]
struct RawForecast {
    id: u32,
    points: f64,
}

/// Pull the JSON array out of the reply text, tolerating prose or code fences
/// around it.
pub(crate) fn parse_reply(round: RoundId, text: &str) -> Result<Vec<Forecast>, ForecastError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(ForecastError::Parse("no JSON array in reply".into()));
    };
    if end < start {
        return Err(ForecastError::Parse("no JSON array in reply".into()));
    }
    let raw: Vec<RawForecast> = serde_json::from_str(&text[start..=end])
        .map_err(|e| ForecastError::Parse(e.to_string()))?;
    Ok(raw
        .into_iter()
        .map(|r| Forecast {
            player: PlayerId(r.id),
            round,
            points: r.points,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use squadcast_core::{Availability, Money, Player, Position, TeamId};

    #[test]
    fn parses_plain_array() {
        let out = parse_reply(RoundId(2), r#"[{"id": 1, "points": 5.5}, {"id": 2, "points": 0}]"#)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].player, PlayerId(1));
        assert_eq!(out[0].round, RoundId(2));
        assert!((out[0].points - 5.5).abs() < 1e-9);
    }

    #[test]
    fn parses_array_inside_prose_and_fences() {
        let text = "Here you go:\n```json\n[{\"id\": 7, \"points\": 3.2}]\n```\nGood luck!";
        let out = parse_reply(RoundId(1), text).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].player, PlayerId(7));
    }

    #[test]
    fn rejects_reply_without_array() {
        assert!(matches!(
            parse_reply(RoundId(1), "I cannot help with that."),
            Err(ForecastError::Parse(_))
        ));
        assert!(matches!(
            parse_reply(RoundId(1), "] backwards ["),
            Err(ForecastError::Parse(_))
        ));
        assert!(matches!(
            parse_reply(RoundId(1), r#"[{"id": "x"}]"#),
            Err(ForecastError::Parse(_))
        ));
    }

    #[test]
    fn extracts_response_text() {
        let payload: Value = serde_json::json!({
            "content": [
                { "type": "text", "text": "[{\"id\": 1," },
                { "type": "text", "text": " \"points\": 2}]" }
            ]
        });
        assert_eq!(
            response_text(&payload).as_deref(),
            Some("[{\"id\": 1, \"points\": 2}]")
        );
        assert!(response_text(&serde_json::json!({ "content": [] })).is_none());
    }

    #[test]
    fn prompt_lists_every_player() {
        let batch: Vec<RosterRecord> = (1..=3)
            .map(|i| RosterRecord {
                player: Player {
                    id: PlayerId(i),
                    name: format!("Player {i}"),
                    team: TeamId(i),
                    position: Position::Defender,
                    price: Money::from_tenths(45),
                    status: Availability::Doubtful,
                },
                form: 2.5,
                fixture_difficulty: 4,
            })
            .collect();
        let prompt = build_prompt(RoundId(9), &batch);
        assert!(prompt.contains("round 9"));
        assert!(prompt.contains("2 | Player 2 | DEF | 2 | 4.5 | doubtful | 2.5 | 4"));
        assert_eq!(prompt.lines().filter(|l| l.contains("Player")).count(), 3);
    }
}
