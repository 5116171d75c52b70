//! Turn coordination wire types and the client-side seam
//!
//! The Turn Coordinator is a separate process that hands out at most one
//! speaking lease at a time. These types are the JSON bodies exchanged with
//! it, shared verbatim by the service and the agent-side client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::conversation::Exchange;

/// Lowercase, trim and collapse whitespace runs to a single space
pub fn normalize_transcript(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic request id for a transcript.
///
/// Every agent that heard the same utterance derives the same id, so their
/// requests land in one coordinator bucket.
pub fn request_id(transcript: &str) -> String {
    let digest = Sha256::digest(normalize_transcript(transcript).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Why a bucket's winner was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerSelectionReason {
    NameAddressing,
    RoundRobin,
    Auction,
}

impl WinnerSelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WinnerSelectionReason::NameAddressing => "name_addressing",
            WinnerSelectionReason::RoundRobin => "round_robin",
            WinnerSelectionReason::Auction => "auction",
        }
    }
}

/// What an agent intends to do with the floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BidIntent {
    Hype,
    Clarify,
    Counter,
    Summarize,
    #[default]
    Answer,
}

impl BidIntent {
    /// Parse a wire intent; unknown values fall back to `Answer`
    pub fn parse(raw: &str) -> Self {
        match raw {
            "hype" => BidIntent::Hype,
            "clarify" => BidIntent::Clarify,
            "counter" => BidIntent::Counter,
            "summarize" => BidIntent::Summarize,
            _ => BidIntent::Answer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BidIntent::Hype => "hype",
            BidIntent::Clarify => "clarify",
            BidIntent::Counter => "counter",
            BidIntent::Summarize => "summarize",
            BidIntent::Answer => "answer",
        }
    }
}

pub const DEFAULT_BID_SCORE: f64 = 5.0;
const DEFAULT_BID_CONFIDENCE: f64 = 0.5;

/// Optional auction bid attached to a turn request.
///
/// Fields are lenient on the wire; call [`Bid::normalized`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    #[serde(default = "default_score")]
    pub score: f64,
    #[serde(default)]
    pub intent: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub target: Option<String>,
}

fn default_score() -> f64 {
    DEFAULT_BID_SCORE
}

fn default_confidence() -> f64 {
    DEFAULT_BID_CONFIDENCE
}

impl Default for Bid {
    fn default() -> Self {
        Self {
            score: DEFAULT_BID_SCORE,
            intent: "answer".to_string(),
            confidence: DEFAULT_BID_CONFIDENCE,
            target: None,
        }
    }
}

impl Bid {
    /// Clamp score to 0..=10 and confidence to 0..=1, canonicalize intent,
    /// and drop blank targets.
    pub fn normalized(&self) -> Self {
        let score = if self.score.is_finite() {
            self.score.clamp(0.0, 10.0)
        } else {
            DEFAULT_BID_SCORE
        };
        let confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            DEFAULT_BID_CONFIDENCE
        };
        let intent = BidIntent::parse(&self.intent);
        let target = self
            .target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Self {
            score,
            intent: intent.as_str().to_string(),
            confidence,
            target,
        }
    }
}

/// `GET /recent-turns` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTurnsResponse {
    #[serde(default)]
    pub turns: Vec<Exchange>,
    #[serde(default)]
    pub max_turns: usize,
}

/// `POST /request-turn` body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTurnBody {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Bid>,
}

/// `POST /request-turn` response: `{pending:true}` or `{pending:false, allowed:false}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTurnResponse {
    #[serde(default)]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<bool>,
}

impl RequestTurnResponse {
    pub fn pending() -> Self {
        Self {
            pending: true,
            allowed: None,
        }
    }

    pub fn refused() -> Self {
        Self {
            pending: false,
            allowed: Some(false),
        }
    }
}

/// `GET /turn-decision` query string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDecisionQuery {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub agent_id: String,
}

/// `GET /turn-decision` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDecisionResponse {
    pub decided: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_selection_reason: Option<WinnerSelectionReason>,
}

impl TurnDecisionResponse {
    pub fn undecided() -> Self {
        Self::default()
    }
}

/// `POST /end-turn` body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndTurnBody {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub assistant_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

/// `{ok:true}` acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// A granted speaking turn as seen by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnGrant {
    pub request_id: String,
    /// Lease token; must accompany the completion report
    pub turn_id: Option<String>,
    pub lease_ms: Option<u64>,
    pub reason: Option<WinnerSelectionReason>,
}

/// Completion report for a granted turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub user_message: String,
    pub assistant_message: String,
    pub turn_id: Option<String>,
}

/// Agent-side access to the Turn Coordinator.
///
/// Implementations never surface transport errors: history falls back to
/// empty, a failed request is a denial, and a failed report is logged.
#[async_trait]
pub trait TurnCoordination: Send + Sync + 'static {
    /// Shared recent exchanges, oldest first
    async fn recent_turns(&self) -> Vec<Exchange>;

    /// Ask for the floor for this transcript; `None` means denied
    async fn request_turn(&self, transcript: &str) -> Option<TurnGrant>;

    /// Release the lease and contribute the finished exchange
    async fn end_turn(&self, report: TurnReport);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_normalizes() {
        assert_eq!(request_id("Hello   World"), request_id("hello world"));
        assert_eq!(request_id("  hello\tworld\n"), request_id("hello world"));
        assert_ne!(request_id("Hello World"), request_id("Goodbye"));
        assert_eq!(request_id("x").len(), 64);
    }

    #[test]
    fn test_bid_normalization() {
        let bid = Bid {
            score: 42.0,
            intent: "shout".to_string(),
            confidence: -1.0,
            target: Some("   ".to_string()),
        }
        .normalized();
        assert_eq!(bid.score, 10.0);
        assert_eq!(bid.intent, "answer");
        assert_eq!(bid.confidence, 0.0);
        assert!(bid.target.is_none());

        let bid = Bid {
            intent: "hype".to_string(),
            target: Some(" alex ".to_string()),
            ..Bid::default()
        }
        .normalized();
        assert_eq!(bid.intent, "hype");
        assert_eq!(bid.target.as_deref(), Some("alex"));
    }

    #[test]
    fn test_decision_wire_shape() {
        let json = serde_json::to_value(TurnDecisionResponse {
            decided: true,
            allowed: Some(true),
            turn_id: Some("t1".into()),
            lease_ms: Some(1000),
            winner_selection_reason: Some(WinnerSelectionReason::NameAddressing),
        })
        .unwrap();
        assert_eq!(json["turnId"], "t1");
        assert_eq!(json["leaseMs"], 1000);
        assert_eq!(json["winnerSelectionReason"], "name_addressing");

        let undecided = serde_json::to_string(&TurnDecisionResponse::undecided()).unwrap();
        assert_eq!(undecided, r#"{"decided":false}"#);
    }

    #[test]
    fn test_request_body_defaults() {
        let body: RequestTurnBody = serde_json::from_str(r#"{"agentId":"a"}"#).unwrap();
        assert_eq!(body.agent_id, "a");
        assert!(body.request_id.is_empty());
        assert!(body.bid.is_none());
    }
}
