//! Turn Coordinator and speech-to-speech backend configuration

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{coordinator, speech_to_speech};

/// One entry of the configured speaking order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Parse the inline `"id:Name,id2:Name2"` form. A bare id uses itself as
/// the name; blank entries are skipped.
pub fn parse_agent_order(raw: &str) -> Vec<AgentEntry> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, name)) => AgentEntry {
                id: id.trim().to_string(),
                name: name.trim().to_string(),
            },
            None => AgentEntry {
                id: entry.to_string(),
                name: entry.to_string(),
            },
        })
        .filter(|entry| !entry.id.is_empty())
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAgentOrder {
    List(Vec<AgentEntry>),
    Inline(String),
}

fn deserialize_agent_order<'de, D>(deserializer: D) -> Result<Vec<AgentEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawAgentOrder::deserialize(deserializer)? {
        RawAgentOrder::List(list) => list,
        RawAgentOrder::Inline(raw) => parse_agent_order(&raw),
    })
}

/// Coordinator settings. The service reads the window/lease/order fields;
/// agent processes read `url` and the polling fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Base URL of the coordinator; coordination is off when unset
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_collection_ms")]
    pub collection_ms: u64,

    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_max_recent_turns")]
    pub max_recent_turns: usize,

    /// Configured speaking order; empty means discovery order
    #[serde(default, deserialize_with = "deserialize_agent_order")]
    pub agents: Vec<AgentEntry>,

    #[serde(default)]
    pub use_auction: bool,

    #[serde(default = "default_decision_timeout_ms")]
    pub decision_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

fn default_collection_ms() -> u64 {
    coordinator::COLLECTION_MS
}
fn default_lease_ms() -> u64 {
    coordinator::LEASE_MS
}
fn default_max_recent_turns() -> usize {
    coordinator::MAX_RECENT_TURNS
}
fn default_decision_timeout_ms() -> u64 {
    coordinator::DECISION_TIMEOUT_MS
}
fn default_poll_interval_ms() -> u64 {
    coordinator::POLL_INTERVAL_MS
}
fn default_http_timeout_ms() -> u64 {
    coordinator::HTTP_TIMEOUT_MS
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection_ms: default_collection_ms(),
            lease_ms: default_lease_ms(),
            max_recent_turns: default_max_recent_turns(),
            agents: Vec::new(),
            use_auction: false,
            decision_timeout_ms: default_decision_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Collection window capped at one minute
    pub fn effective_collection_ms(&self) -> u64 {
        self.collection_ms.min(coordinator::MAX_COLLECTION_MS)
    }

    /// Lease duration clamped to the accepted range
    pub fn effective_lease_ms(&self) -> u64 {
        self.lease_ms
            .clamp(coordinator::MIN_LEASE_MS, coordinator::MAX_LEASE_MS)
    }
}

/// Speech-to-speech backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechToSpeechConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub server_url: String,

    #[serde(default = "default_voice_prompt")]
    pub voice_prompt: String,

    /// Accept invalid TLS certificates (self-signed dev servers)
    #[serde(default)]
    pub ssl_insecure: bool,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
}

fn default_voice_prompt() -> String {
    speech_to_speech::VOICE_PROMPT.to_string()
}
fn default_turn_timeout_ms() -> u64 {
    speech_to_speech::TURN_TIMEOUT_MS
}

impl Default for SpeechToSpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: String::new(),
            voice_prompt: default_voice_prompt(),
            ssl_insecure: false,
            seed: None,
            turn_timeout_ms: default_turn_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_order() {
        let order = parse_agent_order("a:Alex, b:Jamie ,c,,");
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], AgentEntry { id: "a".into(), name: "Alex".into() });
        assert_eq!(order[1].name, "Jamie");
        assert_eq!(order[2].name, "c");
    }

    #[test]
    fn test_agent_order_accepts_both_forms() {
        let inline: CoordinatorConfig =
            serde_json::from_str(r#"{"agents":"a:Alex,b:Jamie"}"#).unwrap();
        assert_eq!(inline.agents.len(), 2);

        let list: CoordinatorConfig =
            serde_json::from_str(r#"{"agents":[{"id":"a","name":"Alex"}]}"#).unwrap();
        assert_eq!(list.agents[0].id, "a");
    }

    #[test]
    fn test_effective_bounds() {
        let config = CoordinatorConfig {
            collection_ms: 120_000,
            lease_ms: 10,
            ..Default::default()
        };
        assert_eq!(config.effective_collection_ms(), 60_000);
        assert_eq!(config.effective_lease_ms(), 1_000);
    }
}
