//! HTTP client for the Turn Coordinator
//!
//! Each agent process posts a turn request for every finished utterance,
//! polls for the bucket decision, and reports the finished exchange. The
//! client fails closed: any transport problem is a denial.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use cohost_config::{AgentConfig, CoordinatorConfig};
use cohost_core::coordination::{
    EndTurnBody, RecentTurnsResponse, RequestTurnBody, RequestTurnResponse, TurnDecisionQuery,
    TurnDecisionResponse,
};
use cohost_core::{request_id, Bid, Exchange, TurnCoordination, TurnGrant, TurnReport};

use crate::PipelineError;

/// Coordinator client configuration
#[derive(Debug, Clone)]
pub struct CoordinatorClientConfig {
    pub base_url: String,
    pub agent_id: String,
    pub display_name: String,
    pub poll_interval: Duration,
    pub decision_timeout: Duration,
    pub http_timeout: Duration,
}

impl CoordinatorClientConfig {
    /// `None` when no coordinator URL is configured
    pub fn from_settings(agent: &AgentConfig, coordinator: &CoordinatorConfig) -> Option<Self> {
        let base_url = coordinator.url.as_deref()?.trim();
        if base_url.is_empty() {
            return None;
        }
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent_id: agent.id.clone(),
            display_name: agent.display_name.clone(),
            poll_interval: Duration::from_millis(coordinator.poll_interval_ms.max(1)),
            decision_timeout: Duration::from_millis(coordinator.decision_timeout_ms),
            http_timeout: Duration::from_millis(coordinator.http_timeout_ms),
        })
    }
}

pub struct CoordinatorClient {
    config: CoordinatorClientConfig,
    client: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(config: CoordinatorClientConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| {
                PipelineError::Coordinator(format!("Failed to create HTTP client: {}", e))
            })?;

        tracing::info!(
            url = %config.base_url,
            agent_id = %config.agent_id,
            "Turn coordination enabled"
        );

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &CoordinatorClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Request the floor, optionally carrying an auction bid
    pub async fn request_turn_with_bid(
        &self,
        transcript: &str,
        bid: Option<Bid>,
    ) -> Option<TurnGrant> {
        let request_id = request_id(transcript);
        let body = RequestTurnBody {
            agent_id: self.config.agent_id.clone(),
            display_name: self.config.display_name.clone(),
            transcript: transcript.to_string(),
            request_id: request_id.clone(),
            bid,
        };

        let posted = match self.post_request(&body).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Turn request failed");
                return None;
            },
        };

        if posted.allowed == Some(true) {
            return Some(TurnGrant {
                request_id,
                turn_id: None,
                lease_ms: None,
                reason: None,
            });
        }
        if !posted.pending {
            tracing::debug!(request_id = %request_id, "Turn refused, floor is held");
            return None;
        }

        let decision = self.poll_decision(&request_id).await?;
        if decision.allowed != Some(true) {
            tracing::debug!(request_id = %request_id, "Turn went to another agent");
            return None;
        }

        tracing::info!(
            request_id = %request_id,
            turn_id = ?decision.turn_id,
            reason = ?decision.winner_selection_reason,
            "Turn granted"
        );
        Some(TurnGrant {
            request_id,
            turn_id: decision.turn_id,
            lease_ms: decision.lease_ms,
            reason: decision.winner_selection_reason,
        })
    }

    async fn post_request(
        &self,
        body: &RequestTurnBody,
    ) -> Result<RequestTurnResponse, PipelineError> {
        let response = self
            .client
            .post(self.url("/request-turn"))
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::Coordinator(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Coordinator(format!(
                "request-turn returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::Coordinator(format!("Bad request-turn response: {}", e)))
    }

    /// Poll until decided or the decision deadline passes
    async fn poll_decision(&self, request_id: &str) -> Option<TurnDecisionResponse> {
        let query = TurnDecisionQuery {
            request_id: request_id.to_string(),
            agent_id: self.config.agent_id.clone(),
        };
        let deadline = Instant::now() + self.config.decision_timeout;

        while Instant::now() < deadline {
            tokio::time::sleep(self.config.poll_interval).await;

            let response = match self
                .client
                .get(self.url("/turn-decision"))
                .query(&query)
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::debug!(status = %r.status(), "turn-decision poll rejected");
                    continue;
                },
                Err(e) => {
                    tracing::debug!(error = %e, "turn-decision poll failed");
                    continue;
                },
            };

            match response.json::<TurnDecisionResponse>().await {
                Ok(decision) if decision.decided => return Some(decision),
                Ok(_) => {},
                Err(e) => tracing::debug!(error = %e, "Bad turn-decision response"),
            }
        }

        tracing::warn!(request_id = %request_id, "No turn decision before deadline");
        None
    }
}

#[async_trait]
impl TurnCoordination for CoordinatorClient {
    async fn recent_turns(&self) -> Vec<Exchange> {
        let response = match self.client.get(self.url("/recent-turns")).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "recent-turns rejected");
                return Vec::new();
            },
            Err(e) => {
                tracing::warn!(error = %e, "recent-turns failed");
                return Vec::new();
            },
        };

        match response.json::<RecentTurnsResponse>().await {
            Ok(body) => body.turns,
            Err(e) => {
                tracing::warn!(error = %e, "Bad recent-turns response");
                Vec::new()
            },
        }
    }

    async fn request_turn(&self, transcript: &str) -> Option<TurnGrant> {
        self.request_turn_with_bid(transcript, None).await
    }

    async fn end_turn(&self, report: TurnReport) {
        let body = EndTurnBody {
            agent_id: self.config.agent_id.clone(),
            user_message: report.user_message,
            assistant_message: report.assistant_message,
            turn_id: report.turn_id,
        };

        match self.client.post(self.url("/end-turn")).json(&body).send().await {
            Ok(r) if r.status().is_success() => {
                tracing::debug!(turn_id = ?body.turn_id, "Turn ended");
            },
            Ok(r) => tracing::warn!(status = %r.status(), "end-turn rejected"),
            Err(e) => tracing::warn!(error = %e, "end-turn failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_requires_url() {
        let agent = AgentConfig::default();
        assert!(CoordinatorClientConfig::from_settings(&agent, &CoordinatorConfig::default())
            .is_none());

        let coordinator = CoordinatorConfig {
            url: Some("http://localhost:3001/".to_string()),
            ..Default::default()
        };
        let config = CoordinatorClientConfig::from_settings(&agent, &coordinator).unwrap();
        assert_eq!(config.base_url, "http://localhost:3001");
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.decision_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_fails_closed() {
        let client = CoordinatorClient::new(CoordinatorClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            agent_id: "a".to_string(),
            display_name: "Alex".to_string(),
            poll_interval: Duration::from_millis(10),
            decision_timeout: Duration::from_millis(50),
            http_timeout: Duration::from_millis(200),
        })
        .unwrap();

        assert!(client.request_turn("hello").await.is_none());
        assert!(client.recent_turns().await.is_empty());
        client.end_turn(TurnReport::default()).await;
    }
}
