//! Turn Coordinator state
//!
//! Holds the single speaking lease, the open collection buckets, resolved
//! decisions and the shared recent-turns log. All of it lives behind one
//! mutex; bucket flushes are spawned sleeps that re-enter through
//! [`TurnCoordinator::flush`].

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use cohost_config::constants::coordinator::MAX_RETAINED_DECISIONS;
use cohost_config::CoordinatorConfig;
use cohost_core::coordination::{
    EndTurnBody, OkResponse, RecentTurnsResponse, RequestTurnBody, RequestTurnResponse,
    TurnDecisionQuery, TurnDecisionResponse,
};
use cohost_core::{Exchange, WinnerSelectionReason};

use crate::metrics;
use crate::selection::{run_auction, Entrant, Rotation, Selection};
use crate::ServerError;

/// The floor, held by one agent until end-turn or expiry
#[derive(Debug, Clone)]
struct Lease {
    agent_id: String,
    turn_id: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct Bucket {
    transcript: String,
    entrants: Vec<Entrant>,
}

/// Resolved outcome of one bucket
#[derive(Debug, Clone)]
struct Decision {
    winner: Option<String>,
    turn_id: Option<String>,
    lease_ms: Option<u64>,
    reason: Option<WinnerSelectionReason>,
}

#[derive(Debug, Default)]
struct Inner {
    lease: Option<Lease>,
    rotation: Rotation,
    buckets: HashMap<String, Bucket>,
    decisions: HashMap<String, Decision>,
    decision_order: VecDeque<String>,
    recent: VecDeque<Exchange>,
}

impl Inner {
    /// Drop the lease once it has run out
    fn expire_lease(&mut self, now: Instant) {
        let expired = matches!(&self.lease, Some(lease) if now >= lease.expires_at);
        if expired {
            if let Some(lease) = self.lease.take() {
                tracing::warn!(
                    agent_id = %lease.agent_id,
                    turn_id = %lease.turn_id,
                    "Lease expired"
                );
                metrics::record_lease_expired();
            }
        }
    }

    fn forget_decision(&mut self, request_id: &str) {
        if self.decisions.remove(request_id).is_some() {
            self.decision_order.retain(|id| id != request_id);
        }
    }

    fn retain_decision(&mut self, request_id: String, decision: Decision) {
        if self.decisions.insert(request_id.clone(), decision).is_none() {
            self.decision_order.push_back(request_id);
        }
        while self.decision_order.len() > MAX_RETAINED_DECISIONS {
            if let Some(oldest) = self.decision_order.pop_front() {
                self.decisions.remove(&oldest);
            }
        }
    }
}

/// Coordinator policy knobs
#[derive(Debug, Clone)]
pub struct CoordinatorPolicy {
    pub collection: Duration,
    pub lease_ms: u64,
    pub max_recent_turns: usize,
    pub use_auction: bool,
}

impl CoordinatorPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            collection: Duration::from_millis(config.effective_collection_ms()),
            lease_ms: config.effective_lease_ms(),
            max_recent_turns: config.max_recent_turns,
            use_auction: config.use_auction,
        }
    }
}

/// Lease-based turn arbiter shared by all handlers
pub struct TurnCoordinator {
    policy: CoordinatorPolicy,
    inner: Mutex<Inner>,
}

impl TurnCoordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        let order = config.agents.iter().map(|a| a.id.clone()).collect();
        Self {
            policy: CoordinatorPolicy::from_config(config),
            inner: Mutex::new(Inner {
                rotation: Rotation::new(order),
                ..Default::default()
            }),
        }
    }

    pub fn policy(&self) -> &CoordinatorPolicy {
        &self.policy
    }

    /// Agent currently holding the floor
    pub fn current_speaker(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.expire_lease(Instant::now());
        inner.lease.as_ref().map(|l| l.agent_id.clone())
    }

    pub fn recent_turns(&self) -> RecentTurnsResponse {
        let inner = self.inner.lock();
        RecentTurnsResponse {
            turns: inner.recent.iter().cloned().collect(),
            max_turns: self.policy.max_recent_turns,
        }
    }

    /// Enter the agent into the bucket for its request id.
    ///
    /// Refused outright while a lease is held. The first request for a
    /// request id opens the bucket and schedules its flush.
    pub fn request_turn(
        self: &Arc<Self>,
        body: RequestTurnBody,
    ) -> Result<RequestTurnResponse, ServerError> {
        let agent_id = body.agent_id.trim().to_string();
        let request_id = body.request_id.trim().to_string();
        if agent_id.is_empty() || request_id.is_empty() {
            return Err(ServerError::InvalidRequest(
                "Missing agentId or requestId".to_string(),
            ));
        }
        let display_name = if body.display_name.trim().is_empty() {
            agent_id.clone()
        } else {
            body.display_name.trim().to_string()
        };
        let bid = body.bid.map(|b| b.normalized());

        let mut inner = self.inner.lock();
        inner.expire_lease(Instant::now());

        if inner.lease.is_some() {
            tracing::debug!(agent_id = %agent_id, request_id = %request_id, "Floor held, refusing");
            metrics::record_refused();
            return Ok(RequestTurnResponse::refused());
        }

        let opened = !inner.buckets.contains_key(&request_id);
        if opened {
            // A repeated utterance reuses its request id; the new round starts undecided
            inner.forget_decision(&request_id);
        }
        let bucket = inner
            .buckets
            .entry(request_id.clone())
            .or_insert_with(|| Bucket {
                transcript: body.transcript.clone(),
                entrants: Vec::new(),
            });

        match bucket.entrants.iter_mut().find(|e| e.agent_id == agent_id) {
            Some(existing) => {
                if bid.is_some() {
                    existing.bid = bid;
                }
            },
            None => {
                let mut entrant = Entrant::new(agent_id.clone(), display_name);
                entrant.bid = bid;
                bucket.entrants.push(entrant);
            },
        }
        let entrants = bucket.entrants.len();
        drop(inner);

        tracing::debug!(
            agent_id = %agent_id,
            request_id = %request_id,
            entrants,
            "Turn request collected"
        );

        if opened {
            let this = Arc::clone(self);
            let collection = self.policy.collection;
            tokio::spawn(async move {
                tokio::time::sleep(collection).await;
                this.flush(&request_id);
            });
        }

        Ok(RequestTurnResponse::pending())
    }

    /// Close the bucket and decide it. No-op when the bucket is gone.
    pub fn flush(&self, request_id: &str) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.expire_lease(now);

        let Some(bucket) = inner.buckets.remove(request_id) else {
            return;
        };

        if inner.lease.is_some() {
            tracing::info!(
                request_id = %request_id,
                entrants = bucket.entrants.len(),
                "Floor taken during collection, denying bucket"
            );
            metrics::record_denials(bucket.entrants.len());
            inner.retain_decision(
                request_id.to_string(),
                Decision {
                    winner: None,
                    turn_id: None,
                    lease_ms: None,
                    reason: None,
                },
            );
            return;
        }

        let any_bid = bucket.entrants.iter().any(|e| e.bid.is_some());
        let selection = if self.policy.use_auction && any_bid {
            run_auction(&bucket.entrants, &bucket.transcript, inner.rotation.configured())
        } else {
            inner.rotation.select(&bucket.entrants, &bucket.transcript)
        };
        let Some(Selection { winner, reason }) = selection else {
            return;
        };

        let turn_id = uuid::Uuid::new_v4().to_string();
        let lease_ms = self.policy.lease_ms;
        inner.lease = Some(Lease {
            agent_id: winner.clone(),
            turn_id: turn_id.clone(),
            expires_at: now + Duration::from_millis(lease_ms),
        });

        tracing::info!(
            request_id = %request_id,
            agent_id = %winner,
            turn_id = %turn_id,
            reason = reason.as_str(),
            entrants = bucket.entrants.len(),
            "Turn granted"
        );
        metrics::record_grant(reason);
        metrics::record_denials(bucket.entrants.len().saturating_sub(1));

        inner.retain_decision(
            request_id.to_string(),
            Decision {
                winner: Some(winner),
                turn_id: Some(turn_id),
                lease_ms: Some(lease_ms),
                reason: Some(reason),
            },
        );
    }

    pub fn turn_decision(&self, query: &TurnDecisionQuery) -> TurnDecisionResponse {
        let mut inner = self.inner.lock();
        inner.expire_lease(Instant::now());

        let Some(decision) = inner.decisions.get(query.request_id.trim()) else {
            return TurnDecisionResponse::undecided();
        };

        let allowed = decision.winner.as_deref() == Some(query.agent_id.trim());
        TurnDecisionResponse {
            decided: true,
            allowed: Some(allowed),
            turn_id: decision.turn_id.clone().filter(|_| allowed),
            lease_ms: decision.lease_ms.filter(|_| allowed),
            winner_selection_reason: decision.reason,
        }
    }

    /// Release the floor and log the exchange.
    ///
    /// Only the lease holder presenting the lease's turn id may end a turn;
    /// anything else is acknowledged and ignored.
    pub fn end_turn(&self, body: EndTurnBody) -> Result<OkResponse, ServerError> {
        let agent_id = body.agent_id.trim();
        if agent_id.is_empty() {
            return Err(ServerError::InvalidRequest("Missing agentId".to_string()));
        }

        let mut inner = self.inner.lock();
        inner.expire_lease(Instant::now());

        let released = match &inner.lease {
            Some(lease) => {
                lease.agent_id == agent_id && body.turn_id.as_deref() == Some(lease.turn_id.as_str())
            },
            None => false,
        };

        if !released {
            tracing::debug!(
                agent_id = %agent_id,
                turn_id = ?body.turn_id,
                "End-turn ignored, not the lease holder"
            );
            return Ok(OkResponse::ok());
        }

        inner.lease = None;
        inner
            .recent
            .push_back(Exchange::new(body.user_message, body.assistant_message));
        while inner.recent.len() > self.policy.max_recent_turns {
            inner.recent.pop_front();
        }

        tracing::info!(agent_id = %agent_id, turns = inner.recent.len(), "Turn ended");
        Ok(OkResponse::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Arc<TurnCoordinator> {
        Arc::new(TurnCoordinator::new(&CoordinatorConfig {
            collection_ms: 60_000,
            ..Default::default()
        }))
    }

    fn body(agent: &str, name: &str, request_id: &str) -> RequestTurnBody {
        RequestTurnBody {
            agent_id: agent.to_string(),
            display_name: name.to_string(),
            transcript: "Jamie, what do you think?".to_string(),
            request_id: request_id.to_string(),
            bid: None,
        }
    }

    fn query(agent: &str, request_id: &str) -> TurnDecisionQuery {
        TurnDecisionQuery {
            request_id: request_id.to_string(),
            agent_id: agent.to_string(),
        }
    }

    #[tokio::test]
    async fn test_one_grant_per_bucket() {
        let coordinator = coordinator();
        coordinator.request_turn(body("a", "Alex", "r1")).unwrap();
        coordinator.request_turn(body("b", "Jamie", "r1")).unwrap();
        assert!(!coordinator.turn_decision(&query("a", "r1")).decided);

        coordinator.flush("r1");

        let a = coordinator.turn_decision(&query("a", "r1"));
        let b = coordinator.turn_decision(&query("b", "r1"));
        assert_eq!(a.allowed, Some(false));
        assert!(a.turn_id.is_none());
        assert_eq!(b.allowed, Some(true));
        assert!(b.turn_id.is_some());
        assert_eq!(b.lease_ms, Some(120_000));
        assert_eq!(
            b.winner_selection_reason,
            Some(WinnerSelectionReason::NameAddressing)
        );
        assert_eq!(coordinator.current_speaker().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_refused_while_floor_held() {
        let coordinator = coordinator();
        coordinator.request_turn(body("a", "Alex", "r1")).unwrap();
        coordinator.flush("r1");

        let response = coordinator.request_turn(body("b", "Jamie", "r2")).unwrap();
        assert_eq!(response, RequestTurnResponse::refused());
    }

    #[tokio::test]
    async fn test_bucket_denied_when_floor_taken_mid_collection() {
        let coordinator = coordinator();
        coordinator.request_turn(body("a", "Alex", "r1")).unwrap();
        coordinator.request_turn(body("b", "Jamie", "r2")).unwrap();
        coordinator.flush("r1");
        coordinator.flush("r2");

        let decision = coordinator.turn_decision(&query("b", "r2"));
        assert!(decision.decided);
        assert_eq!(decision.allowed, Some(false));
        assert!(decision.winner_selection_reason.is_none());
    }

    #[tokio::test]
    async fn test_end_turn_requires_matching_token() {
        let coordinator = coordinator();
        coordinator.request_turn(body("a", "Alex", "r1")).unwrap();
        coordinator.flush("r1");
        let turn_id = coordinator.turn_decision(&query("a", "r1")).turn_id;

        let wrong = EndTurnBody {
            agent_id: "a".into(),
            turn_id: Some("nope".into()),
            ..Default::default()
        };
        assert!(coordinator.end_turn(wrong).unwrap().ok);
        assert_eq!(coordinator.current_speaker().as_deref(), Some("a"));
        assert!(coordinator.recent_turns().turns.is_empty());

        let other = EndTurnBody {
            agent_id: "b".into(),
            turn_id: turn_id.clone(),
            ..Default::default()
        };
        coordinator.end_turn(other).unwrap();
        assert_eq!(coordinator.current_speaker().as_deref(), Some("a"));

        let right = EndTurnBody {
            agent_id: "a".into(),
            turn_id,
            ..Default::default()
        };
        coordinator.end_turn(right).unwrap();
        assert!(coordinator.current_speaker().is_none());
        // Empty exchanges are still logged
        assert_eq!(coordinator.recent_turns().turns, vec![Exchange::new("", "")]);
    }

    #[tokio::test]
    async fn test_duplicate_request_replaces_bid() {
        let coordinator = Arc::new(TurnCoordinator::new(&CoordinatorConfig {
            collection_ms: 60_000,
            use_auction: true,
            ..Default::default()
        }));
        let mut low = body("a", "Alex", "r1");
        low.transcript = "anyone?".into();
        low.bid = Some(cohost_core::Bid {
            score: 1.0,
            ..Default::default()
        });
        let mut mid = body("b", "Jamie", "r1");
        mid.transcript = "anyone?".into();
        mid.bid = Some(cohost_core::Bid {
            score: 5.0,
            ..Default::default()
        });
        let mut high = low.clone();
        high.bid = Some(cohost_core::Bid {
            score: 9.0,
            ..Default::default()
        });

        coordinator.request_turn(low).unwrap();
        coordinator.request_turn(mid).unwrap();
        coordinator.request_turn(high).unwrap();
        coordinator.flush("r1");

        let decision = coordinator.turn_decision(&query("a", "r1"));
        assert_eq!(decision.allowed, Some(true));
        assert_eq!(
            decision.winner_selection_reason,
            Some(WinnerSelectionReason::Auction)
        );
    }

    #[tokio::test]
    async fn test_recent_turns_capped() {
        let coordinator = Arc::new(TurnCoordinator::new(&CoordinatorConfig {
            collection_ms: 60_000,
            max_recent_turns: 2,
            ..Default::default()
        }));

        for i in 0..3 {
            let request_id = format!("r{}", i);
            coordinator.request_turn(body("a", "Alex", &request_id)).unwrap();
            coordinator.flush(&request_id);
            let turn_id = coordinator.turn_decision(&query("a", &request_id)).turn_id;
            coordinator
                .end_turn(EndTurnBody {
                    agent_id: "a".into(),
                    user_message: format!("q{}", i),
                    assistant_message: format!("a{}", i),
                    turn_id,
                })
                .unwrap();
        }

        let recent = coordinator.recent_turns();
        assert_eq!(recent.max_turns, 2);
        assert_eq!(
            recent.turns,
            vec![Exchange::new("q1", "a1"), Exchange::new("q2", "a2")]
        );
    }

    #[tokio::test]
    async fn test_decisions_retention_bounded() {
        let coordinator = coordinator();
        for i in 0..(MAX_RETAINED_DECISIONS + 10) {
            let request_id = format!("r{}", i);
            coordinator.request_turn(body("a", "Alex", &request_id)).unwrap();
            coordinator.flush(&request_id);
            let turn_id = coordinator.turn_decision(&query("a", &request_id)).turn_id;
            coordinator
                .end_turn(EndTurnBody {
                    agent_id: "a".into(),
                    turn_id,
                    ..Default::default()
                })
                .unwrap();
        }

        assert!(!coordinator.turn_decision(&query("a", "r0")).decided);
        let last = format!("r{}", MAX_RETAINED_DECISIONS + 9);
        assert!(coordinator.turn_decision(&query("a", &last)).decided);
    }

    #[tokio::test]
    async fn test_reopened_request_id_starts_undecided() {
        let coordinator = coordinator();
        coordinator.request_turn(body("a", "Alex", "r-yes")).unwrap();
        coordinator.request_turn(body("b", "Jamie", "r-yes")).unwrap();
        coordinator.flush("r-yes");
        let first = coordinator.turn_decision(&query("b", "r-yes")).turn_id;
        assert!(first.is_some());
        coordinator
            .end_turn(EndTurnBody {
                agent_id: "b".into(),
                turn_id: first.clone(),
                ..Default::default()
            })
            .unwrap();

        // Same utterance again hashes to the same request id
        coordinator.request_turn(body("a", "Alex", "r-yes")).unwrap();
        coordinator.request_turn(body("b", "Jamie", "r-yes")).unwrap();
        assert!(!coordinator.turn_decision(&query("a", "r-yes")).decided);
        assert!(!coordinator.turn_decision(&query("b", "r-yes")).decided);

        coordinator.flush("r-yes");
        let second = coordinator.turn_decision(&query("b", "r-yes")).turn_id;
        assert!(second.is_some());
        assert_ne!(second, first);

        coordinator
            .end_turn(EndTurnBody {
                agent_id: "b".into(),
                turn_id: second,
                ..Default::default()
            })
            .unwrap();
        assert!(coordinator.current_speaker().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_frees_floor() {
        let coordinator = Arc::new(TurnCoordinator::new(&CoordinatorConfig {
            collection_ms: 60_000,
            lease_ms: 1_000,
            ..Default::default()
        }));
        coordinator.request_turn(body("a", "Alex", "r1")).unwrap();
        coordinator.flush("r1");
        assert!(coordinator.current_speaker().is_some());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(coordinator.current_speaker().is_none());

        let response = coordinator.request_turn(body("b", "Jamie", "r2")).unwrap();
        assert_eq!(response, RequestTurnResponse::pending());
    }

    #[test]
    fn test_validation() {
        let coordinator = coordinator();
        assert!(matches!(
            coordinator.request_turn(body("", "x", "r1")),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            coordinator.request_turn(body("a", "x", " ")),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            coordinator.end_turn(EndTurnBody::default()),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
