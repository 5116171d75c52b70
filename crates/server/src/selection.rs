//! Winner selection for a collected bucket
//!
//! Two policies share the same first rule: an entrant whose display name
//! appears in the transcript wins outright.
//!
//! - Rotation: walk the speaking order starting just after the last
//!   granted position and take the first entrant present.
//! - Auction: highest bid score, ties broken by speaking order and then
//!   by agent id.

use std::cmp::Ordering;

use cohost_core::coordination::DEFAULT_BID_SCORE;
use cohost_core::{Bid, WinnerSelectionReason};

/// One agent's request inside a bucket
#[derive(Debug, Clone, PartialEq)]
pub struct Entrant {
    pub agent_id: String,
    pub display_name: String,
    pub bid: Option<Bid>,
}

impl Entrant {
    pub fn new(agent_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            bid: None,
        }
    }

    pub fn with_bid(mut self, bid: Bid) -> Self {
        self.bid = Some(bid);
        self
    }

    fn is_addressed_in(&self, transcript_lower: &str) -> bool {
        let name = self.display_name.trim().to_lowercase();
        !name.is_empty() && transcript_lower.contains(&name)
    }

    fn score(&self) -> f64 {
        self.bid.as_ref().map(|b| b.score).unwrap_or(DEFAULT_BID_SCORE)
    }
}

/// Outcome of a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub winner: String,
    pub reason: WinnerSelectionReason,
}

/// First entrant addressed by name in the transcript
pub fn addressed_entrant<'a>(entrants: &'a [Entrant], transcript: &str) -> Option<&'a Entrant> {
    let lower = transcript.to_lowercase();
    entrants.iter().find(|e| e.is_addressed_in(&lower))
}

/// Speaking order state carried across buckets
#[derive(Debug, Clone, Default)]
pub struct Rotation {
    configured: Vec<String>,
    discovered: Vec<String>,
    last_index: Option<usize>,
}

impl Rotation {
    /// `configured` is the operator's speaking order; empty means agents
    /// are ordered as they are discovered.
    pub fn new(configured: Vec<String>) -> Self {
        Self {
            configured,
            discovered: Vec::new(),
            last_index: None,
        }
    }

    pub fn configured(&self) -> &[String] {
        &self.configured
    }

    fn order(&self) -> &[String] {
        if self.configured.is_empty() {
            &self.discovered
        } else {
            &self.configured
        }
    }

    fn next_start(&self) -> usize {
        self.last_index.map(|i| i + 1).unwrap_or(0)
    }

    /// Pick the bucket winner with name addressing, then round robin.
    ///
    /// Returns `None` only for an empty bucket.
    pub fn select(&mut self, entrants: &[Entrant], transcript: &str) -> Option<Selection> {
        if entrants.is_empty() {
            return None;
        }

        if let Some(entrant) = addressed_entrant(entrants, transcript) {
            return Some(Selection {
                winner: entrant.agent_id.clone(),
                reason: WinnerSelectionReason::NameAddressing,
            });
        }

        let order = self.order();
        let start = self.next_start();
        let found = (0..order.len())
            .map(|offset| (start + offset) % order.len())
            .find(|&idx| entrants.iter().any(|e| e.agent_id == order[idx]));
        if let Some(idx) = found {
            let winner = order[idx].clone();
            self.last_index = Some(idx);
            return Some(Selection {
                winner,
                reason: WinnerSelectionReason::RoundRobin,
            });
        }

        // Nobody in the order is present: learn the entrants and rotate
        // through the bucket itself.
        if self.configured.is_empty() {
            for entrant in entrants {
                if !self.discovered.contains(&entrant.agent_id) {
                    self.discovered.push(entrant.agent_id.clone());
                }
            }
        }
        let idx = self.next_start() % entrants.len();
        self.last_index = Some(idx);
        Some(Selection {
            winner: entrants[idx].agent_id.clone(),
            reason: WinnerSelectionReason::RoundRobin,
        })
    }
}

/// Position of `agent_id` in `order`, if listed
fn order_index(order: &[String], agent_id: &str) -> Option<usize> {
    order.iter().position(|id| id == agent_id)
}

/// `Less` when `a` should win over `b` on a score tie
fn tie_break(order: &[String], a: &Entrant, b: &Entrant) -> Ordering {
    match (order_index(order, &a.agent_id), order_index(order, &b.agent_id)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.agent_id.cmp(&b.agent_id),
    }
}

/// Auction award among the bidders of a bucket.
///
/// `order` is the configured speaking order; when empty the bucket's
/// arrival order is used for tie-breaks.
pub fn run_auction(entrants: &[Entrant], transcript: &str, order: &[String]) -> Option<Selection> {
    if entrants.is_empty() {
        return None;
    }

    if let Some(entrant) = addressed_entrant(entrants, transcript) {
        return Some(Selection {
            winner: entrant.agent_id.clone(),
            reason: WinnerSelectionReason::NameAddressing,
        });
    }

    let arrival: Vec<String>;
    let order = if order.is_empty() {
        arrival = entrants.iter().map(|e| e.agent_id.clone()).collect();
        arrival.as_slice()
    } else {
        order
    };

    let bidders: Vec<&Entrant> = entrants.iter().filter(|e| e.bid.is_some()).collect();
    let (candidates, reason) = if bidders.is_empty() {
        (entrants.iter().collect::<Vec<_>>(), WinnerSelectionReason::RoundRobin)
    } else {
        (bidders, WinnerSelectionReason::Auction)
    };

    let mut best = candidates[0];
    for &candidate in &candidates[1..] {
        let better = match candidate.score().partial_cmp(&best.score()) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => tie_break(order, candidate, best) == Ordering::Less,
            _ => false,
        };
        if better {
            best = candidate;
        }
    }

    Some(Selection {
        winner: best.agent_id.clone(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entrants() -> Vec<Entrant> {
        vec![Entrant::new("a", "Alex"), Entrant::new("b", "Jamie")]
    }

    fn bid(score: f64) -> Bid {
        Bid {
            score,
            ..Bid::default()
        }
    }

    #[test]
    fn test_name_addressing_wins() {
        let mut rotation = Rotation::new(vec!["a".into(), "b".into()]);
        let selection = rotation
            .select(&entrants(), "Jamie, what do you think?")
            .unwrap();
        assert_eq!(selection.winner, "b");
        assert_eq!(selection.reason, WinnerSelectionReason::NameAddressing);
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let mut rotation = Rotation::default();
        let selection = rotation.select(&entrants(), "hey ALEX").unwrap();
        assert_eq!(selection.winner, "a");
    }

    #[test]
    fn test_round_robin_over_configured_order() {
        let mut rotation = Rotation::new(vec!["a".into(), "b".into(), "c".into()]);
        let all = vec![
            Entrant::new("a", "Alex"),
            Entrant::new("b", "Jamie"),
            Entrant::new("c", "Sam"),
        ];

        let picks: Vec<String> = (0..4)
            .map(|_| rotation.select(&all, "what's new").unwrap().winner)
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);

        // Only "a" and "c" present: skip past the absent "b"
        let partial = vec![Entrant::new("c", "Sam"), Entrant::new("a", "Alex")];
        assert_eq!(rotation.select(&partial, "next").unwrap().winner, "c");
    }

    #[test]
    fn test_discovery_order_without_configuration() {
        let mut rotation = Rotation::default();
        let first = rotation.select(&entrants(), "hello").unwrap();
        assert_eq!(first.winner, "a");
        assert_eq!(first.reason, WinnerSelectionReason::RoundRobin);

        // Discovered order now drives rotation
        let second = rotation.select(&entrants(), "hello again").unwrap();
        assert_eq!(second.winner, "b");
        let third = rotation.select(&entrants(), "and again").unwrap();
        assert_eq!(third.winner, "a");
    }

    #[test]
    fn test_unknown_entrant_with_configured_order() {
        let mut rotation = Rotation::new(vec!["a".into()]);
        let strangers = vec![Entrant::new("x", "X-ray"), Entrant::new("y", "Yankee")];
        let selection = rotation.select(&strangers, "hi").unwrap();
        assert!(selection.winner == "x" || selection.winner == "y");
    }

    #[test]
    fn test_empty_bucket() {
        assert!(Rotation::default().select(&[], "hi").is_none());
        assert!(run_auction(&[], "hi", &[]).is_none());
    }

    #[test]
    fn test_auction_highest_score() {
        let bucket = vec![
            Entrant::new("a", "Alex").with_bid(bid(3.0)),
            Entrant::new("b", "Jamie").with_bid(bid(8.0)),
        ];
        let selection = run_auction(&bucket, "what now", &[]).unwrap();
        assert_eq!(selection.winner, "b");
        assert_eq!(selection.reason, WinnerSelectionReason::Auction);
    }

    #[test]
    fn test_auction_name_beats_score() {
        let bucket = vec![
            Entrant::new("a", "Alex").with_bid(bid(1.0)),
            Entrant::new("b", "Jamie").with_bid(bid(9.0)),
        ];
        let selection = run_auction(&bucket, "Alex, go ahead", &[]).unwrap();
        assert_eq!(selection.winner, "a");
        assert_eq!(selection.reason, WinnerSelectionReason::NameAddressing);
    }

    #[test]
    fn test_auction_ties() {
        let bucket = vec![
            Entrant::new("b", "Jamie").with_bid(bid(5.0)),
            Entrant::new("a", "Alex").with_bid(bid(5.0)),
        ];
        // Configured order decides
        let order = vec!["b".to_string(), "a".to_string()];
        assert_eq!(run_auction(&bucket, "hm", &order).unwrap().winner, "b");

        // Neither listed: smaller id
        let order = vec!["z".to_string()];
        assert_eq!(run_auction(&bucket, "hm", &order).unwrap().winner, "a");

        // Listed beats unlisted
        let order = vec!["b".to_string()];
        assert_eq!(run_auction(&bucket, "hm", &order).unwrap().winner, "b");
    }

    #[test]
    fn test_auction_ignores_non_bidders() {
        let bucket = vec![
            Entrant::new("a", "Alex"),
            Entrant::new("b", "Jamie").with_bid(bid(0.0)),
        ];
        assert_eq!(run_auction(&bucket, "hm", &[]).unwrap().winner, "b");
    }
}
