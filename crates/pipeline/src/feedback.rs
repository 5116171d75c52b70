//! Audience feedback
//!
//! Counts room reactions over a sliding window and maps them to a behavior
//! level that shapes reply length and tone. Negative levels win ties so the
//! agent leans toward de-escalation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default reaction window
pub const FEEDBACK_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Cheer,
    Boo,
    Like,
    Dislike,
}

impl Reaction {
    /// Accepts `cheer`/`CHEER`, `user.cheered` style names
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        let name = raw.strip_prefix("user.").unwrap_or(&raw);
        match name {
            "cheer" | "cheered" => Some(Self::Cheer),
            "boo" | "booed" => Some(Self::Boo),
            "like" | "liked" => Some(Self::Like),
            "dislike" | "disliked" => Some(Self::Dislike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Cheer,
    Boo,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorLevel {
    HighNegative,
    Negative,
    #[default]
    Neutral,
    Positive,
    HighPositive,
}

impl BehaviorLevel {
    /// Token budget for a reply at this level
    pub fn max_tokens(&self) -> u32 {
        match self {
            Self::HighNegative => 60,
            Self::Negative => 100,
            Self::Neutral | Self::Positive => 150,
            Self::HighPositive => 200,
        }
    }

    /// Extra system-prompt guidance, if any
    pub fn prompt_hint(&self) -> Option<&'static str> {
        match self {
            Self::HighNegative | Self::Negative => Some(
                "The audience is restless. Keep it brief and steer back on topic.",
            ),
            Self::HighPositive => Some("The audience is loving this. Match the energy."),
            Self::Neutral | Self::Positive => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighNegative => "high_negative",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
            Self::HighPositive => "high_positive",
        }
    }
}

/// Minimum counts for each level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackThresholds {
    pub high_negative_boos: usize,
    pub high_negative_dislikes: usize,
    pub negative_boos: usize,
    pub negative_dislikes: usize,
    pub high_positive_cheers: usize,
    pub high_positive_likes: usize,
    pub positive_cheers: usize,
    pub positive_likes: usize,
}

impl Default for FeedbackThresholds {
    fn default() -> Self {
        Self {
            high_negative_boos: 4,
            high_negative_dislikes: 8,
            negative_boos: 2,
            negative_dislikes: 4,
            high_positive_cheers: 5,
            high_positive_likes: 8,
            positive_cheers: 2,
            positive_likes: 4,
        }
    }
}

/// Reaction counts inside the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionCounts {
    pub cheers: usize,
    pub boos: usize,
    pub likes: usize,
    pub dislikes: usize,
}

impl ReactionCounts {
    pub fn behavior_level(&self, t: &FeedbackThresholds) -> BehaviorLevel {
        if self.boos >= t.high_negative_boos || self.dislikes >= t.high_negative_dislikes {
            BehaviorLevel::HighNegative
        } else if self.boos >= t.negative_boos || self.dislikes >= t.negative_dislikes {
            BehaviorLevel::Negative
        } else if self.cheers >= t.high_positive_cheers || self.likes >= t.high_positive_likes {
            BehaviorLevel::HighPositive
        } else if self.cheers >= t.positive_cheers || self.likes >= t.positive_likes {
            BehaviorLevel::Positive
        } else {
            BehaviorLevel::Neutral
        }
    }

    pub fn sentiment(&self) -> Sentiment {
        if self.cheers > self.boos && (self.cheers > 0 || self.likes > self.dislikes) {
            Sentiment::Cheer
        } else if self.boos > self.cheers || self.dislikes > self.likes {
            Sentiment::Boo
        } else {
            Sentiment::Neutral
        }
    }
}

/// Thread-safe sliding-window reaction register
pub struct FeedbackCollector {
    window: Duration,
    thresholds: FeedbackThresholds,
    reactions: Mutex<VecDeque<(Reaction, Instant)>>,
}

impl Default for FeedbackCollector {
    fn default() -> Self {
        Self::new(FEEDBACK_WINDOW, FeedbackThresholds::default())
    }
}

impl FeedbackCollector {
    pub fn new(window: Duration, thresholds: FeedbackThresholds) -> Self {
        Self {
            window,
            thresholds,
            reactions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, reaction: Reaction) {
        self.record_at(reaction, Instant::now());
    }

    pub fn record_at(&self, reaction: Reaction, at: Instant) {
        let mut reactions = self.reactions.lock();
        reactions.push_back((reaction, at));
        Self::prune(&mut reactions, self.window, at);
        tracing::trace!(?reaction, total = reactions.len(), "Reaction recorded");
    }

    pub fn counts(&self) -> ReactionCounts {
        self.counts_at(Instant::now())
    }

    pub fn counts_at(&self, now: Instant) -> ReactionCounts {
        let mut reactions = self.reactions.lock();
        Self::prune(&mut reactions, self.window, now);
        reactions
            .iter()
            .fold(ReactionCounts::default(), |mut acc, (reaction, _)| {
                match reaction {
                    Reaction::Cheer => acc.cheers += 1,
                    Reaction::Boo => acc.boos += 1,
                    Reaction::Like => acc.likes += 1,
                    Reaction::Dislike => acc.dislikes += 1,
                }
                acc
            })
    }

    pub fn behavior_level(&self) -> BehaviorLevel {
        self.counts().behavior_level(&self.thresholds)
    }

    pub fn sentiment(&self) -> Sentiment {
        self.counts().sentiment()
    }

    fn prune(reactions: &mut VecDeque<(Reaction, Instant)>, window: Duration, now: Instant) {
        while let Some(&(_, at)) = reactions.front() {
            if now.saturating_duration_since(at) > window {
                reactions.pop_front();
            } else {
                break;
            }
        }
    }
}
