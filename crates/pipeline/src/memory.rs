//! Rolling session memory
//!
//! Bounded history of user/assistant turns plus an optional running
//! summary. Only the orchestrator mutates it.

use std::collections::VecDeque;

use cohost_core::{ConversationTurn, Exchange, Message, Role};

#[derive(Debug, Clone)]
pub struct SessionMemory {
    turns: VecDeque<ConversationTurn>,
    running_summary: Option<String>,
    max_turns: usize,
}

impl SessionMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            running_summary: None,
            max_turns: max_turns.max(1),
        }
    }

    /// Append a turn; blank text is skipped and text is trimmed
    pub fn append(&mut self, role: Role, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.turns.push_back(ConversationTurn::new(role, text));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn append_exchange(&mut self, exchange: &Exchange) {
        self.append(Role::User, &exchange.user);
        self.append(Role::Assistant, &exchange.assistant);
    }

    /// Replace local history with the coordinator's shared view
    pub fn replace_with(&mut self, exchanges: &[Exchange]) {
        self.turns.clear();
        for exchange in exchanges {
            self.append_exchange(exchange);
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// History as chat messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.turns.iter().map(Message::from).collect()
    }

    pub fn running_summary(&self) -> Option<&str> {
        self.running_summary.as_deref()
    }

    pub fn set_running_summary(&mut self, summary: Option<String>) {
        self.running_summary = summary.filter(|s| !s.trim().is_empty());
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.running_summary = None;
    }
}
