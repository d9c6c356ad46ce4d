//! Conversation context kept across reconnects.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use super::events::TranscriptRole;
use super::openai::ClientEvent;

/// Turns older than this are forgotten.
pub const MAX_CONTEXT_TURNS: usize = 64;

/// One completed conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: TranscriptRole,
    pub text: String,
}

/// Ordered user and assistant turns of a session.
#[derive(Debug, Default)]
pub struct ConversationContext {
    turns: Mutex<VecDeque<Turn>>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: TranscriptRole, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        let mut turns = self.turns.lock();
        if turns.len() == MAX_CONTEXT_TURNS {
            turns.pop_front();
        }
        turns.push_back(Turn { role, text });
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    /// Conversation items that rebuild this context on a fresh connection.
    pub fn replay_events(&self) -> Vec<ClientEvent> {
        self.turns
            .lock()
            .iter()
            .map(|turn| match turn.role {
                TranscriptRole::User => ClientEvent::user_text(&turn.text),
                TranscriptRole::Assistant => ClientEvent::assistant_text(&turn.text),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_order_and_skips_blank() {
        let ctx = ConversationContext::new();
        ctx.push(TranscriptRole::User, "10 reps bench press 135 pounds");
        ctx.push(TranscriptRole::Assistant, "   ");
        ctx.push(TranscriptRole::Assistant, "Logged it!");

        let turns = ctx.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TranscriptRole::User);
        assert_eq!(turns[1].text, "Logged it!");
    }

    #[test]
    fn test_context_is_bounded() {
        let ctx = ConversationContext::new();
        for i in 0..MAX_CONTEXT_TURNS + 5 {
            ctx.push(TranscriptRole::User, format!("turn {i}"));
        }
        assert_eq!(ctx.len(), MAX_CONTEXT_TURNS);
        assert_eq!(ctx.turns()[0].text, "turn 5");
    }

    #[test]
    fn test_replay_events_by_role() {
        let ctx = ConversationContext::new();
        ctx.push(TranscriptRole::User, "hi");
        ctx.push(TranscriptRole::Assistant, "hello");

        let events = ctx.replay_events();
        assert_eq!(events[0], ClientEvent::user_text("hi"));
        assert_eq!(events[1], ClientEvent::assistant_text("hello"));
    }
}
