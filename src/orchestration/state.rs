// Conversation state - the chat log, the bounded context window and turn flags

use super::moderator::{self, Suppression};
use super::types::{Message, TurnPhase};
use serde::Serialize;
use std::collections::VecDeque;

/// Mutable conversation state, owned by the orchestrator.
///
/// `epoch` changes whenever the conversation is reset or ended, so a turn
/// that was suspended across one can tell its results are stale.
#[derive(Debug)]
pub struct ConversationState {
    chat_log: Vec<Message>,
    context_window: VecDeque<Message>,
    context_limit: usize,
    terminated: bool,
    turn_in_flight: bool,
    phase: TurnPhase,
    epoch: u64,
}

impl ConversationState {
    pub fn new(context_limit: usize) -> Self {
        Self {
            chat_log: Vec::new(),
            context_window: VecDeque::with_capacity(context_limit),
            context_limit,
            terminated: false,
            turn_in_flight: false,
            phase: TurnPhase::Idle,
            epoch: 0,
        }
    }

    /// Append to both the log and the window, evicting the oldest window entry
    pub fn append(&mut self, message: Message) {
        self.context_window.push_back(message.clone());
        while self.context_window.len() > self.context_limit {
            self.context_window.pop_front();
        }
        self.chat_log.push(message);
    }

    /// Moderate `candidate` against the window and append it if accepted
    pub fn admit(&mut self, candidate: Message) -> Result<(), Suppression> {
        moderator::review(&candidate, self.context_window.make_contiguous())?;
        self.append(candidate);
        Ok(())
    }

    pub fn context_snapshot(&self) -> Vec<Message> {
        self.context_window.iter().cloned().collect()
    }

    /// The window as `Role: content` lines for prompts
    pub fn render_context(&self) -> String {
        self.context_window
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn set_phase(&mut self, phase: TurnPhase) {
        self.phase = phase;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn turn_in_flight(&self) -> bool {
        self.turn_in_flight
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Mark a turn as started and return the epoch it belongs to
    pub fn begin_turn(&mut self) -> u64 {
        self.turn_in_flight = true;
        self.phase = TurnPhase::Evaluating;
        self.epoch
    }

    /// Return to idle, unless the turn was overtaken by a reset or end of chat
    pub fn finish_turn(&mut self, epoch: u64) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.turn_in_flight = false;
        self.phase = TurnPhase::Idle;
        true
    }

    /// End the conversation with a closing system message
    pub fn terminate(&mut self, closing: Message) {
        self.append(closing);
        self.terminated = true;
        self.turn_in_flight = false;
        self.phase = TurnPhase::Terminated;
        self.epoch += 1;
    }

    /// Clear everything and return to idle
    pub fn reset(&mut self) {
        self.chat_log.clear();
        self.context_window.clear();
        self.terminated = false;
        self.turn_in_flight = false;
        self.phase = TurnPhase::Idle;
        self.epoch += 1;
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            chat_log: self.chat_log.clone(),
            phase: self.phase,
            terminated: self.terminated,
            turn_in_flight: self.turn_in_flight,
        }
    }
}

/// Read-only copy of the conversation for display layers
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub chat_log: Vec<Message>,
    pub phase: TurnPhase,
    pub terminated: bool,
    pub turn_in_flight: bool,
}
