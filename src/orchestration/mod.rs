// Orchestration system - a host agent that answers alone or delegates to specialists

pub mod dispatcher;
pub mod generation;
pub mod moderator;
pub mod orchestrator;
pub mod parser;
pub mod router;
pub mod state;
pub mod types;

pub use dispatcher::{Assignment, Dispatcher};
pub use generation::{Completion, GenerationError, Generator, TokenSink};
pub use orchestrator::{CHAT_TERMINATED, Orchestrator, OrchestratorError, TurnOutcome};
pub use router::Router;
pub use state::{ConversationSnapshot, ConversationState};
pub use types::*;
