// Orchestrator - runs user turns: evaluate, route, delegate, synthesize, publish

use super::dispatcher::{self, Assignment, Dispatcher};
use super::generation::{Completion, Generator, generate_with_timeout};
use super::parser;
use super::router::{self, Router};
use super::state::{ConversationSnapshot, ConversationState};
use super::types::{
    Agent, ChatEvent, Message, OrchestratorConfig, Roster, RoutingDecision, TurnPhase,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// System message appended when the user ends the chat
pub const CHAT_TERMINATED: &str = "Chat terminated by user.";

const EVENT_CAPACITY: usize = 256;

/// How a submission ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The turn ran; `replies` counts messages appended after the user's
    Completed {
        decision: RoutingDecision,
        replies: usize,
    },
    /// The end-chat command was received
    Terminated,
    /// A reset or end of chat overtook the turn; its results were dropped
    Discarded,
    /// Blank input
    Ignored,
}

/// Owns the conversation and drives one user turn at a time
pub struct Orchestrator {
    config: OrchestratorConfig,
    roster: Roster,
    generator: Arc<dyn Generator>,
    router: Router,
    dispatcher: Dispatcher,
    state: Mutex<ConversationState>,
    events: broadcast::Sender<ChatEvent>,
}

impl Orchestrator {
    /// Create an orchestrator with default settings
    pub fn new(roster: Roster, generator: Arc<dyn Generator>) -> Self {
        Self::with_config(OrchestratorConfig::default(), roster, generator)
    }

    /// Create an orchestrator with custom configuration
    pub fn with_config(
        config: OrchestratorConfig,
        roster: Roster,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let timeout = request_timeout(&config);

        Self {
            router: Router::new(config.confidence_threshold),
            dispatcher: Dispatcher::new(Arc::clone(&generator), timeout, events.clone()),
            state: Mutex::new(ConversationState::new(config.context_limit)),
            config,
            roster,
            generator,
            events,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Follow phase changes, streamed fragments and appended messages
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Read-only copy of the conversation
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.state().snapshot()
    }

    /// Clear the conversation and return to idle.
    ///
    /// A turn still in flight keeps running but its results are discarded.
    pub fn reset(&self) {
        self.state().reset();
        info!("Conversation reset");
        self.publish(ChatEvent::Reset);
        self.publish(ChatEvent::PhaseChanged(TurnPhase::Idle));
    }

    /// Process one user submission.
    ///
    /// Submissions are refused while a turn is in flight, after the chat
    /// has ended, and when no host agent is configured. The end-chat
    /// command is honoured at any time until the chat has ended.
    pub async fn submit(&self, input: &str) -> Result<TurnOutcome, OrchestratorError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }

        let (user_message, host, epoch) = {
            let mut state = self.state();

            if state.is_terminated() {
                return Err(self.refuse(OrchestratorError::Terminated));
            }

            if input.to_lowercase() == self.config.end_chat_command.trim().to_lowercase() {
                let closing = Message::system(CHAT_TERMINATED);
                state.terminate(closing.clone());
                drop(state);

                info!("Chat terminated by user");
                self.publish(ChatEvent::MessageAppended(closing));
                self.publish(ChatEvent::PhaseChanged(TurnPhase::Terminated));
                return Ok(TurnOutcome::Terminated);
            }

            if state.turn_in_flight() {
                return Err(self.refuse(OrchestratorError::TurnInFlight));
            }

            let Some(host) = self.roster.host().cloned() else {
                return Err(self.refuse(OrchestratorError::NoHost));
            };

            let user_message = Message::user(input);
            state.append(user_message.clone());
            let epoch = state.begin_turn();
            (user_message, host, epoch)
        };

        self.publish(ChatEvent::MessageAppended(user_message.clone()));
        self.publish(ChatEvent::PhaseChanged(TurnPhase::Evaluating));

        // Returns the conversation to idle on every exit path
        let _turn = TurnGuard {
            orchestrator: self,
            epoch,
        };

        Ok(self.run_turn(&user_message, &host, epoch).await)
    }

    async fn run_turn(&self, user_message: &Message, host: &Agent, epoch: u64) -> TurnOutcome {
        let context = self.state().render_context();
        let prompt = self
            .router
            .evaluation_prompt(&user_message.content, &context, &self.roster);

        let evaluation = self.call(host, &prompt).await;

        // Markers in a broken evaluation are not trusted
        let decision = match &evaluation.error {
            Some(error) => {
                warn!(model = %host.model, error = %error, "Host evaluation failed, staying host-only");
                RoutingDecision::host_only()
            }
            None => self.router.route(&evaluation.text),
        };
        info!(
            mode = decision.mode.as_str(),
            confidence = decision.confidence,
            "Routing decision"
        );

        let assignments = if decision.is_collaborative() {
            self.plan_delegation(&evaluation.text, &user_message.content)
        } else {
            Vec::new()
        };

        let appended = if assignments.is_empty() {
            self.answer_alone(user_message, host, epoch).await
        } else {
            self.collaborate(user_message, host, assignments, epoch).await
        };

        match appended {
            Some(replies) => TurnOutcome::Completed { decision, replies },
            None => {
                info!("Turn overtaken by reset, results discarded");
                TurnOutcome::Discarded
            }
        }
    }

    /// Directives from the host's output, or the keyword fallback when
    /// none of them can be routed.
    fn plan_delegation(&self, host_output: &str, user_text: &str) -> Vec<Assignment> {
        let directives = parser::parse_directives(host_output);
        let assignments = dispatcher::plan(&directives, &self.roster);
        if !assignments.is_empty() {
            return assignments;
        }

        match router::fallback_directive(user_text) {
            Some(directive) => {
                debug!(role = %directive.role, "No routable directives, using keyword fallback");
                dispatcher::plan(&[directive], &self.roster)
            }
            None => {
                debug!("No routable directives and no keyword match, degrading to host-only");
                Vec::new()
            }
        }
    }

    async fn answer_alone(&self, user_message: &Message, host: &Agent, epoch: u64) -> Option<usize> {
        if !self.enter_phase(epoch, TurnPhase::HostOnly) {
            return None;
        }

        let context = self.state().render_context();
        let prompt = host_only_prompt(&user_message.content, &context);
        let answer = self.call(host, &prompt).await;
        if let Some(error) = &answer.error {
            warn!(model = %host.model, error = %error, "Host answer failed, keeping any streamed text");
        }

        self.publish_reply(epoch, Message::new(&host.role, answer.text))
    }

    async fn collaborate(
        &self,
        user_message: &Message,
        host: &Agent,
        assignments: Vec<Assignment>,
        epoch: u64,
    ) -> Option<usize> {
        if !self.enter_phase(epoch, TurnPhase::Delegating) {
            return None;
        }

        let context = self.state().context_snapshot();
        let replies = self.dispatcher.dispatch(assignments, &context).await;

        // Specialist replies land in directive order, before the synthesis
        let mut accepted = Vec::with_capacity(replies.len());
        {
            let mut state = self.state();
            if state.epoch() != epoch {
                return None;
            }
            for reply in replies {
                match state.admit(reply.clone()) {
                    Ok(()) => accepted.push(reply),
                    Err(reason) => {
                        debug!(role = %reply.role, reason = reason.as_str(), "Specialist reply suppressed")
                    }
                }
            }
        }
        let specialist_count = accepted.len();
        for message in accepted {
            self.publish(ChatEvent::MessageAppended(message));
        }

        if !self.enter_phase(epoch, TurnPhase::Synthesizing) {
            return None;
        }

        let context = self.state().render_context();
        let prompt = synthesis_prompt(&user_message.content, &context);
        let synthesis = self.call(host, &prompt).await;
        if let Some(error) = &synthesis.error {
            warn!(model = %host.model, error = %error, "Synthesis failed, keeping any streamed text");
        }

        let summary = parser::extract_summary(&synthesis.text);
        self.publish_reply(epoch, Message::new(&host.role, summary))
            .map(|n| specialist_count + n)
    }

    /// One streamed call, fragments forwarded to subscribers
    async fn call(&self, agent: &Agent, prompt: &str) -> Completion {
        debug!(role = %agent.role, model = %agent.model, "Calling agent");
        let role = agent.role.clone();
        let events = &self.events;
        let on_token = |text: &str| {
            let _ = events.send(ChatEvent::Token {
                role: role.clone(),
                text: text.to_string(),
            });
        };

        generate_with_timeout(
            self.generator.as_ref(),
            &agent.model,
            prompt,
            request_timeout(&self.config),
            &on_token,
        )
        .await
    }

    /// Moderate and append a host reply: `None` if the turn is stale,
    /// otherwise how many messages were appended.
    fn publish_reply(&self, epoch: u64, reply: Message) -> Option<usize> {
        let verdict = {
            let mut state = self.state();
            if state.epoch() != epoch {
                return None;
            }
            state.admit(reply.clone())
        };

        match verdict {
            Ok(()) => {
                self.publish(ChatEvent::MessageAppended(reply));
                Some(1)
            }
            Err(reason) => {
                debug!(role = %reply.role, reason = reason.as_str(), "Host reply suppressed");
                Some(0)
            }
        }
    }

    fn enter_phase(&self, epoch: u64, phase: TurnPhase) -> bool {
        {
            let mut state = self.state();
            if state.epoch() != epoch {
                return false;
            }
            state.set_phase(phase);
        }
        self.publish(ChatEvent::PhaseChanged(phase));
        true
    }

    fn refuse(&self, error: OrchestratorError) -> OrchestratorError {
        warn!(error = %error, "Submission refused");
        self.publish(ChatEvent::Refused(error.to_string()));
        error
    }

    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight flag when a turn ends, unless a reset got there first
struct TurnGuard<'a> {
    orchestrator: &'a Orchestrator,
    epoch: u64,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let finished = self.orchestrator.state().finish_turn(self.epoch);
        if finished {
            self.orchestrator
                .publish(ChatEvent::PhaseChanged(TurnPhase::Idle));
        }
    }
}

fn request_timeout(config: &OrchestratorConfig) -> Option<Duration> {
    (config.request_timeout_secs > 0).then(|| Duration::from_secs(config.request_timeout_secs))
}

fn host_only_prompt(user_text: &str, context: &str) -> String {
    format!(
        "The user asked: \"{user_text}\"\n\
         Relevant context:\n{context}\n\n\
         Reply as the host. Answer the user directly and concisely. \
         Do not explain what you are doing."
    )
}

fn synthesis_prompt(user_text: &str, context: &str) -> String {
    format!(
        "The user asked: \"{user_text}\"\n\
         Relevant context:\n{context}\n\n\
         Agents have replied with their insights.\n\
         Please provide a concise final answer to the user, in quotes only. \
         Do not restate the entire conversation or explain what you are doing."
    )
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No host agent configured; add an agent with the role \"Host\"")]
    NoHost,

    #[error("A turn is already in progress")]
    TurnInFlight,

    #[error("The chat has ended; reset to start a new conversation")]
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::generation::TokenSink;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl Generator for Silent {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _on_token: &TokenSink<'_>,
        ) -> Completion {
            Completion::finished("")
        }
    }

    fn orchestrator(agents: Vec<Agent>) -> Orchestrator {
        Orchestrator::new(Roster::new(agents).unwrap(), Arc::new(Silent))
    }

    #[test]
    fn test_orchestrator_creation() {
        let orchestrator = orchestrator(vec![Agent::new("Host", "test-model")]);
        assert_eq!(orchestrator.config().confidence_threshold, 0.5);
        assert_eq!(orchestrator.roster().host().unwrap().model, "test-model");
        assert_eq!(orchestrator.snapshot().phase, TurnPhase::Idle);
    }

    #[test]
    fn test_prompts_embed_question_and_context() {
        let prompt = synthesis_prompt("why?", "Math: because");
        assert!(prompt.contains("\"why?\""));
        assert!(prompt.contains("Math: because"));
        assert!(prompt.contains("in quotes only"));

        let prompt = host_only_prompt("why?", "User: why?");
        assert!(prompt.contains("Answer the user directly"));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let mut config = OrchestratorConfig::default();
        assert_eq!(request_timeout(&config), Some(Duration::from_secs(300)));
        config.request_timeout_secs = 0;
        assert_eq!(request_timeout(&config), None);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let orchestrator = orchestrator(vec![Agent::new("Host", "h")]);
        assert_eq!(orchestrator.submit("   ").await, Ok(TurnOutcome::Ignored));
        assert!(orchestrator.snapshot().chat_log.is_empty());
    }

    #[tokio::test]
    async fn test_empty_host_reply_leaves_only_user_message() {
        let orchestrator = orchestrator(vec![Agent::new("Host", "h")]);
        let outcome = orchestrator.submit("hello").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                decision: RoutingDecision::host_only(),
                replies: 0
            }
        );

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.chat_log.len(), 1);
        assert!(!snapshot.turn_in_flight);
        assert_eq!(snapshot.phase, TurnPhase::Idle);
    }
}
