// Dispatcher - fans directives out to specialists and collects their replies

use super::generation::{Completion, GenerationError, Generator, generate_with_timeout};
use super::moderator;
use super::types::{Agent, ChatEvent, DelegationDirective, Message, Roster};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A directive bound to the specialist that will answer it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub agent: Agent,
    pub instruction: String,
}

/// Bind directives to specialists.
///
/// Roles match case-insensitively. Directives for unknown roles or for the
/// host are skipped, and only the first directive per role is kept.
pub fn plan(directives: &[DelegationDirective], roster: &Roster) -> Vec<Assignment> {
    let mut assignments: Vec<Assignment> = Vec::with_capacity(directives.len());

    for directive in directives {
        let Some(agent) = roster.find(&directive.role) else {
            debug!(role = %directive.role, "Skipping directive for unconfigured role");
            continue;
        };
        if agent.is_host() {
            debug!(role = %directive.role, "Skipping directive addressed to the host");
            continue;
        }
        if assignments.iter().any(|a| a.agent.has_role(&agent.role)) {
            debug!(role = %agent.role, "Skipping repeated directive");
            continue;
        }
        assignments.push(Assignment {
            agent: agent.clone(),
            instruction: directive.instruction.clone(),
        });
    }

    assignments
}

/// Runs assignments concurrently and joins them behind a single barrier
pub struct Dispatcher {
    generator: Arc<dyn Generator>,
    timeout: Option<Duration>,
    events: broadcast::Sender<ChatEvent>,
}

impl Dispatcher {
    pub fn new(
        generator: Arc<dyn Generator>,
        timeout: Option<Duration>,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            generator,
            timeout,
            events,
        }
    }

    /// Run every assignment and return the accepted replies in assignment
    /// order, whatever order the calls finish in.
    ///
    /// Returns only after every call has completed or failed. Failed, empty
    /// and duplicate replies are dropped without affecting their siblings.
    pub async fn dispatch(&self, assignments: Vec<Assignment>, context: &[Message]) -> Vec<Message> {
        info!(
            specialists = ?assignments.iter().map(|a| a.agent.role.as_str()).collect::<Vec<_>>(),
            "Dispatching directives"
        );

        let mut handles = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let generator = Arc::clone(&self.generator);
            let events = self.events.clone();
            let timeout = self.timeout;
            let agent = assignment.agent.clone();

            let handle = tokio::spawn(async move {
                let role = assignment.agent.role.clone();
                let on_token = |text: &str| {
                    let _ = events.send(ChatEvent::Token {
                        role: role.clone(),
                        text: text.to_string(),
                    });
                };
                generate_with_timeout(
                    generator.as_ref(),
                    &assignment.agent.model,
                    &assignment.instruction,
                    timeout,
                    &on_token,
                )
                .await
            });

            handles.push((agent, handle));
        }

        // Fan in: one slot per assignment, filled in assignment order
        let mut replies: Vec<Message> = Vec::with_capacity(handles.len());
        for (agent, handle) in handles {
            let completion = match handle.await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(role = %agent.role, error = %e, "Specialist task aborted");
                    Completion::failed(String::new(), GenerationError::Panicked)
                }
            };

            if let Some(error) = &completion.error {
                warn!(
                    role = %agent.role,
                    model = %agent.model,
                    error = %error,
                    "Specialist call failed, dropping its reply"
                );
                continue;
            }

            let candidate = Message::new(&agent.role, completion.text);
            let verdict = moderator::review(&candidate, context)
                .and_then(|()| moderator::review(&candidate, &replies));
            match verdict {
                Ok(()) => replies.push(candidate),
                Err(reason) => {
                    debug!(role = %agent.role, reason = reason.as_str(), "Specialist reply suppressed");
                }
            }
        }

        replies
    }
}
