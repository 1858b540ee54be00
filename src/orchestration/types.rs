// Core types for the orchestration system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role label of user-submitted messages
pub const USER_ROLE: &str = "User";

/// Role label of messages produced by the orchestrator itself
pub const SYSTEM_ROLE: &str = "System";

/// Role name (case-insensitive) that designates the host agent
pub const HOST_ROLE: &str = "host";

/// One entry of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: role.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(USER_ROLE, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(SYSTEM_ROLE, content)
    }

    /// Equality used for deduplication: same author, same text
    pub fn same_as(&self, other: &Message) -> bool {
        self.role == other.role && self.content == other.content
    }
}

/// A configured participant: one role bound to one backing model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub role: String,
    pub model: String,
}

impl Agent {
    pub fn new(role: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            model: model.into(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.role.eq_ignore_ascii_case(HOST_ROLE)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }
}

/// The configured agents, role names unique case-insensitively
#[derive(Debug, Clone, Default)]
pub struct Roster {
    agents: Vec<Agent>,
}

impl Roster {
    pub fn new(agents: Vec<Agent>) -> Result<Self, RosterError> {
        for (i, agent) in agents.iter().enumerate() {
            if agent.role.trim().is_empty() {
                return Err(RosterError::EmptyRole);
            }
            if agent.model.trim().is_empty() {
                return Err(RosterError::EmptyModel(agent.role.clone()));
            }
            if agents[..i].iter().any(|a| a.has_role(&agent.role)) {
                return Err(RosterError::DuplicateRole(agent.role.clone()));
            }
        }
        Ok(Self { agents })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn host(&self) -> Option<&Agent> {
        self.agents.iter().find(|a| a.is_host())
    }

    /// First agent carrying `role`, compared case-insensitively
    pub fn find(&self, role: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.has_role(role))
    }

    pub fn specialists(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(|a| !a.is_host())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("Agent role must not be empty")]
    EmptyRole,

    #[error("Agent {0} has no model")]
    EmptyModel(String),

    #[error("Role {0} is configured more than once")]
    DuplicateRole(String),
}

/// Whether the host answers alone or engages specialists
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CollaborationMode {
    #[default]
    HostOnly,
    InitiateCollaboration,
}

impl CollaborationMode {
    pub fn as_str(&self) -> &str {
        match self {
            CollaborationMode::HostOnly => "host-only",
            CollaborationMode::InitiateCollaboration => "initiate-collaboration",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.to_ascii_lowercase().as_str() {
            "host-only" => Some(CollaborationMode::HostOnly),
            "initiate-collaboration" => Some(CollaborationMode::InitiateCollaboration),
            _ => None,
        }
    }
}

/// Routing decision for one user turn
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub mode: CollaborationMode,
    pub confidence: f64,
}

impl RoutingDecision {
    pub fn new(mode: CollaborationMode, confidence: f64) -> Self {
        Self { mode, confidence }
    }

    pub fn host_only() -> Self {
        Self::default()
    }

    pub fn is_collaborative(&self) -> bool {
        self.mode == CollaborationMode::InitiateCollaboration
    }
}

/// An instruction the host addressed to one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationDirective {
    pub role: String,
    pub instruction: String,
}

impl DelegationDirective {
    pub fn new(role: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            instruction: instruction.into(),
        }
    }
}

/// Where the orchestrator is within a turn
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    #[default]
    Idle,
    Evaluating,
    HostOnly,
    Delegating,
    Synthesizing,
    Terminated,
}

impl TurnPhase {
    pub fn as_str(&self) -> &str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Evaluating => "evaluating",
            TurnPhase::HostOnly => "answering",
            TurnPhase::Delegating => "delegating",
            TurnPhase::Synthesizing => "synthesizing",
            TurnPhase::Terminated => "terminated",
        }
    }
}

/// Notifications published to observers of a conversation
#[derive(Debug, Clone)]
pub enum ChatEvent {
    PhaseChanged(TurnPhase),
    /// A fragment of a reply that is still streaming
    Token { role: String, text: String },
    MessageAppended(Message),
    Reset,
    /// A submission was refused; carries the reason shown to the user
    Refused(String),
}

/// Tuning knobs of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Per streamed call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_end_chat_command")]
    pub end_chat_command: String,
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_context_limit() -> usize {
    100
}

fn default_request_timeout() -> u64 {
    300
}

fn default_end_chat_command() -> String {
    "end chat".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            context_limit: default_context_limit(),
            request_timeout_secs: default_request_timeout(),
            end_chat_command: default_end_chat_command(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_detection_is_case_insensitive() {
        assert!(Agent::new("Host", "m").is_host());
        assert!(Agent::new("HOST", "m").is_host());
        assert!(!Agent::new("Hostess", "m").is_host());
    }

    #[test]
    fn test_roster_rejects_duplicate_roles() {
        let err = Roster::new(vec![Agent::new("Math", "a"), Agent::new("math", "b")]).unwrap_err();
        assert_eq!(err, RosterError::DuplicateRole("math".to_string()));

        let err = Roster::new(vec![Agent::new("Host", "a"), Agent::new("host", "b")]).unwrap_err();
        assert_eq!(err, RosterError::DuplicateRole("host".to_string()));
    }

    #[test]
    fn test_roster_rejects_blank_fields() {
        assert_eq!(
            Roster::new(vec![Agent::new("  ", "m")]).unwrap_err(),
            RosterError::EmptyRole
        );
        assert_eq!(
            Roster::new(vec![Agent::new("Math", "")]).unwrap_err(),
            RosterError::EmptyModel("Math".to_string())
        );
    }

    #[test]
    fn test_roster_lookup() {
        let roster = Roster::new(vec![
            Agent::new("Host", "llama3.2"),
            Agent::new("Math", "qwen2.5-math"),
            Agent::new("Coding", "codellama"),
        ])
        .unwrap();

        assert_eq!(roster.host().map(|a| a.model.as_str()), Some("llama3.2"));
        assert_eq!(roster.find("CODING").map(|a| a.role.as_str()), Some("Coding"));
        assert!(roster.find("Writing").is_none());
        let specialists: Vec<_> = roster.specialists().map(|a| a.role.as_str()).collect();
        assert_eq!(specialists, vec!["Math", "Coding"]);
    }

    #[test]
    fn test_roster_without_host_is_constructible() {
        let roster = Roster::new(vec![Agent::new("Math", "m")]).unwrap();
        assert!(roster.host().is_none());
    }

    #[test]
    fn test_message_dedup_equality_ignores_identity() {
        let a = Message::new("Math", "42");
        let b = Message::new("Math", "42");
        assert_ne!(a.id, b.id);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Message::new("Coding", "42")));
    }

    #[test]
    fn test_mode_markers() {
        assert_eq!(
            CollaborationMode::from_marker("Initiate-Collaboration"),
            Some(CollaborationMode::InitiateCollaboration)
        );
        assert_eq!(CollaborationMode::from_marker("maybe"), None);
        assert_eq!(CollaborationMode::HostOnly.as_str(), "host-only");
        assert_eq!(RoutingDecision::default(), RoutingDecision::host_only());
    }
}
