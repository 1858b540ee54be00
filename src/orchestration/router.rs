// Router - decides whether a turn stays with the host or engages specialists

use super::parser;
use super::types::{CollaborationMode, DelegationDirective, Roster, RoutingDecision};

/// Vocabulary that sends an undirected question to the math specialist
pub const MATH_KEYWORDS: &[&str] = &[
    "integral",
    "solve",
    "equation",
    "derivative",
    "limit",
    "radius",
    "area",
    "volume",
];

/// Vocabulary that sends an undirected question to the coding specialist
pub const CODE_KEYWORDS: &[&str] = &[
    "function", "bug", "compile", "error", "loop", "code", "variable",
];

pub const MATH_ROLE: &str = "Math";
pub const CODING_ROLE: &str = "Coding";

/// Applies the confidence threshold to the host's self-assessment
#[derive(Debug, Clone)]
pub struct Router {
    threshold: f64,
}

impl Router {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Route from the raw text of the host's evaluation reply
    pub fn route(&self, host_output: &str) -> RoutingDecision {
        self.decide(parser::parse_routing(host_output))
    }

    /// Below the threshold the reported mode is not trusted: the turn
    /// stays host-only whatever the host asked for.
    pub fn decide(&self, reported: Option<RoutingDecision>) -> RoutingDecision {
        let reported = reported.unwrap_or_default();
        if reported.confidence < self.threshold {
            RoutingDecision::new(CollaborationMode::HostOnly, reported.confidence)
        } else {
            reported
        }
    }

    /// Build the delegation-evaluation prompt for the host
    pub fn evaluation_prompt(&self, user_message: &str, context: &str, roster: &Roster) -> String {
        let mut prompt = format!("The user said:\n\"{}\"\n\n", user_message);

        if !context.is_empty() {
            prompt.push_str("Recent conversation:\n");
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }

        prompt.push_str("You are the host of a multi-agent team.");

        let specialists: Vec<&str> = roster.specialists().map(|a| a.role.as_str()).collect();
        if specialists.is_empty() {
            prompt.push_str(" No specialists are available, so answer on your own.\n\n");
        } else {
            prompt.push_str(
                " If the question needs a specialist, delegate by starting a section with the \
                 role mention. Available specialists:\n",
            );
            for role in &specialists {
                prompt.push_str(&format!("- @{role}: [your request to the {role} agent]\n"));
            }
            prompt.push_str(
                "\nAfter delegating, provide a final summary reply to the user enclosed in quotes only. \
                 Do not explain what you are doing, do not reflect.\n\n",
            );
        }

        prompt.push_str(
            "Include in your response a line in the format \"mode: <host-only or initiate-collaboration>\" \
             and a line \"confidence: <value between 0 and 1>\".",
        );
        prompt
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(0.5)
    }
}

/// Directive synthesized from the user's own words when a collaborative
/// turn produced none. Math wins over coding when both match.
pub fn fallback_directive(user_message: &str) -> Option<DelegationDirective> {
    if contains_keyword(user_message, MATH_KEYWORDS) {
        return Some(DelegationDirective::new(
            MATH_ROLE,
            format!(
                "Please help solve the following math problem: \"{}\" using detailed steps.",
                user_message
            ),
        ));
    }

    if contains_keyword(user_message, CODE_KEYWORDS) {
        return Some(DelegationDirective::new(
            CODING_ROLE,
            format!(
                "Please help with this coding problem: \"{}\" and provide a full explanation.",
                user_message
            ),
        ));
    }

    None
}

fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    let text = text.to_lowercase();
    keywords.iter().any(|&keyword| text.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::types::Agent;

    fn collaborate(confidence: f64) -> Option<RoutingDecision> {
        Some(RoutingDecision::new(
            CollaborationMode::InitiateCollaboration,
            confidence,
        ))
    }

    #[test]
    fn test_threshold_overrides_low_confidence() {
        let router = Router::default();
        for c in [0.0, 0.2, 0.49, 0.4999] {
            assert_eq!(router.decide(collaborate(c)).mode, CollaborationMode::HostOnly);
        }
        for c in [0.5, 0.51, 0.9, 1.0] {
            assert_eq!(
                router.decide(collaborate(c)).mode,
                CollaborationMode::InitiateCollaboration
            );
        }
    }

    #[test]
    fn test_missing_markers_stay_host_only() {
        let router = Router::default();
        assert_eq!(router.decide(None), RoutingDecision::host_only());
        assert_eq!(router.route("just an answer").mode, CollaborationMode::HostOnly);
    }

    #[test]
    fn test_confident_host_only_is_respected() {
        let router = Router::default();
        let decision = router.route("mode: host-only\nconfidence: 0.95");
        assert_eq!(decision.mode, CollaborationMode::HostOnly);
        assert_eq!(decision.confidence, 0.95);
    }

    #[test]
    fn test_keyword_fallback() {
        let directive = fallback_directive("derive the equation for velocity").unwrap();
        assert_eq!(directive.role, "Math");
        assert!(directive.instruction.contains("derive the equation for velocity"));

        let directive = fallback_directive("Why does this LOOP never end?").unwrap();
        assert_eq!(directive.role, "Coding");

        // math keywords win when both vocabularies match
        let directive = fallback_directive("solve this compile error").unwrap();
        assert_eq!(directive.role, "Math");

        assert!(fallback_directive("tell me a story about a cat").is_none());
    }

    #[test]
    fn test_evaluation_prompt_lists_specialists() {
        let roster = Roster::new(vec![
            Agent::new("Host", "h"),
            Agent::new("Math", "m"),
            Agent::new("Writing", "w"),
        ])
        .unwrap();
        let prompt = Router::default().evaluation_prompt("what is 2+2?", "User: hi", &roster);
        assert!(prompt.contains("\"what is 2+2?\""));
        assert!(prompt.contains("User: hi"));
        assert!(prompt.contains("@Math:"));
        assert!(prompt.contains("@Writing:"));
        assert!(!prompt.contains("@Host:"));
        assert!(prompt.contains("mode: <host-only or initiate-collaboration>"));
        assert!(prompt.contains("confidence: <value between 0 and 1>"));
    }
}
