// Moderator - keeps empty and repeated replies out of the conversation

use super::types::Message;

/// Why a candidate reply was kept out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Empty,
    Duplicate,
}

impl Suppression {
    pub fn as_str(&self) -> &str {
        match self {
            Suppression::Empty => "empty",
            Suppression::Duplicate => "duplicate",
        }
    }
}

/// Accept `candidate` unchanged, or say why it is suppressed.
///
/// Duplicates are exact `(role, content)` matches against `context`.
/// Pure in both arguments, so repeated checks agree.
pub fn review(candidate: &Message, context: &[Message]) -> Result<(), Suppression> {
    if candidate.content.trim().is_empty() {
        return Err(Suppression::Empty);
    }
    if context.iter().any(|m| m.same_as(candidate)) {
        return Err(Suppression::Duplicate);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_replies_are_suppressed() {
        assert_eq!(review(&Message::new("Math", ""), &[]), Err(Suppression::Empty));
        assert_eq!(review(&Message::new("Math", " \n\t "), &[]), Err(Suppression::Empty));
    }

    #[test]
    fn test_duplicates_against_context() {
        let context = vec![Message::user("what is 6*7"), Message::new("Math", "42")];

        assert_eq!(
            review(&Message::new("Math", "42"), &context),
            Err(Suppression::Duplicate)
        );
        assert!(review(&Message::new("Math", "43"), &context).is_ok());
        // same text from another role is not a duplicate
        assert!(review(&Message::new("Coding", "42"), &context).is_ok());
        // exact match only
        assert!(review(&Message::new("Math", "42 "), &context).is_ok());
    }

    #[test]
    fn test_review_is_idempotent() {
        let context = vec![Message::new("Math", "42")];
        for candidate in [
            Message::new("Math", "42"),
            Message::new("Math", "43"),
            Message::new("Host", "   "),
        ] {
            let once = review(&candidate, &context);
            let twice = review(&candidate, &context);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_padding_alone_does_not_suppress() {
        let candidate = Message::new("Host", "  The answer is 4.  ");
        assert!(review(&candidate, &[Message::new("Host", "The answer is 4.")]).is_ok());
    }
}
