// Delegation parser - reads directives and routing markers out of host text
//
// Every function here is total: malformed or missing markers map to a
// default instead of an error.

use super::types::{CollaborationMode, DelegationDirective, RoutingDecision};
use regex::Regex;
use std::sync::LazyLock;

static DIRECTIVE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([A-Za-z][A-Za-z0-9_-]*)[ \t]*:")
        .expect("DIRECTIVE_MARKER is a compile-time constant")
});

static MODE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmode[ \t]*:[ \t*]*(host-only|initiate-collaboration)\b")
        .expect("MODE_MARKER is a compile-time constant")
});

static CONFIDENCE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bconfidence[ \t]*:[ \t*]*([0-9]*\.?[0-9]+)")
        .expect("CONFIDENCE_MARKER is a compile-time constant")
});

static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t*]*(mode|confidence)[ \t]*:.*$")
        .expect("MARKER_LINE is a compile-time constant")
});

static QUOTED_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[\"\u{201C}](.*?)[\"\u{201D}]").expect("QUOTED_SPAN is a compile-time constant")
});

/// Extract `@Role: instruction` directives in the order they appear.
///
/// An instruction runs until the next marker or the end of the text.
/// Routing marker lines are stripped from instructions, and directives
/// left with no instruction are dropped. Role names are returned as
/// written; matching them against agents is the dispatcher's job.
pub fn parse_directives(text: &str) -> Vec<DelegationDirective> {
    let markers: Vec<(usize, usize, &str)> = DIRECTIVE_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let role = caps.get(1)?;
            // "name@Host:" is an address, not a directive
            let glued = text[..whole.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
            (!glued).then(|| (whole.start(), whole.end(), role.as_str()))
        })
        .collect();

    let mut directives = Vec::with_capacity(markers.len());
    for (i, &(_, body_start, role)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map_or(text.len(), |next| next.0);
        let instruction = clean_instruction(&text[body_start..body_end]);
        if !instruction.is_empty() {
            directives.push(DelegationDirective::new(role, instruction));
        }
    }
    directives
}

fn clean_instruction(body: &str) -> String {
    MARKER_LINE.replace_all(body, "").trim().to_string()
}

/// Read the `mode:` and `confidence:` markers, if the host reported any.
///
/// A missing half falls back to its default (host-only, 0.0). A confidence
/// outside [0, 1] counts as missing.
pub fn parse_routing(text: &str) -> Option<RoutingDecision> {
    let mode = MODE_MARKER
        .captures(text)
        .and_then(|caps| CollaborationMode::from_marker(&caps[1]));

    let confidence = CONFIDENCE_MARKER
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|c| (0.0..=1.0).contains(c));

    if mode.is_none() && confidence.is_none() {
        return None;
    }

    Some(RoutingDecision::new(
        mode.unwrap_or_default(),
        confidence.unwrap_or(0.0),
    ))
}

/// The first double-quoted span, or the whole text when there is none
pub fn extract_summary(text: &str) -> String {
    QUOTED_SPAN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| text.to_string(), |m| m.as_str().to_string())
}
