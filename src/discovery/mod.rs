//! Discovery engine (§4.8): mDNS, USB, and serial enumeration feeding a
//! single glob-filtered, deduplicated resource list.

pub mod mdns;

#[cfg(feature = "usb")]
pub mod usb;

#[cfg(feature = "serial")]
pub mod serial;

use tracing::debug;

/// Case-insensitive glob match supporting `*` and `?`.
#[must_use]
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&pattern[1..], text) || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => matches(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p.eq_ignore_ascii_case(t) => matches(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = candidate.chars().collect();
    matches(&pattern, &text)
}

/// Gather every resource string discoverable right now, across all
/// compiled-in mechanisms.
fn discover_all() -> Vec<String> {
    let mut all = mdns::discover();

    #[cfg(feature = "usb")]
    all.extend(usb::discover());

    #[cfg(feature = "serial")]
    all.extend(serial::discover());

    all
}

/// Run discovery, apply `pattern`, dedupe (preserving first-seen order), and
/// cap at `cap` entries (§4.8).
#[must_use]
pub fn find_resources(pattern: &str, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for candidate in discover_all() {
        if !glob_match(pattern, &candidate) {
            continue;
        }
        if !seen.insert(candidate.clone()) {
            continue;
        }
        out.push(candidate);
        if out.len() >= cap {
            debug!(cap, "find_resources reached its entry cap; remaining matches dropped");
            break;
        }
    }
    out
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn glob_star_matches_any_suffix() {
        assert!(glob_match("TCPIP*", "TCPIP0::10.0.0.1::INSTR"));
        assert!(!glob_match("USB*", "TCPIP0::10.0.0.1::INSTR"));
    }

    #[test]
    fn glob_question_mark_matches_one_char() {
        assert!(glob_match("GPIB?::1::INSTR", "GPIB0::1::INSTR"));
        assert!(!glob_match("GPIB?::1::INSTR", "GPIB::1::INSTR"));
    }

    #[test]
    fn glob_is_case_insensitive() {
        assert!(glob_match("tcpip*", "TCPIP0::10.0.0.1::INSTR"));
    }

    #[test]
    fn find_resources_caps_and_dedupes() {
        // discover_all() has no live backends in a unit-test process, so the
        // result is always empty here; this just exercises the cap=0 edge.
        assert_eq!(find_resources("*", 0), Vec::<String>::new());
    }
}
