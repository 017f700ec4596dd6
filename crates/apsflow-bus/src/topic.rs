//! Transport-level topic matching.
//!
//! Subscription patterns follow the usual MQTT rules: `+` matches one
//! level, `#` matches the remainder and must be the last level. The core
//! wait predicates use exact topic equality; wildcards exist only so the
//! adapter can subscribe broadly enough to receive everything a wait
//! might match on.

/// Check a topic against a subscription pattern.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return pattern_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(level)) if expected == level => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
