//! Topic records and pattern matching
//!
//! Patterns are "/"-segmented. `+` matches exactly one segment, `#`
//! matches zero or more trailing segments and is only legal as the final
//! segment. Everything else is a byte-exact literal; there is no case
//! folding.

/// Metadata for a topic, taken from its most recent publish. Kept in the
/// broker's topic index so retained payloads can be replayed to new
/// subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub topic: String,
    pub retained: bool,
    pub persistent: bool,
}

/// Whether `pattern` matches `topic`. Total over all inputs: the empty
/// topic and malformed patterns (a non-final `#`) simply never match.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern.is_empty() || topic.is_empty() {
        return false;
    }
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();

    for (i, segment) in pattern_segments.iter().enumerate() {
        match *segment {
            "#" => return i == pattern_segments.len() - 1,
            "+" => {
                if i >= topic_segments.len() {
                    return false;
                }
            }
            literal => {
                if i >= topic_segments.len() || topic_segments[i] != literal {
                    return false;
                }
            }
        }
    }
    pattern_segments.len() == topic_segments.len()
}

/// Whether `pattern` is acceptable for a subscription: non-empty, with `#`
/// nowhere but the final segment.
pub fn valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let segments: Vec<&str> = pattern.split('/').collect();
    segments
        .iter()
        .enumerate()
        .all(|(i, s)| *s != "#" || i == segments.len() - 1)
}
