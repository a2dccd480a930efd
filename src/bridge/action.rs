//! Emphasis-as-action convention: `*waves*` is an emote.

/// Marker framing an action message.
pub const ACTION_MARKER: char = '*';

/// Unwrap an action message.
///
/// Returns the text with every marker removed when it is framed by exactly
/// one leading and one trailing marker, otherwise `None`. `**bold**` is
/// doubly framed and is not an action.
pub fn decode(text: &str) -> Option<String> {
    let inner = text
        .strip_prefix(ACTION_MARKER)?
        .strip_suffix(ACTION_MARKER)?;
    if inner.is_empty() || inner.starts_with(ACTION_MARKER) || inner.ends_with(ACTION_MARKER) {
        return None;
    }
    Some(inner.replace(ACTION_MARKER, ""))
}

/// Wrap text as an action message.
pub fn encode(text: &str) -> String {
    format!("{ACTION_MARKER}{text}{ACTION_MARKER}")
}
