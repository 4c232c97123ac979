//! The suspension marker kept in a secret's comment
//!
//! A suspended secret carries `AUTO-ISOLIR | OLD:<profile>` at the end of its
//! comment, separated from any operator text by one space.

/// Profile that cuts a subscriber off
pub const SUSPENDED_PROFILE: &str = "DROP";

const MARKER: &str = "AUTO-ISOLIR | OLD:";

/// Append the marker for `original_profile`, replacing a stale one
pub fn mark(comment: &str, original_profile: &str) -> String {
    let base = strip(comment);
    if base.is_empty() {
        format!("{}{}", MARKER, original_profile)
    } else {
        format!("{} {}{}", base, MARKER, original_profile)
    }
}

/// The profile recorded in the comment, if any
pub fn original_profile(comment: &str) -> Option<&str> {
    let start = comment.rfind(MARKER)? + MARKER.len();
    let profile = comment[start..].trim();
    if profile.is_empty() {
        None
    } else {
        Some(profile)
    }
}

/// The comment as it was before `mark`
pub fn strip(comment: &str) -> &str {
    match comment.find(MARKER) {
        Some(start) => {
            let before = &comment[..start];
            before.strip_suffix(' ').unwrap_or(before)
        }
        None => comment,
    }
}
