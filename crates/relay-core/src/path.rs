// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path grammar helpers.
//!
//! A path is `{subsystem}://{operation...}`. Nested subsystems prefix their
//! children's paths with `parent://child/...`. This module only deals with
//! the stable protocol strings (one-shot reply routes, query routes); the
//! pattern *language* used to match paths against registered routes lives
//! in [`crate::router::pattern`].

/// Splits `path` into its leading `subsystem://` prefix and the remainder.
///
/// Returns `None` if `path` has no `://` separator.
#[must_use]
pub fn split_subsystem(path: &str) -> Option<(&str, &str)> {
    path.split_once("://")
}

/// Returns the leading subsystem name of `path` (the part before `://`).
#[must_use]
pub fn subsystem_of(path: &str) -> Option<&str> {
    split_subsystem(path).map(|(subsystem, _)| subsystem)
}

/// Builds the stable one-shot reply path `{subsystem}://request/oneShot/{message_id}`.
#[must_use]
pub fn one_shot_reply_path(subsystem: &str, message_id: &str) -> String {
    format!("{subsystem}://request/oneShot/{message_id}")
}

/// Returns `true` if `path` is a one-shot reply route for any subsystem.
#[must_use]
pub fn is_one_shot_reply_path(path: &str) -> bool {
    split_subsystem(path)
        .map(|(_, rest)| rest.starts_with("request/oneShot/"))
        .unwrap_or(false)
}

/// Builds the stable query path `{subsystem}://query/{operation}`.
#[must_use]
pub fn query_path(subsystem: &str, operation: &str) -> String {
    format!("{subsystem}://query/{operation}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_subsystem_prefix() {
        assert_eq!(subsystem_of("kernel://query/status"), Some("kernel"));
        assert_eq!(subsystem_of("A://echo/42"), Some("A"));
        assert_eq!(subsystem_of("not-a-path"), None);
    }

    #[test]
    fn builds_one_shot_reply_path() {
        assert_eq!(
            one_shot_reply_path("B", "m1"),
            "B://request/oneShot/m1"
        );
        assert!(is_one_shot_reply_path("B://request/oneShot/m1"));
        assert!(!is_one_shot_reply_path("B://ch/replies"));
    }

    #[test]
    fn builds_query_path() {
        assert_eq!(query_path("kernel", "status"), "kernel://query/status");
    }
}
