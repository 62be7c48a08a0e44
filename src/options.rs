//! In-process configuration for a single `parse_source` call.
//!
//! Unlike `crate::config::Config` (which layers defaults, a TOML file on
//! disk, and environment variables for the interactive CLI), `ParseOptions`
//! is a plain value the caller builds in memory. The core never touches the
//! filesystem — see §5 of the design doc on reentrancy.

use chrono::{DateTime, Utc};

/// Options controlling a single parse.
#[derive(Clone)]
pub struct ParseOptions {
    /// When `true`, an unrecognized `Full-sort`/`Pre-sorted Groups` label
    /// raises `PgPlanError::UnsupportedSortGroupsKind` instead of degrading
    /// to a generic attribute.
    pub strict_sort_groups: bool,

    /// Injection point for `Plan::created_on`. `None` uses `Utc::now`.
    pub clock: Option<fn() -> DateTime<Utc>>,

    /// Injection point for `Plan::id`. `None` generates a v4 UUID.
    pub id_factory: Option<fn() -> String>,
}

impl ParseOptions {
    pub fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Some(f) => f(),
            None => Utc::now(),
        }
    }

    pub fn new_id(&self) -> String {
        match self.id_factory {
            Some(f) => f(),
            None => uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            strict_sort_groups: false,
            clock: None,
            id_factory: None,
        }
    }
}

impl std::fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("strict_sort_groups", &self.strict_sort_groups)
            .field("clock", &self.clock.map(|_| "<fn>"))
            .field("id_factory", &self.id_factory.map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_wallclock_and_uuid() {
        let opts = ParseOptions::default();
        assert!(!opts.strict_sort_groups);
        let a = opts.new_id();
        let b = opts.new_id();
        assert_ne!(a, b, "two default id_factory calls should not collide");
    }

    #[test]
    fn injected_clock_and_id_are_deterministic() {
        fn fixed_clock() -> DateTime<Utc> {
            DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        }
        fn fixed_id() -> String {
            "fixed-id".to_string()
        }
        let opts = ParseOptions {
            strict_sort_groups: false,
            clock: Some(fixed_clock),
            id_factory: Some(fixed_id),
        };
        assert_eq!(opts.new_id(), "fixed-id");
        assert_eq!(opts.now(), fixed_clock());
    }
}
