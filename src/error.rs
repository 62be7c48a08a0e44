//! Crate-wide error type for the EXPLAIN ingestion core.

use thiserror::Error;

/// Result alias used throughout the parsing and enrichment pipeline.
pub type PgPlanResult<T> = Result<T, PgPlanError>;

/// Errors that can escape `parse_source`.
///
/// Sub-parsers (§4.F in the design doc) never construct these directly — they
/// return `bool`/`Option` and the caller falls back to a generic attribute.
/// Only the text parser finding no root node, the tolerant JSON reader
/// rejecting malformed input, and an unrecognized Sort Groups label produce
/// an error that reaches the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PgPlanError {
    #[error("unable to parse plan: {reason}")]
    ParseFailure { reason: String },

    #[error("invalid JSON at line {line}, column {column}: {message}")]
    JsonSyntax {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("unsupported sort groups kind: {label:?}")]
    UnsupportedSortGroupsKind { label: String },
}

impl PgPlanError {
    pub fn parse_failure(reason: impl Into<String>) -> Self {
        PgPlanError::ParseFailure {
            reason: reason.into(),
        }
    }
}
