// ===============================
// src/error.rs
// ===============================
use serde::Serialize;
use thiserror::Error;

use crate::domain::Ts;

/// Problems raised while running a cycle. Only `InvariantViolation` is fatal,
/// and only for the symbol it names.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreError {
    #[error("no observation for {symbol} at {ts}")]
    DataUnavailable { symbol: String, ts: Ts },
    #[error("stale observation for {symbol}: observed {observed}, cycle {ts}")]
    StaleObservation { symbol: String, observed: Ts, ts: Ts },
    #[error("invalid observation for {symbol}: field {field} out of range")]
    InvalidObservation { symbol: String, field: &'static str },
    #[error("degraded context: {fresh} fresh basket symbols, quorum {quorum}")]
    DegradedContext { fresh: usize, quorum: usize },
    #[error("position invariant violated for {symbol}: {detail}")]
    InvariantViolation { symbol: String, detail: String },
}

impl CoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::InvariantViolation { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
