// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Five kinds, matching the error-handling design: Validation and Protocol
// errors are reported as values (never raised to a caller across an API
// boundary); Transient errors are retried once inline by the caller; Fatal
// errors unwind out of `main` and exit the process non-zero. Programmer
// errors (a bus handler panicking, a broken invariant local to one handler)
// are logged at the point of detection and do not implement this enum at
// all — see `bus::EventBus::publish`.
// =============================================================================

use thiserror::Error;

/// Error type returned by fallible engine operations that are not already
/// surfaced as a domain outcome (e.g. `OrderRejected`).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input at an API boundary. Never propagated past the boundary that
    /// detected it — callers see a negative outcome instead.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A store batch write or network send failed and was retried once.
    #[error("transient failure in {context}: {source}")]
    Transient {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A malformed or unsupported viewer request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The store could not be opened, a migration failed, or a broker
    /// invariant was violated. Unwinds to `main` and exits the process.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn transient(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Transient {
            context,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
