//! Error taxonomy for the provider runtime.
//!
//! Every public operation reports failure through a tagged [`Result`]; there
//! is no out-of-band error stack. Fetch misses ([`Error::NotFound`]) are
//! recoverable: the caller may retry with a different property query.
//! Provider teardown failures are never surfaced here; they are logged and
//! swallowed so that teardown cannot abort.

use thiserror::Error;

use crate::property::PropertyParseError;

/// Errors reported by the provider runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// No implementation matches the requested (operation, name, query).
    #[error("no {operation} implementation for {name:?} matching query {query:?}")]
    NotFound {
        /// Operation kind that was requested.
        operation: &'static str,
        /// Requested algorithm name.
        name: String,
        /// Property query the candidates were matched against.
        query: String,
    },

    /// A dispatch table fails the completeness rule for its operation.
    #[error("incomplete {operation} implementation {name:?}: missing {missing}")]
    Incomplete {
        /// Operation kind the dispatch table was decoded for.
        operation: &'static str,
        /// Algorithm (or provider) name the table belongs to.
        name: String,
        /// Human-readable description of the missing slot(s).
        missing: &'static str,
    },

    /// An operation was invoked in the wrong context state.
    #[error("operation invoked in wrong state: {0}")]
    ProtocolMisuse(&'static str),

    /// Malformed configuration input (bad names, conflicting aliases, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed property definition or query string.
    #[error(transparent)]
    Property(#[from] PropertyParseError),

    /// An identifier space or resource was exhausted.
    ///
    /// Fatal for the failing call, not for the process.
    #[error("identifier space exhausted: {0}")]
    Exhausted(&'static str),

    /// A provider reported a failure.
    #[error("provider {provider:?} reported failure {reason}: {message}")]
    Provider {
        /// Name of the reporting provider.
        provider: String,
        /// Provider-defined reason code (see the provider's reason strings).
        reason: u32,
        /// Resolved reason string, or a provider-supplied message.
        message: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
