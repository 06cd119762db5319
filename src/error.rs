//! Error types for the call-credential subsystem.
//!
//! Mirrors the taxonomy in the design doc: transient HTTP failures, bad
//! credentials (4xx), an active backoff/cooldown window, and cancellation
//! are distinguished because callers (queued RPCs) react to them
//! differently. `CredentialError` is `Clone` because a single failed
//! fetch is delivered to every call that was queued behind it.

use std::time::Duration;

/// Error surfaced by [`crate::token::TokenCredential::get_request_metadata`]
/// and by the regional access boundary fetcher's internal bookkeeping.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// The token source's underlying HTTP request failed or returned a non-2xx
    /// status that isn't a clear bad-credential rejection.
    #[error("token fetch failed: {0}")]
    FetchFailed(String),

    /// The identity provider rejected the credential outright (HTTP 4xx).
    #[error("unauthenticated: {status} {message}")]
    Unauthenticated { status: u16, message: String },

    /// A prior fetch failed and the credential is still within its backoff
    /// window; no new fetch was attempted.
    #[error("credential in backoff, retry after {0:?}")]
    Backoff(Duration),

    /// The owning credential was orphaned while this fetch was in flight.
    #[error("credential cancelled")]
    Cancelled,

    /// Configuration error (missing file, malformed JSON key, etc.).
    #[error("invalid credential configuration: {0}")]
    Config(String),

    /// JWT verification failed; see [`JwtError`] for the specific stage.
    #[error(transparent)]
    Jwt(#[from] JwtError),
}

impl CredentialError {
    /// True for errors that indicate a systemic/transient failure worth
    /// backing off on, as opposed to malformed local state.
    pub fn is_transient(&self) -> bool {
        matches!(self, CredentialError::FetchFailed(_))
    }
}

/// The seven JWT verifier outcomes named in the design doc. Mirrors
/// `grpc_jwt_verifier_status` from the original C++ implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    /// The compact serialization, header, or claims JSON could not be parsed.
    #[error("bad JWT format: {0}")]
    BadFormat(String),

    /// RSA signature verification failed.
    #[error("bad JWT signature")]
    BadSignature,

    /// `aud` claim did not match the expected audience.
    #[error("bad JWT audience")]
    BadAudience,

    /// Self-issued token (email-domain issuer) whose `iss` != `sub`.
    #[error("bad JWT subject")]
    BadSubject,

    /// `nbf`/`exp` claim check failed against the current time (with skew).
    #[error("JWT time constraint failure")]
    TimeConstraintFailure,

    /// OpenID discovery or JWKS retrieval failed, or no matching key was found.
    #[error("key retrieval error: {0}")]
    KeyRetrievalError(String),

    /// Catch-all for conditions not covered by the above.
    #[error("JWT verification error: {0}")]
    GenericError(String),
}

/// Outcome of a single regional-access-boundary HTTP attempt, used
/// internally to drive the retry/cooldown state machine. Not part of the
/// public API: callers of [`crate::regional::RegionalAccessBoundaryFetcher::fetch`]
/// never see a regional-fetch failure (per the design doc, those never
/// propagate to the call).
#[derive(Debug)]
pub(crate) enum RegionalFetchOutcome {
    Success {
        encoded_locations: String,
        locations: Vec<String>,
    },
    Retryable,
    Cooldown,
}
