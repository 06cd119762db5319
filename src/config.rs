//! Tunables shared across the three components, plus the two environment
//! variables named in the design doc.
//!
//! Grounded on `siumai`'s provider builder pattern (concrete, explicitly
//! constructed config structs rather than a file-backed loader — config
//! file loading is named as an out-of-scope external collaborator) and on
//! `siumai-core/src/auth/adc.rs`'s habit of reading environment variables
//! lazily at the call site that needs them.

use std::time::Duration;

use crate::backoff::BackoffOptions;

/// Environment variable holding the path to a service-account JSON key,
/// consulted by [`crate::token::external_account`] style flows.
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Feature flag gating the regional access boundary fetcher. When unset
/// (or not `"true"`), [`crate::regional::RegionalAccessBoundaryFetcher::fetch`]
/// is a no-op, per the design doc's "experimental flag" note.
pub const REGIONAL_ACCESS_BOUNDARY_FLAG: &str = "GRPC_EXPERIMENTAL_XDS_ORCA_LRS_PROPAGATION";

/// Returns true iff the regional access boundary feature is enabled.
/// Read once and cached by the owning fetcher at construction time (per
/// the design doc: "The regional-fetcher feature flag is read at
/// construction and cached").
pub fn regional_access_boundary_enabled() -> bool {
    std::env::var(REGIONAL_ACCESS_BOUNDARY_FLAG)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Path to a service account key file, if configured.
pub fn google_application_credentials_path() -> Option<String> {
    std::env::var(GOOGLE_APPLICATION_CREDENTIALS).ok()
}

/// Token-fetcher tunables (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct TokenFetcherConfig {
    /// A cached token with less than this much remaining lifetime is
    /// treated as absent and triggers a refresh.
    pub refresh_threshold: Duration,
    /// Deadline passed to `TokenSource::fetch_token` for each attempt.
    /// Fetcher-specified per the design doc; not a tunable the original
    /// C++ implementation names explicitly.
    pub fetch_deadline: Duration,
    pub backoff: BackoffOptions,
}

impl Default for TokenFetcherConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(60),
            fetch_deadline: Duration::from_secs(30),
            backoff: BackoffOptions::default(),
        }
    }
}

/// JWT verifier tunables (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct JwtVerifierConfig {
    pub clock_skew: Duration,
    pub max_http_delay: Duration,
}

impl Default for JwtVerifierConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(60),
            max_http_delay: Duration::from_secs(60),
        }
    }
}

/// Regional access boundary tunables (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct RegionalBoundaryConfig {
    pub soft_grace: Duration,
    pub hard_cache: Duration,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
    pub max_retries: u32,
    pub request_deadline: Duration,
    pub backoff: BackoffOptions,
}

impl Default for RegionalBoundaryConfig {
    fn default() -> Self {
        Self {
            soft_grace: Duration::from_secs(60 * 60),
            hard_cache: Duration::from_secs(6 * 60 * 60),
            base_cooldown: Duration::from_secs(15 * 60),
            max_cooldown: Duration::from_secs(60 * 60),
            max_retries: 6,
            request_deadline: Duration::from_secs(60),
            backoff: BackoffOptions::default(),
        }
    }
}
