//! Async call-credential subsystem for a gRPC-like RPC stack.
//!
//! Three collaborating pieces, matching the design doc's component
//! table:
//!
//! - [`token`]: a generic, caching, single-flight token fetcher
//!   ([`token::TokenCredential`]) parameterized over a [`token::TokenSource`]
//!   (OAuth2 refresh, external-account STS exchange, or a bearer token
//!   read from a file).
//! - [`jwt`]: a standalone JWT verifier ([`jwt::Verifier`]) for services
//!   that authenticate inbound calls rather than decorate outbound ones.
//! - [`regional`]: a regional access boundary fetcher
//!   ([`regional::RegionalAccessBoundaryFetcher`]) that decorates calls to
//!   `googleapis.com` with a cached `x-allowed-locations` header.
//!
//! [`compose`] ties call credentials together into an ordered,
//! sequentially-applied pipeline.

pub mod backoff;
pub mod compose;
pub mod config;
pub mod error;
pub mod jwt;
pub mod metadata;
pub mod regional;
pub mod token;

pub use compose::{CallCredential, CompositeCallCredential};
pub use error::{CredentialError, JwtError};
pub use metadata::Metadata;
pub use regional::{RegionalAccessBoundary, RegionalAccessBoundaryFetcher};
pub use token::{Token, TokenCredential, TokenSource};
