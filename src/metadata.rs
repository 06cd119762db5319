//! The per-call metadata container.
//!
//! The design doc treats the metadata attached to an outgoing call as an
//! external collaborator owned by the surrounding RPC stack. This crate
//! only ever appends headers to it, so a thin wrapper around
//! [`http::HeaderMap`] stands in for it rather than depending on any
//! particular RPC framework's call type.

use http::{HeaderMap, HeaderValue};

pub const AUTHORIZATION: &str = "authorization";
pub const ALLOWED_LOCATIONS: &str = "x-allowed-locations";
pub const AUTHORITY: &str = "authority";

/// Call-scoped metadata that credentials decorate before a request goes out.
#[derive(Debug, Clone, Default)]
pub struct Metadata(HeaderMap);

impl Metadata {
    pub fn new() -> Self {
        Self(HeaderMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) {
        if let Ok(v) = HeaderValue::from_str(&value.into()) {
            self.0.insert(name, v);
        }
    }

    /// Appends `authorization: Bearer <token>`.
    pub fn append_authorization_bearer(&mut self, token: &str) {
        self.insert(AUTHORIZATION, format!("Bearer {token}"));
    }

    /// Appends `x-allowed-locations: <encoded>`.
    pub fn append_allowed_locations(&mut self, encoded: &str) {
        self.insert(ALLOWED_LOCATIONS, encoded.to_string());
    }

    pub fn authority(&self) -> Option<&str> {
        self.get(AUTHORITY)
    }

    pub fn into_inner(self) -> HeaderMap {
        self.0
    }

    pub fn as_header_map(&self) -> &HeaderMap {
        &self.0
    }
}

impl From<HeaderMap> for Metadata {
    fn from(m: HeaderMap) -> Self {
        Self(m)
    }
}
