//! External account credentials: exchange a subject token (issued by a
//! third-party identity provider) for a GCP access token via RFC 8693
//! token exchange, with optional service-account impersonation.
//!
//! Grounded on `ExternalAccountCredentials` in
//! `examples/original_source/src/core/credentials/call/external/external_account_credentials.h`:
//! `RetrieveSubjectToken` is kept as a pluggable step (here,
//! [`SubjectTokenSource`]) since the original supports URL-sourced and
//! file-sourced subject tokens as distinct subclasses
//! (`url_external_account_credentials.h` is the URL variant retrieved
//! alongside this file); `ExchangeToken` and
//! `MaybeImpersonateServiceAccount` become the two sequential steps in
//! [`ExternalAccountTokenSource::fetch_token`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::fs;
use url::Url;

use super::{Token, TokenSource};
use crate::error::CredentialError;

/// Produces the subject token to be exchanged. Implemented by file-based
/// and URL-based credential sources per RFC 8693 §2.1's `subject_token`.
#[async_trait]
pub trait SubjectTokenSource: Send + Sync {
    async fn subject_token(&self, deadline: Duration) -> Result<String, CredentialError>;
}

/// Reads the subject token verbatim from a local file, as
/// `url_external_account_credentials.h`'s file-sourced sibling does.
pub struct FileSubjectTokenSource {
    path: std::path::PathBuf,
}

impl FileSubjectTokenSource {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SubjectTokenSource for FileSubjectTokenSource {
    async fn subject_token(&self, _deadline: Duration) -> Result<String, CredentialError> {
        let contents = fs::read_to_string(&self.path).await.map_err(|e| {
            CredentialError::Config(format!(
                "failed to read subject token file {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(contents.trim().to_string())
    }
}

/// Fetches the subject token from an external URL, per
/// `url_external_account_credentials.h`.
pub struct UrlSubjectTokenSource {
    http: reqwest::Client,
    url: Url,
    headers: Vec<(String, String)>,
}

impl UrlSubjectTokenSource {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self {
            http,
            url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl SubjectTokenSource for UrlSubjectTokenSource {
    async fn subject_token(&self, deadline: Duration) -> Result<String, CredentialError> {
        let mut request = self.http.get(self.url.clone()).timeout(deadline);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::FetchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CredentialError::FetchFailed(format!(
                "subject token endpoint returned {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| CredentialError::FetchFailed(e.to_string()))
    }
}

#[derive(Deserialize)]
struct StsResponse {
    access_token: String,
    expires_in: i64,
}

/// Optional final step: exchange the STS access token for a
/// short-lived token impersonating a target service account, per
/// `MaybeImpersonateServiceAccount`.
pub struct ImpersonationConfig {
    pub url: Url,
    pub lifetime: Duration,
}

/// Trades a subject token for a GCP access token, optionally followed by
/// service-account impersonation.
pub struct ExternalAccountTokenSource<T> {
    http: reqwest::Client,
    subject_token_source: T,
    subject_token_type: String,
    token_url: Url,
    audience: String,
    scope: String,
    impersonation: Option<ImpersonationConfig>,
}

impl<T: SubjectTokenSource> ExternalAccountTokenSource<T> {
    pub fn new(
        http: reqwest::Client,
        subject_token_source: T,
        subject_token_type: impl Into<String>,
        token_url: Url,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            http,
            subject_token_source,
            subject_token_type: subject_token_type.into(),
            token_url,
            audience: audience.into(),
            scope: "https://www.googleapis.com/auth/cloud-platform".to_string(),
            impersonation: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_impersonation(mut self, impersonation: ImpersonationConfig) -> Self {
        self.impersonation = Some(impersonation);
        self
    }

    async fn exchange_token(
        &self,
        subject_token: &str,
        deadline: Duration,
    ) -> Result<StsResponse, CredentialError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .timeout(deadline)
            .form(&[
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:token-exchange",
                ),
                ("audience", self.audience.as_str()),
                ("scope", self.scope.as_str()),
                ("requested_token_type", "urn:ietf:params:oauth:token-type:access_token"),
                ("subject_token", subject_token),
                ("subject_token_type", self.subject_token_type.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::FetchFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::FetchFailed(e.to_string()))?;
        if status.is_client_error() {
            return Err(CredentialError::Unauthenticated {
                status: status.as_u16(),
                message: body,
            });
        }
        if !status.is_success() {
            return Err(CredentialError::FetchFailed(format!(
                "STS endpoint returned {status}: {body}"
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| CredentialError::FetchFailed(format!("malformed STS response: {e}")))
    }

    async fn impersonate(
        &self,
        config: &ImpersonationConfig,
        access_token: &str,
        deadline: Duration,
    ) -> Result<Token, CredentialError> {
        #[derive(Deserialize)]
        struct ImpersonationResponse {
            #[serde(rename = "accessToken")]
            access_token: String,
            #[serde(rename = "expireTime")]
            expire_time: chrono::DateTime<Utc>,
        }
        let response = self
            .http
            .post(config.url.clone())
            .timeout(deadline)
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "scope": [self.scope.clone()],
                "lifetime": format!("{}s", config.lifetime.as_secs()),
            }))
            .send()
            .await
            .map_err(|e| CredentialError::FetchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CredentialError::FetchFailed(format!(
                "impersonation endpoint returned {}",
                response.status()
            )));
        }
        let parsed: ImpersonationResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::FetchFailed(format!("malformed impersonation response: {e}")))?;
        Ok(Token::new(parsed.access_token, parsed.expire_time))
    }
}

#[async_trait]
impl<T: SubjectTokenSource> TokenSource for ExternalAccountTokenSource<T> {
    async fn fetch_token(&self, deadline: Duration) -> Result<Token, CredentialError> {
        let subject_token = self.subject_token_source.subject_token(deadline).await?;
        let exchanged = self.exchange_token(&subject_token, deadline).await?;
        match &self.impersonation {
            None => Ok(Token::new(
                exchanged.access_token,
                Utc::now() + chrono::Duration::seconds(exchanged.expires_in),
            )),
            Some(config) => {
                self.impersonate(config, &exchanged.access_token, deadline)
                    .await
            }
        }
    }

    /// Identifies the exchange endpoint and audience, not the subject
    /// token source: two external-account credentials pointed at the
    /// same workload identity pool are interchangeable regardless of how
    /// each one retrieves its (equally valid) subject token.
    fn cache_key(&self) -> String {
        format!(
            "external-account:{}:{}:{}:{}",
            self.token_url,
            self.audience,
            self.scope,
            self.impersonation
                .as_ref()
                .map(|c| c.url.as_str())
                .unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedSubjectToken(&'static str);

    #[async_trait]
    impl SubjectTokenSource for FixedSubjectToken {
        async fn subject_token(&self, _deadline: Duration) -> Result<String, CredentialError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn exchanges_subject_token_for_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "exchanged",
                "expires_in": 1800,
            })))
            .mount(&server)
            .await;

        let source = ExternalAccountTokenSource::new(
            reqwest::Client::new(),
            FixedSubjectToken("subject-jwt"),
            "urn:ietf:params:oauth:token-type:jwt",
            Url::parse(&format!("{}/token", server.uri())).unwrap(),
            "//iam.googleapis.com/projects/p/locations/global/workloadIdentityPools/pool",
        );
        let token = source.fetch_token(Duration::from_secs(5)).await.unwrap();
        assert_eq!(token.value(), "exchanged");
    }

    #[tokio::test]
    async fn file_subject_token_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        tokio::fs::write(&path, "  abc123\n").await.unwrap();
        let source = FileSubjectTokenSource::new(path);
        let token = source.subject_token(Duration::from_secs(1)).await.unwrap();
        assert_eq!(token, "abc123");
    }
}
