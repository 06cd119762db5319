//! The token-fetcher credential (component **F** in the design doc):
//! a generic, caching, single-flight async token fetcher shared by the
//! OAuth2, external-account, and JWT-file credentials in [`crate::token::oauth2`],
//! [`crate::token::external_account`], and [`crate::token::jwt_file`].
//!
//! # Idiomatic-Rust restatement of the C++ state machine
//!
//! The original `TokenFetcherCredentials` (see
//! `examples/original_source/src/core/credentials/call/token_fetcher/token_fetcher_credentials.h`)
//! models `GetRequestMetadata` as a hand-rolled `ArenaPromise` that a
//! single-threaded executor polls, with a `QueuedCall` struct carrying a
//! `done` flag and a `Waker` that the fetch completion callback signals.
//! In async Rust, `async fn get_request_metadata` already generates that
//! state machine, so this module coalesces concurrent callers with a
//! [`tokio::sync::broadcast`] channel instead: the first caller to find no
//! token and no in-flight fetch creates one and spawns it; every caller —
//! including the one that created it — subscribes to the fetch's
//! broadcast channel and awaits exactly one message, which is written
//! before it is sent (preserving the "result written before done" publish
//! order from the design doc's invariants).
//!
//! Orphan handling uses the same idea as the design doc's "upgrade a weak
//! ref only to invoke completion": the spawned fetch task holds a
//! [`std::sync::Weak`] back to the credential's shared state, never a
//! strong one, so dropping every [`TokenCredential`] handle drops the
//! shared state immediately. [`Inner`]'s `Drop` impl aborts any pending
//! fetch/backoff task and wakes queued callers with
//! [`CredentialError::Cancelled`], matching `FetchState`'s `Shutdown`
//! transition.

pub mod external_account;
pub mod jwt_file;
pub mod oauth2;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::config::TokenFetcherConfig;
use crate::error::CredentialError;
use crate::metadata::Metadata;

/// An opaque bearer credential plus its absolute expiration.
///
/// Stores the value already formatted as it will appear in the
/// `authorization` header (without the leading `Bearer `, which
/// [`Metadata::append_authorization_bearer`] adds), matching the
/// `Token::AddTokenToClientInitialMetadata` contract in the original
/// C++ implementation.
#[derive(Debug, Clone)]
pub struct Token {
    value: String,
    expiration: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expiration,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiration - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// The capability each concrete credential subclass (S) must implement:
/// produce a fresh token given a fetch deadline. Corresponds to
/// `TokenFetcherCredentials::FetchToken` in the design doc, minus the
/// cancellable-handle plumbing — cancellation here is expressed by the
/// caller no longer polling the returned future, which is the idiomatic
/// Rust equivalent of the C++ `CancellableHandle::Cancel()` capability.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, deadline: Duration) -> Result<Token, CredentialError>;

    /// A stable key identifying this source's own configuration, used by
    /// [`crate::compose`] to order composites and to recognize two
    /// independently constructed credentials as interchangeable. Two
    /// sources must agree here whenever `fetch_token` would produce
    /// tokens the caller can't tell apart.
    fn cache_key(&self) -> String;
}

struct BackoffWindow {
    until: tokio::time::Instant,
    error: CredentialError,
}

enum Action {
    Done(String),
    Fail(CredentialError),
    Subscribe(broadcast::Receiver<Result<Token, CredentialError>>),
    Start {
        tx: broadcast::Sender<Result<Token, CredentialError>>,
        rx: broadcast::Receiver<Result<Token, CredentialError>>,
    },
}

struct PendingFetch {
    tx: broadcast::Sender<Result<Token, CredentialError>>,
    handle: JoinHandle<()>,
}

struct State {
    token: Option<Token>,
    fetch: Option<PendingFetch>,
    /// Survives past `fetch`'s lifetime: set the instant a fetch fails so
    /// that the error and gating window outlive the task that discovered
    /// them, and cleared only once a caller observes it has expired.
    backoff_window: Option<BackoffWindow>,
    backoff: Backoff,
}

struct Inner<S> {
    source: S,
    config: TokenFetcherConfig,
    state: Mutex<State>,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pending) = state.fetch.take() {
            pending.handle.abort();
            let _ = pending.tx.send(Err(CredentialError::Cancelled));
        }
        state.backoff_window = None;
    }
}

/// Generic caching, single-flight token fetcher (component **F**).
///
/// Cheaply cloneable: all clones share the same cache, in-flight fetch,
/// and backoff state via an `Arc`.
pub struct TokenCredential<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for TokenCredential<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: TokenSource + 'static> TokenCredential<S> {
    pub fn new(source: S, config: TokenFetcherConfig) -> Self {
        let backoff = Backoff::new(config.backoff);
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(State {
                    token: None,
                    fetch: None,
                    backoff_window: None,
                    backoff,
                }),
                config,
            }),
        }
    }

    /// Delegates to the source's own [`TokenSource::cache_key`]; used by
    /// [`crate::compose`] for `cmp`-based ordering and dedup of
    /// semantically equal credentials.
    pub(crate) fn cache_key(&self) -> String {
        self.inner.source.cache_key()
    }

    /// Implements §4.1's `GetRequestMetadata`: attach a cached token if
    /// one is fresh enough, otherwise join (or start) the single
    /// in-flight fetch and wait for its result.
    pub async fn get_request_metadata(
        &self,
        mut md: Metadata,
    ) -> Result<Metadata, CredentialError> {
        loop {
            let action = {
                let mut state = self.inner.state.lock().unwrap();
                let now = Utc::now();
                if let Some(token) = &state.token {
                    if token.remaining(now) > self.inner.config.refresh_threshold {
                        Action::Done(token.value().to_string())
                    } else {
                        state.token = None;
                        self.next_action(&mut state)
                    }
                } else {
                    self.next_action(&mut state)
                }
            };

            match action {
                Action::Done(val) => {
                    md.append_authorization_bearer(&val);
                    return Ok(md);
                }
                Action::Fail(e) => return Err(e),
                Action::Subscribe(mut rx) => match rx.recv().await {
                    Ok(Ok(token)) => {
                        md.append_authorization_bearer(token.value());
                        return Ok(md);
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(broadcast::error::RecvError::Closed) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                },
                Action::Start { tx, mut rx } => {
                    self.spawn_fetch(tx);
                    match rx.recv().await {
                        Ok(Ok(token)) => {
                            md.append_authorization_bearer(token.value());
                            return Ok(md);
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    fn next_action(&self, state: &mut State) -> Action {
        if let Some(window) = &state.backoff_window {
            if tokio::time::Instant::now() < window.until {
                return Action::Fail(window.error.clone());
            }
            state.backoff_window = None;
        }
        if let Some(pending) = &state.fetch {
            return Action::Subscribe(pending.tx.subscribe());
        }
        let (tx, rx) = broadcast::channel(32);
        Action::Start { tx, rx }
    }

    fn spawn_fetch(&self, tx: broadcast::Sender<Result<Token, CredentialError>>) {
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let deadline = self.inner.config.fetch_deadline;
        let tx_for_task = tx.clone();
        let handle = tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                let _ = tx_for_task.send(Err(CredentialError::Cancelled));
                return;
            };
            debug!("starting token fetch");
            let result = inner.source.fetch_token(deadline).await;
            match result {
                Ok(token) => {
                    if let Some(inner) = weak.upgrade() {
                        let mut state = inner.state.lock().unwrap();
                        state.token = Some(token.clone());
                        state.fetch = None;
                        state.backoff_window = None;
                        state.backoff.reset();
                    }
                    let _ = tx_for_task.send(Ok(token));
                }
                Err(err) => {
                    warn!(error = %err, "token fetch failed, entering backoff");
                    if let Some(inner) = weak.upgrade() {
                        let mut state = inner.state.lock().unwrap();
                        let delay = state.backoff.next_attempt_delay();
                        state.backoff_window = Some(BackoffWindow {
                            until: tokio::time::Instant::now() + delay,
                            error: err.clone(),
                        });
                        state.fetch = None;
                    }
                    let _ = tx_for_task.send(Err(err));
                }
            }
        });

        let mut state = self.inner.state.lock().unwrap();
        state.fetch = Some(PendingFetch { tx, handle });
    }
}
