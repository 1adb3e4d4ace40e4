//! Anti-indexing token gate
//!
//! Stream URLs carry a token that is only valid for the current UTC day and
//! cannot be computed without a salt that never leaves the process. Links
//! scraped by crawlers stop working the next day.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{NaiveDate, Utc};
use rand::RngCore;
use sha2::{Digest, Sha512};

/// Salt size in bytes
pub const SALT_LEN: usize = 32;

type DeniedHandler = Arc<dyn Fn() -> Response + Send + Sync>;

/// Issues and checks the daily access token
#[derive(Clone)]
pub struct AntiIndexer {
    salt: [u8; SALT_LEN],
    denied: Option<DeniedHandler>,
}

impl AntiIndexer {
    /// Create a gate with a fresh random salt
    pub fn new() -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(salt)
    }

    /// Create a gate with a fixed salt
    pub fn with_salt(salt: [u8; SALT_LEN]) -> Self {
        Self { salt, denied: None }
    }

    /// Replace the default `401 Invalid token` response
    pub fn with_denied<F>(mut self, handler: F) -> Self
    where
        F: Fn() -> Response + Send + Sync + 'static,
    {
        self.denied = Some(Arc::new(handler));
        self
    }

    /// Token for the current UTC day
    pub fn token(&self) -> String {
        self.token_for(Utc::now().date_naive())
    }

    /// Token for a given day
    pub fn token_for(&self, date: NaiveDate) -> String {
        let mut hasher = Sha512::new();
        hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
        hasher.update(self.salt);
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Whether the presented token matches today's
    pub fn verify(&self, token: Option<&str>) -> bool {
        token.map_or(false, |t| t == self.token())
    }

    /// Wrap every route of `router` with the token check
    pub fn protect<S>(self: &Arc<Self>, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(Arc::clone(self), token_gate))
    }

    fn reject(&self) -> Response {
        match &self.denied {
            Some(handler) => handler(),
            None => (StatusCode::UNAUTHORIZED, "Invalid token").into_response(),
        }
    }
}

impl Default for AntiIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AntiIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiIndexer")
            .field("custom_denied", &self.denied.is_some())
            .finish_non_exhaustive()
    }
}

/// First `token` parameter; later duplicates are ignored
fn first_token(pairs: &[(String, String)]) -> Option<&str> {
    pairs
        .iter()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.as_str())
}

async fn token_gate(
    State(gate): State<Arc<AntiIndexer>>,
    Query(pairs): Query<Vec<(String, String)>>,
    request: Request,
    next: Next,
) -> Response {
    if !gate.verify(first_token(&pairs)) {
        tracing::debug!(path = %request.uri().path(), "Request rejected: invalid token");
        return gate.reject();
    }
    next.run(request).await
}
