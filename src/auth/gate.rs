//! Authentication gate
//!
//! Three request-entry policies:
//!
//! - **SessionOnly**: a live session is required.
//! - **Universal**: a live session, else per-request HTTP Basic credentials.
//! - **None**: pass through.
//!
//! Session state is always consulted first, so a caller presenting both a
//! session cookie and an `Authorization` header acts as the session identity
//! and the header is never parsed. Basic success does not create a session.
//!
//! The decision itself ([`evaluate`]) is a plain async function of the
//! session lookup result and the `Authorization` header, so it can be tested
//! without a server. [`enforce`] is the axum middleware wrapping it.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::credentials::CredentialVerifier;
use super::session::SessionStore;
use super::Identity;
use crate::envelope::Envelope;

/// Cookie carrying the signed session token
pub const SESSION_COOKIE: &str = "session";

/// Gating policy for a route group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    SessionOnly,
    Universal,
    None,
}

/// Username/password pair from a Basic header. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Basic header parse failures, one per step
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BasicAuthError {
    #[error("authorization header is missing")]
    Missing,

    #[error("authorization header is not valid utf-8")]
    HeaderEncoding,

    #[error("authentication type is different from basic")]
    NotBasic,

    #[error("authentication credentials are missing")]
    MissingPayload,

    #[error("{0}")]
    Base64(String),

    #[error("authentication pair is not valid utf-8")]
    Utf8,

    #[error("wrong authentication pair")]
    Pair,

    #[error("authentication username is null")]
    EmptyUsername,

    #[error("authentication password is null")]
    EmptyPassword,
}

/// Why a request was turned away
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("wrong session authentication")]
    NoSession,

    #[error("parse auth header error: {0}")]
    MalformedBasic(#[from] BasicAuthError),

    #[error("wrong basic authorization")]
    WrongCredentials,
}

/// Gate outcome
#[derive(Debug, PartialEq, Eq)]
pub enum AuthResult {
    SessionIdentity(Identity),
    BasicIdentity(Identity),
    /// Policy `None` without a session
    Anonymous,
    Rejected(AuthRejection),
}

impl AuthResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, AuthResult::Rejected(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthResult::SessionIdentity(id) | AuthResult::BasicIdentity(id) => Some(id),
            _ => None,
        }
    }
}

/// Parse `Authorization: Basic <base64(user:pass)>` from the raw header bytes
pub fn parse_basic(header: Option<&[u8]>) -> Result<Credential, BasicAuthError> {
    let header = header
        .map(std::str::from_utf8)
        .transpose()
        .map_err(|_| BasicAuthError::HeaderEncoding)?;
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let header = header.ok_or(BasicAuthError::Missing)?;

    let (scheme, payload) = header.split_once(' ').unwrap_or((header, ""));
    if !scheme.trim().eq_ignore_ascii_case("basic") {
        return Err(BasicAuthError::NotBasic);
    }

    let payload = payload.trim();
    if payload.is_empty() {
        return Err(BasicAuthError::MissingPayload);
    }

    let decoded = Zeroizing::new(
        STANDARD
            .decode(payload)
            .map_err(|e| BasicAuthError::Base64(e.to_string()))?,
    );
    let pair = std::str::from_utf8(&decoded).map_err(|_| BasicAuthError::Utf8)?;
    let (username, password) = pair.split_once(':').ok_or(BasicAuthError::Pair)?;

    let username = username.trim();
    let password = password.trim();
    if username.is_empty() {
        return Err(BasicAuthError::EmptyUsername);
    }
    if password.is_empty() {
        return Err(BasicAuthError::EmptyPassword);
    }

    Ok(Credential {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Decide a request under `policy`
///
/// `session` is the identity of a live session, if the caller has one.
/// `authorization` is the raw `Authorization` header value.
pub async fn evaluate(
    policy: Policy,
    session: Option<Identity>,
    authorization: Option<&[u8]>,
    verifier: &dyn CredentialVerifier,
) -> AuthResult {
    match policy {
        Policy::None => session
            .map(AuthResult::SessionIdentity)
            .unwrap_or(AuthResult::Anonymous),
        Policy::SessionOnly => session
            .map(AuthResult::SessionIdentity)
            .unwrap_or(AuthResult::Rejected(AuthRejection::NoSession)),
        Policy::Universal => {
            if let Some(identity) = session {
                return AuthResult::SessionIdentity(identity);
            }

            let credential = match parse_basic(authorization) {
                Ok(credential) => credential,
                Err(e) => return AuthResult::Rejected(e.into()),
            };

            if verifier.verify(&credential.username, &credential.password).await {
                AuthResult::BasicIdentity(Identity::new(&credential.username))
            } else {
                AuthResult::Rejected(AuthRejection::WrongCredentials)
            }
        }
    }
}

/// Gate bound to its collaborators; used as middleware state
#[derive(Clone)]
pub struct AuthGate {
    policy: Policy,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn CredentialVerifier>,
    key: Key,
}

impl AuthGate {
    pub fn new(
        policy: Policy,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn CredentialVerifier>,
        key: Key,
    ) -> Self {
        Self {
            policy,
            sessions,
            verifier,
            key,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Identity behind the signed session cookie, if it is still live
    pub async fn session_identity(&self, headers: &HeaderMap) -> Option<Identity> {
        let jar = SignedCookieJar::from_headers(headers, self.key.clone());
        let token = jar.get(SESSION_COOKIE)?;
        let record = self.sessions.get(token.value()).await?;
        if record.identity.username.is_empty() {
            return None;
        }
        Some(record.identity)
    }

    /// Run the policy against request headers
    pub async fn check(&self, headers: &HeaderMap) -> AuthResult {
        let session = self.session_identity(headers).await;
        let authorization = headers
            .get(header::AUTHORIZATION)
            .map(HeaderValue::as_bytes);
        evaluate(self.policy, session, authorization, self.verifier.as_ref()).await
    }
}

/// Gate middleware
///
/// Rejections end the request with a 401 Envelope; the downstream handler
/// never runs. Accepted identities are placed in request extensions.
pub async fn enforce(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    match gate.check(req.headers()).await {
        AuthResult::Rejected(reason) => {
            debug!(
                "Gate {:?} rejected {} {}: {}",
                gate.policy(),
                req.method(),
                req.uri().path(),
                reason
            );
            Envelope::fail(reason.to_string()).with_status(StatusCode::UNAUTHORIZED)
        }
        result => {
            if let Some(identity) = result.identity() {
                req.extensions_mut().insert(identity.clone());
            }
            next.run(req).await
        }
    }
}

/// Session cookie for a freshly issued token
pub fn session_cookie(token: String, ttl: chrono::Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::seconds(ttl.num_seconds()))
        .build()
}

/// Cookie that removes the session cookie
pub fn cleared_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::ZERO)
        .build()
}
