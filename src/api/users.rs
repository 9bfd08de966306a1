//! User API
//!
//! # Endpoints
//!
//! - `POST /api/v2/user/login` - verify credentials, issue a session cookie
//! - `POST /api/v2/user/logout` - clear the session
//! - `POST /api/v2/user/list` - list usernames (session only)
//! - `POST /api/v2/user/create` - add a user (session only)
//! - `POST /api/v2/user/update` - replace a password (session only)
//! - `POST /api/v2/user/delete` - remove a user other than the caller (session only)
//!
//! Store failures are reported in-band: HTTP 200 with `error: true`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::json_body;
use crate::auth::credentials::{CredentialVerifier, PasswordStore, StoreError};
use crate::auth::gate::{cleared_session_cookie, session_cookie, SESSION_COOKIE};
use crate::auth::session::generate_token;
use crate::auth::Identity;
use crate::envelope::Envelope;
use crate::server::AppState;

/// Username/password body of login, create and update
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct UserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    pub username: String,
}

/// Session-only management routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v2/user/list", post(list))
        .route("/api/v2/user/create", post(create))
        .route("/api/v2/user/update", post(update))
        .route("/api/v2/user/delete", post(delete))
}

pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let username = request.username.trim();

    if !state.users.verify(username, &request.password).await {
        info!("Failed login for {:?}", username);
        return Envelope::fail("wrong login or password").with_status(StatusCode::UNAUTHORIZED);
    }

    let token = generate_token();
    let ttl = state.config.session_ttl();
    state.sessions.set(&token, Identity::new(username), ttl).await;
    info!("User {} logged in", username);

    let envelope = Envelope::ok("login successful").with_result(UserEntry {
        username: username.to_string(),
    });
    (jar.add(session_cookie(token, ttl)), envelope).into_response()
}

pub async fn logout(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.clear(cookie.value()).await;
    }
    (jar.remove(cleared_session_cookie()), Envelope::ok("logout successful")).into_response()
}

pub async fn list(State(state): State<AppState>) -> Response {
    match with_store(&state.users, |store| store.list()).await {
        Ok(names) => {
            let entries: Vec<UserEntry> = names
                .into_iter()
                .map(|username| UserEntry { username })
                .collect();
            Envelope::ok("user list").with_result(entries).into_response()
        }
        Err(e) => store_failure(e),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let username = request.username.trim().to_string();
    let password = Zeroizing::new(request.password.clone());

    let target = username.clone();
    match with_store(&state.users, move |store| store.create(&target, &password)).await {
        Ok(()) => {
            info!("User {} created by {}", username, caller.username);
            Envelope::ok("user created").into_response()
        }
        Err(e) => store_failure(e),
    }
}

pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let username = request.username.trim().to_string();
    let password = Zeroizing::new(request.password.clone());

    let target = username.clone();
    match with_store(&state.users, move |store| store.update(&target, &password)).await {
        Ok(()) => {
            info!("Password of {} updated by {}", username, caller.username);
            Envelope::ok("user updated").into_response()
        }
        Err(e) => store_failure(e),
    }
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let username = request.username.trim().to_string();

    if username == caller.username {
        return Envelope::fail("unable delete own user").into_response();
    }

    let target = username.clone();
    match with_store(&state.users, move |store| store.delete(&target)).await {
        Ok(()) => {
            info!("User {} deleted by {}", username, caller.username);
            Envelope::ok("user deleted").into_response()
        }
        Err(e) => store_failure(e),
    }
}

/// Run a blocking store operation off the async workers
async fn with_store<T, F>(store: &PasswordStore, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&PasswordStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

fn store_failure(e: StoreError) -> Response {
    match &e {
        StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::Hash(_) => {
            warn!("User store error: {}", e)
        }
        _ => {}
    }
    Envelope::fail(e.to_string()).into_response()
}
