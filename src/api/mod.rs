//! API collaborators
//!
//! Handlers mounted behind the gate. `users` owns login/logout and the
//! session-only user management group; `status` is the one built-in
//! [`ResourceController`] of the universal `/api/v1` group.

pub mod status;
pub mod users;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::Response,
    Json, Router,
};
use tracing::debug;

use crate::envelope::Envelope;
use crate::server::AppState;

pub use status::StatusController;

/// A CRUD collaborator mounted into the universal `/api/v1` group
///
/// `routes` paths are relative to `/api/v1`; the gate is applied by the server.
pub trait ResourceController: Send + Sync {
    fn name(&self) -> &str;
    fn routes(&self) -> Router<AppState>;
}

/// Unwrap a JSON body, turning a rejection into a 400 Envelope
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            debug!("Rejected request body: {}", rejection.body_text());
            Err(Envelope::fail(format!("bind params error: {}", rejection.body_text()))
                .with_status(StatusCode::BAD_REQUEST))
        }
    }
}
