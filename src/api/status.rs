//! Status endpoints

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use nix::sys::statvfs::statvfs;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

use super::ResourceController;
use crate::auth::Identity;
use crate::envelope::Envelope;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct Hello {
    pub identity: String,
    pub version: &'static str,
}

/// Filesystem totals in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
    pub available: u64,
}

impl DiskUsage {
    pub fn of(path: &Path) -> nix::Result<Self> {
        let stat = statvfs(path)?;
        let fragment = stat.fragment_size() as u64;
        Ok(Self {
            total: stat.blocks() as u64 * fragment,
            free: stat.blocks_free() as u64 * fragment,
            available: stat.blocks_available() as u64 * fragment,
        })
    }
}

/// `/status/hello` and `/status/disk`
pub struct StatusController;

impl ResourceController for StatusController {
    fn name(&self) -> &str {
        "status"
    }

    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/status/hello", get(hello))
            .route("/status/disk", get(disk))
    }
}

async fn hello(Extension(identity): Extension<Identity>) -> Envelope {
    Envelope::ok("hello").with_result(Hello {
        identity: identity.username,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn disk(State(state): State<AppState>) -> Response {
    match DiskUsage::of(&state.config.store_dir) {
        Ok(usage) => Envelope::ok("disk usage").with_result(usage).into_response(),
        Err(e) => {
            warn!("statvfs {}: {}", state.config.store_dir.display(), e);
            Envelope::fail(format!("disk usage error: {}", e)).into_response()
        }
    }
}
