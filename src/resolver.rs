//! Asset resolution and SPA fallback
//!
//! Anything no explicit route claims ends up here. A concrete asset is
//! served with its modification time. A miss (including a path that tries
//! to escape the asset root, which is deliberately indistinguishable from a
//! miss) falls back by caller content type:
//!
//! - `application/json` callers get `{"error":true,"message":"wrong uri"}`
//! - everyone else gets the root document so client-side routing can run
//!
//! Both fallbacks answer HTTP 200; the API signals this error in-band.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use httpdate::{fmt_http_date, parse_http_date};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::assets::{AssetEntry, AssetStore};
use crate::envelope::Envelope;
use crate::error::StartupError;

/// Logical path of the SPA shell
pub const ROOT_DOCUMENT: &str = "index.html";

/// Outcome of resolving a request path
#[derive(Debug)]
pub enum Resolution {
    StaticAsset(AssetEntry),
    Fallback,
    NotFoundJson,
}

/// Maps request paths onto an [`AssetStore`]
pub struct AssetResolver {
    store: Arc<dyn AssetStore>,
}

impl AssetResolver {
    /// Fails when the store has no root document
    pub async fn new(store: Arc<dyn AssetStore>) -> Result<Self, StartupError> {
        if store.load(ROOT_DOCUMENT).await.is_none() {
            return Err(StartupError::RootDocument(format!(
                "{} in {}",
                ROOT_DOCUMENT,
                store.describe()
            )));
        }
        Ok(Self { store })
    }

    pub async fn resolve(&self, request_path: &str, content_type: Option<&str>) -> Resolution {
        if let Some(entry) = self.store.load(request_path).await {
            return Resolution::StaticAsset(entry);
        }

        debug!("Path {} not found, content type {:?}", request_path, content_type);
        if wants_json(content_type) {
            Resolution::NotFoundJson
        } else {
            Resolution::Fallback
        }
    }

    /// The SPA shell at 200
    pub async fn root_document(&self) -> Response {
        match self.store.load(ROOT_DOCUMENT).await {
            Some(entry) => Html(entry.content).into_response(),
            None => Envelope::fail("root document unavailable")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Render a resolution; `request_headers` feed conditional GET
    pub async fn respond(&self, resolution: Resolution, request_headers: &HeaderMap) -> Response {
        match resolution {
            Resolution::StaticAsset(entry) => serve_asset(entry, request_headers),
            Resolution::Fallback => self.root_document().await,
            Resolution::NotFoundJson => Envelope::fail("wrong uri").into_response(),
        }
    }
}

/// `true` when the declared media type is `application/json`
pub fn wants_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn serve_asset(entry: AssetEntry, request_headers: &HeaderMap) -> Response {
    let mime = mime_guess::from_path(&entry.logical_path).first_or_octet_stream();
    let modified = entry.mod_time.map(truncate_to_secs);

    if let (Some(modified), Some(since)) = (
        modified,
        request_headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_http_date(v).ok()),
    ) {
        if modified <= since {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    let mut response = Response::new(Body::from(entry.content));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.essence_str()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified)) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    response
}

/// HTTP dates carry whole seconds
fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => UNIX_EPOCH + Duration::from_secs(since.as_secs()),
        Err(_) => time,
    }
}

/// Catch-all handler
pub async fn fallback(State(resolver): State<Arc<AssetResolver>>, req: Request) -> Response {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let resolution = resolver.resolve(req.uri().path(), content_type).await;
    resolver.respond(resolution, req.headers()).await
}

/// `GET /`
pub async fn index(State(resolver): State<Arc<AssetResolver>>) -> Response {
    resolver.root_document().await
}
