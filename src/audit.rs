//! Request/response audit (debug mode only)
//!
//! The request body is read in full (up to [`MAX_AUDIT_BODY`]), logged
//! pretty-printed when it is JSON, and handed downstream as an identical
//! fresh body. The response body is wrapped in [`CaptureBody`], which forwards every frame untouched (size
//! hint and end-of-stream included, so framing headers do not change) and,
//! for JSON responses, mirrors data into a buffer logged once the body
//! completes.
//! Buffers live no longer than the request/response they belong to.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::envelope::Envelope;

/// Largest request body buffered for audit
pub const MAX_AUDIT_BODY: usize = 8 * 1024 * 1024;

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// Best effort: malformed JSON is noted, never fatal
fn log_json(label: &str, body: &[u8]) {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
            debug!("{}:\n{}", label, pretty);
        }
        Err(e) => debug!("{} body is not valid json: {}", label, e),
    }
}

/// Audit middleware
pub async fn audit(req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_AUDIT_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Unable to read request body for audit: {}", e);
            return Envelope::fail("read request body error").with_status(StatusCode::BAD_REQUEST);
        }
    };

    if is_json(&parts.headers) {
        log_json("request", &bytes);
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;

    let capture = is_json(response.headers());
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(CaptureBody::new(body, "response", capture)))
}

/// Body decorator forwarding every frame; with `capture` set, data frames
/// are also mirrored into a buffer logged as JSON at end of stream
pub struct CaptureBody {
    inner: Body,
    captured: Option<Vec<u8>>,
    label: &'static str,
}

impl CaptureBody {
    pub fn new(inner: Body, label: &'static str, capture: bool) -> Self {
        Self {
            inner,
            captured: capture.then(Vec::new),
            label,
        }
    }

    fn finish(&mut self) {
        if let Some(captured) = self.captured.take() {
            log_json(self.label, &captured);
        }
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(captured), Some(data)) = (this.captured.as_mut(), frame.data_ref()) {
                    captured.extend_from_slice(data);
                }
                // hyper stops polling once the body reports its end
                if this.inner.is_end_stream() {
                    this.finish();
                }
            }
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
