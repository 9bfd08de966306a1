//! Access log
//!
//! One plain-text line per request, appended to its own file:
//!
//! ```text
//! 2026-01-02T03:04:05.678+00:00 10.0.0.7 GET /api/v1/status/hello HTTP/1.1 200 61 1.042ms
//! ```
//!
//! Unknown client address is written as `-`, unknown body size as `-1`.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode, Version},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Local, SecondsFormat};
use http_body::Body as _;
use parking_lot::Mutex;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// One request, as written to the access log
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub timestamp: DateTime<Local>,
    pub client_ip: Option<IpAddr>,
    pub method: Method,
    pub path: String,
    pub protocol: Version,
    pub status: StatusCode,
    pub body_size: Option<u64>,
    pub latency: Duration,
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = self
            .client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        let size = self
            .body_size
            .map(|size| size.to_string())
            .unwrap_or_else(|| "-1".to_string());

        write!(
            f,
            "{} {} {} {} {:?} {} {} {:?}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false),
            ip,
            self.method,
            self.path,
            self.protocol,
            self.status.as_u16(),
            size,
            self.latency
        )
    }
}

/// Append-only sink for [`AccessRecord`] lines
pub struct AccessLog {
    sink: Mutex<Box<dyn Write + Send>>,
    echo: bool,
}

impl AccessLog {
    /// Open `path` for appending; `echo` also prints each line to stdout
    pub fn open(path: &Path, echo: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o640)
            .open(path)?;
        Ok(Self::new(file, echo))
    }

    pub fn new(sink: impl Write + Send + 'static, echo: bool) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            echo,
        }
    }

    pub fn record(&self, record: &AccessRecord) {
        let line = format!("{}\n", record);
        if self.echo {
            print!("{}", line);
        }

        let mut sink = self.sink.lock();
        if let Err(e) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
            warn!("Unable to write access log: {}", e);
        }
    }
}

/// Access log middleware
pub async fn log_access(State(log): State<Arc<AccessLog>>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let protocol = req.version();

    let response = next.run(req).await;

    log.record(&AccessRecord {
        timestamp: Local::now(),
        client_ip,
        method,
        path,
        protocol,
        status: response.status(),
        body_size: response.body().size_hint().exact(),
        latency: started.elapsed(),
    });

    response
}
