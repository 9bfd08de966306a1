//! dbagent
//!
//! TLS front door of a privileged database administration agent.
//!
//! # Features
//!
//! - **Supervision**: fork, PID file, privilege drop, log redirect, graceful drain
//! - **Authentication**: signed-cookie sessions and HTTP Basic, per route group
//! - **Assets**: embedded SPA bundle or live directory, with SPA fallback
//! - **Audit**: request/response JSON logging in debug mode
//!
//! # Architecture
//!
//! ```text
//! client ──► TLS ──► access log ──► audit ──► gate ──► handler
//!                                              │
//!                                              ├── None         /, login, logout
//!                                              ├── SessionOnly  /api/v2/user/*
//!                                              ├── Universal    /api/v1/*
//!                                              └── (no route)   AssetResolver
//! ```

pub mod access_log;
pub mod api;
pub mod assets;
pub mod audit;
pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod resolver;
pub mod server;
pub mod supervisor;

pub use api::ResourceController;
pub use auth::{AuthGate, AuthResult, Identity, Policy};
pub use config::ServerConfig;
pub use envelope::Envelope;
pub use error::StartupError;
pub use resolver::{AssetResolver, Resolution};
pub use server::{AppState, Server};
