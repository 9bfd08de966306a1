//! Startup error taxonomy
//!
//! Every failure that must stop the process before (or while) it starts
//! serving traffic. There is no partial-success state: any of these aborts
//! startup with a non-zero exit.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal bootstrap and listener errors
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("fork into background failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("user lookup error: {user}: {source}")]
    UserLookup {
        user: String,
        #[source]
        source: nix::Error,
    },

    #[error("user lookup error: unknown user {0}")]
    UnknownUser(String),

    #[error("unable create {what} dir {}: {source}", path.display())]
    CreateDir {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable chown {what} dir {}: {source}", path.display())]
    Chown {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("store dir not exists: {}", .0.display())]
    StoreDirMissing(PathBuf),

    #[error("unable write pid file {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("set process user id error: {0}")]
    DropPrivileges(#[source] nix::Error),

    #[error("set process user id error: effective uid is {actual}, expected {expected}")]
    PrivilegesRetained { expected: u32, actual: u32 },

    #[error("unable open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable install log subscriber: {0}")]
    Logging(String),

    #[error("unable redirect standard io: {0}")]
    RedirectIo(#[source] std::io::Error),

    #[error("password store error: {0}")]
    PasswordStore(#[from] crate::auth::credentials::StoreError),

    #[error("root document not found at {0}")]
    RootDocument(String),

    #[error("unable load tls certificate {} / key {}: {source}", cert.display(), key.display())]
    Tls {
        cert: PathBuf,
        key: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),
}

pub type Result<T, E = StartupError> = std::result::Result<T, E>;
