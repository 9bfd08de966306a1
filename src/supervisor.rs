//! Process supervision
//!
//! Takes the process from "started by root" to "serving as an unprivileged
//! user", one commit point at a time:
//!
//! 1. fork into the background (unless foreground)
//! 2. resolve the unprivileged user
//! 3. create runtime directories owned by that user
//! 4. write the PID file
//! 5. drop privileges and verify the drop
//! 6. route logging to the message log
//! 7. detach standard streams (unless foreground)
//! 8. turn SIGINT/SIGTERM into a graceful drain
//!
//! Steps 1-7 run in [`bootstrap`] before the async runtime exists, since
//! forking a multi-threaded process is unsound. Step 8 is
//! [`shutdown_signal`], awaited by the server.
//!
//! The PID file is not locked: two supervisors pointed at the same path
//! will overwrite each other, so single-instance must be ensured outside.

use nix::unistd::{self, ForkResult, Gid, Uid, User};
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

use crate::config::ServerConfig;
use crate::error::{Result, StartupError};

/// Mode of directories created during bootstrap
const RUNTIME_DIR_MODE: u32 = 0o750;

/// Everything that must outlive the server
#[derive(Debug)]
pub struct Supervision {
    pub user: User,
    pub pid_file: PidFile,
}

/// Run steps 1-7. On success the caller is detached (unless `foreground`),
/// unprivileged, and logging to the message log.
pub fn bootstrap(config: &ServerConfig, foreground: bool) -> Result<Supervision> {
    if !foreground {
        daemonize()?;
    }

    let user = resolve_user(&config.user)?;

    for (what, dir) in runtime_dirs(config) {
        ensure_dir(what, &dir, &user)?;
    }
    verify_store_dir(&config.store_dir)?;

    let pid_file = PidFile::create(&config.pid_path)?;

    drop_privileges(&user)?;

    install_logging(&config.message_log_path, config.debug)?;
    info!(
        "Started pid {} as {} (uid {}, gid {})",
        std::process::id(),
        user.name,
        user.uid,
        user.gid
    );

    if !foreground {
        detach_stdio()?;
    }

    Ok(Supervision { user, pid_file })
}

/// Fork; the parent exits 0, the child leads a new session
pub fn daemonize() -> Result<()> {
    // SAFETY: called from main before any runtime or thread is spawned
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(StartupError::Fork(e)),
    }

    unistd::setsid().map_err(StartupError::Fork)?;
    Ok(())
}

pub fn resolve_user(name: &str) -> Result<User> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(StartupError::UnknownUser(name.to_string())),
        Err(source) => Err(StartupError::UserLookup {
            user: name.to_string(),
            source,
        }),
    }
}

/// Directories that must exist before the PID file and logs are written
pub fn runtime_dirs(config: &ServerConfig) -> Vec<(&'static str, PathBuf)> {
    let parent = |path: &Path| {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };

    vec![
        ("pid", parent(&config.pid_path)),
        ("message log", parent(&config.message_log_path)),
        ("access log", parent(&config.access_log_path)),
        ("store", config.store_dir.clone()),
    ]
}

/// Create `dir` (if absent) and hand it to `user`
pub fn ensure_dir(what: &'static str, dir: &Path, user: &User) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(RUNTIME_DIR_MODE)
        .create(dir)
        .map_err(|source| StartupError::CreateDir {
            what,
            path: dir.to_path_buf(),
            source,
        })?;

    unistd::chown(dir, Some(user.uid), Some(user.gid)).map_err(|source| StartupError::Chown {
        what,
        path: dir.to_path_buf(),
        source,
    })?;

    debug!("Prepared {} dir {}", what, dir.display());
    Ok(())
}

pub fn verify_store_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(StartupError::StoreDirMissing(dir.to_path_buf()))
    }
}

/// PID file; removed when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current PID via a temporary file and rename
    pub fn create(path: &Path) -> Result<Self> {
        let err = |source| StartupError::PidFile {
            path: path.to_path_buf(),
            source,
        };

        let tmp = path.with_extension("pid.tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&tmp)
            .map_err(err)?;
        writeln!(file, "{}", std::process::id()).map_err(err)?;
        file.sync_all().map_err(err)?;
        std::fs::rename(&tmp, path).map_err(err)?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed pid file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Unable to remove pid file {}: {}", self.path.display(), e),
        }
    }
}

/// Switch to `user`, then check the kernel agrees. Root targets are left alone.
pub fn drop_privileges(user: &User) -> Result<()> {
    if user.uid.is_root() {
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    unistd::setgroups(&[user.gid]).map_err(StartupError::DropPrivileges)?;
    unistd::setgid(user.gid).map_err(StartupError::DropPrivileges)?;
    unistd::setuid(user.uid).map_err(StartupError::DropPrivileges)?;

    verify_effective(user.uid, Uid::effective())?;
    if Gid::effective() != user.gid {
        warn!("Effective gid is {}, expected {}", Gid::effective(), user.gid);
    }
    Ok(())
}

fn verify_effective(expected: Uid, actual: Uid) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StartupError::PrivilegesRetained {
            expected: expected.as_raw(),
            actual: actual.as_raw(),
        })
    }
}

/// Install the global subscriber writing to `path` (append)
///
/// `RUST_LOG` wins when set; otherwise `debug` in debug mode, `info` otherwise.
/// Debug mode also copies every line to stderr.
pub fn install_logging(path: &Path, debug: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o640)
        .open(path)
        .map_err(|source| StartupError::LogFile {
            path: path.to_path_buf(),
            source,
        })?;
    let file = Arc::new(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    let installed = if debug {
        builder.with_writer(file.and(io::stderr)).try_init()
    } else {
        builder.with_writer(file).try_init()
    };
    installed.map_err(|e| StartupError::Logging(e.to_string()))
}

/// Point stdin/stdout/stderr at the null device
pub fn detach_stdio() -> Result<()> {
    let null = File::options()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(StartupError::RedirectIo)?;

    let targets = [
        io::stdin().as_raw_fd(),
        io::stdout().as_raw_fd(),
        io::stderr().as_raw_fd(),
    ];
    for fd in targets {
        unistd::dup2(null.as_raw_fd(), fd)
            .map_err(|e| StartupError::RedirectIo(io::Error::from(e)))?;
    }
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then drain the listener behind `handle`
///
/// In-flight requests finish without a deadline.
pub async fn shutdown_signal(handle: axum_server::Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, draining"),
        _ = terminate => info!("Received SIGTERM, draining"),
    }

    handle.graceful_shutdown(None);
}
