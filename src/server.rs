//! HTTPS server
//!
//! Composes the route groups behind their gates and runs the TLS listener.
//!
//! | Path | Gate |
//! |---|---|
//! | `GET /`, `POST /api/v2/user/{login,logout}` | None |
//! | `POST /api/v2/user/{list,create,update,delete}` | SessionOnly |
//! | `/api/v1/...` (every [`ResourceController`]) | Universal |
//! | anything else, or a known path with the wrong method | asset resolver fallback |
//!
//! Layers, innermost first: panic recovery, audit (debug only), access log,
//! request tracing.

use axum::{
    extract::FromRef,
    http::StatusCode,
    middleware::{self, from_fn_with_state},
    response::Response,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::Key;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use sha2::{Digest, Sha512};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::access_log::{log_access, AccessLog};
use crate::api::{users, ResourceController, StatusController};
use crate::assets::{AssetStore, BundledAssets, LiveAssets, PublicBundle};
use crate::audit::audit;
use crate::auth::{enforce, AuthGate, MemorySessionStore, PasswordStore, Policy, SessionStore};
use crate::config::ServerConfig;
use crate::envelope::Envelope;
use crate::error::{Result, StartupError};
use crate::resolver::{self, AssetResolver};

/// How often expired sessions are swept
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub users: PasswordStore,
    pub sessions: Arc<dyn SessionStore>,
    pub resolver: Arc<AssetResolver>,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl FromRef<AppState> for Arc<AssetResolver> {
    fn from_ref(state: &AppState) -> Self {
        state.resolver.clone()
    }
}

/// Cookie signing key: stretched from the configured secret, random otherwise
pub fn cookie_key(secret: Option<&str>) -> Key {
    match secret {
        Some(secret) if !secret.is_empty() => Key::from(&Sha512::digest(secret.as_bytes())[..]),
        _ => {
            info!("No session secret configured, sessions will not survive a restart");
            Key::generate()
        }
    }
}

/// The front door
pub struct Server {
    state: AppState,
    sessions: Arc<MemorySessionStore>,
    access_log: Arc<AccessLog>,
    controllers: Vec<Box<dyn ResourceController>>,
}

impl Server {
    /// Open the password store, asset store and access log named by `config`
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let users = PasswordStore::open(&config.password_path)?;

        let assets: Arc<dyn AssetStore> = if config.devel {
            let root = config.public_dir();
            let live = LiveAssets::new(&root).map_err(|e| {
                StartupError::RootDocument(format!("{}: {}", root.display(), e))
            })?;
            Arc::new(live)
        } else {
            Arc::new(BundledAssets::from_embedded::<PublicBundle>())
        };

        let access_log = AccessLog::open(&config.access_log_path, config.debug).map_err(
            |source| StartupError::LogFile {
                path: config.access_log_path.clone(),
                source,
            },
        )?;

        Self::from_parts(config, users, assets, access_log).await
    }

    /// Assemble from already-open collaborators
    pub async fn from_parts(
        config: ServerConfig,
        users: PasswordStore,
        assets: Arc<dyn AssetStore>,
        access_log: AccessLog,
    ) -> Result<Self> {
        info!("Serving assets from {}", assets.describe());
        let resolver = Arc::new(AssetResolver::new(assets).await?);
        let sessions = Arc::new(MemorySessionStore::new());
        let cookie_key = cookie_key(config.session_secret.as_deref());

        let state = AppState {
            config: Arc::new(config),
            users,
            sessions: sessions.clone(),
            resolver,
            cookie_key,
        };

        Ok(Self {
            state,
            sessions,
            access_log: Arc::new(access_log),
            controllers: vec![Box::new(StatusController)],
        })
    }

    /// Mount an additional `/api/v1` collaborator
    pub fn with_controller(mut self, controller: impl ResourceController + 'static) -> Self {
        self.controllers.push(Box::new(controller));
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn gate(&self, policy: Policy) -> AuthGate {
        AuthGate::new(
            policy,
            self.state.sessions.clone(),
            Arc::new(self.state.users.clone()),
            self.state.cookie_key.clone(),
        )
    }

    /// Build the router with all routes and middleware
    pub fn router(&self) -> Router {
        let open = Router::new()
            .route("/", get(resolver::index))
            .route("/api/v2/user/login", post(users::login))
            .route("/api/v2/user/logout", post(users::logout))
            .route_layer(from_fn_with_state(self.gate(Policy::None), enforce));

        let session_only =
            users::routes().route_layer(from_fn_with_state(self.gate(Policy::SessionOnly), enforce));

        let mut universal = Router::new();
        for controller in &self.controllers {
            debug!("Mounting controller {} under /api/v1", controller.name());
            universal = universal.merge(controller.routes());
        }
        let universal =
            universal.route_layer(from_fn_with_state(self.gate(Policy::Universal), enforce));

        let mut router = Router::new()
            .merge(open)
            .merge(session_only)
            .nest("/api/v1", universal)
            .fallback(resolver::fallback)
            .method_not_allowed_fallback(resolver::fallback)
            .with_state(self.state.clone())
            .layer(CatchPanicLayer::custom(panic_response));

        if self.state.config.debug {
            router = router.layer(middleware::from_fn(audit));
        }

        router
            .layer(from_fn_with_state(self.access_log.clone(), log_access))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until SIGINT/SIGTERM, then drain
    pub async fn run(self) -> Result<()> {
        let config = self.state.config.clone();
        let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
            .await
            .map_err(|source| StartupError::Tls {
                cert: config.cert_path.clone(),
                key: config.key_path.clone(),
                source,
            })?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let app = self.router();
        let handle = Handle::new();

        tokio::spawn(crate::supervisor::shutdown_signal(handle.clone()));
        tokio::spawn(prune_sessions(self.sessions.clone()));

        let listening = handle.clone();
        tokio::spawn(async move {
            if let Some(addr) = listening.listening().await {
                info!(
                    "Listening on https://{} (debug: {}, devel: {})",
                    addr, config.debug, config.devel
                );
            }
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| {
                error!("Listener on {} failed: {}", addr, e);
                StartupError::Listener(e)
            })?;

        info!("Server drained");
        Ok(())
    }
}

async fn prune_sessions(sessions: Arc<MemorySessionStore>) {
    let mut interval = tokio::time::interval(SESSION_PRUNE_INTERVAL);
    loop {
        interval.tick().await;
        let pruned = sessions.prune_expired();
        if pruned > 0 {
            debug!("Pruned {} expired sessions", pruned);
        }
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);
    Envelope::fail("internal server error").with_status(StatusCode::INTERNAL_SERVER_ERROR)
}
