//! dbagent - Entry Point
//!
//! Loads configuration, optionally writes it back (`--write`), then hands
//! over to the supervisor and finally the TLS server.
//!
//! The supervisor forks, so it runs before the tokio runtime is built.

use anyhow::Result;
use clap::Parser;
use dbagent::{supervisor, Server, ServerConfig};
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dbagent", version, about = "Database administration agent")]
struct Cli {
    /// Stay in the foreground (no fork, keep standard streams)
    #[arg(short = 'f', long)]
    foreground: bool,

    /// TLS listen port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Debug mode: audit request/response bodies, verbose logs
    #[arg(short = 'd', long)]
    debug: bool,

    /// Devel mode: serve the frontend from the lib dir instead of the bundle
    #[arg(short = 'e', long)]
    devel: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(short = 'w', long)]
    write: bool,

    /// Configuration file
    #[arg(short = 'c', long, env = "DBAGENT_CONFIG")]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let path = ServerConfig::resolve_path(cli.config.as_deref());
    let mut config = ServerConfig::load(&path)?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }
    if cli.devel {
        config.devel = true;
    }
    Ok(config)
}

/// Fatal report; stderr is gone once daemonized, the message log is not
fn fatal(e: impl Display) -> ExitCode {
    error!("{}; exit", e);
    eprintln!("{}; exit", e);
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return fatal(format!("{:#}", e)),
    };

    if cli.write {
        return match config.write() {
            Ok(()) => {
                println!("write configuration to {}", config.config_path.display());
                ExitCode::SUCCESS
            }
            Err(e) => fatal(format!("{:#}", e)),
        };
    }

    let supervision = match supervisor::bootstrap(&config, cli.foreground) {
        Ok(supervision) => supervision,
        Err(e) => return fatal(e),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return fatal(format!("unable start runtime: {}", e)),
    };

    info!("dbagent v{}", env!("CARGO_PKG_VERSION"));
    let served = runtime.block_on(async {
        let server = Server::new(config).await?;
        server.run().await
    });

    // removes the PID file
    drop(supervision);

    match served {
        Ok(()) => {
            info!("Exit");
            ExitCode::SUCCESS
        }
        Err(e) => fatal(e),
    }
}
