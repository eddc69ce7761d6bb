//! Paperflow server entry point.
//!
//! Boot order: configuration, database + migrations, application state,
//! retry worker, HTTP listener. Exit codes distinguish configuration
//! errors (1) from database errors (2) and runtime failures (3).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperflow_core::submission::worker;
use paperflow_server::{app_state::AppState, config::Config, routes};

#[derive(Parser, Debug)]
#[command(name = "paperflow-server")]
#[command(about = "Middleware bridging scanned examination papers with a Moodle LMS")]
struct Args {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            return ExitCode::from(1);
        }
    };
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Err(err) = config.ensure_directories() {
        error!(error = %err, "failed to create upload directory");
        return ExitCode::from(1);
    }
    let config = Arc::new(config);
    info!(
        upload_dir = %config.upload_dir.display(),
        moodle = %config.moodle_base_url,
        extraction = !config.hf_space_url.is_empty(),
        "configuration loaded"
    );

    let pool = match paperflow_core::database::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "database initialisation failed");
            return ExitCode::from(2);
        }
    };

    let state = match AppState::new(config.clone(), pool) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "application state construction failed");
            return ExitCode::from(1);
        }
    };

    // Single background scanner; interactive submissions coexist with it
    // through the orchestrator's conditional-update entry.
    worker::spawn(state.orchestrator.clone());
    info!("submission retry worker started");

    let app = routes::create_router(state);
    let addr: SocketAddr = match format!("{}:{}", config.server_host, config.server_port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "invalid listen address");
            return ExitCode::from(1);
        }
    };

    info!(%addr, "listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to bind listener");
            return ExitCode::from(3);
        }
    };

    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "server terminated");
        return ExitCode::from(3);
    }
    ExitCode::SUCCESS
}
