//! taskgate server

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use taskgate::api::{self, AppState, Stores};
use taskgate::clock::SystemClock;
use taskgate::config::AppConfig;
use taskgate::notifier::{LogNotifier, Notifier, WebhookNotifier};
use taskgate::observability::{self, SecurityEvent};
use taskgate::security_event;
use taskgate::token::TokenIssuer;

/// Task management API server
#[derive(Parser)]
#[command(name = "taskgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Overrides PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::CheckConfig => {
            println!("{config:#?}");
            println!("configuration OK");
            Ok(())
        }
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    observability::init(&config.observability)?;

    let stores = build_stores(&config).await?;
    let notifier = build_notifier(&config)?;
    let tokens = Arc::new(TokenIssuer::new(&config.jwt_secret, config.jwt_expire));

    let state = AppState::new(stores, notifier, tokens, Arc::new(SystemClock))
        .with_otp_policy(config.otp.clone())
        .with_lockout_policy(config.lockout.clone());

    if let Some(seed) = &config.admin {
        let created = state
            .accounts
            .bootstrap_admin(&seed.name, &seed.email, &seed.password)
            .await
            .context("failed to create the initial admin account")?;
        if !created {
            info!(email = %seed.email, "Initial admin already exists");
        }
    }

    let app = api::app(state, &config.http);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    security_event!(
        SecurityEvent::SystemStartup,
        address = %addr,
        version = env!("CARGO_PKG_VERSION"),
        "Server listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    security_event!(SecurityEvent::SystemShutdown, "Server stopped");
    Ok(())
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
            Ok(Stores::memory())
        }
        #[cfg(feature = "postgres")]
        Some(url) => {
            use taskgate::database::{create_pool, DatabaseConfig};
            use taskgate::store::PgStore;

            let db = DatabaseConfig::from_env(url.as_str())?;
            let pool = create_pool(&db).await?;
            let store = Arc::new(PgStore::new(pool, db.query_timeout));
            if db.auto_migrate {
                store.migrate().await?;
            }
            security_event!(
                SecurityEvent::DatabaseConnected,
                max_connections = db.max_connections,
                ssl_mode = ?db.ssl_mode,
                "Database connected"
            );
            Ok(Stores {
                accounts: store.clone(),
                tasks: store,
            })
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => bail!("DATABASE_URL is set but this build does not include the `postgres` feature"),
    }
}

fn build_notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let Some(url) = &config.notifier.url else {
        warn!("NOTIFIER_URL not set; verification codes are only logged");
        return Ok(Arc::new(LogNotifier));
    };
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("NOTIFIER_URL must be an http(s) URL");
    }
    let notifier = WebhookNotifier::new(
        url.clone(),
        config.notifier.token.clone(),
        config.notifier.from.clone(),
        config.notifier.timeout,
    )?;
    Ok(Arc::new(notifier))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
