use anyhow::Result;
use chatline_core::{AppConfig, AppState, RoomRegistry};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatline=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;
    ensure_data_dirs(&config);

    let db = chatline_db::create_pool(&config.database.url, config.database.max_connections).await?;
    chatline_db::run_migrations(&db).await?;

    // Warm the room registry so the first dispatch after boot does not pay
    // a per-chat seeding read.
    let memberships = chatline_db::chats::all_memberships(&db).await?;
    let rooms = RoomRegistry::from_memberships(memberships);

    let state = AppState::new(
        db,
        AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            token_expiry_secs: config.auth.token_expiry_secs,
            node_id: config.server.node_id,
        },
        rooms,
    );

    let router = chatline_api::build_router()
        .merge(chatline_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind_address = %config.server.bind_address,
        node_id = config.server.node_id,
        "chatline server listening"
    );

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down (ctrl-c)...");
    };

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Ensure the sqlite database directory exists before the pool opens it.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
    }
}
