use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use muqaddas_node::{config::AppConfig, routes, state::AppState, store::Store, vip};

#[derive(Debug, Parser)]
#[command(name = "muqaddas-node", version, about = "Muqaddas Network API server")]
struct Cli {
    /// Path to the TOML config file; a missing file means defaults.
    #[arg(long, default_value = "muqaddas.toml")]
    config: PathBuf,
    /// Listen address, overrides config and MUQADDAS_BIND.
    #[arg(long)]
    bind: Option<String>,
    /// sled database directory.
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // init tracing from env MUQADDAS_LOG or RUST_LOG
    let filter = std::env::var("MUQADDAS_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let mut settings = AppConfig::load_from(&cli.config)?.resolved()?;
    if let Some(bind) = cli.bind {
        settings.bind = bind;
    }
    if let Some(path) = cli.db_path {
        settings.db_path = path;
    }

    let admin_mask = match &settings.admin_token {
        Some(t) => format!("set (len={})", t.len()),
        None => "unset".to_string(),
    };
    info!(admin_token = %admin_mask, db = %settings.db_path, "Muqaddas node starting up");

    let store = Store::open(&settings.db_path).with_context(|| format!("opening {}", settings.db_path))?;
    let bind = settings.bind.clone();
    let state = AppState::new(store.clone(), settings)?;

    tokio::spawn(vip::run_sweeper(state.clone()));

    let app = routes::create_router(state);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(listen = %bind, err = ?e, "failed to bind to address");
            std::process::exit(1);
        }
    };
    info!(listen = %bind, "Muqaddas node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            let _ = store.flush();
        })
        .await?;
    Ok(())
}
