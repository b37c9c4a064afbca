use anyhow::{Context, Result};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use beamdrop::{AppState, build_app, config::AppConfig, database};
use std::{io::ErrorKind, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        "Starting beamdrop in {} (api auth: {}, password: {})",
        cfg.dir.display(),
        cfg.api_auth,
        cfg.password.is_some()
    );

    // --- Handle migration mode ---
    if migrate {
        tokio::fs::create_dir_all(cfg.data_dir()).await?;
        let db = database::connect(database::connect_options(&cfg)?).await?;
        database::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let state = AppState::initialize(cfg).await?;
    let cfg = state.config.clone();
    state.limiter.clone().spawn_sweeper(Duration::from_secs(60));
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                sessions.purge_expired();
            }
        });
    }

    // --- Build router ---
    let app = build_app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    let Some((cert, key)) = cfg.tls_files()? else {
        tracing::info!("Server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        return Ok(());
    };

    let tls = RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| format!("loading TLS certificate {}", cert.display()))?;
    tracing::info!("Server listening on https://{}", listener.local_addr()?);

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(30)));
    });
    axum_server::from_tcp_rustls(listener.into_std()?, tls)
        .handle(handle)
        .serve(service)
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
