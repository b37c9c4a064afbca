//! beamdrop: share a directory over HTTP, with a file browser, public share
//! links and an S3-style object API stored under the same root.

pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::{
    config::AppConfig,
    services::{
        file_service::FileService,
        key_service::{KeyService, MasterKey},
        locks::KeyLocks,
        rate_limiter::{RateLimiter, TierLimit},
        session_service::SessionStore,
        share_service::ShareService,
        signature::SignatureVerifier,
        stats::ServerStats,
        storage_service::StorageService,
        trash_service::TrashService,
    },
    utils::atomic,
};
use anyhow::{Context, Result};
use axum::extract::FromRef;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::fs;

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<SqlitePool>,
    pub storage: StorageService,
    pub files: FileService,
    pub trash: TrashService,
    pub keys: KeyService,
    pub verifier: SignatureVerifier,
    pub shares: ShareService,
    pub limiter: Arc<RateLimiter>,
    pub sessions: SessionStore,
    pub stats: Arc<ServerStats>,
}

impl AppState {
    /// Prepare the shared root, open the database and wire the services.
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)
            .await
            .with_context(|| format!("creating shared directory {}", config.dir.display()))?;
        let root = fs::canonicalize(&config.dir)
            .await
            .with_context(|| format!("resolving {}", config.dir.display()))?;
        let config = config.with_dir(&root);

        for dir in [
            config.data_dir(),
            config.tmp_dir(),
            config.trash_dir(),
            config.buckets_dir(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let cleared = atomic::clear_tmp_dir(&config.tmp_dir())
            .await
            .context("clearing stale temp files")?;
        if cleared > 0 {
            tracing::info!("Removed {} stale temp entries", cleared);
        }

        let db = Arc::new(database::connect(database::connect_options(&config)?).await?);
        database::run_migrations(&db).await?;
        let master = MasterKey::load_or_create(&config.master_key_path()).await?;

        Ok(Self::from_parts(config, db, master))
    }

    /// Wire services over an already migrated database.
    pub fn from_parts(config: AppConfig, db: Arc<SqlitePool>, master: MasterKey) -> Self {
        let max_upload = config.max_upload();
        let trash = TrashService::new(db.clone(), &config.dir, config.trash_dir());
        let locks = KeyLocks::new();
        let storage = StorageService::new(
            db.clone(),
            config.buckets_dir(),
            config.tmp_dir(),
            locks.clone(),
            trash.clone(),
            max_upload,
        );
        let files = FileService::new(
            &config.dir,
            config.tmp_dir(),
            locks,
            trash.clone(),
            max_upload,
        );
        let keys = KeyService::new(db.clone(), master);
        let verifier = SignatureVerifier::new(
            keys.clone(),
            chrono::Duration::seconds(config.signature_window_secs),
        );
        let shares = ShareService::new(db.clone(), files.clone());
        let limiter = Arc::new(RateLimiter::new(
            TierLimit::per_minute(config.rate_limit),
            TierLimit::per_minute(config.auth_rate_limit),
            TierLimit::per_minute(config.upload_rate_limit),
        ));
        let sessions = SessionStore::new(
            config.password.as_deref(),
            chrono::Duration::seconds(config.session_ttl_secs),
        );

        Self {
            config: Arc::new(config),
            db,
            storage,
            files,
            trash,
            keys,
            verifier,
            shares,
            limiter,
            sessions,
            stats: Arc::new(ServerStats::new()),
        }
    }
}

impl FromRef<AppState> for StorageService {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for FileService {
    fn from_ref(state: &AppState) -> Self {
        state.files.clone()
    }
}

impl FromRef<AppState> for KeyService {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl FromRef<AppState> for ShareService {
    fn from_ref(state: &AppState) -> Self {
        state.shares.clone()
    }
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<ServerStats> {
    fn from_ref(state: &AppState) -> Self {
        state.stats.clone()
    }
}

/// Build the full application router.
pub fn build_app(state: AppState) -> axum::Router {
    routes::routes::routes(state)
}
