use std::sync::Arc;

use classifieds_db::Database;
use tracing::error;

use crate::auth::Authenticator;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::RateLimiter;
use crate::session::{SessionManager, SessionStore, SqliteSessionStore};
use crate::uploads::ImageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub config: AppConfig,
    pub sessions: SessionManager,
    pub auth: Authenticator,
    pub limiter: RateLimiter,
    pub images: ImageStore,
}

impl AppStateInner {
    /// Production wiring: sessions persisted in the same SQLite database.
    pub fn new(db: Arc<Database>, config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(SqliteSessionStore::new(
            db.clone(),
            clock.clone(),
            config.session_ttl_secs,
        ));
        Self::with_session_store(db, config, clock, store)
    }

    pub fn with_session_store(
        db: Arc<Database>,
        config: AppConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let sessions = SessionManager::new(
            store,
            clock.clone(),
            config.session_regenerate_secs,
            config.session_ttl_secs,
            config.cookie_secure,
        );
        Self {
            auth: Authenticator::new(db.clone()),
            limiter: RateLimiter::new(clock),
            images: ImageStore::new(config.upload_dir.clone()),
            sessions,
            config,
            db,
        }
    }
}

/// Runs SQLite / argon2 work off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        AppError::Internal(anyhow::anyhow!("blocking task failed: {e}"))
    })?
}
