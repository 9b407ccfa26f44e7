use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::token::{SessionTokens, SESSION_HOURS};
use crate::config::Config;
use crate::db;
use crate::media::{ImageStore, LocalImageStore};
use crate::store::{NotificationStore, PostStore, UserStore};

pub type DbPool = Pool<SqliteConnectionManager>;

/// URL prefix stored images are served under.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub tokens: SessionTokens,
    pub images: Arc<dyn ImageStore>,
    pub users: UserStore,
    pub posts: PostStore,
    pub notifications: NotificationStore,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, images: Arc<dyn ImageStore>) -> anyhow::Result<Self> {
        let secret = config
            .auth
            .secret
            .clone()
            .ok_or_else(|| anyhow::anyhow!("session secret not configured"))?;
        let ttl = chrono::Duration::hours(SESSION_HOURS);

        Ok(Self {
            users: UserStore::new(db.clone()),
            posts: PostStore::new(db.clone()),
            notifications: NotificationStore::new(db.clone()),
            tokens: SessionTokens::new(secret, ttl),
            db,
            config,
            images,
        })
    }

    /// Open the database, apply migrations and prepare image storage.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let pool = db::create_pool(config.db_path()?)?;
        db::run_migrations(&pool)?;

        let uploads = config.uploads_path()?.clone();
        std::fs::create_dir_all(&uploads)?;
        let images: Arc<dyn ImageStore> =
            Arc::new(LocalImageStore::new(uploads, UPLOADS_URL_PREFIX));

        Self::new(pool, config, images)
    }
}

/// File-backed state in a fresh temp dir. Keep the dir alive for the test.
#[cfg(test)]
pub(crate) fn test_state() -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config::for_data_dir(tmp.path(), "test-secret");
    let state = AppState::from_config(config).unwrap();
    (state, tmp)
}
