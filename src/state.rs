use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::media::MediaStore;
use crate::repository::{DynRepository, SqliteRepository};
use crate::schedule::{SqliteTaskQueue, TaskScheduler};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub store: DynRepository,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub media: MediaStore,
    pub config: Config,
}

impl AppState {
    /// Wire the SQLite-backed repository and task queue onto one pool.
    pub fn new(pool: DbPool, config: Config) -> Self {
        Self {
            store: Arc::new(SqliteRepository::new(pool.clone())),
            scheduler: Arc::new(SqliteTaskQueue::new(pool)),
            media: MediaStore::new(config.media_root()),
            config,
        }
    }
}
