use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::parking::{DynParkingRepository, SqliteParkingRepository};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub parking: DynParkingRepository,
}

impl AppState {
    /// State backed by the SQLite repository over `db`.
    pub fn new(db: DbPool, config: Config) -> Self {
        let parking: DynParkingRepository = Arc::new(SqliteParkingRepository::new(db.clone()));
        Self {
            db,
            config,
            parking,
        }
    }
}
