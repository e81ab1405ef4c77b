use std::time::Duration;

use anyhow::anyhow;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 2;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQLite needs per-connection setup: referential actions only fire with
/// foreign_keys on, and concurrent pool connections need WAL plus a busy
/// timeout instead of immediate SQLITE_BUSY errors.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn init_pool(database_url: &str) -> anyhow::Result<DbPool> {
    init_pool_with_size(database_url, DEFAULT_MAX_POOL_SIZE)
}

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(Duration::from_secs(10))
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .map_err(|err| anyhow!("failed to acquire connection for migrations: {err}"))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
    Ok(())
}
