//! Pool construction, embedded migrations, and the write actor.
//!
//! All reads go through pooled connections; all writes go through the
//! single writer thread so SQLite never sees two competing write
//! transactions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::debug;

use crate::errors::StorageError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const DB_FILE_NAME: &str = "mirrorkit.db";

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas: WAL for concurrent readers, a busy timeout so
/// readers do not fail instantly while the writer holds the lock, and
/// enforced foreign keys.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA busy_timeout = 5000; \
             PRAGMA foreign_keys = ON;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Resolve (and create) the database path under the app data directory.
pub fn init(app_data_dir: &str) -> Result<String, StorageError> {
    std::fs::create_dir_all(app_data_dir)?;
    let db_path = Path::new(app_data_dir).join(DB_FILE_NAME);
    Ok(db_path.to_string_lossy().to_string())
}

/// Run all pending embedded migrations against `db_path`.
pub fn run_migrations(db_path: &str) -> Result<(), StorageError> {
    let mut conn = SqliteConnection::establish(db_path)
        .map_err(|e| StorageError::Migration(format!("Failed to open '{}': {}", db_path, e)))?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    if !applied.is_empty() {
        debug!("Applied {} migration(s)", applied.len());
    }
    Ok(())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(8)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &Arc<DbPool>) -> Result<DbConnection, StorageError> {
    Ok(pool.get()?)
}

pub mod write_actor {
    use std::sync::mpsc;

    use diesel::sqlite::SqliteConnection;
    use diesel::Connection;
    use log::error;

    use super::{DbPool, StorageError};

    type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

    /// Handle to the writer thread. Cheap to clone; dropping every handle
    /// shuts the writer down after the queued jobs drain.
    #[derive(Clone)]
    pub struct WriteHandle {
        tx: mpsc::Sender<Job>,
    }

    impl WriteHandle {
        /// Run `job` on the writer thread inside an immediate transaction
        /// and await its result.
        pub async fn exec<R, F>(&self, job: F) -> mirrorkit_core::Result<R>
        where
            F: FnOnce(&mut SqliteConnection) -> Result<R, StorageError> + Send + 'static,
            R: Send + 'static,
        {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            let wrapped: Job = Box::new(move |conn| {
                let result = conn.immediate_transaction::<R, StorageError, _>(|tx| job(tx));
                let _ = reply_tx.send(result);
            });
            self.tx
                .send(wrapped)
                .map_err(|_| StorageError::WriterGone)?;
            let result = reply_rx.await.map_err(|_| StorageError::WriterGone)?;
            result.map_err(Into::into)
        }
    }

    /// Spawn the dedicated writer thread consuming queued jobs in order.
    pub fn spawn_writer(pool: DbPool) -> WriteHandle {
        let (tx, rx) = mpsc::channel::<Job>();
        std::thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut conn),
                    // The job (and its reply channel) is dropped; the
                    // caller observes WriterGone.
                    Err(err) => error!("Writer could not acquire a connection: {}", err),
                }
            }
        });
        WriteHandle { tx }
    }
}
