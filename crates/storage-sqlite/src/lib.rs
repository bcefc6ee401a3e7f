//! SQLite persistence for the local mirror: diesel schema, embedded
//! migrations, the single-writer actor, and the repositories implementing
//! the core store contracts.

pub mod db;
pub mod errors;
pub mod history;
pub mod mirror;
pub mod models;
pub mod schema;

pub use db::{
    create_pool, get_connection, init, run_migrations,
    write_actor::{spawn_writer, WriteHandle},
    DbConnection, DbPool,
};
pub use errors::StorageError;
pub use history::HistoryRepository;
pub use mirror::MirrorRepository;
