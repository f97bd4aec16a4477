//! Persistence: schema migrations and the transactional batch sink.

pub mod migrations;
pub mod sink;

pub use sink::{BatchSink, LibsqlSink};

use anyhow::Result;

/// Initialize the database schema.
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
