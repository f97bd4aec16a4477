use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// Deadpool manager for libsql connections.
pub struct ConnectionManager {
    database: Database,
}

impl ConnectionManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for ConnectionManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        // A connection that cannot answer a trivial query is discarded.
        conn.query("SELECT 1", ()).await?;
        Ok(())
    }
}

pub type ConnectionPool = Pool<ConnectionManager>;
