/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Database connection management.
//!
//! The Merkle log lives in SQLite behind a `deadpool-diesel` pool. All work
//! runs on the pool's blocking threads through `interact`.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), airlock::database::DatabaseError> {
//! use airlock::database::Database;
//!
//! let db = Database::new("sqlite:///var/lib/airlock/airlock.db")?;
//! db.run_migrations().await?;
//! # Ok(())
//! # }
//! ```

use deadpool_diesel::sqlite::{Manager, Object, Pool, Runtime};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::MigrationHarness;
use thiserror::Error;
use tracing::info;

use super::MIGRATIONS;

/// SQLite serializes writers; one connection avoids "database is locked".
const SQLITE_POOL_SIZE: usize = 1;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to build connection pool: {0}")]
    Pool(String),

    #[error("Failed to acquire connection: {0}")]
    Connection(String),

    #[error("Failed to run migrations: {0}")]
    Migration(String),
}

/// A pooled SQLite database.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    url: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("url", &self.url).finish()
    }
}

impl Database {
    /// Creates a pool for a SQLite path, `sqlite://` URL or `:memory:`.
    pub fn new(connection_string: &str) -> Result<Self, DatabaseError> {
        let url = Self::build_sqlite_url(connection_string);
        let manager = Manager::new(url.clone(), Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(SQLITE_POOL_SIZE)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        info!("SQLite connection pool initialized (size: {})", SQLITE_POOL_SIZE);
        Ok(Self { pool, url })
    }

    fn build_sqlite_url(connection_string: &str) -> String {
        connection_string
            .strip_prefix("sqlite://")
            .unwrap_or(connection_string)
            .to_string()
    }

    /// The database driver name, used to select migration scripts.
    pub fn driver(&self) -> &'static str {
        "sqlite"
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get_connection(&self) -> Result<Object, DatabaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))
    }

    /// Applies pragmas and runs pending migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.get_connection().await?;
        conn.interact(|conn| -> Result<(), String> {
            // WAL allows readers during writes; busy_timeout waits on locks instead of failing.
            diesel::sql_query("PRAGMA journal_mode=WAL;")
                .execute(conn)
                .map_err(|e| e.to_string())?;
            diesel::sql_query("PRAGMA busy_timeout=30000;")
                .execute(conn)
                .map_err(|e| e.to_string())?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?
        .map_err(DatabaseError::Migration)
    }

    /// Executes a SQL script (one or more statements) in a transaction.
    pub async fn execute_script(&self, sql: String) -> Result<(), DatabaseError> {
        let conn = self.get_connection().await?;
        conn.interact(move |conn| {
            conn.transaction(|conn| conn.batch_execute(&sql))
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?
        .map_err(DatabaseError::Migration)
    }
}
