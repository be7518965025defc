//! `PostgreSQL` connection pool for the reporting mirror and block list.
//!
//! The live engine never reads items back from the database. Queries are
//! built at runtime and parameterized, so no database is needed at build
//! time.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::error::DbError;

const MAX_CONNECTIONS: u32 = 4;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection pool handle to `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed and
    /// [`DbError::Postgres`] if the connection fails.
    pub async fn connect_url(url: &str) -> Result<Self, DbError> {
        let options: PgConnectOptions = url
            .parse()
            .map_err(|e: sqlx::Error| DbError::Config(format!("invalid database URL: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .connect_with(options)
            .await?;

        tracing::info!(max_connections = MAX_CONNECTIONS, "mirror database connected");
        Ok(Self { pool })
    }

    /// Create the mirror and block-list tables if they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("mirror schema up to date");
        Ok(())
    }

    /// The underlying [`PgPool`], shared by the writer and refresh tasks.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
