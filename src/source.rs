//! Lazily-connected single-connection database source.

use crate::pg::{Config, Connection, PgResult, DEFAULT_IO_TIMEOUT};

/// Database settings for a [`DbSource`], including the schema used to
/// template SQL identifiers.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub password: Option<String>,
    pub schema: String,
}

/// Owns at most one [`Connection`], created on first use. Not a pool: one
/// source, one socket, and callers serialize access by holding the source.
pub struct DbSource {
    config: DbConfig,
    connection: Option<Connection>,
}

impl DbSource {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    /// Schema used to template SQL identifiers.
    pub fn schema(&self) -> &str {
        &self.config.schema
    }

    /// Return the established connection, connecting first if there is none
    /// yet. Idempotent: repeated calls reuse the same connection.
    pub async fn acquire(&mut self) -> PgResult<&mut Connection> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                Connection::connect(Config {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    database: self.config.db.clone(),
                    user: self.config.user.clone(),
                    password: self.config.password.clone(),
                    application_name: Some("link-cutter".to_string()),
                    replication: None,
                    io_timeout: DEFAULT_IO_TIMEOUT,
                })
                .await?
            }
        };
        Ok(self.connection.insert(connection))
    }

    /// Close and drop the connection if one was ever established; a later
    /// `acquire` reconnects.
    pub async fn close(&mut self) -> PgResult<()> {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await?;
        }
        Ok(())
    }
}
