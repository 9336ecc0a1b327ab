use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Configuration for connecting to the Postgres target database.
///
/// This struct holds all necessary connection parameters and settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the Postgres database to connect to.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user. Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Whether to require TLS for the connection.
    #[serde(default)]
    pub require_tls: bool,
}

impl PgConnectionConfig {
    /// Validates the connection configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::MissingHost);
        }
        if self.name.is_empty() {
            return Err(ValidationError::MissingDatabaseName);
        }

        Ok(())
    }

    /// Creates sqlx connection options for connecting to the configured database.
    ///
    /// Returns [`PgConnectOptions`] configured with host, port, username,
    /// database name, SSL mode and optional password from this instance.
    pub fn with_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_tls {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name)
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}
