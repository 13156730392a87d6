use fred::prelude::*;
use tracing::{debug, warn};

use super::{record_release, release_in_background, ConnectOptions, ConnectionError};
use crate::target::{BackendKind, Credentials};

const KIND: BackendKind = BackendKind::KeyValue;

/// Redis session (single centralized server)
pub struct RedisConnection {
    client: Option<Client>,
}

impl RedisConnection {
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        db: u8,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectionError> {
        let mut redis_config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(host, port),
            },
            database: Some(db),
            ..Default::default()
        };

        // Password is optional; a username only makes sense alongside one
        if let Some(password) = credentials.password.as_ref().filter(|p| !p.is_empty()) {
            redis_config.password = Some(password.clone());
            redis_config.username = credentials.user.clone().filter(|u| !u.is_empty());
        }

        let connect_timeout = options.connect_timeout;
        let client = Builder::from_config(redis_config)
            .with_connection_config(|conn| {
                conn.connection_timeout = connect_timeout;
            })
            .with_performance_config(|perf| {
                perf.default_command_timeout = connect_timeout;
            })
            .build()
            .map_err(|e| ConnectionError::connect(KIND, e))?;

        if let Err(e) = client.init().await {
            let _ = client.quit().await;
            return Err(ConnectionError::connect(KIND, e));
        }

        debug!(host = %host, port = port, db = db, "Redis session ready");
        Ok(Self {
            client: Some(client),
        })
    }

    pub fn client(&self) -> Result<&Client, ConnectionError> {
        self.client.as_ref().ok_or_else(|| ConnectionError::closed(KIND))
    }

    pub(crate) async fn ping(&mut self) -> Result<(), ConnectionError> {
        let response: String = self
            .client()?
            .ping(None)
            .await
            .map_err(|e| ConnectionError::operation(KIND, e))?;
        if response.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(ConnectionError::operation(
                KIND,
                format!("unexpected PING reply: {}", response),
            ))
        }
    }

    pub(crate) async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if let Err(e) = client.quit().await {
            warn!(error = %e, "Redis QUIT failed");
        }
        record_release(KIND);
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

impl Drop for RedisConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            release_in_background(KIND, async move {
                let _ = client.quit().await;
            });
        }
    }
}
