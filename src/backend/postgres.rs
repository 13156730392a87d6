use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use super::{record_release, require, ConnectionError};
use crate::target::{BackendKind, Credentials};

const KIND: BackendKind = BackendKind::RelationalPostgres;

/// PostgreSQL session (client plus its driver task)
pub struct PostgresConnection {
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
}

impl PostgresConnection {
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Self, ConnectionError> {
        let user = require(&credentials.user, KIND, "user")?;
        let password = require(&credentials.password, KIND, "password")?;
        let database = require(&credentials.database, KIND, "database")?;

        let mut config = tokio_postgres::Config::new();
        config
            .host(host)
            .port(port)
            .user(user)
            .password(password)
            .dbname(database)
            .application_name("infra-probe");

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| ConnectionError::connect(KIND, e))?;

        // The driver ends by itself once the client is dropped
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection driver failed");
            }
        });

        debug!(host = %host, port = port, database = %database, "PostgreSQL session ready");
        Ok(Self {
            client: Some(client),
            driver: Some(driver),
        })
    }

    pub fn client(&self) -> Result<&Client, ConnectionError> {
        self.client.as_ref().ok_or_else(|| ConnectionError::closed(KIND))
    }

    pub(crate) async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.client()?
            .simple_query("SELECT 1")
            .await
            .map_err(|e| ConnectionError::operation(KIND, e))?;
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        drop(client);
        if let Some(driver) = self.driver.take() {
            // Let the driver send Terminate before returning
            let _ = driver.await;
        }
        record_release(KIND);
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if self.client.take().is_some() {
            // Dropping the client lets the detached driver task finish on its own
            record_release(KIND);
        }
    }
}
