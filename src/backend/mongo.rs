use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::{Client, Database};
use tracing::debug;

use super::{record_release, release_in_background, require, ConnectOptions, ConnectionError};
use crate::target::{BackendKind, Credentials};

const KIND: BackendKind = BackendKind::Document;

/// MongoDB session
pub struct MongoConnection {
    client: Option<Client>,
}

impl MongoConnection {
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectionError> {
        let user = require(&credentials.user, KIND, "user")?;
        let password = require(&credentials.password, KIND, "password")?;

        let address = ServerAddress::parse(format!("{}:{}", host, port))
            .map_err(|e| ConnectionError::connect(KIND, e))?;

        let mut credential = Credential::default();
        credential.username = Some(user.to_string());
        credential.password = Some(password.to_string());
        credential.source = Some("admin".to_string());

        let mut client_options = ClientOptions::default();
        client_options.hosts = vec![address];
        client_options.credential = Some(credential);
        client_options.direct_connection = Some(true);
        client_options.app_name = Some("infra-probe".to_string());
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.server_selection_timeout = Some(options.connect_timeout);

        let client =
            Client::with_options(client_options).map_err(|e| ConnectionError::connect(KIND, e))?;

        // The driver connects lazily; force the handshake and authentication now
        if let Err(e) = is_master(&client).await {
            client.shutdown().await;
            return Err(ConnectionError::connect(KIND, e));
        }

        debug!(host = %host, port = port, "MongoDB session ready");
        Ok(Self {
            client: Some(client),
        })
    }

    pub fn client(&self) -> Result<&Client, ConnectionError> {
        self.client.as_ref().ok_or_else(|| ConnectionError::closed(KIND))
    }

    pub fn database(&self, name: &str) -> Result<Database, ConnectionError> {
        Ok(self.client()?.database(name))
    }

    pub(crate) async fn ping(&mut self) -> Result<(), ConnectionError> {
        is_master(self.client()?)
            .await
            .map(|_| ())
            .map_err(|e| ConnectionError::operation(KIND, e))
    }

    pub(crate) async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        client.shutdown().await;
        record_release(KIND);
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

async fn is_master(client: &Client) -> mongodb::error::Result<Document> {
    client
        .database("admin")
        .run_command(doc! { "isMaster": 1 })
        .await
}

impl Drop for MongoConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            release_in_background(KIND, async move {
                client.shutdown().await;
            });
        }
    }
}
