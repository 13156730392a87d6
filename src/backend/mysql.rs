use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use tracing::{debug, warn};

use super::{record_release, release_in_background, require, ConnectionError};
use crate::target::{BackendKind, Credentials};

const KIND: BackendKind = BackendKind::RelationalMysql;

/// MySQL session
pub struct MysqlConnection {
    conn: Option<Conn>,
}

impl MysqlConnection {
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Self, ConnectionError> {
        let user = require(&credentials.user, KIND, "user")?;
        let password = require(&credentials.password, KIND, "password")?;
        let database = require(&credentials.database, KIND, "database")?;

        let opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some(database));

        let conn = Conn::new(opts)
            .await
            .map_err(|e| ConnectionError::connect(KIND, e))?;

        debug!(host = %host, port = port, database = %database, "MySQL session ready");
        Ok(Self { conn: Some(conn) })
    }

    pub fn conn(&mut self) -> Result<&mut Conn, ConnectionError> {
        self.conn.as_mut().ok_or_else(|| ConnectionError::closed(KIND))
    }

    pub(crate) async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.conn()?
            .query_drop("SELECT 1")
            .await
            .map_err(|e| ConnectionError::operation(KIND, e))
    }

    pub(crate) async fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if let Err(e) = conn.disconnect().await {
            warn!(error = %e, "MySQL disconnect failed");
        }
        record_release(KIND);
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

impl Drop for MysqlConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            release_in_background(KIND, async move {
                let _ = conn.disconnect().await;
            });
        }
    }
}
