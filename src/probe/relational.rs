//! Relational CRUD probe
//!
//! PostgreSQL and MySQL share one contract; only the SQL dialect and the way
//! the generated id comes back differ.

use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use tokio_postgres::Client;

use super::CrudReport;
use crate::backend::{ConnectionError, MysqlConnection, PostgresConnection};
use crate::target::BackendKind;

pub const TEST_TABLE: &str = "test_infrastructure_table";
pub const TEST_NAME: &str = "test_record";
pub const INITIAL_VALUE: i32 = 42;
pub const UPDATED_VALUE: i32 = 84;

const DROP_TABLE: &str = "DROP TABLE IF EXISTS test_infrastructure_table";

const CREATE_POSTGRES_TABLE: &str = "CREATE TABLE test_infrastructure_table (
    id SERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    value INTEGER,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const CREATE_MYSQL_TABLE: &str = "CREATE TABLE test_infrastructure_table (
    id INT AUTO_INCREMENT PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    value INT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

/// Dialect-specific steps of the CRUD sequence
pub(crate) trait Dialect {
    const KIND: BackendKind;

    /// Drop and recreate the scratch table
    async fn reset_table(&mut self) -> Result<(), ConnectionError>;
    /// Insert a row and return its generated id
    async fn insert(&mut self, name: &str, value: i32) -> Result<i64, ConnectionError>;
    async fn fetch(&mut self, id: i64) -> Result<Option<(String, Option<i32>)>, ConnectionError>;
    async fn update_value(&mut self, id: i64, value: i32) -> Result<(), ConnectionError>;
    async fn delete(&mut self, id: i64) -> Result<(), ConnectionError>;
    async fn count(&mut self, id: i64) -> Result<i64, ConnectionError>;
    async fn drop_table(&mut self) -> Result<(), ConnectionError>;
}

/// The shared CRUD sequence; any driver error aborts it
pub(crate) async fn run_crud<D: Dialect>(db: &mut D) -> Result<CrudReport, ConnectionError> {
    let mut report = CrudReport::default();

    db.reset_table().await?;
    report.create = true;

    let id = db.insert(TEST_NAME, INITIAL_VALUE).await?;

    report.read = matches!(
        db.fetch(id).await?,
        Some((ref name, Some(INITIAL_VALUE))) if name == TEST_NAME
    );

    db.update_value(id, UPDATED_VALUE).await?;
    report.update = matches!(db.fetch(id).await?, Some((_, Some(UPDATED_VALUE))));

    db.delete(id).await?;
    report.delete = db.count(id).await? == 0;

    db.drop_table().await?;
    Ok(report)
}

pub async fn postgres_crud(conn: &mut PostgresConnection) -> Result<CrudReport, ConnectionError> {
    let mut dialect = Postgres(conn.client()?);
    run_crud(&mut dialect).await
}

pub async fn mysql_crud(conn: &mut MysqlConnection) -> Result<CrudReport, ConnectionError> {
    let mut dialect = Mysql(conn.conn()?);
    run_crud(&mut dialect).await
}

struct Postgres<'a>(&'a Client);

fn pg_err(e: tokio_postgres::Error) -> ConnectionError {
    ConnectionError::operation(BackendKind::RelationalPostgres, e)
}

fn pg_id(id: i64) -> Result<i32, ConnectionError> {
    i32::try_from(id).map_err(|e| ConnectionError::operation(BackendKind::RelationalPostgres, e))
}

impl Dialect for Postgres<'_> {
    const KIND: BackendKind = BackendKind::RelationalPostgres;

    async fn reset_table(&mut self) -> Result<(), ConnectionError> {
        self.0.batch_execute(DROP_TABLE).await.map_err(pg_err)?;
        self.0
            .batch_execute(CREATE_POSTGRES_TABLE)
            .await
            .map_err(pg_err)
    }

    async fn insert(&mut self, name: &str, value: i32) -> Result<i64, ConnectionError> {
        let row = self
            .0
            .query_one(
                "INSERT INTO test_infrastructure_table (name, value) VALUES ($1, $2) RETURNING id",
                &[&name, &value],
            )
            .await
            .map_err(pg_err)?;
        let id: i32 = row.try_get(0).map_err(pg_err)?;
        Ok(i64::from(id))
    }

    async fn fetch(&mut self, id: i64) -> Result<Option<(String, Option<i32>)>, ConnectionError> {
        let id = pg_id(id)?;
        let row = self
            .0
            .query_opt(
                "SELECT name, value FROM test_infrastructure_table WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(pg_err)?;
        match row {
            Some(row) => Ok(Some((
                row.try_get(0).map_err(pg_err)?,
                row.try_get(1).map_err(pg_err)?,
            ))),
            None => Ok(None),
        }
    }

    async fn update_value(&mut self, id: i64, value: i32) -> Result<(), ConnectionError> {
        let id = pg_id(id)?;
        self.0
            .execute(
                "UPDATE test_infrastructure_table SET value = $1 WHERE id = $2",
                &[&value, &id],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn delete(&mut self, id: i64) -> Result<(), ConnectionError> {
        let id = pg_id(id)?;
        self.0
            .execute("DELETE FROM test_infrastructure_table WHERE id = $1", &[&id])
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn count(&mut self, id: i64) -> Result<i64, ConnectionError> {
        let id = pg_id(id)?;
        let row = self
            .0
            .query_one(
                "SELECT COUNT(*) FROM test_infrastructure_table WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(pg_err)?;
        row.try_get(0).map_err(pg_err)
    }

    async fn drop_table(&mut self) -> Result<(), ConnectionError> {
        self.0.batch_execute(DROP_TABLE).await.map_err(pg_err)
    }
}

struct Mysql<'a>(&'a mut Conn);

fn my_err(e: mysql_async::Error) -> ConnectionError {
    ConnectionError::operation(BackendKind::RelationalMysql, e)
}

impl Dialect for Mysql<'_> {
    const KIND: BackendKind = BackendKind::RelationalMysql;

    async fn reset_table(&mut self) -> Result<(), ConnectionError> {
        self.0.query_drop(DROP_TABLE).await.map_err(my_err)?;
        self.0.query_drop(CREATE_MYSQL_TABLE).await.map_err(my_err)
    }

    async fn insert(&mut self, name: &str, value: i32) -> Result<i64, ConnectionError> {
        self.0
            .exec_drop(
                "INSERT INTO test_infrastructure_table (name, value) VALUES (?, ?)",
                (name, value),
            )
            .await
            .map_err(my_err)?;
        let id = self.0.last_insert_id().ok_or_else(|| {
            ConnectionError::operation(Self::KIND, "INSERT returned no generated id")
        })?;
        i64::try_from(id).map_err(|e| ConnectionError::operation(Self::KIND, e))
    }

    async fn fetch(&mut self, id: i64) -> Result<Option<(String, Option<i32>)>, ConnectionError> {
        self.0
            .exec_first(
                "SELECT name, value FROM test_infrastructure_table WHERE id = ?",
                (id,),
            )
            .await
            .map_err(my_err)
    }

    async fn update_value(&mut self, id: i64, value: i32) -> Result<(), ConnectionError> {
        self.0
            .exec_drop(
                "UPDATE test_infrastructure_table SET value = ? WHERE id = ?",
                (value, id),
            )
            .await
            .map_err(my_err)
    }

    async fn delete(&mut self, id: i64) -> Result<(), ConnectionError> {
        self.0
            .exec_drop("DELETE FROM test_infrastructure_table WHERE id = ?", (id,))
            .await
            .map_err(my_err)
    }

    async fn count(&mut self, id: i64) -> Result<i64, ConnectionError> {
        let count: Option<i64> = self
            .0
            .exec_first(
                "SELECT COUNT(*) FROM test_infrastructure_table WHERE id = ?",
                (id,),
            )
            .await
            .map_err(my_err)?;
        Ok(count.unwrap_or(0))
    }

    async fn drop_table(&mut self) -> Result<(), ConnectionError> {
        self.0.query_drop(DROP_TABLE).await.map_err(my_err)
    }
}
