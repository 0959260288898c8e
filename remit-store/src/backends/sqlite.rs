use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use remit_common::{
    Channel, DeliveryAttempt, DeliveryId, Failure, FailureId, ReasonCode, Statement, StatementId,
    StatementRecord,
};
use rusqlite::{
    Connection, OptionalExtension, Row, TransactionBehavior, params, types::Type,
};

use crate::{
    StoreError,
    r#trait::DeliveryStore,
    transaction::{IdAllocator, Transaction, WriteOp},
};

const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS statements (
    statement_id INTEGER PRIMARY KEY,
    document_reference TEXT NOT NULL UNIQUE,
    scheme_short_name TEXT NOT NULL,
    received INTEGER NOT NULL,
    snapshot TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deliveries (
    delivery_id INTEGER PRIMARY KEY,
    statement_id INTEGER NOT NULL REFERENCES statements(statement_id),
    method TEXT NOT NULL,
    reference TEXT,
    requested INTEGER NOT NULL,
    completed INTEGER
);

CREATE INDEX IF NOT EXISTS deliveries_outstanding ON deliveries(completed, requested);
CREATE INDEX IF NOT EXISTS deliveries_statement ON deliveries(statement_id);

CREATE TABLE IF NOT EXISTS failures (
    failure_id INTEGER PRIMARY KEY,
    delivery_id INTEGER NOT NULL UNIQUE REFERENCES deliveries(delivery_id),
    reason TEXT NOT NULL,
    status_code INTEGER,
    error TEXT,
    message TEXT,
    failed INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO sequences (name, value)
    SELECT 'statement', COALESCE(MAX(statement_id), 0) FROM statements;
INSERT OR IGNORE INTO sequences (name, value)
    SELECT 'delivery', COALESCE(MAX(delivery_id), 0) FROM deliveries;
INSERT OR IGNORE INTO sequences (name, value)
    SELECT 'failure', COALESCE(MAX(failure_id), 0) FROM failures;
";

/// How long a writer waits for another connection's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DELIVERY_COLUMNS: &str =
    "delivery_id, statement_id, method, reference, requested, completed";

/// Durable delivery store backed by a `SQLite` database
///
/// The connection is shared behind a mutex and every query runs on the
/// blocking thread pool. Each commit is a single `SQLite` transaction, so a
/// constraint failure part way through leaves the database untouched.
///
/// Identifiers are reserved from a `sequences` table in the database itself,
/// so several processes may safely write to the same file.
#[derive(Debug, Clone)]
pub struct SqliteDeliveryStore {
    connection: Arc<Mutex<Connection>>,
    ids: Arc<SqliteSequences>,
    path: Option<PathBuf>,
}

/// Identifier reservations backed by the `sequences` table
#[derive(Debug)]
struct SqliteSequences {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSequences {
    fn reserve(&self, name: &str) -> crate::Result<u64> {
        let value: i64 = self.connection.lock().query_row(
            "UPDATE sequences SET value = value + 1 WHERE name = ?1 RETURNING value",
            params![name],
            |row| row.get(0),
        )?;
        u64::try_from(value)
            .map_err(|_| StoreError::Internal(format!("Invalid {name} sequence value {value}")))
    }
}

impl IdAllocator for SqliteSequences {
    fn next_statement(&self) -> crate::Result<StatementId> {
        self.reserve("statement").map(StatementId)
    }

    fn next_delivery(&self) -> crate::Result<DeliveryId> {
        self.reserve("delivery").map(DeliveryId)
    }

    fn next_failure(&self) -> crate::Result<FailureId> {
        self.reserve("failure").map(FailureId)
    }
}

impl SqliteDeliveryStore {
    /// Open (creating if necessary) the database at `path`
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema cannot
    /// be created.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Internal(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        Self::from_connection(Connection::open(path)?, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(connection: Connection, path: Option<PathBuf>) -> crate::Result<Self> {
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch(SCHEMA)?;

        let connection = Arc::new(Mutex::new(connection));
        Ok(Self {
            ids: Arc::new(SqliteSequences {
                connection: Arc::clone(&connection),
            }),
            connection,
            path,
        })
    }

    /// The database file, or `None` for an in-memory database
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_connection<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&mut Connection) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock();
            f(&mut connection)
        })
        .await?
    }
}

fn sql_id(id: u64) -> crate::Result<i64> {
    i64::try_from(id).map_err(|_| StoreError::Internal(format!("Identifier {id} out of range")))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn column_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn column_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn column_optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.get(idx)?;
    millis
        .map(|millis| {
            DateTime::from_timestamp_millis(millis)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
        })
        .transpose()
}

fn delivery_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryAttempt> {
    let method: String = row.get(2)?;
    let channel = method
        .parse::<Channel>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(DeliveryAttempt {
        id: DeliveryId(column_id(row, 0)?),
        statement_id: StatementId(column_id(row, 1)?),
        channel,
        reference: row.get(3)?,
        requested: column_time(row, 4)?,
        completed: column_optional_time(row, 5)?,
    })
}

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<Failure> {
    Ok(Failure {
        id: FailureId(column_id(row, 0)?),
        delivery_id: DeliveryId(column_id(row, 1)?),
        reason: ReasonCode::from(row.get::<_, String>(2)?),
        status_code: row.get(3)?,
        error: row.get(4)?,
        message: row.get(5)?,
        failed: column_time(row, 6)?,
    })
}

/// Raw statement row; the snapshot is decoded outside the row callback
struct StatementRow {
    id: u64,
    received: DateTime<Utc>,
    snapshot: String,
}

impl StatementRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: column_id(row, 0)?,
            received: column_time(row, 1)?,
            snapshot: row.get(2)?,
        })
    }

    fn decode(self) -> crate::Result<StatementRecord> {
        let statement: Statement = ron::from_str(&self.snapshot).map_err(|e| {
            StoreError::Serialization(format!("Statement {} snapshot: {e}", self.id))
        })?;

        Ok(StatementRecord {
            id: StatementId(self.id),
            received: self.received,
            statement,
        })
    }
}

fn exists(tx: &rusqlite::Transaction<'_>, sql: &str, id: i64) -> crate::Result<bool> {
    Ok(tx
        .query_row(sql, params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn apply(connection: &mut Connection, ops: &[WriteOp]) -> crate::Result<()> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

    for op in ops {
        match op {
            WriteOp::InsertStatement(record) => {
                let statement = &record.statement;
                let duplicate = tx
                    .query_row(
                        "SELECT statement_id FROM statements WHERE document_reference = ?1",
                        params![statement.document_reference],
                        |_| Ok(()),
                    )
                    .optional()?;
                if duplicate.is_some() {
                    return Err(StoreError::DuplicateReference(
                        statement.document_reference.clone(),
                    ));
                }

                let snapshot = ron::to_string(statement)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;

                tx.execute(
                    "INSERT INTO statements \
                     (statement_id, document_reference, scheme_short_name, received, snapshot) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        sql_id(record.id.0)?,
                        statement.document_reference,
                        statement.scheme.short_name,
                        record.received.timestamp_millis(),
                        snapshot,
                    ],
                )?;
            }
            WriteOp::InsertDelivery(attempt) => {
                if !exists(
                    &tx,
                    "SELECT 1 FROM statements WHERE statement_id = ?1",
                    sql_id(attempt.statement_id.0)?,
                )? {
                    return Err(StoreError::StatementNotFound(attempt.statement_id));
                }

                tx.execute(
                    "INSERT INTO deliveries \
                     (delivery_id, statement_id, method, reference, requested, completed) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        sql_id(attempt.id.0)?,
                        sql_id(attempt.statement_id.0)?,
                        attempt.channel.as_str(),
                        attempt.reference,
                        attempt.requested.timestamp_millis(),
                        attempt.completed.map(|at| at.timestamp_millis()),
                    ],
                )?;
            }
            WriteOp::CompleteDelivery { id, completed } => {
                let changed = tx.execute(
                    "UPDATE deliveries SET completed = ?1 \
                     WHERE delivery_id = ?2 AND completed IS NULL",
                    params![completed.timestamp_millis(), sql_id(id.0)?],
                )?;

                if changed == 0 {
                    return Err(
                        if exists(
                            &tx,
                            "SELECT 1 FROM deliveries WHERE delivery_id = ?1",
                            sql_id(id.0)?,
                        )? {
                            StoreError::AlreadyCompleted(*id)
                        } else {
                            StoreError::DeliveryNotFound(*id)
                        },
                    );
                }
            }
            WriteOp::InsertFailure(failure) => {
                let delivery = sql_id(failure.delivery_id.0)?;
                if !exists(
                    &tx,
                    "SELECT 1 FROM deliveries WHERE delivery_id = ?1",
                    delivery,
                )? {
                    return Err(StoreError::DeliveryNotFound(failure.delivery_id));
                }
                if exists(
                    &tx,
                    "SELECT 1 FROM failures WHERE delivery_id = ?1",
                    delivery,
                )? {
                    return Err(StoreError::DuplicateFailure(failure.delivery_id));
                }

                tx.execute(
                    "INSERT INTO failures \
                     (failure_id, delivery_id, reason, status_code, error, message, failed) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        sql_id(failure.id.0)?,
                        delivery,
                        failure.reason.as_str(),
                        failure.status_code,
                        failure.error,
                        failure.message,
                        failure.failed.timestamp_millis(),
                    ],
                )?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

#[async_trait]
impl DeliveryStore for SqliteDeliveryStore {
    fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.ids) as Arc<dyn IdAllocator>)
    }

    async fn commit(&self, transaction: Transaction) -> crate::Result<()> {
        let ops = transaction.into_operations();
        if ops.is_empty() {
            return Ok(());
        }

        self.with_connection(move |connection| apply(connection, &ops))
            .await
    }

    async fn statement(&self, id: StatementId) -> crate::Result<StatementRecord> {
        let key = sql_id(id.0)?;
        let row = self
            .with_connection(move |connection| {
                Ok(connection
                    .query_row(
                        "SELECT statement_id, received, snapshot FROM statements \
                         WHERE statement_id = ?1",
                        params![key],
                        StatementRow::from_row,
                    )
                    .optional()?)
            })
            .await?;

        row.ok_or(StoreError::StatementNotFound(id))?.decode()
    }

    async fn statement_by_reference(
        &self,
        document_reference: &str,
    ) -> crate::Result<Option<StatementRecord>> {
        let reference = document_reference.to_string();
        let row = self
            .with_connection(move |connection| {
                Ok(connection
                    .query_row(
                        "SELECT statement_id, received, snapshot FROM statements \
                         WHERE document_reference = ?1",
                        params![reference],
                        StatementRow::from_row,
                    )
                    .optional()?)
            })
            .await?;

        row.map(StatementRow::decode).transpose()
    }

    async fn delivery(&self, id: DeliveryId) -> crate::Result<DeliveryAttempt> {
        let key = sql_id(id.0)?;
        self.with_connection(move |connection| {
            Ok(connection
                .query_row(
                    &format!("SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE delivery_id = ?1"),
                    params![key],
                    delivery_from_row,
                )
                .optional()?)
        })
        .await?
        .ok_or(StoreError::DeliveryNotFound(id))
    }

    async fn deliveries_for(&self, statement: StatementId) -> crate::Result<Vec<DeliveryAttempt>> {
        let key = sql_id(statement.0)?;
        self.with_connection(move |connection| {
            let mut query = connection.prepare(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM deliveries \
                 WHERE statement_id = ?1 ORDER BY delivery_id ASC"
            ))?;
            let rows = query.query_map(params![key], delivery_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn outstanding(
        &self,
        after: DeliveryId,
        limit: usize,
    ) -> crate::Result<Vec<DeliveryAttempt>> {
        let cursor = sql_id(after.0)?;
        let limit = sql_limit(limit);
        self.with_connection(move |connection| {
            let mut query = connection.prepare(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM deliveries \
                 WHERE completed IS NULL AND delivery_id > ?1 \
                 ORDER BY delivery_id ASC LIMIT ?2"
            ))?;
            let rows = query.query_map(params![cursor, limit], delivery_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn failure(&self, delivery: DeliveryId) -> crate::Result<Option<Failure>> {
        let key = sql_id(delivery.0)?;
        self.with_connection(move |connection| {
            Ok(connection
                .query_row(
                    "SELECT failure_id, delivery_id, reason, status_code, error, message, failed \
                     FROM failures WHERE delivery_id = ?1",
                    params![key],
                    failure_from_row,
                )
                .optional()?)
        })
        .await
    }
}
