//! Transaction support for the ORM.
//!
//! [`in_transaction`] opens a transaction on a client and returns a
//! [`TransactionWrapper`], itself a [`DbClient`]: every statement run
//! through it belongs to the transaction until [`commit`] or [`rollback`]
//! is called. A wrapper can be finalised only once.
//!
//! Nested transactions are savepoints: [`TransactionWrapper::savepoint`]
//! returns a wrapper whose commit releases the savepoint and whose rollback
//! rolls back to it.
//!
//! [`atomic`] runs a closure inside a transaction, committing on `Ok` and
//! rolling back on `Err`.
//!
//! [`commit`]: TransactionWrapper::commit
//! [`rollback`]: TransactionWrapper::rollback
//!
//! # Examples
//!
//! ```ignore
//! let txn = in_transaction(Arc::clone(&client)).await?;
//! team.save(&txn).await?;
//! txn.commit().await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use terrapin_core::{TerrapinError, TerrapinResult};
use tokio::sync::Mutex;

use crate::dialect::DatabaseBackendType;
use crate::executor::DbClient;
use crate::query::compiler::Row;
use crate::value::Value;

/// Counter for generating unique savepoint names.
static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A client bound to an open transaction or savepoint.
pub struct TransactionWrapper {
    client: Arc<dyn DbClient>,
    /// `None` for the outermost transaction.
    savepoint: Option<String>,
    finalized: Mutex<bool>,
}

/// Begins a transaction on `client`.
pub async fn in_transaction(client: Arc<dyn DbClient>) -> TerrapinResult<TransactionWrapper> {
    let begin = client.backend_type().begin_statement();
    client.execute_update(begin, &[]).await?;
    tracing::debug!(connection = client.alias(), "transaction started");
    Ok(TransactionWrapper {
        client,
        savepoint: None,
        finalized: Mutex::new(false),
    })
}

impl TransactionWrapper {
    /// Opens a savepoint inside this transaction.
    pub async fn savepoint(&self) -> TerrapinResult<Self> {
        self.ensure_open().await?;
        let name = format!("sp_{}", SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed));
        self.client
            .execute_update(&format!("SAVEPOINT {name}"), &[])
            .await?;
        Ok(Self {
            client: Arc::clone(&self.client),
            savepoint: Some(name),
            finalized: Mutex::new(false),
        })
    }

    /// Whether `commit` or `rollback` has been called.
    pub async fn is_finalized(&self) -> bool {
        *self.finalized.lock().await
    }

    async fn ensure_open(&self) -> TerrapinResult<()> {
        if *self.finalized.lock().await {
            return Err(TerrapinError::TransactionManagementError(
                "Transaction already finalised".to_string(),
            ));
        }
        Ok(())
    }

    async fn finalize(&self, sql: String) -> TerrapinResult<()> {
        let mut finalized = self.finalized.lock().await;
        if *finalized {
            return Err(TerrapinError::TransactionManagementError(
                "Transaction already finalised".to_string(),
            ));
        }
        self.client.execute_update(&sql, &[]).await?;
        *finalized = true;
        Ok(())
    }

    /// Commits the transaction (or releases the savepoint).
    pub async fn commit(&self) -> TerrapinResult<()> {
        let sql = match &self.savepoint {
            Some(name) => format!("RELEASE SAVEPOINT {name}"),
            None => "COMMIT".to_string(),
        };
        self.finalize(sql).await?;
        tracing::debug!(connection = self.client.alias(), "transaction committed");
        Ok(())
    }

    /// Rolls the transaction back (or back to the savepoint).
    pub async fn rollback(&self) -> TerrapinResult<()> {
        let sql = match &self.savepoint {
            Some(name) => format!("ROLLBACK TO SAVEPOINT {name}"),
            None => "ROLLBACK".to_string(),
        };
        self.finalize(sql).await?;
        tracing::debug!(connection = self.client.alias(), "transaction rolled back");
        Ok(())
    }
}

#[async_trait::async_trait]
impl DbClient for TransactionWrapper {
    fn backend_type(&self) -> DatabaseBackendType {
        self.client.backend_type()
    }

    fn alias(&self) -> &str {
        self.client.alias()
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> TerrapinResult<Vec<Row>> {
        self.client.execute_query(sql, params).await
    }

    async fn execute_insert(&self, sql: &str, params: &[Value]) -> TerrapinResult<Value> {
        self.client.execute_insert(sql, params).await
    }

    async fn execute_update(&self, sql: &str, params: &[Value]) -> TerrapinResult<u64> {
        self.client.execute_update(sql, params).await
    }

    async fn execute_script(&self, sql: &str) -> TerrapinResult<()> {
        self.client.execute_script(sql).await
    }
}

/// Runs `f` inside a transaction.
///
/// The transaction is committed when `f` returns `Ok` and rolled back when
/// it returns `Err`; the closure's error is returned even if the rollback
/// fails too.
pub async fn atomic<F, Fut, T>(client: Arc<dyn DbClient>, f: F) -> TerrapinResult<T>
where
    F: FnOnce(Arc<TransactionWrapper>) -> Fut,
    Fut: std::future::Future<Output = TerrapinResult<T>>,
{
    let txn = Arc::new(in_transaction(client).await?);
    match f(Arc::clone(&txn)).await {
        Ok(result) => {
            txn.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}
