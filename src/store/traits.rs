use anyhow::Result;

use crate::model::{QueryContract, Record};
use crate::store::query::{Condition, SelectQuery};

/// A store of record able to hand out transactions.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Begin a new transaction; every read and write of a request goes through it.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Release pooled resources at shutdown.
    async fn close(&self) {}
}

/// One open transaction. Dropping it without `commit` rolls it back.
#[async_trait::async_trait]
pub trait Transaction: Send {
    /// Run a filtered/sorted/paginated select.
    async fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>>;

    /// Count rows matching the query's conditions, ignoring pagination.
    async fn count(&mut self, query: &SelectQuery) -> Result<u64>;

    /// Insert rows into the contract's table in one batch.
    async fn insert(&mut self, contract: &'static QueryContract, rows: &[Record]) -> Result<u64>;

    /// Update every row matching `conditions` with `changes`, returning the affected count.
    async fn update(
        &mut self,
        contract: &'static QueryContract,
        conditions: &[Condition],
        changes: &Record,
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
