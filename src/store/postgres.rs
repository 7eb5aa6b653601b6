use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Postgres, Row};
use uuid::Uuid;

use crate::model::{FieldKind, QueryContract, Record};
use crate::store::query::{ColumnRef, Condition, SelectQuery};
use crate::store::sql;
use crate::store::traits::{Store, Transaction};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn decode_column(row: &PgRow, label: &str, column: &ColumnRef) -> Result<Value> {
    let value = match column.kind {
        FieldKind::Uuid => row
            .try_get::<Option<Uuid>, _>(label)?
            .map(|id| Value::String(id.to_string())),
        FieldKind::Text | FieldKind::Email => {
            row.try_get::<Option<String>, _>(label)?.map(Value::String)
        }
        FieldKind::Bool => row.try_get::<Option<bool>, _>(label)?.map(Value::Bool),
        FieldKind::DateTime => row
            .try_get::<Option<DateTime<Utc>>, _>(label)?
            .map(serde_json::to_value)
            .transpose()?,
    };
    Ok(value.unwrap_or(Value::Null))
}

#[async_trait::async_trait]
impl Transaction for PostgresTransaction {
    async fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>> {
        let mut builder = sql::select(query)?;
        let rows = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to query {}", query.contract.table))?;

        let columns = query.selected_columns();
        rows.iter()
            .map(|row| {
                let mut record = Record::new();
                for (label, column) in &columns {
                    record.insert(label.clone(), decode_column(row, label, column)?);
                }
                Ok(record)
            })
            .collect()
    }

    async fn count(&mut self, query: &SelectQuery) -> Result<u64> {
        let mut builder = sql::count(query)?;
        let row = builder
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to count {}", query.contract.table))?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&mut self, contract: &'static QueryContract, rows: &[Record]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut builder = sql::insert(contract, rows)?;
        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to insert into {}", contract.table))?;
        Ok(result.rows_affected())
    }

    async fn update(
        &mut self,
        contract: &'static QueryContract,
        conditions: &[Condition],
        changes: &Record,
    ) -> Result<u64> {
        let Some(mut builder) = sql::update(contract, conditions, changes)? else {
            return Ok(0);
        };
        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to update {}", contract.table))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}
