//! In-process store used for local runs and tests.
//!
//! Committed rows live in shared tables. A transaction records its writes in
//! a log; its own reads see committed rows with the log replayed on top, and
//! commit applies the log under the table lock.

use anyhow::{bail, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use uuid::Uuid;

use crate::model::{FieldKind, FilterOp, JoinKind, QueryContract, Record, SortDirection, ID};
use crate::store::query::{Condition, SelectQuery};
use crate::store::traits::{Store, Transaction};

#[derive(Default)]
struct Tables {
    rows: RwLock<HashMap<&'static str, Vec<Record>>>,
    queries: AtomicU64,
    failing: RwLock<HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert into `table` fail.
    pub fn fail_inserts_into(&self, table: &str) {
        self.inner.failing.write().insert(table.to_string());
    }

    /// Number of fetch and count calls served so far.
    pub fn query_count(&self) -> u64 {
        self.inner.queries.load(AtomicOrdering::SeqCst)
    }

    /// Committed rows of a table, soft-deleted ones included, keyed by column.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.inner
            .rows
            .read()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.inner.clone(),
            log: Vec::new(),
        }))
    }
}

enum WriteOp {
    Insert {
        table: &'static str,
        rows: Vec<Record>,
    },
    Update {
        contract: &'static QueryContract,
        conditions: Vec<Condition>,
        changes: Record,
    },
}

impl WriteOp {
    fn table(&self) -> &'static str {
        match self {
            WriteOp::Insert { table, .. } => table,
            WriteOp::Update { contract, .. } => contract.table,
        }
    }

    fn apply(&self, rows: &mut Vec<Record>) {
        match self {
            WriteOp::Insert { rows: new, .. } => rows.extend(new.iter().cloned()),
            WriteOp::Update {
                contract,
                conditions,
                changes,
            } => {
                for row in rows.iter_mut() {
                    if matches_all(conditions, &main_scope(contract, row)) {
                        for (column, value) in changes {
                            row.insert(column.clone(), value.clone());
                        }
                    }
                }
            }
        }
    }
}

pub struct MemoryTransaction {
    store: Arc<Tables>,
    log: Vec<WriteOp>,
}

impl MemoryTransaction {
    /// Rows of `table` as this transaction sees them.
    fn view(&self, table: &str) -> Vec<Record> {
        let mut rows = self
            .store
            .rows
            .read()
            .get(table)
            .cloned()
            .unwrap_or_default();
        for op in self.log.iter().filter(|op| op.table() == table) {
            op.apply(&mut rows);
        }
        rows
    }

    /// Filtered and sorted scopes for a query, before pagination.
    fn evaluate(&self, query: &SelectQuery) -> Vec<Record> {
        let contract = query.contract;
        let joined: Vec<Vec<Record>> = query.joins.iter().map(|r| self.view(r.table)).collect();

        let mut scopes: Vec<Record> = self
            .view(contract.table)
            .iter()
            .filter_map(|row| {
                let mut scope = main_scope(contract, row);
                for (relation, rows) in query.joins.iter().zip(&joined) {
                    let found = rows.iter().find(|candidate| {
                        relation.on.iter().all(|(rel, main)| {
                            let left = candidate.get(*rel).unwrap_or(&Value::Null);
                            let right = scope
                                .get(&format!("{}.{}", contract.alias, main))
                                .unwrap_or(&Value::Null);
                            !left.is_null() && left == right
                        })
                    });
                    if found.is_none() && relation.join == JoinKind::Inner {
                        return None;
                    }
                    for f in relation.fields {
                        let value = found
                            .and_then(|r| r.get(f.column).cloned())
                            .unwrap_or(Value::Null);
                        scope.insert(format!("{}.{}", relation.alias, f.column), value);
                    }
                }
                Some(scope)
            })
            .filter(|scope| matches_all(&query.conditions, scope))
            .collect();

        scopes.sort_by(|a, b| {
            for order in &query.order_by {
                let key = order.column.qualified();
                let ordering = compare_nullable(
                    order.column.kind,
                    a.get(&key).unwrap_or(&Value::Null),
                    b.get(&key).unwrap_or(&Value::Null),
                );
                let ordering = match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        scopes
    }
}

fn main_scope(contract: &QueryContract, row: &Record) -> Record {
    contract
        .fields
        .iter()
        .map(|f| {
            (
                format!("{}.{}", contract.alias, f.column),
                row.get(f.column).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

/// Nulls sort after every value, as PostgreSQL does by default.
fn compare_nullable(kind: FieldKind, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => kind.compare(a, b).unwrap_or(Ordering::Equal),
    }
}

fn like_match(pattern: &str, text: &str, fold_case: bool) -> bool {
    fn go(p: &[char], t: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some(('%', rest)) => (0..=t.len()).any(|i| go(rest, &t[i..])),
            Some(('_', rest)) => !t.is_empty() && go(rest, &t[1..]),
            Some(('\\', rest)) if !rest.is_empty() => {
                t.first() == Some(&rest[0]) && go(&rest[1..], &t[1..])
            }
            Some((c, rest)) => t.first() == Some(c) && go(rest, &t[1..]),
        }
    }
    let (pattern, text) = if fold_case {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_string(), text.to_string())
    };
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    go(&p, &t)
}

fn matches(condition: &Condition, scope: &Record) -> bool {
    let kind = condition.column.kind;
    let value = scope
        .get(&condition.column.qualified())
        .unwrap_or(&Value::Null);
    let equal = |other: &Value| kind.compare(value, other) == Some(Ordering::Equal);
    let first = condition.values.first().unwrap_or(&Value::Null);

    match condition.op {
        FilterOp::IsNull => value.is_null(),
        FilterOp::IsNotNull => !value.is_null(),
        FilterOp::In if condition.values.is_empty() => false,
        FilterOp::NotIn if condition.values.is_empty() => true,
        // SQL comparisons with NULL never hold.
        _ if value.is_null() => false,
        FilterOp::In => condition.values.iter().any(equal),
        FilterOp::NotIn => !condition.values.iter().any(equal),
        FilterOp::Eq => equal(first),
        FilterOp::Ne => !first.is_null() && !equal(first),
        FilterOp::Gt => kind.compare(value, first) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            kind.compare(value, first),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => kind.compare(value, first) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            kind.compare(value, first),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Like | FilterOp::ILike => match (value.as_str(), first.as_str()) {
            (Some(text), Some(pattern)) => {
                like_match(pattern, text, condition.op == FilterOp::ILike)
            }
            _ => false,
        },
    }
}

fn matches_all(conditions: &[Condition], scope: &Record) -> bool {
    conditions.iter().all(|c| matches(c, scope))
}

/// Keep only contract columns, with UUIDs in canonical lowercase form.
fn normalize(contract: &QueryContract, row: &Record, fill_missing: bool) -> Record {
    let mut out = Record::new();
    for f in contract.fields {
        let value = match row.get(f.name) {
            Some(v) => v.clone(),
            None if fill_missing => Value::Null,
            None => continue,
        };
        let value = match (f.kind, value.as_str()) {
            (FieldKind::Uuid, Some(raw)) => Uuid::parse_str(raw)
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(value),
            _ => value,
        };
        out.insert(f.column.to_string(), value);
    }
    out
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>> {
        self.store.queries.fetch_add(1, AtomicOrdering::SeqCst);
        let offset = query.offset as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let columns = query.selected_columns();

        Ok(self
            .evaluate(query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|scope| {
                columns
                    .iter()
                    .map(|(label, column)| {
                        (
                            label.clone(),
                            scope.get(&column.qualified()).cloned().unwrap_or(Value::Null),
                        )
                    })
                    .collect()
            })
            .collect())
    }

    async fn count(&mut self, query: &SelectQuery) -> Result<u64> {
        self.store.queries.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.evaluate(query).len() as u64)
    }

    async fn insert(&mut self, contract: &'static QueryContract, rows: &[Record]) -> Result<u64> {
        if self.store.failing.read().contains(contract.table) {
            bail!("insert into {} rejected", contract.table);
        }
        let mut seen: HashSet<String> = self
            .view(contract.table)
            .iter()
            .filter_map(|r| r.get(ID).and_then(Value::as_str).map(str::to_string))
            .collect();
        let rows: Vec<Record> = rows.iter().map(|r| normalize(contract, r, true)).collect();
        for row in &rows {
            let Some(id) = row.get(ID).and_then(Value::as_str) else {
                bail!("{}: null value in column id", contract.table);
            };
            if !seen.insert(id.to_string()) {
                bail!("{}: duplicate key value {}", contract.table, id);
            }
        }
        let count = rows.len() as u64;
        self.log.push(WriteOp::Insert {
            table: contract.table,
            rows,
        });
        Ok(count)
    }

    async fn update(
        &mut self,
        contract: &'static QueryContract,
        conditions: &[Condition],
        changes: &Record,
    ) -> Result<u64> {
        let changes = normalize(contract, changes, false);
        if changes.is_empty() {
            return Ok(0);
        }
        let affected = self
            .view(contract.table)
            .iter()
            .filter(|row| matches_all(conditions, &main_scope(contract, row)))
            .count() as u64;
        self.log.push(WriteOp::Update {
            contract,
            conditions: conditions.to_vec(),
            changes,
        });
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tables = self.store.rows.write();
        for op in &self.log {
            op.apply(tables.entry(op.table()).or_default());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CHOICE_CONTRACT, QUESTION_CONTRACT, SURVEY_CONTRACT};
    use crate::store::query::ColumnRef;
    use serde_json::json;

    fn survey(id: Uuid, title: &str, updated_at: &str) -> Record {
        let mut row = Record::new();
        row.insert("id".into(), json!(id.to_string()));
        row.insert("title".into(), json!(title));
        row.insert("is_active".into(), json!(true));
        row.insert("created_at".into(), json!(updated_at));
        row.insert("updated_at".into(), json!(updated_at));
        row
    }

    #[tokio::test]
    async fn test_commit_publishes_and_rollback_discards() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert(
            &SURVEY_CONTRACT,
            &[survey(Uuid::new_v4(), "kept", "2024-01-01T00:00:00Z")],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert(
            &SURVEY_CONTRACT,
            &[survey(Uuid::new_v4(), "dropped", "2024-01-01T00:00:00Z")],
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let rows = store.rows("surveys");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("kept"));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_visible_only_to_own_transaction() {
        let store = MemoryStore::new();
        let mut writer = store.begin().await.unwrap();
        writer
            .insert(
                &SURVEY_CONTRACT,
                &[survey(Uuid::new_v4(), "draft", "2024-01-01T00:00:00Z")],
            )
            .await
            .unwrap();

        let query = SelectQuery::with_defaults(&SURVEY_CONTRACT);
        assert_eq!(writer.count(&query).await.unwrap(), 1);

        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.count(&query).await.unwrap(), 0);
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_update_soft_delete_hides_row_from_default_query() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&SURVEY_CONTRACT, &[survey(id, "a", "2024-01-01T00:00:00Z")])
            .await
            .unwrap();

        let mut changes = Record::new();
        changes.insert("deleted_at".into(), json!("2024-02-01T00:00:00Z"));
        let affected = tx
            .update(
                &SURVEY_CONTRACT,
                &[Condition::id_eq(&SURVEY_CONTRACT, id)],
                &changes,
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let live = tx
            .fetch(&SelectQuery::with_defaults(&SURVEY_CONTRACT))
            .await
            .unwrap();
        assert!(live.is_empty());
        let all = tx.fetch(&SelectQuery::new(&SURVEY_CONTRACT)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_sort_pagination_and_duplicate_ids() {
        let store = MemoryStore::new();
        let first = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.insert(
            &SURVEY_CONTRACT,
            &[
                survey(first, "old", "2024-01-01T00:00:00Z"),
                survey(Uuid::new_v4(), "new", "2024-03-01T00:00:00Z"),
                survey(Uuid::new_v4(), "mid", "2024-02-01T00:00:00Z"),
            ],
        )
        .await
        .unwrap();

        let page = tx
            .fetch(&SelectQuery::with_defaults(&SURVEY_CONTRACT).page(2, 1))
            .await
            .unwrap();
        let titles: Vec<_> = page.iter().map(|r| r["title"].clone()).collect();
        assert_eq!(titles, vec![json!("mid"), json!("old")]);

        let duplicate = tx
            .insert(&SURVEY_CONTRACT, &[survey(first, "again", "2024-01-01T00:00:00Z")])
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_left_join_and_filter_on_relation() {
        let store = MemoryStore::new();
        let survey_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.insert(
            &SURVEY_CONTRACT,
            &[survey(survey_id, "Onboarding", "2024-01-01T00:00:00Z")],
        )
        .await
        .unwrap();
        let mut question = Record::new();
        question.insert("id".into(), json!(Uuid::new_v4().to_string()));
        question.insert("survey_id".into(), json!(survey_id.to_string().to_uppercase()));
        question.insert("question_text".into(), json!("Why?"));
        tx.insert(&QUESTION_CONTRACT, &[question]).await.unwrap();

        let relation = QUESTION_CONTRACT.relation("survey").unwrap();
        let mut query = SelectQuery::with_defaults(&QUESTION_CONTRACT);
        query.joins.push(relation);
        let query = query.filter(Condition::new(
            ColumnRef::of("s", relation.field("title").unwrap()),
            FilterOp::ILike,
            vec![json!("onboard%")],
        ));

        let rows = tx.fetch(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["survey.title"], json!("Onboarding"));
        assert_eq!(rows[0]["survey_id"], json!(survey_id.to_string()));
    }

    #[tokio::test]
    async fn test_injected_insert_failure() {
        let store = MemoryStore::new();
        store.fail_inserts_into(CHOICE_CONTRACT.table);
        let mut tx = store.begin().await.unwrap();
        let mut choice = Record::new();
        choice.insert("id".into(), json!(Uuid::new_v4().to_string()));
        assert!(tx.insert(&CHOICE_CONTRACT, &[choice]).await.is_err());
    }

    #[test]
    fn test_like_patterns() {
        assert!(like_match("%board%", "Onboarding", false));
        assert!(!like_match("on%", "Onboarding", false));
        assert!(like_match("on%", "Onboarding", true));
        assert!(like_match("a_c", "abc", false));
        assert!(like_match("100\\%", "100%", false));
        assert!(!like_match("100\\%", "1000", false));
    }

    #[test]
    fn test_nulls_sort_last_ascending() {
        assert_eq!(
            compare_nullable(FieldKind::Text, &Value::Null, &json!("a")),
            Ordering::Greater
        );
    }
}
