//! Owned child collections: hydration on read, replace/append on write.
//!
//! Everything here is driven by the `ChildCollection` descriptors of a
//! contract, so any depth of nesting works the same way.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::AppResult;
use crate::logic::context::RequestContext;
use crate::logic::validate::NestedRows;
use crate::model::{
    generate_id, ChildCollection, Id, QueryContract, Record, SortDirection, CREATED_AT,
    DELETED_AT, ID, UPDATED_AT,
};
use crate::store::query::{ColumnRef, Condition, SelectQuery};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn id_of(row: &Record) -> Option<Id> {
    row.get(ID)
        .and_then(Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
}

/// Fill in managed columns and entity defaults for a row about to be inserted.
pub fn stamp_new(contract: &QueryContract, row: &mut Record, id: Id, now: &Value) {
    row.insert(ID.to_string(), Value::String(id.to_string()));
    row.insert(CREATED_AT.to_string(), now.clone());
    row.insert(UPDATED_AT.to_string(), now.clone());
    if contract.field(DELETED_AT).is_some() {
        row.insert(DELETED_AT.to_string(), Value::Null);
    }
    for (field, default) in contract.defaults {
        let unset = row.get(*field).map(Value::is_null).unwrap_or(true);
        if unset {
            row.insert(field.to_string(), default.to_json());
        }
    }
}

/// Attach each of `collections` to its parent rows, oldest child first,
/// without the parent key and without soft-deleted children.
pub fn hydrate<'a>(
    ctx: &'a RequestContext,
    collections: &'static [ChildCollection],
    parents: &'a mut [Record],
) -> BoxFuture<'a, AppResult<()>> {
    Box::pin(async move {
        if collections.is_empty() || parents.is_empty() {
            return Ok(());
        }
        let ids: Vec<Id> = parents.iter().filter_map(id_of).collect();

        for collection in collections {
            let child = collection.contract;
            let Some(key_field) = child.field(collection.parent_key) else {
                continue;
            };
            let query = SelectQuery::with_defaults(child)
                .filter(Condition::any_of(ColumnRef::of(child.alias, key_field), &ids))
                .order(CREATED_AT, SortDirection::Asc);
            let mut rows = ctx.fetch(&query).await?;
            hydrate(ctx, collection.children, &mut rows).await?;

            let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
            for mut row in rows {
                let parent = row
                    .remove(collection.parent_key)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                for field in child.fields.iter().filter(|f| f.hidden || f.name == DELETED_AT) {
                    row.remove(field.name);
                }
                grouped.entry(parent).or_default().push(Value::Object(row));
            }
            for parent in parents.iter_mut() {
                let items = id_of(parent)
                    .and_then(|id| grouped.remove(&id.to_string()))
                    .unwrap_or_default();
                parent.insert(collection.field.to_string(), Value::Array(items));
            }
        }
        Ok(())
    })
}

/// Soft-delete every live descendant of `parent_id` reachable through `collections`.
/// Returns the number of rows stamped.
pub async fn retire_children(
    ctx: &RequestContext,
    collections: &[&'static ChildCollection],
    parent_id: Id,
    now: &Value,
) -> AppResult<u64> {
    let mut retired = 0;
    let mut stack: Vec<(&'static ChildCollection, Vec<Id>)> =
        collections.iter().map(|c| (*c, vec![parent_id])).collect();

    while let Some((collection, parent_ids)) = stack.pop() {
        let child = collection.contract;
        let Some(key_field) = child.field(collection.parent_key) else {
            continue;
        };
        let mut query = SelectQuery::new(child)
            .filter(Condition::any_of(ColumnRef::of(child.alias, key_field), &parent_ids));
        if let Some(live) = Condition::live(child) {
            query = query.filter(live);
        }
        let ids: Vec<Id> = ctx.fetch(&query).await?.iter().filter_map(id_of).collect();
        if ids.is_empty() {
            continue;
        }
        for grandchild in collection.children {
            stack.push((grandchild, ids.clone()));
        }

        let mut changes = Record::new();
        changes.insert(DELETED_AT.to_string(), now.clone());
        let target = Condition::any_of(ColumnRef::of(child.alias, child.id_field()), &ids);
        retired += ctx.update(child, &[target], &changes).await?;
        log::debug!("retired {} row(s) of {}", ids.len(), child.table);
    }
    Ok(retired)
}

/// Insert supplied children under `parent_id`, one batch per table and level,
/// parents before their own children. Every child gets a fresh id.
pub async fn write_children(
    ctx: &RequestContext,
    parent_id: Id,
    children: &[NestedRows],
    now: &Value,
) -> AppResult<u64> {
    let mut written = 0;
    let mut level: Vec<(Id, &NestedRows)> = children.iter().map(|n| (parent_id, n)).collect();

    while !level.is_empty() {
        let mut batches: Vec<(&'static QueryContract, Vec<Record>)> = Vec::new();
        let mut next = Vec::new();

        for (parent, nested) in level {
            let collection = nested.collection;
            let mut rows = Vec::with_capacity(nested.items.len());
            for item in &nested.items {
                let id = generate_id();
                let mut row = item.fields.clone();
                stamp_new(collection.contract, &mut row, id, now);
                row.insert(
                    collection.parent_key.to_string(),
                    Value::String(parent.to_string()),
                );
                rows.push(row);
                next.extend(item.children.iter().map(|n| (id, n)));
            }
            match batches
                .iter_mut()
                .find(|(c, _)| std::ptr::eq(*c, collection.contract))
            {
                Some((_, batch)) => batch.extend(rows),
                None => batches.push((collection.contract, rows)),
            }
        }

        for (contract, rows) in &batches {
            if !rows.is_empty() {
                written += ctx.insert(*contract, rows).await?;
            }
        }
        level = next;
    }
    Ok(written)
}
