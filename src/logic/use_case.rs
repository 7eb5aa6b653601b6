//! The generic per-entity use case: permission gate, cache-aside reads,
//! validated writes with nested cascade, and post-commit audit events.

use serde_json::Value;
use std::marker::PhantomData;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::logic::cascade::{self, stamp_new};
use crate::logic::context::RequestContext;
use crate::logic::hooks::HookEvent;
use crate::logic::pagination::{Links, PageContext};
use crate::logic::query_params::QueryParams;
use crate::logic::validate::{validate_payload, Action};
use crate::model::{
    from_record, generate_id, now, to_object, ChildCollection, Entity, Id, ListModel,
    QueryContract, Record, DELETED_AT, ID, MANAGED_FIELDS, UPDATED_AT,
};
use crate::store::cache::detail_key;
use crate::store::query::{by_id, ColumnRef, Condition, SelectQuery};

/// PUT replaces owned collections, PATCH appends to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Retires the existing children of every collection present in the payload.
    Full,
    /// Keeps existing children and appends the supplied ones.
    Partial,
}

impl WriteMode {
    pub fn method(self) -> &'static str {
        match self {
            WriteMode::Full => "PUT",
            WriteMode::Partial => "PATCH",
        }
    }
}

/// How a detail id resolves to a row.
struct Lookup {
    key: &'static str,
    cache_id: String,
    condition: Condition,
}

pub struct UseCase<'a, E> {
    ctx: &'a RequestContext,
    entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> UseCase<'a, E> {
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self {
            ctx,
            entity: PhantomData,
        }
    }

    fn contract() -> &'static QueryContract {
        E::contract()
    }

    /// Reads may use the shared cache unless this request already wrote the end-point.
    fn cache_allowed(&self) -> bool {
        !self.ctx.has_written(E::end_point())
    }

    fn lookup(id: &str) -> AppResult<Lookup> {
        let contract = Self::contract();
        if let Ok(uuid) = Uuid::parse_str(id) {
            return Ok(Lookup {
                key: ID,
                cache_id: uuid.to_string(),
                condition: Condition::id_eq(contract, uuid),
            });
        }
        match contract.secondary_key.and_then(|key| contract.field(key)) {
            Some(field) => Ok(Lookup {
                key: field.name,
                cache_id: id.to_string(),
                condition: Condition::eq(
                    ColumnRef::of(contract.alias, field),
                    Value::String(id.to_string()),
                ),
            }),
            None => Err(AppError::not_found(contract.end_point, "code", id)),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> AppResult<E> {
        self.ctx.require(&E::permission("detail"))?;
        self.find_by_id(id, true).await
    }

    /// Load one live row with its children; no permission check.
    async fn find_by_id(&self, id: &str, allow_cache: bool) -> AppResult<E> {
        let contract = Self::contract();
        let lookup = Self::lookup(id)?;
        let cache_key = detail_key(contract.end_point, &lookup.cache_id);
        let use_cache = allow_cache && self.cache_allowed();

        if use_cache {
            if let Some(cached) = self.ctx.cache().get(&cache_key) {
                match serde_json::from_str::<E>(&cached) {
                    Ok(entity) if entity.id().is_some() && !entity.is_deleted() => {
                        log::debug!("cache hit {}", cache_key);
                        return Ok(entity);
                    }
                    _ => log::debug!("ignoring unusable cache entry {}", cache_key),
                }
            }
        }

        let query = SelectQuery::with_defaults(contract)
            .filter(lookup.condition)
            .limit(1);
        let mut rows = self.ctx.fetch(&query).await?;
        if rows.is_empty() {
            return Err(AppError::not_found(contract.end_point, lookup.key, id));
        }
        rows.truncate(1);
        cascade::hydrate(self.ctx, contract.children, &mut rows).await?;
        let record = rows.pop().unwrap_or_default();
        let entity: E = from_record(record)?;

        if use_cache {
            log::debug!("cache fill {}", cache_key);
            self.ctx
                .cache()
                .set(cache_key, serde_json::to_string(&entity)?);
        }
        Ok(entity)
    }

    pub async fn get(&self, params: &QueryParams) -> AppResult<ListModel> {
        let contract = Self::contract();
        self.ctx.require(&E::permission("list"))?;

        let cache_key = params.cache_key(contract.end_point);
        let use_cache = self.cache_allowed();
        if use_cache {
            if let Some(cached) = self.ctx.cache().get(&cache_key) {
                if let Ok(list) = serde_json::from_str::<ListModel>(&cached) {
                    log::debug!("cache hit {}", cache_key);
                    return Ok(list);
                }
            }
        }

        let query = params.compile(contract, self.ctx.settings())?;
        let count = self.ctx.count(&query.select).await?;
        let page_context = PageContext::new(count, query.page, query.per_page);
        if query.is_count_only() {
            return Ok(ListModel::new(count, page_context));
        }

        let page = query
            .select
            .clone()
            .page(query.per_page, page_context.offset());
        let mut rows = self.ctx.fetch(&page).await?;
        let mut results: Vec<Record> = rows.iter().map(|row| query.shape(row)).collect();

        // Hydrate the raw rows: they keep the parent id even when `$select` drops it.
        let wanted: Vec<&ChildCollection> = contract
            .children
            .iter()
            .filter(|c| query.wants(c.field))
            .collect();
        if !wanted.is_empty() {
            cascade::hydrate(self.ctx, contract.children, &mut rows).await?;
            for (row, shaped) in rows.iter_mut().zip(results.iter_mut()) {
                for collection in &wanted {
                    let items = row
                        .remove(collection.field)
                        .unwrap_or(Value::Array(Vec::new()));
                    shaped.insert(collection.field.to_string(), items);
                }
            }
        }

        let mut list = ListModel::new(count, page_context);
        list.links = Some(Links::build(params.pairs(), &page_context));
        list.results = results.into_iter().map(Value::Object).collect();

        if use_cache {
            log::debug!("cache fill {}", cache_key);
            self.ctx
                .cache()
                .set(cache_key, serde_json::to_string(&list)?);
        }
        Ok(list)
    }

    pub async fn create(&self, payload: &Value) -> AppResult<E> {
        let contract = Self::contract();
        self.ctx.require(&E::permission("create"))?;
        let valid = validate_payload(contract, payload, Action::Create)?;

        let stamp = serde_json::to_value(now())?;
        let id = match valid.fields.get(ID).and_then(Value::as_str) {
            Some(raw) => Uuid::parse_str(raw)
                .map_err(|_| AppError::invalid_field(ID, "must be a valid UUID"))?,
            None => generate_id(),
        };
        let mut row = valid.fields.clone();
        stamp_new(contract, &mut row, id, &stamp);

        self.ctx.insert(contract, &[row]).await?;
        let children = cascade::write_children(self.ctx, id, &valid.children, &stamp).await?;
        log::debug!(
            "created {} {} with {} nested row(s)",
            contract.end_point,
            id,
            children
        );

        self.ctx.record_write(contract, vec![id.to_string()]);
        self.ctx.queue_event(self.event("POST", id, None, None));
        self.find_by_id(&id.to_string(), false).await
    }

    pub async fn update_by_id(&self, id: &str, payload: &Value, mode: WriteMode) -> AppResult<E> {
        let contract = Self::contract();
        self.ctx.require(&E::permission("edit"))?;
        let valid = validate_payload(contract, payload, Action::Update)?;

        let old = self.find_by_id(id, false).await?;
        let old_id = Self::stored_id(&old)?;
        let old_state = to_object(&old)?;
        let stamp = serde_json::to_value(now())?;

        let mut changes: Record = valid
            .fields
            .iter()
            .filter(|(k, _)| !MANAGED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (field, default) in contract.defaults {
            let unset = old_state.get(*field).map(Value::is_null).unwrap_or(true);
            if unset && !changes.contains_key(*field) {
                changes.insert(field.to_string(), default.to_json());
            }
        }
        changes.insert(UPDATED_AT.to_string(), stamp.clone());
        self.ctx
            .update(contract, &by_id(contract, old_id), &changes)
            .await?;

        if mode == WriteMode::Full {
            let replaced: Vec<&'static ChildCollection> =
                valid.children.iter().map(|n| n.collection).collect();
            cascade::retire_children(self.ctx, &replaced, old_id, &stamp).await?;
        }
        cascade::write_children(self.ctx, old_id, &valid.children, &stamp).await?;

        self.ctx.record_write(contract, Self::cache_ids(old_id, id));
        self.ctx.queue_event(self.event(
            mode.method(),
            old_id,
            valid.reason,
            Some(Value::Object(old_state)),
        ));
        self.find_by_id(&old_id.to_string(), false).await
    }

    pub async fn delete_by_id(&self, id: &str, payload: &Value) -> AppResult<()> {
        let contract = Self::contract();
        self.ctx.require(&E::permission("delete"))?;
        let valid = validate_payload(contract, payload, Action::Delete)?;

        let old = self.find_by_id(id, false).await?;
        let old_id = Self::stored_id(&old)?;

        let mut changes = Record::new();
        changes.insert(DELETED_AT.to_string(), serde_json::to_value(now())?);
        self.ctx
            .update(contract, &by_id(contract, old_id), &changes)
            .await?;

        self.ctx.record_write(contract, Self::cache_ids(old_id, id));
        self.ctx.queue_event(self.event(
            "DELETE",
            old_id,
            valid.reason,
            Some(serde_json::to_value(&old)?),
        ));
        Ok(())
    }

    fn stored_id(entity: &E) -> AppResult<Id> {
        entity
            .id()
            .ok_or_else(|| AppError::Internal(format!("{} row without id", E::end_point())))
    }

    /// Detail keys a write must evict: the primary key and the id as requested.
    fn cache_ids(id: Id, requested: &str) -> Vec<String> {
        let mut ids = vec![id.to_string()];
        if Uuid::parse_str(requested).is_err() {
            ids.push(requested.to_string());
        }
        ids
    }

    fn event(
        &self,
        method: &'static str,
        id: Id,
        reason: Option<String>,
        old: Option<Value>,
    ) -> HookEvent {
        HookEvent {
            end_point: E::end_point(),
            method,
            id: Some(id),
            user_id: self.ctx.user.user_id.clone(),
            reason,
            old,
            at: now(),
        }
    }
}
