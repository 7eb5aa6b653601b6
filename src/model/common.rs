use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::model::QueryContract;

pub type Id = Uuid;
pub type Timestamp = DateTime<Utc>;

/// A flat row as exchanged with the store: column name -> JSON value.
pub type Record = Map<String, Value>;

pub fn generate_id() -> Id {
    Uuid::new_v4()
}

pub fn now() -> Timestamp {
    Utc::now()
}

/// Entities that carry a primary key which is unset until the row is created.
pub trait Identifiable {
    fn id(&self) -> Option<Id>;
    fn set_id(&mut self, id: Id);
}

/// Entities that are never physically removed, only stamped with `deleted_at`.
pub trait SoftDeletable {
    fn deleted_at(&self) -> Option<Timestamp>;

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

/// Entities that expose a static query contract.
pub trait Queryable {
    fn contract() -> &'static QueryContract;

    /// Pluralized resource name used for routing, permissions and cache keys.
    fn end_point() -> &'static str {
        Self::contract().end_point
    }
}

/// Everything the generic use case needs from one entity type.
pub trait Entity:
    Identifiable
    + SoftDeletable
    + Queryable
    + Serialize
    + DeserializeOwned
    + Clone
    + Send
    + Sync
    + 'static
{
    /// Permission string for an action on this entity, e.g. `surveys.detail`.
    fn permission(action: &str) -> String {
        format!("{}.{}", Self::end_point(), action)
    }
}

/// Convert a store record into a typed entity.
pub fn from_record<E: DeserializeOwned>(record: Record) -> serde_json::Result<E> {
    serde_json::from_value(Value::Object(record))
}

/// Convert a serializable value into a JSON object map.
pub fn to_object<T: Serialize>(value: &T) -> serde_json::Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Record::new()),
    }
}
