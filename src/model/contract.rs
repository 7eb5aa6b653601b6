//! Typed per-entity query descriptors.
//!
//! Every entity declares one static [`QueryContract`]: the table it lives in,
//! the fields callers may filter/sort/select on, the filters and sort that
//! apply when the caller says nothing, the relations it can be joined to and
//! the child collections it owns.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::model::ALL_CONTRACTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Uuid,
    Text,
    /// Text column that must hold an email address.
    Email,
    Bool,
    DateTime,
}

impl FieldKind {
    pub fn is_text(self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Email)
    }

    /// Check that a JSON payload value has the right shape for this kind.
    /// `null` is always accepted here; required-ness is checked elsewhere.
    pub fn check_json(self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            FieldKind::Uuid => match value.as_str() {
                Some(s) if Uuid::parse_str(s).is_ok() => Ok(()),
                _ => Err("must be a valid UUID".to_string()),
            },
            FieldKind::Text => match value {
                Value::String(_) => Ok(()),
                _ => Err("must be a string".to_string()),
            },
            FieldKind::Email => match value.as_str() {
                Some(s) if is_email(s) => Ok(()),
                Some(_) => Err("must be a valid email address".to_string()),
                None => Err("must be a string".to_string()),
            },
            FieldKind::Bool => match value {
                Value::Bool(_) => Ok(()),
                _ => Err("must be a boolean".to_string()),
            },
            FieldKind::DateTime => match value.as_str() {
                Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => Ok(()),
                _ => Err("must be an RFC 3339 date-time".to_string()),
            },
        }
    }

    /// Parse a raw query-string value into the JSON representation used by the store.
    pub fn parse_param(self, raw: &str) -> Result<Value, String> {
        match self {
            FieldKind::Uuid => Uuid::parse_str(raw)
                .map(|id| Value::String(id.to_string()))
                .map_err(|_| format!("'{}' is not a valid UUID", raw)),
            FieldKind::Text | FieldKind::Email => Ok(Value::String(raw.to_string())),
            FieldKind::Bool => match raw {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", raw)),
            },
            FieldKind::DateTime => DateTime::parse_from_rfc3339(raw)
                .map(|dt| {
                    serde_json::to_value(dt.with_timezone(&Utc)).unwrap_or(Value::Null)
                })
                .map_err(|_| format!("'{}' is not an RFC 3339 date-time", raw)),
        }
    }

    /// Total order over two non-null stored values of this kind.
    pub fn compare(self, left: &Value, right: &Value) -> Option<Ordering> {
        match self {
            FieldKind::Bool => Some(left.as_bool()?.cmp(&right.as_bool()?)),
            FieldKind::Uuid => {
                let l = Uuid::parse_str(left.as_str()?).ok()?;
                let r = Uuid::parse_str(right.as_str()?).ok()?;
                Some(l.cmp(&r))
            }
            FieldKind::DateTime => {
                let l = DateTime::parse_from_rfc3339(left.as_str()?).ok()?;
                let r = DateTime::parse_from_rfc3339(right.as_str()?).ok()?;
                Some(l.cmp(&r))
            }
            FieldKind::Text | FieldKind::Email => Some(left.as_str()?.cmp(right.as_str()?)),
        }
    }
}

fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    /// Hidden fields are filterable but never emitted in list output.
    pub hidden: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            column: name,
            kind,
            hidden: false,
        }
    }

    pub const fn hidden(self) -> Self {
        Self {
            hidden: true,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    /// Map a `field.$op` suffix to an operator.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let op = match suffix {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "in" => FilterOp::In,
            "nin" => FilterOp::NotIn,
            "null" => FilterOp::IsNull,
            _ => return None,
        };
        Some(op)
    }
}

/// A filter that is always applied unless the caller filters the same field.
#[derive(Debug, Clone, Copy)]
pub struct DefaultFilter {
    pub field: &'static str,
    pub op: FilterOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy)]
pub struct SortSpec {
    pub field: &'static str,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

/// A joinable table, only used when the caller asks for it with `$include`.
#[derive(Debug)]
pub struct Relation {
    pub name: &'static str,
    pub join: JoinKind,
    pub table: &'static str,
    pub alias: &'static str,
    /// Equality pairs `(relation column, main column)`.
    pub on: &'static [(&'static str, &'static str)],
    pub fields: &'static [FieldSpec],
}

impl Relation {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Value injected on write when the caller leaves a field unset.
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Bool(bool),
    Text(&'static str),
}

impl DefaultValue {
    pub fn to_json(self) -> Value {
        match self {
            DefaultValue::Bool(b) => Value::Bool(b),
            DefaultValue::Text(s) => Value::String(s.to_string()),
        }
    }
}

/// An owned one-to-many collection written together with its parent.
#[derive(Debug)]
pub struct ChildCollection {
    /// Payload/output field holding the array.
    pub field: &'static str,
    pub contract: &'static QueryContract,
    /// Column on the child table referencing the parent id.
    pub parent_key: &'static str,
    /// Fields a nested item must carry.
    pub required: &'static [&'static str],
    pub children: &'static [ChildCollection],
}

#[derive(Debug)]
pub struct QueryContract {
    pub end_point: &'static str,
    pub table: &'static str,
    pub alias: &'static str,
    pub fields: &'static [FieldSpec],
    pub required: &'static [&'static str],
    pub defaults: &'static [(&'static str, DefaultValue)],
    pub default_filters: &'static [DefaultFilter],
    pub default_sort: &'static [SortSpec],
    pub relations: &'static [Relation],
    /// Non-UUID lookup column for detail requests (slug/code style).
    pub secondary_key: Option<&'static str>,
    pub children: &'static [ChildCollection],
}

pub const ID: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

/// Fields the engine manages itself; callers cannot write them.
pub const MANAGED_FIELDS: &[&str] = &[ID, CREATED_AT, UPDATED_AT, DELETED_AT];

impl QueryContract {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn child(&self, field: &str) -> Option<&'static ChildCollection> {
        self.children.iter().find(|c| c.field == field)
    }

    pub fn id_field(&self) -> &'static FieldSpec {
        self.field(ID).unwrap_or(&self.fields[0])
    }

    pub fn visible_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|f| !f.hidden)
    }

    /// End-points whose cached output embeds rows of this contract.
    pub fn owners(&self) -> Vec<&'static str> {
        ALL_CONTRACTS
            .iter()
            .filter(|c| c.table != self.table && c.owns_table(self.table))
            .map(|c| c.end_point)
            .collect()
    }

    fn owns_table(&self, table: &str) -> bool {
        fn walk(children: &[ChildCollection], table: &str) -> bool {
            children
                .iter()
                .any(|c| c.contract.table == table || walk(c.children, table))
        }
        walk(self.children, table)
    }

    /// Every end-point whose cache a write to this contract can make stale.
    pub fn affected_end_points(&self) -> Vec<&'static str> {
        fn walk(children: &[ChildCollection], out: &mut Vec<&'static str>) {
            for child in children {
                out.push(child.contract.end_point);
                walk(child.children, out);
            }
        }
        let mut out = vec![self.end_point];
        walk(self.children, &mut out);
        out.extend(self.owners());
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CHOICE_CONTRACT, QUESTION_CONTRACT, SURVEY_CONTRACT};
    use serde_json::json;

    #[test]
    fn test_field_kind_checks_payload_values() {
        assert!(FieldKind::Uuid
            .check_json(&json!("7f0b6a8e-9f6f-4a53-9d4b-0c1a2b3c4d5e"))
            .is_ok());
        assert!(FieldKind::Uuid.check_json(&json!("nope")).is_err());
        assert!(FieldKind::Bool.check_json(&json!("true")).is_err());
        assert!(FieldKind::Bool.check_json(&Value::Null).is_ok());
        assert!(FieldKind::Email.check_json(&json!("a@b.io")).is_ok());
        assert!(FieldKind::Email.check_json(&json!("a@b")).is_err());
        assert!(FieldKind::DateTime
            .check_json(&json!("2024-01-02T03:04:05Z"))
            .is_ok());
    }

    #[test]
    fn test_parse_param_by_kind() {
        assert_eq!(FieldKind::Bool.parse_param("true").unwrap(), json!(true));
        assert!(FieldKind::Bool.parse_param("yes").is_err());
        assert_eq!(FieldKind::Text.parse_param("abc").unwrap(), json!("abc"));
    }

    #[test]
    fn test_compare_datetimes_across_offsets() {
        let a = json!("2024-01-01T10:00:00+02:00");
        let b = json!("2024-01-01T09:00:00Z");
        assert_eq!(FieldKind::DateTime.compare(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn test_affected_end_points_follow_ownership() {
        assert_eq!(
            SURVEY_CONTRACT.affected_end_points(),
            vec!["choices", "questions", "surveys"]
        );
        assert_eq!(
            QUESTION_CONTRACT.affected_end_points(),
            vec!["questions", "surveys"]
        );
        assert_eq!(
            CHOICE_CONTRACT.affected_end_points(),
            vec!["choices", "surveys"]
        );
    }
}
