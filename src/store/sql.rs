//! Rendering of [`SelectQuery`] and writes into PostgreSQL statements.
//!
//! Identifiers only ever come from static query contracts; every caller
//! supplied value goes through a bind parameter.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::model::{FieldKind, FilterOp, QueryContract, Record, SortDirection};
use crate::store::query::{Condition, SelectQuery};

/// A JSON value converted to the Rust type bound for its column kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Uuid(Option<Uuid>),
    Text(Option<String>),
    Bool(Option<bool>),
    DateTime(Option<DateTime<Utc>>),
}

impl SqlValue {
    pub fn from_json(kind: FieldKind, value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(match kind {
                FieldKind::Uuid => SqlValue::Uuid(None),
                FieldKind::Text | FieldKind::Email => SqlValue::Text(None),
                FieldKind::Bool => SqlValue::Bool(None),
                FieldKind::DateTime => SqlValue::DateTime(None),
            });
        }
        let value = match kind {
            FieldKind::Uuid => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| anyhow!("expected a UUID string, got {}", value))?;
                SqlValue::Uuid(Some(Uuid::parse_str(raw).context("invalid UUID value")?))
            }
            FieldKind::Text | FieldKind::Email => SqlValue::Text(Some(
                value
                    .as_str()
                    .ok_or_else(|| anyhow!("expected a string, got {}", value))?
                    .to_string(),
            )),
            FieldKind::Bool => SqlValue::Bool(Some(
                value
                    .as_bool()
                    .ok_or_else(|| anyhow!("expected a boolean, got {}", value))?,
            )),
            FieldKind::DateTime => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| anyhow!("expected a date-time string, got {}", value))?;
                SqlValue::DateTime(Some(
                    DateTime::parse_from_rfc3339(raw)
                        .context("invalid date-time value")?
                        .with_timezone(&Utc),
                ))
            }
        };
        Ok(value)
    }
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: SqlValue) {
    match value {
        SqlValue::Uuid(v) => builder.push_bind(v),
        SqlValue::Text(v) => builder.push_bind(v),
        SqlValue::Bool(v) => builder.push_bind(v),
        SqlValue::DateTime(v) => builder.push_bind(v),
    };
}

fn push_from(builder: &mut QueryBuilder<'static, Postgres>, query: &SelectQuery) {
    let contract = query.contract;
    builder.push(format!(" FROM {} AS {}", contract.table, contract.alias));
    for relation in &query.joins {
        let join = match relation.join {
            crate::model::JoinKind::Left => "LEFT JOIN",
            crate::model::JoinKind::Inner => "INNER JOIN",
        };
        let on = relation
            .on
            .iter()
            .map(|(rel, main)| format!("{}.{} = {}.{}", relation.alias, rel, contract.alias, main))
            .collect::<Vec<_>>()
            .join(" AND ");
        builder.push(format!(
            " {} {} AS {} ON {}",
            join, relation.table, relation.alias, on
        ));
    }
}

fn push_condition(
    builder: &mut QueryBuilder<'static, Postgres>,
    condition: &Condition,
) -> Result<()> {
    let column = condition.column.qualified();
    let kind = condition.column.kind;
    let single = || -> Result<SqlValue> {
        let value = condition
            .values
            .first()
            .ok_or_else(|| anyhow!("filter on {} is missing its value", column))?;
        SqlValue::from_json(kind, value)
    };
    let comparison = match condition.op {
        FilterOp::IsNull => {
            builder.push(format!("{} IS NULL", column));
            return Ok(());
        }
        FilterOp::IsNotNull => {
            builder.push(format!("{} IS NOT NULL", column));
            return Ok(());
        }
        FilterOp::In | FilterOp::NotIn => {
            let negate = condition.op == FilterOp::NotIn;
            if condition.values.is_empty() {
                builder.push(if negate { "TRUE" } else { "FALSE" });
                return Ok(());
            }
            builder.push(format!("{} {} (", column, if negate { "NOT IN" } else { "IN" }));
            for (i, value) in condition.values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, SqlValue::from_json(kind, value)?);
            }
            builder.push(")");
            return Ok(());
        }
        FilterOp::Eq => "=",
        FilterOp::Ne => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        FilterOp::Like => "LIKE",
        FilterOp::ILike => "ILIKE",
    };
    let value = single()?;
    builder.push(format!("{} {} ", column, comparison));
    push_value(builder, value);
    Ok(())
}

fn push_where(
    builder: &mut QueryBuilder<'static, Postgres>,
    conditions: &[Condition],
) -> Result<()> {
    for (i, condition) in conditions.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        push_condition(builder, condition)?;
    }
    Ok(())
}

pub fn select(query: &SelectQuery) -> Result<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new("SELECT ");
    for (i, (label, column)) in query.selected_columns().iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format!("{} AS \"{}\"", column.qualified(), label));
    }
    push_from(&mut builder, query);
    push_where(&mut builder, &query.conditions)?;
    if !query.order_by.is_empty() {
        let order = query
            .order_by
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {}", o.column.qualified(), direction)
            })
            .collect::<Vec<_>>()
            .join(", ");
        builder.push(format!(" ORDER BY {}", order));
    }
    if let Some(limit) = query.limit {
        builder.push(format!(" LIMIT {} OFFSET {}", limit, query.offset));
    } else if query.offset > 0 {
        builder.push(format!(" OFFSET {}", query.offset));
    }
    Ok(builder)
}

pub fn count(query: &SelectQuery) -> Result<QueryBuilder<'static, Postgres>> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*)");
    push_from(&mut builder, query);
    push_where(&mut builder, &query.conditions)?;
    Ok(builder)
}

pub fn insert(
    contract: &QueryContract,
    rows: &[Record],
) -> Result<QueryBuilder<'static, Postgres>> {
    let columns = contract
        .fields
        .iter()
        .map(|f| f.column)
        .collect::<Vec<_>>()
        .join(", ");
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES ",
        contract.table, columns
    ));
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push("(");
        for (j, field) in contract.fields.iter().enumerate() {
            if j > 0 {
                builder.push(", ");
            }
            let value = row.get(field.name).unwrap_or(&Value::Null);
            push_value(
                &mut builder,
                SqlValue::from_json(field.kind, value)
                    .with_context(|| format!("{}.{}", contract.table, field.name))?,
            );
        }
        builder.push(")");
    }
    Ok(builder)
}

/// `UPDATE … SET …` for the contract fields present in `changes`; `None` when nothing to set.
pub fn update(
    contract: &QueryContract,
    conditions: &[Condition],
    changes: &Record,
) -> Result<Option<QueryBuilder<'static, Postgres>>> {
    let assignments: Vec<_> = contract
        .fields
        .iter()
        .filter_map(|f| changes.get(f.name).map(|v| (f, v)))
        .collect();
    if assignments.is_empty() {
        return Ok(None);
    }
    let mut builder = QueryBuilder::new(format!(
        "UPDATE {} AS {} SET ",
        contract.table, contract.alias
    ));
    for (i, (field, value)) in assignments.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format!("{} = ", field.column));
        push_value(&mut builder, SqlValue::from_json(field.kind, value)?);
    }
    push_where(&mut builder, conditions)?;
    Ok(Some(builder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QUESTION_CONTRACT, SURVEY_CONTRACT};
    use crate::store::query::{ColumnRef, Condition};
    use serde_json::json;

    #[test]
    fn test_select_with_defaults_and_page() {
        let query = SelectQuery::with_defaults(&SURVEY_CONTRACT).page(10, 20);
        let builder = select(&query).unwrap();
        let sql = builder.sql();

        assert_eq!(
            sql,
            "SELECT m.id AS \"id\", m.title AS \"title\", m.description AS \"description\", \
             m.is_active AS \"is_active\", m.created_at AS \"created_at\", \
             m.updated_at AS \"updated_at\", m.deleted_at AS \"deleted_at\" \
             FROM surveys AS m WHERE m.deleted_at IS NULL \
             ORDER BY m.updated_at DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_count_with_join_and_bound_filter() {
        let relation = QUESTION_CONTRACT.relation("survey").unwrap();
        let mut query = SelectQuery::with_defaults(&QUESTION_CONTRACT);
        query.joins.push(relation);
        let query = query.filter(Condition::eq(
            ColumnRef::of("s", relation.field("title").unwrap()),
            json!("Onboarding"),
        ));
        let builder = count(&query).unwrap();
        let sql = builder.sql();

        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM questions AS m LEFT JOIN surveys AS s ON s.id = m.survey_id \
             WHERE m.deleted_at IS NULL AND s.title = $1"
        );
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let column = ColumnRef::of("m", SURVEY_CONTRACT.field("id").unwrap());
        let query = SelectQuery::new(&SURVEY_CONTRACT)
            .filter(Condition::new(column, FilterOp::In, Vec::new()));
        let builder = count(&query).unwrap();
        assert!(builder.sql().ends_with("WHERE FALSE"));
    }

    #[test]
    fn test_update_only_sets_known_fields() {
        let mut changes = Record::new();
        changes.insert("title".into(), json!("New"));
        changes.insert("questions".into(), json!([]));
        let id = uuid::Uuid::new_v4();
        let builder = update(
            &SURVEY_CONTRACT,
            &[Condition::id_eq(&SURVEY_CONTRACT, id)],
            &changes,
        )
        .unwrap()
        .unwrap();

        assert_eq!(builder.sql(), "UPDATE surveys AS m SET title = $1 WHERE m.id = $2");
    }

    #[test]
    fn test_uuid_value_rejects_garbage() {
        assert!(SqlValue::from_json(FieldKind::Uuid, &json!("zzz")).is_err());
        assert_eq!(
            SqlValue::from_json(FieldKind::Bool, &Value::Null).unwrap(),
            SqlValue::Bool(None)
        );
    }
}
