//! The list query language: `$page`, `$per_page`, `$sort`, `$select`,
//! `$include` and `field[.$op]=value` filters, compiled against a contract.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::{AppError, AppResult};
use crate::logic::context::Settings;
use crate::model::{FilterOp, QueryContract, Record, Relation, SortDirection};
use crate::store::cache::list_key;
use crate::store::query::{ColumnRef, Condition, OrderBy, SelectQuery};

pub const PAGE: &str = "$page";
pub const PER_PAGE: &str = "$per_page";
pub const SORT: &str = "$sort";
pub const SELECT: &str = "$select";
pub const INCLUDE: &str = "$include";
pub const SKIP_RETURN: &str = "is_skip_return";

/// Raw query-string pairs in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(pub Vec<(String, String)>);

impl From<Vec<(String, String)>> for QueryParams {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

impl QueryParams {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Whether a write should answer with a bare success message.
    pub fn is_skip_return(&self) -> bool {
        matches!(self.get(SKIP_RETURN), Some("true") | Some("1"))
    }

    pub fn cache_key(&self, end_point: &str) -> String {
        list_key(end_point, &self.0)
    }

    pub fn compile(
        &self,
        contract: &'static QueryContract,
        settings: &Settings,
    ) -> AppResult<ListQuery> {
        let mut errors = BTreeMap::new();

        let page = match self.get(PAGE).map(str::parse::<i64>) {
            None => 1,
            Some(Ok(page)) => page.max(1) as u64,
            Some(Err(_)) => {
                errors.insert(PAGE.to_string(), "must be an integer".to_string());
                1
            }
        };
        let per_page = match self.get(PER_PAGE).map(str::parse::<i64>) {
            None => settings.default_per_page,
            Some(Ok(n)) if n >= 0 => (n as u64).min(settings.max_per_page),
            Some(_) => {
                errors.insert(
                    PER_PAGE.to_string(),
                    "must be a non-negative integer".to_string(),
                );
                settings.default_per_page
            }
        };

        let mut includes: Vec<&'static Relation> = Vec::new();
        for name in split_list(self.get(INCLUDE)) {
            match contract.relation(name) {
                Some(relation) if !includes.iter().any(|r| r.name == name) => {
                    includes.push(relation)
                }
                Some(_) => {}
                None => {
                    errors.insert(INCLUDE.to_string(), format!("unknown relation '{}'", name));
                }
            }
        }

        let fields = self.get(SELECT).map(|raw| {
            let mut names = Vec::new();
            for name in split_list(Some(raw)) {
                let visible = contract.field(name).map(|f| !f.hidden).unwrap_or(false);
                if visible || contract.child(name).is_some() {
                    names.push(name.to_string());
                } else {
                    errors.insert(SELECT.to_string(), format!("unknown field '{}'", name));
                }
            }
            names
        });

        let mut order_by = Vec::new();
        for item in split_list(self.get(SORT)) {
            let (path, direction) = match item.strip_prefix('-') {
                Some(path) => (path, SortDirection::Desc),
                None => (item.trim_start_matches('+'), SortDirection::Asc),
            };
            match resolve(contract, &includes, path) {
                Some(column) => order_by.push(OrderBy { column, direction }),
                None => {
                    errors.insert(SORT.to_string(), format!("unknown field '{}'", path));
                }
            }
        }

        let mut filters = Vec::new();
        for (key, raw) in &self.0 {
            if key.is_empty()
                || key == SKIP_RETURN
                || [PAGE, PER_PAGE, SORT, SELECT, INCLUDE].contains(&key.as_str())
            {
                continue;
            }
            if key.starts_with('$') {
                errors.insert(key.clone(), "unknown parameter".to_string());
                continue;
            }
            match parse_filter(contract, &includes, key, raw) {
                Ok(condition) => filters.push(condition),
                Err(message) => {
                    errors.insert(key.clone(), message);
                }
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation {
                message: "invalid query parameters".to_string(),
                detail: errors,
            });
        }

        let overridden: HashSet<&str> = filters
            .iter()
            .filter(|c| c.column.alias == contract.alias)
            .map(|c| c.column.column)
            .collect();
        let mut select = SelectQuery::with_defaults(contract);
        select.conditions.retain(|c| !overridden.contains(c.column.column));
        select.conditions.extend(filters);
        if !order_by.is_empty() {
            select.order_by = order_by;
        }
        select.joins = includes;

        Ok(ListQuery {
            select,
            page,
            per_page,
            fields,
        })
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A main field by name, or `relation.field` of an included relation.
fn resolve(
    contract: &'static QueryContract,
    includes: &[&'static Relation],
    path: &str,
) -> Option<ColumnRef> {
    if let Some(field) = contract.field(path) {
        return Some(ColumnRef::of(contract.alias, field));
    }
    let (name, field) = path.split_once('.')?;
    let relation = includes.iter().find(|r| r.name == name)?;
    relation.field(field).map(|f| ColumnRef::of(relation.alias, f))
}

fn parse_filter(
    contract: &'static QueryContract,
    includes: &[&'static Relation],
    key: &str,
    raw: &str,
) -> Result<Condition, String> {
    let (path, op) = match key.rsplit_once(".$") {
        Some((path, suffix)) => (
            path,
            FilterOp::from_suffix(suffix).ok_or_else(|| format!("unknown operator '${}'", suffix))?,
        ),
        None => (key, FilterOp::Eq),
    };
    let column = resolve(contract, includes, path).ok_or_else(|| "unknown field".to_string())?;

    let condition = match op {
        FilterOp::IsNull | FilterOp::IsNotNull => match raw {
            "true" | "1" => Condition::new(column, FilterOp::IsNull, Vec::new()),
            "false" | "0" => Condition::new(column, FilterOp::IsNotNull, Vec::new()),
            _ => return Err("$null takes true or false".to_string()),
        },
        FilterOp::In | FilterOp::NotIn => {
            let values = split_list(Some(raw))
                .map(|item| column.kind.parse_param(item))
                .collect::<Result<Vec<_>, _>>()?;
            Condition::new(column, op, values)
        }
        FilterOp::Like | FilterOp::ILike => {
            if !column.kind.is_text() {
                return Err("pattern operators need a text field".to_string());
            }
            Condition::new(column, op, vec![Value::String(raw.to_string())])
        }
        _ => Condition::new(column, op, vec![column.kind.parse_param(raw)?]),
    };
    Ok(condition)
}

/// A compiled list request: the select without pagination plus output shaping.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub select: SelectQuery,
    pub page: u64,
    pub per_page: u64,
    /// `$select` restriction, in request order.
    pub fields: Option<Vec<String>>,
}

impl ListQuery {
    pub fn is_count_only(&self) -> bool {
        self.per_page == 0
    }

    pub fn wants(&self, field: &str) -> bool {
        self.fields
            .as_ref()
            .map(|names| names.iter().any(|n| n == field))
            .unwrap_or(true)
    }

    /// Output object for one fetched row; joined relations become nested objects.
    pub fn shape(&self, row: &Record) -> Record {
        let contract = self.select.contract;
        let mut out = Record::new();
        for field in contract.visible_fields().filter(|f| self.wants(f.name)) {
            out.insert(
                field.name.to_string(),
                row.get(field.name).cloned().unwrap_or(Value::Null),
            );
        }
        for relation in &self.select.joins {
            let nested: Record = relation
                .fields
                .iter()
                .map(|f| {
                    let label = format!("{}.{}", relation.name, f.name);
                    (
                        f.name.to_string(),
                        row.get(&label).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect();
            let value = if nested.values().all(Value::is_null) {
                Value::Null
            } else {
                Value::Object(nested)
            };
            out.insert(relation.name.to_string(), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ANSWER_CONTRACT, QUESTION_CONTRACT, SURVEY_CONTRACT};
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_defaults_apply_without_parameters() {
        let query = QueryParams::default()
            .compile(&SURVEY_CONTRACT, &settings())
            .unwrap();

        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 10);
        assert_eq!(query.select.conditions.len(), 1);
        assert_eq!(query.select.conditions[0].op, FilterOp::IsNull);
        assert_eq!(query.select.order_by[0].column.column, "updated_at");
        assert_eq!(query.select.order_by[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_paging_is_clamped() {
        let query = QueryParams::from_pairs(&[("$page", "-3"), ("$per_page", "1000")])
            .compile(&SURVEY_CONTRACT, &settings())
            .unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 100);

        let count_only = QueryParams::from_pairs(&[("$per_page", "0")])
            .compile(&SURVEY_CONTRACT, &settings())
            .unwrap();
        assert!(count_only.is_count_only());
    }

    #[test]
    fn test_filters_sort_and_default_override() {
        let query = QueryParams::from_pairs(&[
            ("title.$ilike", "%onboard%"),
            ("is_active", "true"),
            ("deleted_at.$null", "false"),
            ("$sort", "title,-created_at"),
        ])
        .compile(&SURVEY_CONTRACT, &settings())
        .unwrap();

        let ops: Vec<_> = query.select.conditions.iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![FilterOp::ILike, FilterOp::Eq, FilterOp::IsNotNull]
        );
        assert_eq!(query.select.conditions[1].values, vec![json!(true)]);
        let sort: Vec<_> = query
            .select
            .order_by
            .iter()
            .map(|o| (o.column.column, o.direction))
            .collect();
        assert_eq!(
            sort,
            vec![("title", SortDirection::Asc), ("created_at", SortDirection::Desc)]
        );
    }

    #[test]
    fn test_relation_fields_need_include() {
        let missing = QueryParams::from_pairs(&[("survey.title", "x")])
            .compile(&QUESTION_CONTRACT, &settings());
        assert!(matches!(missing, Err(AppError::Validation { .. })));

        let query = QueryParams::from_pairs(&[
            ("$include", "survey"),
            ("survey.title.$like", "On%"),
            ("$sort", "-survey.title"),
        ])
        .compile(&QUESTION_CONTRACT, &settings())
        .unwrap();
        assert_eq!(query.select.joins.len(), 1);
        assert_eq!(query.select.conditions.last().unwrap().column.alias, "s");
        assert_eq!(query.select.order_by[0].column.alias, "s");
    }

    #[test]
    fn test_invalid_parameters_are_reported_per_key() {
        let err = QueryParams::from_pairs(&[
            ("nope", "1"),
            ("is_active", "maybe"),
            ("title.$between", "a"),
            ("$select", "deleted_at"),
            ("$foo", "1"),
        ])
        .compile(&SURVEY_CONTRACT, &settings())
        .unwrap_err();

        match err {
            AppError::Validation { detail, .. } => {
                let keys: Vec<_> = detail.keys().cloned().collect();
                assert_eq!(
                    keys,
                    vec!["$foo", "$select", "is_active", "nope", "title.$between"]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_in_list_parses_each_value() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let list = format!("{},{}", a, b);
        let query = QueryParams::from_pairs(&[("id.$in", list.as_str())])
            .compile(&SURVEY_CONTRACT, &settings())
            .unwrap();
        let condition = query.select.conditions.last().unwrap();
        assert_eq!(condition.op, FilterOp::In);
        assert_eq!(condition.values.len(), 2);

        let bad =
            QueryParams::from_pairs(&[("id.$in", "x,y")]).compile(&SURVEY_CONTRACT, &settings());
        assert!(bad.is_err());
    }

    #[test]
    fn test_shape_selects_and_nests_relations() {
        let query = QueryParams::from_pairs(&[
            ("$include", "question,choice"),
            ("$select", "id,answer_text"),
        ])
        .compile(&ANSWER_CONTRACT, &settings())
        .unwrap();
        let mut row = Record::new();
        row.insert("id".into(), json!("a"));
        row.insert("answer_text".into(), json!("yes"));
        row.insert("response_id".into(), json!("r"));
        row.insert("question.id".into(), json!("q"));
        row.insert("question.question_text".into(), json!("Why?"));

        let shaped = query.shape(&row);
        assert_eq!(shaped["id"], json!("a"));
        assert!(shaped.get("response_id").is_none());
        assert_eq!(shaped["question"]["question_text"], json!("Why?"));
        assert_eq!(shaped["choice"], Value::Null);
    }

    #[test]
    fn test_skip_return_flag() {
        assert!(QueryParams::from_pairs(&[("is_skip_return", "true")]).is_skip_return());
        assert!(!QueryParams::default().is_skip_return());
    }
}
