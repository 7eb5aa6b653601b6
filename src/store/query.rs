use serde_json::Value;

use crate::model::{
    FieldKind, FieldSpec, FilterOp, Id, QueryContract, Relation, SortDirection, DELETED_AT, ID,
};

/// A column of the main table or of a joined relation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnRef {
    pub alias: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl ColumnRef {
    pub fn of(alias: &'static str, field: &FieldSpec) -> Self {
        Self {
            alias,
            column: field.column,
            kind: field.kind,
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: ColumnRef,
    pub op: FilterOp,
    /// One value for comparisons, many for `In`/`NotIn`, none for null checks.
    pub values: Vec<Value>,
}

impl Condition {
    pub fn new(column: ColumnRef, op: FilterOp, values: Vec<Value>) -> Self {
        Self { column, op, values }
    }

    pub fn eq(column: ColumnRef, value: Value) -> Self {
        Self::new(column, FilterOp::Eq, vec![value])
    }

    pub fn id_eq(contract: &'static QueryContract, id: Id) -> Self {
        Self::eq(
            ColumnRef::of(contract.alias, contract.id_field()),
            Value::String(id.to_string()),
        )
    }

    pub fn is_null(column: ColumnRef) -> Self {
        Self::new(column, FilterOp::IsNull, Vec::new())
    }

    pub fn any_of(column: ColumnRef, ids: &[Id]) -> Self {
        Self::new(
            column,
            FilterOp::In,
            ids.iter().map(|id| Value::String(id.to_string())).collect(),
        )
    }

    /// Live-row condition on a contract (`deleted_at IS NULL`).
    pub fn live(contract: &'static QueryContract) -> Option<Self> {
        contract
            .field(DELETED_AT)
            .map(|f| Self::is_null(ColumnRef::of(contract.alias, f)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// A backend-neutral SELECT over one contract plus optional joins.
///
/// Rows come back keyed by field name, joined fields as `<relation>.<field>`.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub contract: &'static QueryContract,
    pub joins: Vec<&'static Relation>,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl SelectQuery {
    /// Bare query without any default filter.
    pub fn new(contract: &'static QueryContract) -> Self {
        Self {
            contract,
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Query with the contract's default filters and default sort applied.
    pub fn with_defaults(contract: &'static QueryContract) -> Self {
        let mut query = Self::new(contract);
        for filter in contract.default_filters {
            if let Some(field) = contract.field(filter.field) {
                query.conditions.push(Condition::new(
                    ColumnRef::of(contract.alias, field),
                    filter.op,
                    Vec::new(),
                ));
            }
        }
        for sort in contract.default_sort {
            if let Some(field) = contract.field(sort.field) {
                query.order_by.push(OrderBy {
                    column: ColumnRef::of(contract.alias, field),
                    direction: sort.direction,
                });
            }
        }
        query
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order(mut self, field: &str, direction: SortDirection) -> Self {
        if let Some(spec) = self.contract.field(field) {
            self.order_by = vec![OrderBy {
                column: ColumnRef::of(self.contract.alias, spec),
                direction,
            }];
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Output columns: `(label, column, kind)` for the main table then each join.
    pub fn selected_columns(&self) -> Vec<(String, ColumnRef)> {
        let mut columns: Vec<(String, ColumnRef)> = self
            .contract
            .fields
            .iter()
            .map(|f| (f.name.to_string(), ColumnRef::of(self.contract.alias, f)))
            .collect();
        for relation in &self.joins {
            for f in relation.fields {
                columns.push((
                    format!("{}.{}", relation.name, f.name),
                    ColumnRef::of(relation.alias, f),
                ));
            }
        }
        columns
    }
}

/// Primary-key condition for use in targeted updates.
pub fn by_id(contract: &'static QueryContract, id: Id) -> Vec<Condition> {
    debug_assert!(contract.field(ID).is_some());
    vec![Condition::id_eq(contract, id)]
}
