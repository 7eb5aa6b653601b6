use serde::{Deserialize, Serialize};

use crate::model::contract::FieldKind::{Bool, DateTime, Email, Text, Uuid};
use crate::model::{
    DefaultFilter, DefaultValue, Entity, FieldSpec, FilterOp, Id, Identifiable, JoinKind,
    QueryContract, Queryable, Relation, SoftDeletable, SortDirection, SortSpec, Timestamp,
};

/// One respondent's submission against a survey.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<Id>,
    pub survey_id: Option<Id>,
    pub respondent_name: Option<String>,
    pub respondent_email: Option<String>,
    pub is_active: Option<bool>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

pub static RESPONSE_CONTRACT: QueryContract = QueryContract {
    end_point: "responses",
    table: "responses",
    alias: "m",
    fields: &[
        FieldSpec::new("id", Uuid),
        FieldSpec::new("survey_id", Uuid),
        FieldSpec::new("respondent_name", Text),
        FieldSpec::new("respondent_email", Email),
        FieldSpec::new("is_active", Bool),
        FieldSpec::new("created_at", DateTime),
        FieldSpec::new("updated_at", DateTime),
        FieldSpec::new("deleted_at", DateTime),
    ],
    required: &["survey_id"],
    defaults: &[("is_active", DefaultValue::Bool(true))],
    default_filters: &[DefaultFilter {
        field: "deleted_at",
        op: FilterOp::IsNull,
    }],
    default_sort: &[SortSpec {
        field: "updated_at",
        direction: SortDirection::Desc,
    }],
    relations: &[Relation {
        name: "survey",
        join: JoinKind::Left,
        table: "surveys",
        alias: "s",
        on: &[("id", "survey_id")],
        fields: &[
            FieldSpec::new("id", Uuid),
            FieldSpec::new("title", Text),
        ],
    }],
    secondary_key: None,
    children: &[],
};

impl Identifiable for Response {
    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}

impl SoftDeletable for Response {
    fn deleted_at(&self) -> Option<Timestamp> {
        self.deleted_at
    }
}

impl Queryable for Response {
    fn contract() -> &'static QueryContract {
        &RESPONSE_CONTRACT
    }
}

impl Entity for Response {}
