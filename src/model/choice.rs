use serde::{Deserialize, Serialize};

use crate::model::contract::FieldKind::{DateTime, Text, Uuid};
use crate::model::{
    DefaultFilter, Entity, FieldSpec, FilterOp, Id, Identifiable, JoinKind, QueryContract,
    Queryable, Relation, SoftDeletable, SortDirection, SortSpec, Timestamp,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: Option<Id>,
    pub question_id: Option<Id>,
    pub choice_text: Option<String>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

pub static CHOICE_CONTRACT: QueryContract = QueryContract {
    end_point: "choices",
    table: "choices",
    alias: "m",
    fields: &[
        FieldSpec::new("id", Uuid),
        FieldSpec::new("question_id", Uuid),
        FieldSpec::new("choice_text", Text),
        FieldSpec::new("created_at", DateTime),
        FieldSpec::new("updated_at", DateTime),
        FieldSpec::new("deleted_at", DateTime),
    ],
    required: &["question_id", "choice_text"],
    defaults: &[],
    default_filters: &[DefaultFilter {
        field: "deleted_at",
        op: FilterOp::IsNull,
    }],
    default_sort: &[SortSpec {
        field: "updated_at",
        direction: SortDirection::Desc,
    }],
    relations: &[Relation {
        name: "question",
        join: JoinKind::Left,
        table: "questions",
        alias: "q",
        on: &[("id", "question_id")],
        fields: &[
            FieldSpec::new("id", Uuid),
            FieldSpec::new("survey_id", Uuid),
            FieldSpec::new("question_text", Text),
        ],
    }],
    secondary_key: None,
    children: &[],
};

impl Identifiable for Choice {
    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}

impl SoftDeletable for Choice {
    fn deleted_at(&self) -> Option<Timestamp> {
        self.deleted_at
    }
}

impl Queryable for Choice {
    fn contract() -> &'static QueryContract {
        &CHOICE_CONTRACT
    }
}

impl Entity for Choice {}
