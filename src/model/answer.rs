use serde::{Deserialize, Serialize};

use crate::model::contract::FieldKind::{DateTime, Email, Text, Uuid};
use crate::model::{
    DefaultFilter, Entity, FieldSpec, FilterOp, Id, Identifiable, JoinKind, QueryContract,
    Queryable, Relation, SoftDeletable, SortDirection, SortSpec, Timestamp,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: Option<Id>,
    pub response_id: Option<Id>,
    pub question_id: Option<Id>,
    pub choice_id: Option<Id>,
    pub answer_text: Option<String>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

pub static ANSWER_CONTRACT: QueryContract = QueryContract {
    end_point: "answers",
    table: "answers",
    alias: "m",
    fields: &[
        FieldSpec::new("id", Uuid),
        FieldSpec::new("response_id", Uuid),
        FieldSpec::new("question_id", Uuid),
        FieldSpec::new("choice_id", Uuid),
        FieldSpec::new("answer_text", Text),
        FieldSpec::new("created_at", DateTime),
        FieldSpec::new("updated_at", DateTime),
        FieldSpec::new("deleted_at", DateTime),
    ],
    required: &["response_id", "question_id"],
    defaults: &[],
    default_filters: &[DefaultFilter {
        field: "deleted_at",
        op: FilterOp::IsNull,
    }],
    default_sort: &[SortSpec {
        field: "updated_at",
        direction: SortDirection::Desc,
    }],
    relations: &[
        Relation {
            name: "response",
            join: JoinKind::Left,
            table: "responses",
            alias: "r",
            on: &[("id", "response_id")],
            fields: &[
                FieldSpec::new("id", Uuid),
                FieldSpec::new("respondent_name", Text),
                FieldSpec::new("respondent_email", Email),
            ],
        },
        Relation {
            name: "question",
            join: JoinKind::Left,
            table: "questions",
            alias: "q",
            on: &[("id", "question_id")],
            fields: &[
                FieldSpec::new("id", Uuid),
                FieldSpec::new("question_text", Text),
            ],
        },
        Relation {
            name: "choice",
            join: JoinKind::Left,
            table: "choices",
            alias: "c",
            on: &[("id", "choice_id")],
            fields: &[
                FieldSpec::new("id", Uuid),
                FieldSpec::new("choice_text", Text),
            ],
        },
    ],
    secondary_key: None,
    children: &[],
};

impl Identifiable for Answer {
    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}

impl SoftDeletable for Answer {
    fn deleted_at(&self) -> Option<Timestamp> {
        self.deleted_at
    }
}

impl Queryable for Answer {
    fn contract() -> &'static QueryContract {
        &ANSWER_CONTRACT
    }
}

impl Entity for Answer {}
