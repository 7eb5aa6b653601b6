use serde::{Deserialize, Serialize};

use crate::model::contract::FieldKind::{Bool, DateTime, Text, Uuid};
use crate::model::{
    ChildCollection, DefaultFilter, DefaultValue, Entity, FieldSpec, FilterOp, Id, Identifiable,
    QueryContract, Queryable, SoftDeletable, SortDirection, SortSpec, Timestamp, CHOICE_CONTRACT,
    QUESTION_CONTRACT,
};

/// A survey together with its owned questions (and their choices).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: Option<Id>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<SurveyQuestion>>,
}

/// Question as embedded in a survey; the parent key is implied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub id: Option<Id>,
    pub question_text: Option<String>,
    pub is_active: Option<bool>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<QuestionChoice>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionChoice {
    pub id: Option<Id>,
    pub choice_text: Option<String>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

pub static SURVEY_CONTRACT: QueryContract = QueryContract {
    end_point: "surveys",
    table: "surveys",
    alias: "m",
    fields: &[
        FieldSpec::new("id", Uuid),
        FieldSpec::new("title", Text),
        FieldSpec::new("description", Text),
        FieldSpec::new("is_active", Bool),
        FieldSpec::new("created_at", DateTime),
        FieldSpec::new("updated_at", DateTime),
        FieldSpec::new("deleted_at", DateTime).hidden(),
    ],
    required: &["title"],
    defaults: &[("is_active", DefaultValue::Bool(true))],
    default_filters: &[DefaultFilter {
        field: "deleted_at",
        op: FilterOp::IsNull,
    }],
    default_sort: &[SortSpec {
        field: "updated_at",
        direction: SortDirection::Desc,
    }],
    relations: &[],
    secondary_key: None,
    children: &[ChildCollection {
        field: "questions",
        contract: &QUESTION_CONTRACT,
        parent_key: "survey_id",
        required: &["question_text"],
        children: &[ChildCollection {
            field: "choices",
            contract: &CHOICE_CONTRACT,
            parent_key: "question_id",
            required: &["choice_text"],
            children: &[],
        }],
    }],
};

impl Identifiable for Survey {
    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}

impl SoftDeletable for Survey {
    fn deleted_at(&self) -> Option<Timestamp> {
        self.deleted_at
    }
}

impl Queryable for Survey {
    fn contract() -> &'static QueryContract {
        &SURVEY_CONTRACT
    }
}

impl Entity for Survey {}
