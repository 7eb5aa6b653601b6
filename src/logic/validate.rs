use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::model::{ChildCollection, QueryContract, Record, ID, MANAGED_FIELDS};

pub const REASON: &str = "reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// Supplied items of one child collection.
#[derive(Debug, Clone)]
pub struct NestedRows {
    pub collection: &'static ChildCollection,
    pub items: Vec<ValidPayload>,
}

/// A payload that passed structural validation: known, non-null, writable
/// fields only, with nested collections split out.
#[derive(Debug, Clone, Default)]
pub struct ValidPayload {
    pub fields: Record,
    pub children: Vec<NestedRows>,
    pub reason: Option<String>,
}

pub fn validate_payload(
    contract: &'static QueryContract,
    payload: &Value,
    action: Action,
) -> AppResult<ValidPayload> {
    let mut errors = BTreeMap::new();
    let object = match payload {
        Value::Object(object) => Some(object),
        Value::Null if action == Action::Delete => None,
        _ => {
            return Err(AppError::BadRequest(
                "request body must be a JSON object".to_string(),
            ))
        }
    };

    let mut valid = ValidPayload::default();
    if let Some(object) = object {
        if action == Action::Delete {
            valid.reason = object.get(REASON).and_then(Value::as_str).map(str::to_string);
        } else {
            valid = check_object(
                contract,
                contract.children,
                contract.required,
                None,
                object,
                action,
                "",
                &mut errors,
            );
        }
    }

    if action != Action::Create {
        match valid.reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => {}
            _ => {
                errors.insert(REASON.to_string(), "is required".to_string());
            }
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation {
            message: "validation failed".to_string(),
            detail: errors,
        });
    }
    Ok(valid)
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Validate one object against `contract`; nested arrays are looked up in
/// `children`, the collections owned at this level.
#[allow(clippy::too_many_arguments)]
fn check_object(
    contract: &'static QueryContract,
    children: &'static [ChildCollection],
    required: &[&str],
    parent_key: Option<&str>,
    object: &Record,
    action: Action,
    prefix: &str,
    errors: &mut BTreeMap<String, String>,
) -> ValidPayload {
    let mut valid = ValidPayload::default();
    let top_level = prefix.is_empty();

    for (key, value) in object {
        let path = format!("{}{}", prefix, key);
        if key == REASON && top_level {
            match value {
                Value::String(reason) => valid.reason = Some(reason.clone()),
                Value::Null => {}
                _ => {
                    errors.insert(path, "must be a string".to_string());
                }
            }
            continue;
        }
        if let Some(child) = children.iter().find(|c| c.field == key.as_str()) {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    let mut rows = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        let item_path = format!("{}[{}].", path, i);
                        match item {
                            Value::Object(item) => rows.push(check_object(
                                child.contract,
                                child.children,
                                child.required,
                                Some(child.parent_key),
                                item,
                                Action::Create,
                                &item_path,
                                errors,
                            )),
                            _ => {
                                errors.insert(
                                    item_path.trim_end_matches('.').to_string(),
                                    "must be an object".to_string(),
                                );
                            }
                        }
                    }
                    valid.children.push(NestedRows {
                        collection: child,
                        items: rows,
                    });
                }
                _ => {
                    errors.insert(path, "must be an array".to_string());
                }
            }
            continue;
        }
        // Nested rows get their parent key from the parent, never from the payload.
        if parent_key == Some(key.as_str()) {
            continue;
        }
        let Some(field) = contract.field(key) else {
            continue;
        };
        if let Err(message) = field.kind.check_json(value) {
            errors.insert(path, message);
            continue;
        }
        if value.is_null() {
            continue;
        }
        // A caller-chosen id is honoured on a top-level create only.
        let writable_id = key == ID && top_level && action == Action::Create;
        if MANAGED_FIELDS.contains(&key.as_str()) && !writable_id {
            continue;
        }
        valid.fields.insert(key.clone(), value.clone());
    }

    for name in required {
        let supplied = object.get(*name);
        let missing = match action {
            Action::Create => is_blank(supplied),
            // On update a required field may be omitted but not blanked.
            _ => matches!(supplied, Some(Value::String(s)) if s.trim().is_empty()),
        };
        if missing {
            errors
                .entry(format!("{}{}", prefix, name))
                .or_insert_with(|| "is required".to_string());
        }
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RESPONSE_CONTRACT, SURVEY_CONTRACT};
    use serde_json::json;

    fn detail_keys(err: AppError) -> Vec<String> {
        match err {
            AppError::Validation { detail, .. } => detail.into_keys().collect(),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_create_requires_title_and_nested_text() {
        let err = validate_payload(
            &SURVEY_CONTRACT,
            &json!({"questions": [{"choices": [{}]}, "x"]}),
            Action::Create,
        )
        .unwrap_err();

        assert_eq!(
            detail_keys(err),
            vec![
                "questions[0].choices[0].choice_text",
                "questions[0].question_text",
                "questions[1]",
                "title",
            ]
        );
    }

    #[test]
    fn test_create_keeps_known_fields_and_splits_children() {
        let id = uuid::Uuid::new_v4().to_string();
        let valid = validate_payload(
            &SURVEY_CONTRACT,
            &json!({
                "id": id,
                "title": "T",
                "description": null,
                "created_at": "2020-01-01T00:00:00Z",
                "unknown": 1,
                "questions": [{
                    "question_text": "Q",
                    "survey_id": "ignored",
                    "choices": [{"choice_text": "A"}]
                }]
            }),
            Action::Create,
        )
        .unwrap();

        assert_eq!(valid.fields.get("id"), Some(&json!(id)));
        assert_eq!(valid.fields.get("title"), Some(&json!("T")));
        assert!(valid.fields.get("description").is_none());
        assert!(valid.fields.get("created_at").is_none());
        assert!(valid.fields.get("unknown").is_none());
        assert_eq!(valid.children.len(), 1);
        let question = &valid.children[0].items[0];
        assert_eq!(question.fields.get("question_text"), Some(&json!("Q")));
        assert_eq!(question.children[0].items.len(), 1);
    }

    #[test]
    fn test_update_and_delete_require_reason() {
        let err =
            validate_payload(&SURVEY_CONTRACT, &json!({"title": "x"}), Action::Update).unwrap_err();
        assert_eq!(detail_keys(err), vec!["reason"]);

        let err = validate_payload(&SURVEY_CONTRACT, &Value::Null, Action::Delete).unwrap_err();
        assert_eq!(detail_keys(err), vec!["reason"]);

        let valid =
            validate_payload(&SURVEY_CONTRACT, &json!({"reason": "typo"}), Action::Delete).unwrap();
        assert_eq!(valid.reason.as_deref(), Some("typo"));
    }

    #[test]
    fn test_update_rejects_blanking_required_field_but_not_null() {
        let err = validate_payload(
            &SURVEY_CONTRACT,
            &json!({"title": "  ", "reason": "r"}),
            Action::Update,
        )
        .unwrap_err();
        assert_eq!(detail_keys(err), vec!["title"]);

        let valid = validate_payload(
            &SURVEY_CONTRACT,
            &json!({"title": null, "reason": "r"}),
            Action::Update,
        )
        .unwrap();
        assert!(valid.fields.is_empty());
    }

    #[test]
    fn test_email_and_types_are_checked() {
        let survey_id = uuid::Uuid::new_v4().to_string();
        let err = validate_payload(
            &RESPONSE_CONTRACT,
            &json!({
                "survey_id": survey_id,
                "respondent_email": "not-an-email",
                "is_active": "yes"
            }),
            Action::Create,
        )
        .unwrap_err();
        assert_eq!(detail_keys(err), vec!["is_active", "respondent_email"]);
    }

    #[test]
    fn test_non_object_body_is_bad_request() {
        let err = validate_payload(&SURVEY_CONTRACT, &json!([1]), Action::Create).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
