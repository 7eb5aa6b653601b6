use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logic::pagination::{Links, PageContext};

/// Paginated list response: `{"count", "page_context", "links", "results"}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListModel {
    pub count: u64,
    pub page_context: PageContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    pub results: Vec<Value>,
}

impl ListModel {
    pub fn new(count: u64, page_context: PageContext) -> Self {
        Self {
            count,
            page_context,
            links: None,
            results: Vec::new(),
        }
    }
}
