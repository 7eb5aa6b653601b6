use serde::{Deserialize, Serialize};

use crate::store::cache::query_pair;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub page: u64,
    pub per_page: u64,
    pub page_count: u64,
}

impl PageContext {
    pub fn new(count: u64, page: u64, per_page: u64) -> Self {
        let page_count = if per_page == 0 {
            0
        } else {
            count.div_ceil(per_page)
        };
        Self {
            page: page.max(1),
            per_page,
            page_count,
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// Relative links (`?…`) to neighbouring pages of the same query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    pub first: String,
    pub previous: Option<String>,
    pub next: Option<String>,
    pub last: String,
}

fn page_link(params: &[(String, String)], page: u64) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .filter(|(k, _)| k != "$page")
        .map(|(k, v)| query_pair(k, v))
        .collect();
    pairs.push(format!("$page={}", page));
    format!("?{}", pairs.join("&"))
}

impl Links {
    pub fn build(params: &[(String, String)], ctx: &PageContext) -> Self {
        let last = ctx.page_count.max(1);
        Self {
            first: page_link(params, 1),
            previous: (ctx.page > 1).then(|| page_link(params, (ctx.page - 1).min(last))),
            next: (ctx.page < ctx.page_count).then(|| page_link(params, ctx.page + 1)),
            last: page_link(params, last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(PageContext::new(0, 1, 10).page_count, 0);
        assert_eq!(PageContext::new(10, 1, 10).page_count, 1);
        assert_eq!(PageContext::new(11, 1, 10).page_count, 2);
        assert_eq!(PageContext::new(11, 1, 0).page_count, 0);
        assert_eq!(PageContext::new(25, 3, 10).offset(), 20);
    }

    #[test]
    fn test_links_for_middle_page() {
        let params = vec![
            ("title.$ilike".to_string(), "a b%".to_string()),
            ("$page".to_string(), "2".to_string()),
        ];
        let links = Links::build(&params, &PageContext::new(30, 2, 10));

        assert_eq!(links.first, "?title.$ilike=a%20b%25&$page=1");
        assert_eq!(links.previous.as_deref(), Some("?title.$ilike=a%20b%25&$page=1"));
        assert_eq!(links.next.as_deref(), Some("?title.$ilike=a%20b%25&$page=3"));
        assert_eq!(links.last, "?title.$ilike=a%20b%25&$page=3");
    }

    #[test]
    fn test_links_on_single_page() {
        let links = Links::build(&[], &PageContext::new(3, 1, 10));
        assert_eq!(links.first, "?$page=1");
        assert!(links.previous.is_none());
        assert!(links.next.is_none());
        assert_eq!(links.last, "?$page=1");
    }
}
