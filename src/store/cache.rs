use itertools::Itertools;
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;

/// Shared cache of serialized responses.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: String, value: String);

    /// Drop every list key of `prefix` and the detail keys of `ids`.
    fn invalidate(&self, prefix: &str, ids: &[String]);

    /// Drop every list and detail key of `prefix`.
    fn invalidate_end_point(&self, prefix: &str);
}

/// Detail entry key: `<endpoint>.<id>`.
pub fn detail_key(end_point: &str, id: &str) -> String {
    format!("{}.{}", end_point, id)
}

/// Bytes left as-is in query keys and values; `$` and `,` carry the list
/// query syntax.
pub const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b',');

/// One `key=value` pair with both sides percent-encoded.
pub fn query_pair(key: &str, value: &str) -> String {
    format!(
        "{}={}",
        utf8_percent_encode(key, QUERY_COMPONENT),
        utf8_percent_encode(value, QUERY_COMPONENT)
    )
}

/// List entry key: `<endpoint>?<canonical query>`, parameters sorted so that
/// reordering a query string hits the same entry.
pub fn list_key(end_point: &str, params: &[(String, String)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| query_pair(k, v))
        .sorted()
        .join("&");
    format!("{}?{}", end_point, query)
}

/// Process-wide cache ordered by key, so a list prefix is one range scan.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn remove_prefixed(entries: &mut BTreeMap<String, String>, prefix: &str) {
        let stale: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.remove(&key);
        }
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: String, value: String) {
        self.entries.write().insert(key, value);
    }

    fn invalidate(&self, prefix: &str, ids: &[String]) {
        let mut entries = self.entries.write();
        Self::remove_prefixed(&mut entries, &format!("{}?", prefix));
        for id in ids {
            entries.remove(&detail_key(prefix, id));
        }
    }

    fn invalidate_end_point(&self, prefix: &str) {
        let mut entries = self.entries.write();
        Self::remove_prefixed(&mut entries, &format!("{}?", prefix));
        Self::remove_prefixed(&mut entries, &format!("{}.", prefix));
    }
}

/// Cache used when caching is disabled: never hits, never stores.
#[derive(Debug, Default)]
pub struct NoopCache;

impl ResponseCache for NoopCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: String, _value: String) {}

    fn invalidate(&self, _prefix: &str, _ids: &[String]) {}

    fn invalidate_end_point(&self, _prefix: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_list_key_is_order_independent() {
        let a = list_key("surveys", &params(&[("$page", "2"), ("title", "x")]));
        let b = list_key("surveys", &params(&[("title", "x"), ("$page", "2")]));
        assert_eq!(a, b);
        assert_eq!(a, "surveys?$page=2&title=x");
    }

    #[test]
    fn test_list_key_escapes_separators() {
        let key = list_key("surveys", &params(&[("title", "a&b=c%")]));
        assert_eq!(key, "surveys?title=a%26b%3Dc%25");
    }

    #[test]
    fn test_list_key_encodes_spaces_and_non_ascii() {
        let key = list_key("surveys", &params(&[("title.$in", "café,a b")]));
        assert_eq!(key, "surveys?title.$in=caf%C3%A9,a%20b");
    }

    #[test]
    fn test_invalidate_removes_lists_and_named_details_only() {
        let cache = MemoryCache::new();
        cache.set(list_key("surveys", &[]), "[]".into());
        cache.set(list_key("surveys", &params(&[("$page", "2")])), "[]".into());
        cache.set(detail_key("surveys", "a"), "{}".into());
        cache.set(detail_key("surveys", "b"), "{}".into());
        cache.set(list_key("surveys_archive", &[]), "[]".into());
        cache.set(list_key("questions", &[]), "[]".into());

        cache.invalidate("surveys", &["a".to_string()]);

        assert!(cache.get("surveys?").is_none());
        assert!(cache.get("surveys?$page=2").is_none());
        assert!(cache.get("surveys.a").is_none());
        assert_eq!(cache.get("surveys.b").as_deref(), Some("{}"));
        assert!(cache.get("surveys_archive?").is_some());
        assert!(cache.get("questions?").is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_invalidate_end_point_removes_every_key_of_prefix() {
        let cache = MemoryCache::new();
        cache.set(list_key("questions", &[]), "[]".into());
        cache.set(detail_key("questions", "q1"), "{}".into());
        cache.set(detail_key("surveys", "s1"), "{}".into());

        cache.invalidate_end_point("questions");

        assert!(cache.get("questions?").is_none());
        assert!(cache.get("questions.q1").is_none());
        assert!(cache.get("surveys.s1").is_some());
    }

    #[test]
    fn test_noop_cache_never_hits() {
        let cache = NoopCache;
        cache.set("surveys.a".into(), "{}".into());
        assert!(cache.get("surveys.a").is_none());
    }
}
