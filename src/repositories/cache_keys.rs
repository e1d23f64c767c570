//! Cache key derivation
//!
//! All keys of a repository live under its namespace. Single-record keys sit
//! under `{ns}:id:`, every query-shaped key under `{ns}:q:`, so a write can
//! drop the affected ids exactly and every query result with one pattern.

use uuid::Uuid;

use crate::repositories::pagination::PageRequest;
use crate::storage::Filter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    namespace: String,
}

impl CacheKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn by_id(&self, id: Uuid) -> String {
        format!("{}:id:{}", self.namespace, id)
    }

    /// Key of one page of a filtered list
    pub fn list(&self, filter: &Filter, page: PageRequest) -> String {
        format!(
            "{}:q:list:{}:{}:p{}:s{}",
            self.namespace,
            filter.cache_fragment(),
            filter.sort_fragment(),
            page.page,
            page.size
        )
    }

    pub fn count(&self, filter: &Filter) -> String {
        format!("{}:q:count:{}", self.namespace, filter.cache_fragment())
    }

    /// Key of an entity-specific finder such as `by-email:a@x.com`
    pub fn query(&self, discriminator: &str) -> String {
        format!("{}:q:{}", self.namespace, discriminator)
    }

    /// Pattern covering every query-shaped key of the namespace
    pub fn query_pattern(&self) -> String {
        format!("{}:q:*", self.namespace)
    }

    /// Pattern covering every key of the namespace
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", self.namespace)
    }
}

/// Glob match with `*` (any run) and `?` (any one character)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
