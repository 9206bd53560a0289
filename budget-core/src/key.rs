//! Cache keys and the patterns used to invalidate them.
//!
//! A [`CacheKey`] is an ordered tuple of a [`Resource`] and its parameters.
//! Equality, ordering and hashing all go through the key's canonical string,
//! computed once at construction, so two keys built from equal parameter
//! values are the same key no matter how the values were assembled (map
//! parameters are canonicalized with sorted field names).

use crate::Resource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};

/// Separator between the resource name and each parameter.
const SEPARATOR: char = '/';

/// One parameter of a cache key, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    Str(String),
    Map(BTreeMap<String, KeyPart>),
}

impl KeyPart {
    /// Build a map parameter from `(field, value)` pairs.
    pub fn map<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<KeyPart>,
        I: IntoIterator<Item = (K, V)>,
    {
        KeyPart::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Append the canonical form of this part to `out`.
    ///
    /// Strings are JSON-quoted, so a separator inside a string value can never
    /// be confused with a component boundary.
    fn write_canonical(&self, out: &mut String) {
        match self {
            KeyPart::Bool(b) => {
                let _ = write!(out, "{}", b);
            }
            KeyPart::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            KeyPart::Str(s) => write_quoted(s, out),
            KeyPart::Map(fields) => {
                out.push('{');
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_quoted(name, out);
                    out.push(':');
                    value.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    /// Canonical string of this part alone.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }
}

fn write_quoted(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        // Serializing a &str cannot fail; keep a lossless fallback anyway.
        Err(_) => {
            let _ = write!(out, "{:?}", s);
        }
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

/// Identifier for one logical server-derived view: resource plus parameters.
///
/// Keys are immutable once constructed.
#[derive(Debug, Clone)]
pub struct CacheKey {
    resource: Resource,
    parts: Vec<KeyPart>,
    canonical: String,
}

impl CacheKey {
    pub fn new(resource: Resource, parts: Vec<KeyPart>) -> Self {
        let canonical = canonicalize(resource, &parts);
        Self {
            resource,
            parts,
            canonical,
        }
    }

    /// Key for a resource that takes no parameters.
    pub fn of(resource: Resource) -> Self {
        Self::new(resource, Vec::new())
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// The canonical string that defines this key's identity.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// Canonical serialization of a `(resource, parameters)` tuple.
///
/// Format: `name` followed by `/part` for every parameter.
pub fn canonicalize(resource: Resource, parts: &[KeyPart]) -> String {
    let mut out = String::from(resource.name());
    for part in parts {
        out.push(SEPARATOR);
        part.write_canonical(&mut out);
    }
    out
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Selects a set of cache keys for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Exactly one key.
    Exact(CacheKey),
    /// Every key whose leading components equal these (e.g. all transaction pages).
    Prefix(CacheKey),
    /// Every key in the cache.
    All,
}

impl KeyPattern {
    /// All keys of a resource, whatever their parameters.
    pub fn resource(resource: Resource) -> Self {
        KeyPattern::Prefix(CacheKey::of(resource))
    }

    pub fn prefix(resource: Resource, parts: Vec<KeyPart>) -> Self {
        KeyPattern::Prefix(CacheKey::new(resource, parts))
    }

    pub fn exact(key: CacheKey) -> Self {
        KeyPattern::Exact(key)
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Prefix(prefix) => {
                let p = prefix.canonical();
                let k = key.canonical();
                // Component boundary: `transactions/1` must not match `transactions/12`.
                k.starts_with(p)
                    && (k.len() == p.len() || k[p.len()..].starts_with(SEPARATOR))
            }
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(key) => write!(f, "={}", key),
            KeyPattern::Prefix(key) => write!(f, "{}*", key),
            KeyPattern::All => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn page_key(page: i64, size: i64, sort: &str) -> CacheKey {
        CacheKey::new(
            Resource::Transactions,
            vec![KeyPart::map([
                ("page", KeyPart::from(page)),
                ("size", KeyPart::from(size)),
                ("sort", KeyPart::from(sort)),
            ])],
        )
    }

    #[test]
    fn test_equal_by_value() {
        let a = page_key(0, 20, "date,desc");
        let b = page_key(0, 20, "date,desc");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_map_field_order_is_irrelevant() {
        let a = CacheKey::new(
            Resource::Transactions,
            vec![KeyPart::map([("size", KeyPart::from(20i64)), ("page", KeyPart::from(1i64))])],
        );
        let b = CacheKey::new(
            Resource::Transactions,
            vec![KeyPart::map([("page", KeyPart::from(1i64)), ("size", KeyPart::from(20i64))])],
        );
        assert_eq!(a, b);
        assert_eq!(a.canonical(), r#"transactions/{"page":1,"size":20}"#);
    }

    #[test]
    fn test_different_parameters_differ() {
        assert_ne!(page_key(0, 20, "date,desc"), page_key(1, 20, "date,desc"));
        assert_ne!(
            CacheKey::new(Resource::Goal, vec![KeyPart::from(1i64)]),
            CacheKey::new(Resource::Goal, vec![KeyPart::from("1")])
        );
    }

    #[test]
    fn test_separator_inside_string_is_quoted() {
        let key = CacheKey::new(
            Resource::AccountBalance,
            vec![KeyPart::from("a/b"), KeyPart::from("SPENDING")],
        );
        assert_eq!(key.canonical(), r#"account-balance/"a/b"/"SPENDING""#);
    }

    #[test]
    fn test_resource_prefix_matches_all_parameters() {
        let pattern = KeyPattern::resource(Resource::Transactions);
        assert!(pattern.matches(&page_key(0, 20, "date,desc")));
        assert!(pattern.matches(&page_key(4, 50, "amount,asc")));
        assert!(pattern.matches(&CacheKey::of(Resource::Transactions)));
        assert!(!pattern.matches(&CacheKey::of(Resource::RecentTransactions)));
    }

    #[test]
    fn test_prefix_respects_component_boundary() {
        let pattern = KeyPattern::prefix(Resource::Goal, vec![KeyPart::from(1i64)]);
        assert!(pattern.matches(&CacheKey::new(Resource::Goal, vec![KeyPart::from(1i64)])));
        assert!(!pattern.matches(&CacheKey::new(Resource::Goal, vec![KeyPart::from(12i64)])));
    }

    #[test]
    fn test_exact_and_all() {
        let key = CacheKey::new(
            Resource::AccountBalance,
            vec![KeyPart::from("Everyday"), KeyPart::from("SPENDING")],
        );
        let other = CacheKey::new(
            Resource::AccountBalance,
            vec![KeyPart::from("Rainy day"), KeyPart::from("SAVINGS")],
        );
        let exact = KeyPattern::exact(key.clone());
        assert!(exact.matches(&key));
        assert!(!exact.matches(&other));
        assert!(KeyPattern::All.matches(&other));
    }
}
