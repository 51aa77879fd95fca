//! Namespaced cache key system for multi-tenant isolation.
//!
//! Every key written by the facade is built from a namespace, a group and an
//! identifier. The encoded form keeps the historical layout
//! `namespace-cache-group-identifier`, so group membership is a plain string
//! prefix test, but each component is escaped so that the delimiter can never
//! appear inside a component.

use std::fmt;

/// Delimiter between key components.
const DELIMITER: char = '-';

/// Marker segment separating the namespace from group and identifier.
const CACHE_SEGMENT: &str = "cache";

/// Suffix of the reserved per-namespace index key.
const INDEX_SUFFIX: &str = "index";

/// Suffix of the reserved per-namespace lock sentinel key.
const LOCK_SUFFIX: &str = "index_lock";

/// A cache key scoped to a namespace and a group.
///
/// # Encoding
///
/// `encode()` produces `{ns}-cache-{group}-{id}` where every component has
/// `%` replaced by `%25` and `-` replaced by `%2D`. Components free of those
/// two characters are emitted verbatim. Because no escaped component contains
/// `-`, decoding splits on exactly three delimiters and the mapping is
/// injective: two distinct triples never share an encoded key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedKey {
    /// Private inner data - cannot be constructed externally
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    namespace: String,
    group: String,
    identifier: String,
}

impl NamespacedKey {
    /// Create a new namespaced cache key.
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            inner: KeyInner {
                namespace: namespace.into(),
                group: group.into(),
                identifier: identifier.into(),
            },
        }
    }

    /// Get the namespace this key belongs to.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Get the group this key belongs to.
    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// Get the caller-supplied identifier.
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Encode this key into the backend key string.
    pub fn encode(&self) -> String {
        let mut key = Self::group_prefix(&self.inner.namespace, &self.inner.group);
        key.push_str(&escape(&self.inner.identifier));
        key
    }

    /// Decode a backend key produced by [`NamespacedKey::encode`].
    ///
    /// Returns `None` for reserved keys, foreign keys, and malformed escapes.
    pub fn decode(key: &str) -> Option<Self> {
        let mut parts = key.split(DELIMITER);
        let namespace = parts.next()?;
        if parts.next()? != CACHE_SEGMENT {
            return None;
        }
        let group = parts.next()?;
        let identifier = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self::new(
            unescape(namespace)?,
            unescape(group)?,
            unescape(identifier)?,
        ))
    }

    /// Prefix shared by every data key of a namespace.
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}{DELIMITER}{CACHE_SEGMENT}{DELIMITER}", escape(namespace))
    }

    /// Prefix shared by every data key of one group within a namespace.
    ///
    /// Group membership is `key.starts_with(&group_prefix(..))`.
    pub fn group_prefix(namespace: &str, group: &str) -> String {
        let mut prefix = Self::namespace_prefix(namespace);
        prefix.push_str(&escape(group));
        prefix.push(DELIMITER);
        prefix
    }

    /// Reserved key holding the invalidation index of a namespace.
    pub fn index_key(namespace: &str) -> String {
        format!("{}{DELIMITER}{INDEX_SUFFIX}", escape(namespace))
    }

    /// Reserved key holding the index lock sentinel of a namespace.
    pub fn lock_key(namespace: &str) -> String {
        format!("{}{DELIMITER}{LOCK_SUFFIX}", escape(namespace))
    }
}

impl fmt::Display for NamespacedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Escape a single key component.
fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%2D"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`]. Only the two escapes it emits are accepted.
fn unescape(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape_seq = rest.get(pos..pos + 3)?;
        match escape_seq {
            "%25" => out.push('%'),
            "%2D" => out.push(DELIMITER),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_components_keep_historical_layout() {
        let key = NamespacedKey::new("shop", "products", "42");
        assert_eq!(key.encode(), "shop-cache-products-42");
    }

    #[test]
    fn test_reserved_keys() {
        assert_eq!(NamespacedKey::index_key("shop"), "shop-index");
        assert_eq!(NamespacedKey::lock_key("shop"), "shop-index_lock");
        assert_eq!(NamespacedKey::index_key("a-b"), "a%2Db-index");
    }

    #[test]
    fn test_delimiter_is_escaped() {
        let key = NamespacedKey::new("ns", "a-b", "c");
        assert_eq!(key.encode(), "ns-cache-a%2Db-c");

        let other = NamespacedKey::new("ns", "a", "b-c");
        assert_eq!(other.encode(), "ns-cache-a-b%2Dc");
        assert_ne!(key.encode(), other.encode());
    }

    #[test]
    fn test_group_prefix_does_not_match_longer_group() {
        let prefix = NamespacedKey::group_prefix("ns", "g1");
        let member = NamespacedKey::new("ns", "g1", "x").encode();
        let sibling = NamespacedKey::new("ns", "g10", "x").encode();
        let dashed = NamespacedKey::new("ns", "g1-x", "y").encode();

        assert!(member.starts_with(&prefix));
        assert!(!sibling.starts_with(&prefix));
        assert!(!dashed.starts_with(&prefix));
    }

    #[test]
    fn test_decode_rejects_reserved_and_foreign_keys() {
        assert!(NamespacedKey::decode(&NamespacedKey::index_key("ns")).is_none());
        assert!(NamespacedKey::decode(&NamespacedKey::lock_key("ns")).is_none());
        assert!(NamespacedKey::decode("ns-other-g-i").is_none());
        assert!(NamespacedKey::decode("ns-cache-g-i-extra").is_none());
        assert!(NamespacedKey::decode("ns-cache-g-%4").is_none());
        assert!(NamespacedKey::decode("ns-cache-g-%41").is_none());
    }

    #[test]
    fn test_decode_plain_key() {
        let decoded = NamespacedKey::decode("shop-cache-products-42").unwrap();
        assert_eq!(decoded.namespace(), "shop");
        assert_eq!(decoded.group(), "products");
        assert_eq!(decoded.identifier(), "42");
    }

    fn component() -> impl Strategy<Value = String> {
        "[a-z0-9%_-]{0,8}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Encoding then decoding returns the same triple.
        #[test]
        fn prop_encode_decode_identity(
            ns in component(),
            group in component(),
            id in component(),
        ) {
            let key = NamespacedKey::new(ns, group, id);
            let decoded = NamespacedKey::decode(&key.encode());
            prop_assert_eq!(decoded, Some(key));
        }

        /// Distinct triples never collide, even when components contain the delimiter.
        #[test]
        fn prop_distinct_triples_never_collide(
            a in (component(), component(), component()),
            b in (component(), component(), component()),
        ) {
            prop_assume!(a != b);
            let ka = NamespacedKey::new(a.0, a.1, a.2).encode();
            let kb = NamespacedKey::new(b.0, b.1, b.2).encode();
            prop_assert_ne!(ka, kb);
        }

        /// A key belongs to exactly the group prefix it was built with.
        #[test]
        fn prop_group_prefix_membership(
            ns in component(),
            g1 in component(),
            g2 in component(),
            id in component(),
        ) {
            let key = NamespacedKey::new(ns.clone(), g1.clone(), id).encode();
            prop_assert!(key.starts_with(&NamespacedKey::group_prefix(&ns, &g1)));
            if g1 != g2 {
                prop_assert!(!key.starts_with(&NamespacedKey::group_prefix(&ns, &g2)));
            }
        }

        /// Data keys never collide with the reserved index or lock keys.
        #[test]
        fn prop_data_keys_never_hit_reserved_keys(
            ns in component(),
            group in component(),
            id in component(),
        ) {
            let key = NamespacedKey::new(ns.clone(), group, id).encode();
            prop_assert_ne!(&key, &NamespacedKey::index_key(&ns));
            prop_assert_ne!(&key, &NamespacedKey::lock_key(&ns));
        }
    }
}
