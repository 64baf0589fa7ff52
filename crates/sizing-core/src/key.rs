//! Deterministic cache key construction.
//!
//! A [`CacheKey`] is a namespace (provider name or logical area such as
//! `market_size`) followed by a canonical serialization of the query
//! parameters. Parameters are held in a `BTreeMap`, so keys are sorted before
//! serialization and insertion order never affects the result.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Separator between the namespace and the serialized parameters.
const NAMESPACE_SEPARATOR: char = ':';

/// A primitive query parameter value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A string value.
    Str(String),
    /// A signed integer value.
    Int(i64),
    /// A floating point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// An explicit null.
    Null,
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// An opaque, deterministic cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from a namespace and a parameter mapping.
    ///
    /// The output is stable under key reordering and across repeated calls.
    /// An empty parameter set is legal.
    #[must_use]
    pub fn build<K, V, I>(namespace: &str, params: I) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let canonical: BTreeMap<String, ParamValue> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_sorted(namespace, &canonical)
    }

    fn from_sorted(namespace: &str, params: &BTreeMap<String, ParamValue>) -> Self {
        // Serializing string keys and primitive values cannot fail.
        let serialized = serde_json::to_string(params).unwrap_or_default();
        Self(format!("{namespace}{NAMESPACE_SEPARATOR}{serialized}"))
    }

    /// Wraps a raw key string without canonicalization.
    #[must_use]
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the prefix shared by every key built in `namespace`.
    #[must_use]
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{namespace}{NAMESPACE_SEPARATOR}")
    }

    /// Returns `true` if this key starts with `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::raw(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::raw(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
