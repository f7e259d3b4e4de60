//! Structural index: dotted JSON paths over payload types.
//!
//! The grouping/ordering pipeline addresses payload fields by their JSON
//! names (`project.web_url`, `username`). Each payload type declares the
//! paths it supports once, and values are read from the payload's serialized
//! JSON form, so the keys visible to operators are exactly the wire names.
//! Two synthetic keys extend every index: `host` (the element's host
//! project) and `count` (group size, resolved by the pipeline rather than a
//! field lookup).

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Synthetic key ordering rows by the host's project name.
pub const HOST_KEY: &str = "host";

/// Synthetic key ordering rows by group size.
pub const COUNT_KEY: &str = "count";

/// A payload that can be grouped and ordered by dotted JSON paths.
pub trait Structural: Serialize {
    /// The dotted paths valid for `group_by` / `order_by` on this type.
    fn paths() -> &'static [&'static str];
}

/// Registers the path table for a payload type.
#[macro_export]
macro_rules! structural_paths {
    ($ty:ty, [$($path:literal),* $(,)?]) => {
        impl $crate::index::Structural for $ty {
            fn paths() -> &'static [&'static str] {
                &[$($path),*]
            }
        }
    };
}

/// The per-type index: declared paths plus the synthetic keys.
#[derive(Debug, Clone)]
pub struct StructIndex {
    paths: HashSet<&'static str>,
}

impl StructIndex {
    pub fn of<T: Structural>() -> StructIndex {
        StructIndex {
            paths: T::paths().iter().copied().collect(),
        }
    }

    /// Whether a key resolves on this type (synthetic keys always do).
    pub fn contains(&self, key: &str) -> bool {
        key == HOST_KEY || key == COUNT_KEY || self.paths.contains(key)
    }

    /// True iff at least one of the keys resolves.
    pub fn valid_order_by<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().any(|k| self.contains(k.as_ref()))
    }

    /// Reject any key that does not resolve on this type.
    pub fn require<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        for key in keys {
            if !self.contains(key.as_ref()) {
                return Err(Error::config(format!(
                    "invalid struct field: {}",
                    key.as_ref()
                )));
            }
        }
        Ok(())
    }
}

/// Walk a dotted path through a JSON value. `null` anywhere along the way
/// means "not present".
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// The first non-null value across the listed keys, or a validation error
/// when every key is absent on this instance.
pub fn first_valid_value<'a, S: AsRef<str>>(keys: &[S], value: &'a Value) -> Result<&'a Value> {
    for key in keys {
        if let Some(v) = lookup(value, key.as_ref()) {
            return Ok(v);
        }
    }
    let names: Vec<&str> = keys.iter().map(|k| k.as_ref()).collect();
    Err(Error::validation(format!("field not found: {names:?}")))
}

/// The display string for a field value: bare strings stay unquoted,
/// everything else renders as compact JSON.
pub fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Probe {
        id: u64,
        username: String,
    }

    structural_paths!(Probe, ["id", "username"]);

    #[test]
    fn index_contains_declared_and_synthetic_keys() {
        let index = StructIndex::of::<Probe>();
        assert!(index.contains("id"));
        assert!(index.contains("username"));
        assert!(index.contains(HOST_KEY));
        assert!(index.contains(COUNT_KEY));
        assert!(!index.contains("email"));
    }

    #[test]
    fn valid_order_by_needs_one_resolving_key() {
        let index = StructIndex::of::<Probe>();
        assert!(index.valid_order_by(&["nope", "username"]));
        assert!(!index.valid_order_by(&["nope", "also_nope"]));
        assert!(index.require(&["count", "username"]).is_ok());
        assert!(index.require(&["count", "email"]).is_err());
    }

    #[test]
    fn lookup_walks_nested_paths() {
        let v = json!({
            "project": { "web_url": "https://gl/a", "namespace": { "path": "grp" } },
            "archived": false
        });
        assert_eq!(
            lookup(&v, "project.web_url"),
            Some(&json!("https://gl/a"))
        );
        assert_eq!(lookup(&v, "project.namespace.path"), Some(&json!("grp")));
        assert_eq!(lookup(&v, "archived"), Some(&json!(false)));
        assert!(lookup(&v, "project.missing").is_none());
    }

    #[test]
    fn null_means_not_present() {
        let v = json!({ "email": null, "project": null });
        assert!(lookup(&v, "email").is_none());
        assert!(lookup(&v, "project.web_url").is_none());
    }

    #[test]
    fn first_valid_value_skips_nulls() {
        let v = json!({ "email": null, "username": "alice" });
        let got = first_valid_value(&["email", "username"], &v).unwrap();
        assert_eq!(got, &json!("alice"));

        let err = first_valid_value(&["email"], &v).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn value_strings_are_unquoted() {
        assert_eq!(value_string(&json!("main")), "main");
        assert_eq!(value_string(&json!(42)), "42");
        assert_eq!(value_string(&json!(true)), "true");
    }
}
