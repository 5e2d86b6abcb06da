//! Parameter map: the only configuration channel into the core.
//!
//! Keys are flat strings with suffix-based scoping, e.g. `image_name_vm1`
//! is a more specific value for `image_name` scoped to object `vm1`. A
//! lookup for a dotted name path (`net1/vm1/image1`) walks from most to
//! least specific, trying each suffix of the path in turn.

use std::collections::HashMap;
use std::sync::Arc;

/// An immutable, hierarchically-scoped string map.
///
/// Cloning is cheap: the backing map is reference-counted and a clone only
/// copies the scope path used for `object_params`/`objects` lookups, in
/// keeping with the "avoid copying the whole map per object" design note.
#[derive(Clone, Debug, Default)]
pub struct Params {
    data: Arc<HashMap<String, String>>,
}

impl Params {
    /// Builds a parameter map from an owned key/value collection.
    pub fn new(data: HashMap<String, String>) -> Self {
        Self { data: Arc::new(data) }
    }

    /// Parses a flat map from `key = value` lines, ignoring blanks and
    /// `#`-prefixed comments; intended for small parameter files fed to the
    /// CLI harness.
    pub fn parse(text: &str) -> Self {
        let mut data = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                data.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self::new(data)
    }

    /// Raw, unscoped lookup by exact key.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Looks up `key` scoped to `object` (a `/`-joined name path), trying
    /// suffixes from most to least specific: `key_leaf_..._root`, then
    /// `key_leaf`, then the bare `key`.
    pub fn get(&self, key: &str, object: &str) -> Option<&str> {
        if object.is_empty() {
            return self.get_raw(key);
        }
        let parts: Vec<&str> = object.split('/').collect();
        // Try the fully qualified suffix down to a single-component suffix.
        for start in 0..parts.len() {
            let suffix = parts[start..].join("_");
            let candidate = format!("{key}_{suffix}");
            if let Some(value) = self.data.get(&candidate) {
                return Some(value);
            }
        }
        self.get_raw(key)
    }

    /// Same as [`Params::get`] but returns an owned default when absent.
    pub fn get_or(&self, key: &str, object: &str, default: &str) -> String {
        self.get(key, object).unwrap_or(default).to_string()
    }

    /// Splits a whitespace-separated parameter value into a `Vec<String>`,
    /// mirroring `params.objects(...)` in the object enumeration keys
    /// (`vms`, `images`, `nets`, `states_chain`, `skip_types`, `pool_scope`).
    pub fn objects(&self, key: &str) -> Vec<String> {
        self.get_raw(key)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Same as [`Params::objects`] but scoped to `object`.
    pub fn objects_scoped(&self, key: &str, object: &str) -> Vec<String> {
        self.get(key, object)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Boolean lookup, defaulting to `default` when the key is unset or not
    /// one of `yes`/`no`/`true`/`false`.
    pub fn get_bool(&self, key: &str, object: &str, default: bool) -> bool {
        match self.get(key, object) {
            Some("yes") | Some("true") => true,
            Some("no") | Some("false") => false,
            _ => default,
        }
    }

    /// Returns a view with an extra override applied on top of this map;
    /// used by the hierarchy iterator and the internal check-before-mutate
    /// recursion to narrow `states_chain` without mutating the original.
    pub fn with_override(&self, key: &str, value: &str) -> Self {
        let mut data = (*self.data).clone();
        data.insert(key.to_string(), value.to_string());
        Self::new(data)
    }

    /// Returns a view with several overrides applied.
    pub fn with_overrides<I, K, V>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut data = (*self.data).clone();
        for (k, v) in overrides {
            data.insert(k.into(), v.into());
        }
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        let mut data = HashMap::new();
        data.insert("image_name".to_string(), "base".to_string());
        data.insert("image_name_vm1".to_string(), "disk1".to_string());
        data.insert("vms".to_string(), "vm1 vm2".to_string());
        Params::new(data)
    }

    #[test]
    fn most_specific_wins() {
        let p = params();
        assert_eq!(p.get("image_name", "vm1/image1"), Some("disk1"));
        assert_eq!(p.get("image_name", "vm2/image1"), Some("base"));
    }

    #[test]
    fn objects_splits_whitespace() {
        let p = params();
        assert_eq!(p.objects("vms"), vec!["vm1", "vm2"]);
    }

    #[test]
    fn override_does_not_mutate_original() {
        let p = params();
        let narrowed = p.with_override("states_chain", "images");
        assert_eq!(narrowed.get_raw("states_chain"), Some("images"));
        assert_eq!(p.get_raw("states_chain"), None);
    }
}
