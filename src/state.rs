use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExplorerError, Result};

// ---------------------------------------------------------------------------
// Scopes and keys
// ---------------------------------------------------------------------------

/// Lifecycle namespaces of session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// Data selection: sources, table choice.
    Setup,
    /// Filter pipelines; dropped whenever the active table changes.
    Filters,
    /// Explore plots.
    Explore,
    /// Session-wide values such as the active table identity.
    Global,
    /// User private data (the token).
    Private,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Setup => "setup",
            Scope::Filters => "filters",
            Scope::Explore => "explore",
            Scope::Global => "global",
            Scope::Private => "private",
        }
    }

    /// Prefix shared by every key of this scope.
    pub fn prefix(self) -> String {
        format!("{}:", self.as_str())
    }

    pub fn key(self, discriminator: impl Into<String>) -> ScopedKey {
        ScopedKey::new(self, discriminator)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(scope, discriminator)`; string form `"scope:discriminator"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    pub scope: Scope,
    pub discriminator: String,
}

impl ScopedKey {
    pub fn new(scope: Scope, discriminator: impl Into<String>) -> Self {
        Self {
            scope,
            discriminator: discriminator.into(),
        }
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.discriminator)
    }
}

// ---------------------------------------------------------------------------
// ScopedStore
// ---------------------------------------------------------------------------

/// Session state that survives reruns.
///
/// Owned by one session and passed by reference. Every mutation raises a
/// rerun request which the host picks up with [`ScopedStore::take_rerun_request`].
#[derive(Debug, Clone, Default)]
pub struct ScopedStore {
    values: BTreeMap<String, Value>,
    revision: u64,
    rerun_requested: bool,
}

impl ScopedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read. Missing keys, and values that no longer fit `T`, yield
    /// `default`.
    pub fn get<T: DeserializeOwned>(&self, key: &ScopedKey, default: T) -> T {
        match self.try_get(key) {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(e) => {
                log::warn!("Ignoring {e}");
                default
            }
        }
    }

    /// Typed read that reports a stored value which no longer decodes,
    /// for state the user would lose if it were silently replaced.
    pub fn try_get<T: DeserializeOwned>(&self, key: &ScopedKey) -> Result<Option<T>> {
        match self.values.get(&key.to_string()) {
            Some(value) => T::deserialize(value).map(Some).map_err(|e| {
                ExplorerError::configuration(format!("stored value for {key} cannot be read: {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &ScopedKey) -> bool {
        self.values.contains_key(&key.to_string())
    }

    pub fn set<T: Serialize>(&mut self, key: &ScopedKey, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            ExplorerError::invariant(format!("value for {key} is not serializable: {e}"))
        })?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&mut self, key: &ScopedKey, value: Value) {
        let changed = self.values.get(&key.to_string()) != Some(&value);
        self.values.insert(key.to_string(), value);
        if changed {
            self.touch();
        }
    }

    pub fn remove(&mut self, key: &ScopedKey) -> bool {
        let removed = self.values.remove(&key.to_string()).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    /// Remove every key whose string form starts with `prefix`.
    /// Returns how many keys were removed.
    pub fn delete_by_prefix(&mut self, prefix: &str) -> usize {
        let before = self.values.len();
        self.values.retain(|k, _| !k.starts_with(prefix));
        let removed = before - self.values.len();
        if removed > 0 {
            log::debug!("Invalidated {removed} session key(s) under '{prefix}'");
            self.touch();
        }
        removed
    }

    pub fn clear_scope(&mut self, scope: Scope) -> usize {
        self.delete_by_prefix(&scope.prefix())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn scope_len(&self, scope: Scope) -> usize {
        let prefix = scope.prefix();
        self.keys().filter(|k| k.starts_with(&prefix)).count()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether state changed since the last call; resets the flag.
    pub fn take_rerun_request(&mut self) -> bool {
        std::mem::take(&mut self.rerun_requested)
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.rerun_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_mistyped_keys_return_default() {
        let mut store = ScopedStore::new();
        let key = Scope::Setup.key("urls");
        assert_eq!(store.get(&key, vec!["x".to_string()]), vec!["x".to_string()]);

        store.set(&key, &42u32).unwrap();
        assert_eq!(store.get::<Vec<String>>(&key, Vec::new()), Vec::<String>::new());
        assert_eq!(store.get(&key, 0u32), 42);
    }

    #[test]
    fn try_get_reports_values_that_no_longer_decode() {
        let mut store = ScopedStore::new();
        let key = Scope::Filters.key("pipeline");
        assert_eq!(store.try_get::<f64>(&key).unwrap(), None);

        store.set(&key, &f64::INFINITY).unwrap();
        assert!(matches!(
            store.try_get::<f64>(&key),
            Err(ExplorerError::Configuration(_))
        ));
    }

    #[test]
    fn delete_by_prefix_only_touches_matching_keys() {
        let mut store = ScopedStore::new();
        store.set(&Scope::Filters.key("pipeline"), &1).unwrap();
        store.set(&Scope::Filters.key("Scatter Plot 1:sampling"), &2).unwrap();
        store.set(&Scope::Setup.key("urls"), &3).unwrap();
        store.set(&ScopedKey::new(Scope::Global, "filters_seen"), &4).unwrap();

        assert_eq!(store.clear_scope(Scope::Filters), 2);
        assert_eq!(store.scope_len(Scope::Filters), 0);
        assert!(store.contains(&Scope::Setup.key("urls")));
        assert!(store.contains(&Scope::Global.key("filters_seen")));
        assert_eq!(store.delete_by_prefix("nothing:"), 0);
    }

    #[test]
    fn mutations_request_a_rerun() {
        let mut store = ScopedStore::new();
        assert!(!store.take_rerun_request());

        let key = Scope::Explore.key("plots");
        store.set(&key, &"a").unwrap();
        assert!(store.take_rerun_request());
        assert!(!store.take_rerun_request());

        // writing the same value again is not a change
        store.set(&key, &"a").unwrap();
        assert!(!store.take_rerun_request());
        assert_eq!(store.revision(), 1);

        assert!(store.remove(&key));
        assert!(store.take_rerun_request());
    }
}
