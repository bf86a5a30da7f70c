//! Process-wide caches for data-source handles and loaded tables.
//!
//! Entries are keyed by canonical URL(s) plus a credential fingerprint, so
//! equivalent URLs share one entry and two principals never share one.
//! There is no eviction; keys change or the host flushes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use arrow::record_batch::RecordBatch;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use url::Url;

use crate::data::source::{concat_sources, DataSource, SourceOpener};
use crate::error::{ExplorerError, Result};

// ---------------------------------------------------------------------------
// URL canonicalization
// ---------------------------------------------------------------------------

pub fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Canonical form of a user-supplied URL or path.
///
/// * surrounding whitespace and quotes are dropped
/// * http(s): spaces become `%20`, the URL is normalized by `url::Url`
/// * local paths: a leading `~` expands to `$HOME`
/// * trailing slashes are stripped
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();

    let normalized = if is_http_url(trimmed) {
        let encoded = trimmed.replace(' ', "%20");
        match Url::parse(&encoded) {
            Ok(url) => url.to_string(),
            Err(_) => encoded,
        }
    } else {
        expand_home(trimmed)
    };

    let stripped = normalized.trim_end_matches('/');
    if stripped.is_empty() && normalized.starts_with('/') {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}{rest}", home.trim_end_matches('/')),
        _ => path.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The acting principal's opaque token.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    token: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token {
            Some(_) => write!(f, "Credential(***)"),
            None => write!(f, "Credential(anonymous)"),
        }
    }
}

impl Credential {
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    /// Blank tokens count as anonymous.
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.trim().is_empty() {
            Self::anonymous()
        } else {
            Self { token: Some(token) }
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Stable identifier of the principal: hex SHA-256 of the token.
    pub fn fingerprint(&self) -> String {
        match &self.token {
            Some(token) => format!("{:x}", Sha256::digest(token.as_bytes())),
            None => "anonymous".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache keys
// ---------------------------------------------------------------------------

/// Canonical URLs, the credential fingerprint presented to each of them,
/// and any non-URL parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    urls: Vec<String>,
    credentials: Vec<String>,
    extra: Vec<String>,
}

impl CacheKey {
    /// Key for `urls` all opened with the same credential.
    pub fn new<S: AsRef<str>>(urls: &[S], credential: &Credential) -> Self {
        Self {
            urls: urls.iter().map(|u| canonical_url(u.as_ref())).collect(),
            credentials: vec![credential.fingerprint(); urls.len()],
            extra: Vec::new(),
        }
    }

    /// Key for sources that each carry their own credential.
    pub fn for_sources<S: AsRef<str>>(sources: &[(S, Credential)]) -> Self {
        Self {
            urls: sources.iter().map(|(u, _)| canonical_url(u.as_ref())).collect(),
            credentials: sources.iter().map(|(_, c)| c.fingerprint()).collect(),
            extra: Vec::new(),
        }
    }

    /// Add a non-URL parameter (table name, mode, ...) to the key.
    pub fn with_extra(mut self, param: impl Into<String>) -> Self {
        self.extra.push(param.into());
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

// ---------------------------------------------------------------------------
// ResourceCache – one memo table
// ---------------------------------------------------------------------------

/// A shared memo table with no negative caching.
///
/// Values are built outside the lock. Two sessions racing on the same cold
/// key may both build; the first insert wins and both get the stored value.
pub struct ResourceCache<V> {
    label: &'static str,
    entries: RwLock<HashMap<CacheKey, Arc<V>>>,
}

impl<V> fmt::Debug for ResourceCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("label", &self.label)
            .field("entries", &self.len())
            .finish()
    }
}

impl<V> ResourceCache<V> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    pub fn get_or_try_insert_with<F>(&self, key: CacheKey, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(hit) = self.get(&key) {
            debug!("{} cache hit for {:?}", self.label, key.urls);
            return Ok(hit);
        }

        debug!("{} cache miss for {:?}", self.label, key.urls);
        let value = match build() {
            Ok(value) => Arc::new(value),
            Err(err) => {
                warn!("{} construction failed, not cached: {err}", self.label);
                return Err(err);
            }
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(key).or_insert(value).clone())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ---------------------------------------------------------------------------
// ResourceCaches – handle cache + table cache
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ResourceCaches {
    /// One handle per `(url, credential)`.
    pub sources: ResourceCache<DataSource>,
    /// Loaded tables per `(urls, credential per url, table name)`.
    pub tables: ResourceCache<RecordBatch>,
}

impl Default for ResourceCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCaches {
    pub fn new() -> Self {
        Self {
            sources: ResourceCache::new("source"),
            tables: ResourceCache::new("table"),
        }
    }

    /// The instance shared by every session of this process.
    pub fn global() -> &'static ResourceCaches {
        static CACHES: OnceLock<ResourceCaches> = OnceLock::new();
        CACHES.get_or_init(ResourceCaches::new)
    }

    pub fn open_source(
        &self,
        opener: &dyn SourceOpener,
        url: &str,
        credential: &Credential,
    ) -> Result<Arc<DataSource>> {
        let key = CacheKey::new(&[url], credential);
        let canonical = key.urls()[0].clone();
        self.sources.get_or_try_insert_with(key, || {
            info!("Opening data source {canonical}");
            opener.open(&canonical, credential)
        })
    }

    /// Load `table_name` from every source and stack the results.
    ///
    /// Each source is opened with its own credential, so a token meant for
    /// one domain is never presented to another.
    pub fn load_table<S: AsRef<str>>(
        &self,
        opener: &dyn SourceOpener,
        sources: &[(S, Credential)],
        table_name: &str,
    ) -> Result<Arc<RecordBatch>> {
        let key = CacheKey::for_sources(sources).with_extra(table_name);
        let canonical = key.urls().to_vec();
        self.tables.get_or_try_insert_with(key, || {
            if sources.is_empty() {
                return Err(ExplorerError::configuration("no data sources selected"));
            }
            let mut parts = Vec::with_capacity(sources.len());
            for (url, credential) in sources {
                let url: &str = url.as_ref();
                let source = self.open_source(opener, url, credential)?;
                let table = source
                    .load_table(table_name)
                    .map_err(|e| ExplorerError::resource(url, e))?;
                parts.push((source.name.clone(), table));
            }
            let table = concat_sources(parts)
                .map_err(|e| ExplorerError::resource(canonical.join(", "), e))?;
            info!(
                "Loaded table '{table_name}' with {} rows from {} source(s)",
                table.num_rows(),
                canonical.len()
            );
            Ok(table)
        })
    }

    pub fn flush(&self) {
        self.sources.flush();
        self.tables.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use super::*;
    use crate::data::source::LocalOpener;

    #[test]
    fn trailing_slash_and_spaces_collapse_to_one_key() {
        let t1 = Credential::from_token("T1");
        assert_eq!(
            CacheKey::new(&["https://host/x"], &t1),
            CacheKey::new(&["https://host/x/"], &t1)
        );
        assert_eq!(
            CacheKey::new(&["https://host/my plate"], &t1),
            CacheKey::new(&[" https://host/my%20plate/ "], &t1)
        );
        assert_eq!(canonical_url("\"/data/plates/\""), "/data/plates");
    }

    #[test]
    fn different_tokens_get_different_keys() {
        let url = ["https://host/x"];
        let t1 = CacheKey::new(&url, &Credential::from_token("T1"));
        let t2 = CacheKey::new(&url, &Credential::from_token("T2"));
        let anon = CacheKey::new(&url, &Credential::anonymous());
        assert_ne!(t1, t2);
        assert_ne!(t1, anon);
        assert_eq!(anon, CacheKey::new(&url, &Credential::from_token("  ")));
    }

    #[test]
    fn per_source_credentials_are_part_of_the_key() {
        let token = Credential::from_token("T1");
        let anon = Credential::anonymous();
        let mixed = CacheKey::for_sources(&[("https://a/x", token.clone()), ("https://b/y", anon.clone())]);
        let swapped = CacheKey::for_sources(&[("https://a/x", anon), ("https://b/y", token.clone())]);
        assert_ne!(mixed, swapped);
        assert_eq!(
            CacheKey::for_sources(&[("https://a/x/", token.clone())]),
            CacheKey::new(&["https://a/x"], &token)
        );
    }

    #[test]
    fn credential_debug_hides_the_token() {
        let text = format!("{:?}", Credential::from_token("secret"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn failures_are_never_cached() {
        let cache: ResourceCache<u32> = ResourceCache::new("test");
        let calls = AtomicUsize::new(0);
        let key = CacheKey::new(&["https://host/down"], &Credential::anonymous());

        for _ in 0..3 {
            let result = cache.get_or_try_insert_with(key.clone(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExplorerError::resource("https://host/down", "unreachable"))
            });
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());

        let ok = cache.get_or_try_insert_with(key.clone(), || Ok(7)).unwrap();
        assert_eq!(*ok, 7);
        let again = cache
            .get_or_try_insert_with(key, || panic!("must be served from cache"))
            .unwrap();
        assert!(Arc::ptr_eq(&ok, &again));
    }

    #[test]
    fn concurrent_cold_misses_converge_on_one_entry() {
        let cache: ResourceCache<String> = ResourceCache::new("test");
        let key = CacheKey::new(&["https://host/x"], &Credential::anonymous());
        let barrier = Barrier::new(8);

        let results: Vec<Arc<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let (cache, key, barrier) = (&cache, key.clone(), &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        cache
                            .get_or_try_insert_with(key, || Ok(format!("built by {i}")))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let stored = cache.get(&key).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &stored)));
    }

    #[test]
    fn tables_are_loaded_once_per_key() {
        let root = tempfile::tempdir().unwrap();
        let plate = root.path().join("plate_1");
        std::fs::create_dir_all(&plate).unwrap();
        std::fs::write(plate.join("nuclei.csv"), "label,area\n1,2.0\n2,4.0\n").unwrap();
        let url = plate.to_string_lossy().to_string();

        let caches = ResourceCaches::new();
        let opener = LocalOpener::default();
        let cred = Credential::from_token("T1");
        let first = caches
            .load_table(&opener, &[(url.as_str(), cred.clone())], "nuclei")
            .unwrap();
        let second = caches
            .load_table(&opener, &[(format!("{url}/"), cred)], "nuclei")
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.num_rows(), 2);
        assert_eq!(caches.sources.len(), 1);

        let other_user = caches
            .load_table(&opener, &[(url.as_str(), Credential::from_token("T2"))], "nuclei")
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other_user));
        assert_eq!(caches.tables.len(), 2);
    }

    #[test]
    fn missing_source_is_retried_after_it_appears() {
        let root = tempfile::tempdir().unwrap();
        let plate = root.path().join("late_plate");
        let url = plate.to_string_lossy().to_string();
        let caches = ResourceCaches::new();
        let opener = LocalOpener::default();
        let sources = [(url.as_str(), Credential::anonymous())];

        let missing = caches.load_table(&opener, &sources, "nuclei");
        assert!(matches!(missing, Err(ExplorerError::Resource { .. })));
        assert!(caches.sources.is_empty());
        assert!(caches.tables.is_empty());

        std::fs::create_dir_all(&plate).unwrap();
        std::fs::write(plate.join("nuclei.csv"), "label\n1\n").unwrap();
        assert!(caches.load_table(&opener, &sources, "nuclei").is_ok());
    }
}
