//! Session cookie store with optional on-disk persistence.
//!
//! The server issues session cookies that must outlive the process, so the
//! jar can be backed by a JSON file mapping each origin ("effective URI") to
//! the list of serialized cookies set for it. The file is loaded once at
//! construction and written back after every response that sets cookies.
//!
//! Persistence failures are deliberately non-fatal: a broken cookie file is
//! logged and treated as an empty store, and a failed write never fails the
//! request that triggered it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use reqwest::header::HeaderValue;
use url::Url;

/// One origin's persisted cookies, in `Set-Cookie` notation.
type CookieRecords = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default)]
struct Inner {
    store: cookie_store::CookieStore,
    records: CookieRecords,
}

/// A cookie jar usable as a [`reqwest::cookie::CookieStore`] provider, with
/// optional durable persistence.
#[derive(Debug, Default)]
pub struct PersistentCookieJar {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl PersistentCookieJar {
    /// Create an in-memory jar with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a jar backed by a JSON file at `path`.
    ///
    /// Existing records are loaded immediately; entries that no longer parse
    /// are skipped with a warning.
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut inner = Inner::default();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CookieRecords>(&contents) {
                Ok(records) => {
                    for (uri, raw_cookies) in &records {
                        load_origin(&mut inner.store, uri, raw_cookies);
                    }
                    inner.records = records;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring malformed cookie file: {e}");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read cookie file: {e}");
            }
        }

        Self {
            inner: RwLock::new(inner),
            path: Some(path),
        }
    }

    /// Drop every cookie, and the backing file's contents if persistent.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("cookie jar lock poisoned");
        inner.store.clear();
        inner.records.clear();
        self.save(&inner.records);
    }

    fn save(&self, records: &CookieRecords) {
        let Some(path) = &self.path else {
            return;
        };
        let serialized = match serde_json::to_vec_pretty(records) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("failed to serialize cookie records: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, serialized) {
            tracing::warn!(path = %path.display(), "failed to write cookie file: {e}");
        }
    }
}

/// Insert one origin's persisted cookies back into the live store.
fn load_origin(store: &mut cookie_store::CookieStore, uri: &str, raw_cookies: &[String]) {
    let url = match Url::parse(uri) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("skipping cookie records for unparsable origin {uri}: {e}");
            return;
        }
    };
    for raw in raw_cookies {
        let parsed = match cookie::Cookie::parse(raw.clone()) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("skipping unparsable cookie for {uri}: {e}");
                continue;
            }
        };
        if let Err(e) = store.insert_raw(&parsed, &url) {
            tracing::warn!("skipping rejected cookie for {uri}: {e}");
        }
    }
}

// The reqwest cookie provider contract. Mirrors reqwest's own jar, which
// treats a poisoned lock as unrecoverable.
impl reqwest::cookie::CookieStore for PersistentCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies: Vec<cookie::Cookie<'static>> = cookie_headers
            .filter_map(|val| {
                val.to_str()
                    .ok()
                    .and_then(|s| cookie::Cookie::parse(s.to_owned()).ok())
            })
            .collect();

        if cookies.is_empty() {
            return;
        }

        let mut inner = self.inner.write().expect("cookie jar lock poisoned");
        inner
            .store
            .store_response_cookies(cookies.iter().cloned(), url);

        if self.path.is_some() {
            let origin = url.origin().ascii_serialization();
            let entry = inner.records.entry(origin).or_default();
            for c in &cookies {
                // A zero max-age is the server deleting the cookie.
                let removal = c.max_age().is_some_and(|age| age.whole_seconds() <= 0);
                entry.retain(|raw| {
                    cookie::Cookie::parse(raw.clone())
                        .map(|existing| existing.name() != c.name())
                        .unwrap_or(false)
                });
                if !removal {
                    entry.push(c.to_string());
                }
            }
            self.save(&inner.records);
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let s = self
            .inner
            .read()
            .expect("cookie jar lock poisoned")
            .store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        if s.is_empty() {
            return None;
        }

        HeaderValue::from_maybe_shared(bytes::Bytes::from(s)).ok()
    }
}
