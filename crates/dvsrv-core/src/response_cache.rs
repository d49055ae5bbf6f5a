//! Compiled output keyed by public URL path, with conditional-GET lookup.
//!
//! Entries are never evicted; a path is overwritten when its entry point
//! is compiled again.

use crate::compiler::{Bundle, CompiledFile};
use crate::specifier::is_immutable;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// `Cache-Control` for content-hashed files.
pub const CACHE_CONTROL_IMMUTABLE: &str =
    "public, max-age=604800, stale-while-revalidate=604800, immutable";
/// `Cache-Control` for everything else.
pub const CACHE_CONTROL_MUST_REVALIDATE: &str = "public, max-age=0, must-revalidate";

/// One cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// HTTP date of the compile that produced it.
    pub last_modified: String,
    pub etag: Option<String>,
    pub contents: Option<Bytes>,
    pub mime: Option<String>,
}

impl CacheEntry {
    fn from_file(file: &CompiledFile, last_modified: &str) -> Self {
        Self {
            last_modified: last_modified.to_string(),
            etag: file.etag.clone(),
            contents: Some(file.contents.clone()),
            mime: file.mime.clone(),
        }
    }
}

/// Caching headers for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Immutable,
    MustRevalidate,
}

impl CachePolicy {
    #[must_use]
    pub fn for_path(path: &str) -> Self {
        if is_immutable(path) {
            Self::Immutable
        } else {
            Self::MustRevalidate
        }
    }

    #[must_use]
    pub fn cache_control(&self) -> &'static str {
        match self {
            Self::Immutable => CACHE_CONTROL_IMMUTABLE,
            Self::MustRevalidate => CACHE_CONTROL_MUST_REVALIDATE,
        }
    }

    /// `Expires` value, sent only for revalidated paths.
    #[must_use]
    pub fn expires(&self) -> Option<&'static str> {
        match self {
            Self::Immutable => None,
            Self::MustRevalidate => Some("-1"),
        }
    }
}

/// Request validators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

/// Outcome of [`ResponseCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Answer `304` with headers and no body.
    NotModified { entry: CacheEntry, policy: CachePolicy },
    /// Answer `200` with the stored bytes.
    Hit { entry: CacheEntry, policy: CachePolicy },
    Miss,
}

impl Lookup {
    /// Headers to send with a 304 or 200: `Cache-Control`, `Last-Modified`,
    /// `Expires` when revalidating, `ETag` when known, and `Content-Type`
    /// on a hit.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let (entry, policy, with_body) = match self {
            Self::NotModified { entry, policy } => (entry, policy, false),
            Self::Hit { entry, policy } => (entry, policy, true),
            Self::Miss => return Vec::new(),
        };

        let mut headers = vec![
            ("cache-control", policy.cache_control().to_string()),
            ("last-modified", entry.last_modified.clone()),
        ];
        if let Some(expires) = policy.expires() {
            headers.push(("expires", expires.to_string()));
        }
        if let Some(etag) = &entry.etag {
            headers.push(("etag", etag.clone()));
        }
        if with_body {
            if let Some(mime) = &entry.mime {
                headers.push(("content-type", mime.clone()));
            }
        }
        headers
    }
}

/// Process-wide map from URL path to cached response.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(path.into(), entry);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<CacheEntry> {
        self.entries.get(path).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store every file of a bundle. Entry points are stored under both their
    /// specifier and their URL path, so `/app.ts` and `/app.js` both hit.
    pub fn store_bundle(&self, bundle: &Bundle, last_modified: &str) {
        for entry in &bundle.entry_points {
            let cached = CacheEntry::from_file(&entry.file, last_modified);
            self.insert(entry.specifier.clone(), cached.clone());
            self.insert(entry.file.url_path.clone(), cached);
        }
        for file in &bundle.files {
            self.insert(file.url_path.clone(), CacheEntry::from_file(file, last_modified));
        }
    }

    /// Answer a request for `path` from the cache.
    ///
    /// A matching `If-None-Match` or an exactly equal `If-Modified-Since`
    /// yields [`Lookup::NotModified`]; otherwise stored bytes yield
    /// [`Lookup::Hit`].
    #[must_use]
    pub fn lookup(&self, path: &str, validators: &Validators) -> Lookup {
        let Some(entry) = self.get(path) else {
            return Lookup::Miss;
        };
        let policy = CachePolicy::for_path(path);

        let etag_matches = matches!(
            (&validators.if_none_match, &entry.etag),
            (Some(given), Some(stored)) if given == stored
        );
        let date_matches = validators
            .if_modified_since
            .as_deref()
            .is_some_and(|since| since == entry.last_modified);

        if etag_matches || date_matches {
            Lookup::NotModified { entry, policy }
        } else if entry.contents.is_some() {
            Lookup::Hit { entry, policy }
        } else {
            Lookup::Miss
        }
    }
}

/// Format a time as an HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`).
#[must_use]
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
