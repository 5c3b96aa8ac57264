//! Compiled template cache.
//!
//! Stylesheets are keyed by a SHA-256 fingerprint of their source text, so
//! policies sharing one stylesheet share one compiled template no matter how
//! they were configured. Compilation happens at most once per fingerprint:
//! concurrent first requests for the same key serialize on the map entry and
//! all but one reuse the winner's template. Failed compilations are never
//! cached, a broken stylesheet is re-attempted on every request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::core::config::SecurityProfile;
use crate::core::error::CompileError;
use crate::xslt::{CompiledStylesheet, XsltBackend};

// ============================================================
// Fingerprint
// ============================================================

/// Cache key: lowercase SHA-256 hex of the stylesheet source.
///
/// The security profile is deliberately not part of the key; the hosting
/// process runs under a single profile, so mixing would only duplicate
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log fields.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================
// Cache
// ============================================================

struct CacheEntry {
    template: Arc<dyn CompiledStylesheet>,
    last_used: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Shared cache of compiled templates.
pub struct TemplateCache {
    backend: Arc<dyn XsltBackend>,
    entries: DashMap<Fingerprint, CacheEntry>,
    /// `None` means unbounded
    capacity: Option<usize>,
    /// Logical clock driving least-recently-used eviction
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    /// Unbounded cache; the default for gateway deployments, where the set
    /// of configured stylesheets is small and fixed.
    pub fn new(backend: Arc<dyn XsltBackend>) -> Self {
        Self::build(backend, None)
    }

    /// Cache bounded to `capacity` templates, evicting the least recently
    /// used entry past the limit. A capacity of zero disables the bound.
    pub fn with_capacity(backend: Arc<dyn XsltBackend>, capacity: usize) -> Self {
        Self::build(backend, (capacity > 0).then_some(capacity))
    }

    fn build(backend: Arc<dyn XsltBackend>, capacity: Option<usize>) -> Self {
        TemplateCache {
            backend,
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch the compiled template for `source`, compiling it on first use.
    ///
    /// The entry lock is held while compiling, so two racing requests for a
    /// new stylesheet produce a single compilation.
    pub fn get_or_compile(
        &self,
        source: &str,
        profile: SecurityProfile,
    ) -> Result<Arc<dyn CompiledStylesheet>, CompileError> {
        let key = Fingerprint::of(source);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry.get().last_used.store(self.tick(), Ordering::Relaxed);
                trace!(fingerprint = key.short(), "template cache hit");
                Ok(Arc::clone(&entry.get().template))
            }
            Entry::Vacant(slot) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let template = self.backend.compile(source, profile)?;
                self.compilations.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = key.short(), "compiled and cached stylesheet");
                drop(slot.insert(CacheEntry {
                    template: Arc::clone(&template),
                    last_used: AtomicU64::new(self.tick()),
                }));
                self.enforce_capacity();
                Ok(template)
            }
        }
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(&Fingerprint::of(source))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached template, e.g. after a configuration reload.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn enforce_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(fingerprint = key.short(), "evicted least recently used template");
                    }
                }
                None => break,
            }
        }
    }
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
