//! Per-session cache of expanded child lists.
//!
//! Entries are keyed by (child level, folded ancestor path, filter
//! signature). Changing a filter changes the key, so stale entries are
//! never read again and need no eviction. Concurrent loads of one key are
//! coalesced by moka: one caller queries, the others wait for its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;

use crate::aggregate::{FilterSignature, Filters, Level, NodePath, RollupSource, Scope};
use crate::config::HierarchyConfig;
use crate::db::DatabaseError;
use crate::error::HierarchyError;
use crate::hierarchy::node::HierarchyNode;

type ChildList = Arc<[HierarchyNode]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Level of the cached children.
    pub level: Level,
    pub ancestors: Vec<String>,
    pub filters: FilterSignature,
}

impl CacheKey {
    /// Key of `path`'s children; `None` when `path` names a field.
    pub fn for_children(path: &NodePath, filters: &Filters) -> Option<Self> {
        Some(Self {
            level: path.child_level()?,
            ancestors: path.folded(),
            filters: filters.signature(),
        })
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    prefetched: AtomicU64,
}

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub prefetched: u64,
}

/// Deduplicating child-list cache for one company and one session.
pub struct HierarchyCache {
    company_id: String,
    source: Arc<dyn RollupSource>,
    entries: Cache<CacheKey, ChildList>,
    prefetch_children: usize,
    counters: Arc<Counters>,
}

impl HierarchyCache {
    pub fn new(
        company_id: impl Into<String>,
        source: Arc<dyn RollupSource>,
        config: &HierarchyConfig,
    ) -> Self {
        let mut builder = Cache::builder();
        if let Some(capacity) = config.cache_capacity {
            builder = builder.max_capacity(capacity);
        }
        Self {
            company_id: company_id.into(),
            source,
            entries: builder.build(),
            prefetch_children: config.prefetch_children,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    /// One summary per site under `filters`.
    pub fn roots(&self, filters: &Filters) -> Result<ChildList, HierarchyError> {
        self.children(&NodePath::root(), filters)
    }

    /// Children of the node at `path` under `filters`, loading them on a
    /// miss. A field node has no children and is answered without a query.
    pub fn children(&self, path: &NodePath, filters: &Filters) -> Result<ChildList, HierarchyError> {
        let Some(key) = CacheKey::for_children(path, filters) else {
            return Ok(Arc::from(Vec::new()));
        };

        let entry = self
            .entries
            .entry(key)
            .or_try_insert_with(|| load(self.source.as_ref(), &self.company_id, path, filters))
            .map_err(HierarchyError::Query)?;

        if entry.is_fresh() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let children = entry.into_value();
            self.prefetch(&children, filters);
            Ok(children)
        } else {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            Ok(entry.into_value())
        }
    }

    /// Children for re-expanding a collapsed node that still holds
    /// `retained`. Always a hit: an entry evicted in the meantime is put
    /// back from `retained` instead of being queried again.
    pub fn reopen(&self, path: &NodePath, filters: &Filters, retained: &ChildList) -> ChildList {
        let Some(key) = CacheKey::for_children(path, filters) else {
            return Arc::clone(retained);
        };
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::clone(retained))
            .into_value()
    }

    /// Whether `path`'s children are cached under `filters`.
    pub fn contains(&self, path: &NodePath, filters: &Filters) -> bool {
        CacheKey::for_children(path, filters).is_some_and(|key| self.entries.contains_key(&key))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            prefetched: self.counters.prefetched.load(Ordering::Relaxed),
        }
    }

    /// Drops every entry, e.g. after the underlying records changed.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Warms the grandchildren of the first few expandable children on a
    /// background thread. Failures are logged and otherwise ignored.
    fn prefetch(&self, children: &ChildList, filters: &Filters) {
        let targets: Vec<NodePath> = children
            .iter()
            .filter(|c| c.has_children)
            .take(self.prefetch_children)
            .map(|c| c.path.clone())
            .collect();
        if targets.is_empty() {
            return;
        }

        let entries = self.entries.clone();
        let source = Arc::clone(&self.source);
        let counters = Arc::clone(&self.counters);
        let company_id = self.company_id.clone();
        let filters = filters.clone();

        let spawned = std::thread::Builder::new()
            .name("hierarchy-prefetch".to_string())
            .spawn(move || {
                for path in targets {
                    let Some(key) = CacheKey::for_children(&path, &filters) else {
                        continue;
                    };
                    let result = entries.entry(key).or_try_insert_with(|| {
                        load(source.as_ref(), &company_id, &path, &filters)
                    });
                    match result {
                        Ok(entry) if entry.is_fresh() => {
                            counters.prefetched.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {}
                        Err(e) => log::debug!("Prefetch of {} failed: {}", path, e),
                    }
                }
            });
        if let Err(e) = spawned {
            log::warn!("Failed to spawn hierarchy prefetch thread: {}", e);
        }
    }
}

fn load(
    source: &dyn RollupSource,
    company_id: &str,
    path: &NodePath,
    filters: &Filters,
) -> Result<ChildList, DatabaseError> {
    let Some(level) = path.child_level() else {
        return Ok(Arc::from(Vec::new()));
    };
    let scope = Scope::new(path.clone(), filters.clone());
    let rows = source.children(company_id, &scope, level)?;
    log::debug!("Loaded {} {} nodes under {}", rows.len(), level, path);
    Ok(rows
        .into_iter()
        .map(|row| HierarchyNode::from_row(path, level, row))
        .collect())
}
