//! Per-dimension string dictionaries with canonical interning
//!
//! Each discovered dimension owns a [`DimDict`]: a dense value↔id store
//! whose values are canonical `Arc<str>` handles minted by an interner.
//! Two interning strategies exist:
//! - [`StrongInterner`] retains every value for the life of the index;
//! - [`LruInterner`] is an opportunistic canonicalization cache that may
//!   evict entries under pressure (bounded LRU), shared by all dictionaries
//!   of one index.
//!
//! Canonical identity (`Arc::ptr_eq`) is only an allocation-reuse
//! optimization: everything that orders or equates values, the composite
//! key comparator included, compares handle contents.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::error::DictionaryError;

/// Bound on the shared reclaimable canonicalization cache
const RECLAIMABLE_INTERNER_CAPACITY: usize = 16_384;

/// Canonicalization of string values into shared handles
pub trait Interner: Send + Sync {
    /// Canonical handle for `value`; idempotent on equal inputs while the
    /// entry stays resident
    fn intern(&self, value: &str) -> Arc<str>;
}

/// Interner that retains every value forever
#[derive(Default)]
pub struct StrongInterner {
    table: DashMap<Arc<str>, ()>,
}

impl StrongInterner {
    /// Create an empty interner
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident canonical values
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Interner for StrongInterner {
    fn intern(&self, value: &str) -> Arc<str> {
        if let Some(existing) = self.table.get(value) {
            return existing.key().clone();
        }
        let candidate: Arc<str> = Arc::from(value);
        // Entry keeps the first key on a lost race, so every caller
        // observes the same canonical handle.
        self.table.entry(candidate).or_default().key().clone()
    }
}

/// Bounded canonicalization cache
///
/// The portable substitute for a weakly referenced cache: entries may be
/// evicted between uses, after which a re-intern mints a fresh handle.
/// Dictionaries keep their own strong handles, so eviction never
/// invalidates stored values — it only forfeits reuse.
pub struct LruInterner {
    cache: Mutex<LruCache<String, Arc<str>>>,
}

impl LruInterner {
    /// Create a cache bounded to the default capacity
    pub fn new() -> Self {
        Self::with_capacity(RECLAIMABLE_INTERNER_CAPACITY)
    }

    /// Create a cache bounded to `capacity` entries (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for LruInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner for LruInterner {
    fn intern(&self, value: &str) -> Arc<str> {
        let mut cache = self.cache.lock();
        if let Some(canonical) = cache.get(value) {
            return canonical.clone();
        }
        let canonical: Arc<str> = Arc::from(value);
        cache.put(value.to_string(), canonical.clone());
        canonical
    }
}

struct DictInner {
    ids: HashMap<Arc<str>, u32>,
    values: Vec<Arc<str>>,
    /// Materialized sorted view; `None` until `sort()` and after any `add`
    sorted: Option<Vec<Arc<str>>>,
}

/// Bidirectional value↔id store for one dimension
///
/// Ids are dense, assigned in insertion order, and stable for the life of
/// the index. All mutation is internally serialized, so concurrent
/// ingestion threads can share a dictionary freely.
///
/// # Example
///
/// ```
/// use magma::index::dictionary::DimDict;
///
/// let dict = DimDict::strong();
/// let (id_a, _) = dict.add_if_absent("a");
/// let (id_b, _) = dict.add_if_absent("b");
/// assert_eq!((id_a, id_b), (0, 1));
/// assert_eq!(dict.add_if_absent("a").0, 0);
///
/// dict.sort();
/// assert_eq!(dict.sorted_rank("b").unwrap(), 1);
/// ```
pub struct DimDict {
    inner: RwLock<DictInner>,
    interner: Arc<dyn Interner>,
}

impl DimDict {
    /// Create a dictionary backed by the given interner
    pub fn new(interner: Arc<dyn Interner>) -> Self {
        Self {
            inner: RwLock::new(DictInner {
                ids: HashMap::new(),
                values: Vec::new(),
                sorted: None,
            }),
            interner,
        }
    }

    /// Create a dictionary with its own retaining interner
    pub fn strong() -> Self {
        Self::new(Arc::new(StrongInterner::new()))
    }

    /// Canonical handle for `value`, without assigning an id
    pub fn intern(&self, value: &str) -> Arc<str> {
        self.interner.intern(value)
    }

    /// Check whether the dictionary holds `value`
    pub fn contains(&self, value: &str) -> bool {
        self.inner.read().ids.contains_key(value)
    }

    /// Id and canonical handle for `value`, assigning the next dense id if
    /// the value is new
    ///
    /// Canonicalization happens against the post-add state, so the
    /// returned handle always matches the one the dictionary stores.
    /// Any new assignment invalidates the sorted view.
    pub fn add_if_absent(&self, value: &str) -> (u32, Arc<str>) {
        {
            let inner = self.inner.read();
            if let Some((canonical, id)) = inner.ids.get_key_value(value) {
                return (*id, canonical.clone());
            }
        }

        let mut inner = self.inner.write();
        // Double-check after the lock upgrade
        if let Some((canonical, id)) = inner.ids.get_key_value(value) {
            return (*id, canonical.clone());
        }

        let canonical = self.interner.intern(value);
        let id = inner.values.len() as u32;
        inner.ids.insert(canonical.clone(), id);
        inner.values.push(canonical.clone());
        inner.sorted = None;
        (id, canonical)
    }

    /// Id of `value`, or `None` if the value was never added
    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.inner.read().ids.get(value).copied()
    }

    /// Value for `id`, or `None` for an unassigned id
    pub fn value_of(&self, id: u32) -> Option<Arc<str>> {
        self.inner.read().values.get(id as usize).cloned()
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the sorted view used by rank lookups
    ///
    /// Idempotent until the next `add_if_absent` assigns a new id, which
    /// invalidates the view and requires another `sort()`.
    pub fn sort(&self) {
        let mut inner = self.inner.write();
        if inner.sorted.is_none() {
            let mut values = inner.values.clone();
            values.sort_unstable();
            inner.sorted = Some(values);
        }
    }

    /// Rank of `value` in the sorted view
    ///
    /// Fails with [`DictionaryError::NotSorted`] before `sort()` and with
    /// [`DictionaryError::UnknownValue`] for values not in the dictionary.
    pub fn sorted_rank(&self, value: &str) -> Result<u32, DictionaryError> {
        let inner = self.inner.read();
        let sorted = inner.sorted.as_ref().ok_or(DictionaryError::NotSorted)?;
        sorted
            .binary_search_by(|probe| probe.as_ref().cmp(value))
            .map(|rank| rank as u32)
            .map_err(|_| DictionaryError::UnknownValue {
                value: value.to_string(),
            })
    }

    /// Value at `rank` in the sorted view
    pub fn sorted_value(&self, rank: u32) -> Result<Arc<str>, DictionaryError> {
        let inner = self.inner.read();
        let sorted = inner.sorted.as_ref().ok_or(DictionaryError::NotSorted)?;
        sorted
            .get(rank as usize)
            .cloned()
            .ok_or(DictionaryError::RankOutOfRange {
                rank,
                len: sorted.len(),
            })
    }
}

/// All dictionaries of one index, keyed by lowercased dimension name
///
/// Creation is expected to happen under the registry mutex; the holder
/// still rejects duplicate creation as an invariant check.
pub(crate) struct DimensionHolder {
    dims: DashMap<String, Arc<DimDict>>,
    reclaimable: Option<Arc<LruInterner>>,
}

impl DimensionHolder {
    /// `reclaimable_interning` selects the shared bounded cache instead of
    /// per-dictionary retaining interners
    pub(crate) fn new(reclaimable_interning: bool) -> Self {
        Self {
            dims: DashMap::new(),
            reclaimable: reclaimable_interning.then(|| Arc::new(LruInterner::new())),
        }
    }

    pub(crate) fn add(&self, dimension: &str) -> Result<Arc<DimDict>, DictionaryError> {
        match self.dims.entry(dimension.to_string()) {
            dashmap::Entry::Occupied(_) => Err(DictionaryError::DuplicateDimension {
                dimension: dimension.to_string(),
            }),
            dashmap::Entry::Vacant(entry) => {
                let interner: Arc<dyn Interner> = match &self.reclaimable {
                    Some(shared) => Arc::clone(shared) as Arc<dyn Interner>,
                    None => Arc::new(StrongInterner::new()),
                };
                let dict = Arc::new(DimDict::new(interner));
                entry.insert(Arc::clone(&dict));
                Ok(dict)
            }
        }
    }

    pub(crate) fn get(&self, dimension: &str) -> Option<Arc<DimDict>> {
        self.dims.get(dimension).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn clear(&self) {
        self.dims.clear();
    }
}
