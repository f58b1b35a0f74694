//! Bounded, concurrent structural-mask cache.
//!
//! A job validates the same image several times (Stage 1A output is
//! the baseline for both 1B and 2), and mask extraction is the most
//! expensive pixel pass. Entries are keyed by a typed `(JobId, Side)`
//! pair rather than a file path: across retries the same path can hold
//! different content, and free-form string keys invite collisions.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lintel_validate::{MaskError, StructuralMask};
use serde::{Deserialize, Serialize};

/// Stable identity of one enhance job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Wrap a job identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Which side of a validation pair an image plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The image held constant for the stage.
    Baseline,
    /// The generated output being checked.
    Candidate,
}

/// Typed cache key.
///
/// All three parts matter: the path alone can name different content
/// across retries of one job, and `(job, side)` alone names different
/// images across stages (Stage 1B's baseline is the 1A output, not
/// the original). The typed struct replaces the free-form
/// `"{job}-{side}"` strings that invited collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskKey {
    /// Owning job.
    pub job: JobId,
    /// Side within the validation pair.
    pub side: Side,
    /// The image the mask was computed from.
    pub path: PathBuf,
}

/// Bounded FIFO mask cache, safe for concurrent access.
///
/// Entries are `Arc`-shared: a reader holds a complete mask or nothing,
/// never a partially written one. When an entry's dimensions disagree
/// with the image being validated, the entry is stale (same key,
/// different content after a retry) and is recomputed.
pub struct MaskCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    map: HashMap<MaskKey, Arc<StructuralMask>>,
    order: VecDeque<MaskKey>,
}

impl MaskCache {
    /// Create a cache holding at most `capacity` masks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Number of cached entries.
    ///
    /// # Panics
    ///
    /// Panics if the cache lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the mask for `key`, computing and inserting it on a miss.
    ///
    /// `dimensions` is the width/height of the image being validated;
    /// a hit with different dimensions is treated as stale and
    /// recomputed. The compute closure runs outside the lock, so
    /// concurrent jobs are not serialized behind one extraction; two
    /// racing computes for the same key both succeed and the later
    /// insert wins (extraction is deterministic, so the results are
    /// identical).
    ///
    /// # Errors
    ///
    /// Propagates the compute closure's [`MaskError`] on a miss.
    ///
    /// # Panics
    ///
    /// Panics if the cache lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn get_or_compute(
        &self,
        key: &MaskKey,
        dimensions: (u32, u32),
        compute: impl FnOnce() -> Result<StructuralMask, MaskError>,
    ) -> Result<Arc<StructuralMask>, MaskError> {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(mask) = inner.map.get(key) {
                if mask.dimensions() == dimensions {
                    return Ok(Arc::clone(mask));
                }
                // Stale: same key, different image content.
            }
        }

        let mask = Arc::new(compute()?);

        let mut inner = self.inner.lock().unwrap();
        if inner.map.insert(key.clone(), Arc::clone(&mask)).is_none() {
            inner.order.push_back(key.clone());
        }
        while inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
        Ok(mask)
    }

    /// Drop every entry belonging to `job`. Called when a job record
    /// is finalized; its masks will not be needed again.
    ///
    /// # Panics
    ///
    /// Panics if the cache lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn evict_job(&self, job: &JobId) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.retain(|key, _| &key.job != job);
        inner.order.retain(|key| &key.job != job);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lintel_validate::BitMap;

    fn mask(w: u32, h: u32) -> StructuralMask {
        StructuralMask::new(BitMap::new(w, h))
    }

    fn key(job: &str, side: Side) -> MaskKey {
        MaskKey {
            job: JobId::new(job),
            side,
            path: PathBuf::from("img.png"),
        }
    }

    #[test]
    fn miss_computes_and_hit_reuses() {
        let cache = MaskCache::new(4);
        let k = key("job-1", Side::Baseline);

        let first = cache
            .get_or_compute(&k, (8, 8), || Ok(mask(8, 8)))
            .unwrap();
        // A hit must not invoke the compute closure.
        let second = cache
            .get_or_compute(&k, (8, 8), || panic!("closure must not run on a hit"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sides_are_distinct_entries() {
        let cache = MaskCache::new(4);
        cache
            .get_or_compute(&key("job-1", Side::Baseline), (8, 8), || Ok(mask(8, 8)))
            .unwrap();
        cache
            .get_or_compute(&key("job-1", Side::Candidate), (8, 8), || Ok(mask(8, 8)))
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn same_side_different_path_is_a_distinct_entry() {
        // Stage 1B's baseline is the 1A output, not the original:
        // same (job, side), different image.
        let cache = MaskCache::new(4);
        let original = MaskKey {
            job: JobId::new("job-1"),
            side: Side::Baseline,
            path: PathBuf::from("original.png"),
        };
        let lifted = MaskKey {
            job: JobId::new("job-1"),
            side: Side::Baseline,
            path: PathBuf::from("stage1a.png"),
        };
        cache
            .get_or_compute(&original, (8, 8), || Ok(mask(8, 8)))
            .unwrap();
        let mut recomputed = false;
        cache
            .get_or_compute(&lifted, (8, 8), || {
                recomputed = true;
                Ok(mask(8, 8))
            })
            .unwrap();
        assert!(recomputed, "a different image must not hit the cache");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn dimension_mismatch_invalidates_entry() {
        let cache = MaskCache::new(4);
        let k = key("job-1", Side::Baseline);
        cache
            .get_or_compute(&k, (8, 8), || Ok(mask(8, 8)))
            .unwrap();

        // Retry replaced the image with different dimensions: the
        // stale entry must be recomputed, not returned.
        let fresh = cache
            .get_or_compute(&k, (16, 16), || Ok(mask(16, 16)))
            .unwrap();
        assert_eq!(fresh.dimensions(), (16, 16));

        // And the replacement is what lives in the cache now.
        let again = cache
            .get_or_compute(&k, (16, 16), || panic!("must hit after recompute"))
            .unwrap();
        assert!(Arc::ptr_eq(&fresh, &again));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cache = MaskCache::new(2);
        cache
            .get_or_compute(&key("a", Side::Baseline), (4, 4), || Ok(mask(4, 4)))
            .unwrap();
        cache
            .get_or_compute(&key("b", Side::Baseline), (4, 4), || Ok(mask(4, 4)))
            .unwrap();
        cache
            .get_or_compute(&key("c", Side::Baseline), (4, 4), || Ok(mask(4, 4)))
            .unwrap();
        assert_eq!(cache.len(), 2);

        // "a" was oldest and must have been evicted: recompute runs.
        let mut recomputed = false;
        cache
            .get_or_compute(&key("a", Side::Baseline), (4, 4), || {
                recomputed = true;
                Ok(mask(4, 4))
            })
            .unwrap();
        assert!(recomputed);
    }

    #[test]
    fn compute_error_is_propagated_and_not_cached() {
        let cache = MaskCache::new(2);
        let k = key("job-1", Side::Candidate);
        let err = cache.get_or_compute(&k, (4, 4), || Err(MaskError("offline".to_owned())));
        assert!(err.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_job_clears_only_that_job() {
        let cache = MaskCache::new(8);
        cache
            .get_or_compute(&key("a", Side::Baseline), (4, 4), || Ok(mask(4, 4)))
            .unwrap();
        cache
            .get_or_compute(&key("a", Side::Candidate), (4, 4), || Ok(mask(4, 4)))
            .unwrap();
        cache
            .get_or_compute(&key("b", Side::Baseline), (4, 4), || Ok(mask(4, 4)))
            .unwrap();

        cache.evict_job(&JobId::new("a"));
        assert_eq!(cache.len(), 1);
        cache
            .get_or_compute(&key("b", Side::Baseline), (4, 4), || {
                panic!("b must still be cached")
            })
            .unwrap();
    }
}
