// store/ — Contract around the external nearest-neighbor vector store.
//
// The store itself (durability, replication, index creation) is someone
// else's problem; this crate only upserts and queries an index that is
// assumed to exist with the right dimensionality and a dot-product metric.

pub mod rest;

use std::collections::HashMap;

use serde::Serialize;

use crate::config;
use crate::error::Error;

pub use rest::RestVectorStore;

/// One search match. Higher score = more similar (dot product over unit
/// vectors). Order within a result set is the store's order, unmodified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// The upsert/query contract. Implementations must be callable from multiple
/// threads; each call is independent and atomic from the caller's view.
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> usize;

    /// Write or overwrite one item. Vectors must already be normalized and
    /// must match the index dimensionality exactly.
    fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &HashMap<String, String>,
    ) -> Result<(), Error>;

    /// Up to `limit` nearest items (clamped, see `clamp_limit`). Fewer stored
    /// items than `limit` returns fewer results, not an error. The filter is
    /// passed through to the store unmodified.
    fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<SearchHit>, Error>;

    /// Liveness probe for health reporting. Must not panic.
    fn is_reachable(&self) -> bool;
}

/// Dimensionality gate shared by adapter implementations: a mismatched
/// vector is configuration drift and must never reach the store.
pub(crate) fn check_dimension(expected: usize, got: usize) -> Result<(), Error> {
    if got != expected {
        return Err(Error::DimensionMismatch { got, expected });
    }
    Ok(())
}

/// Bound query fan-out no matter what the caller asked for.
pub(crate) fn clamp_limit(limit: usize) -> usize {
    limit.min(config::store::MAX_QUERY_LIMIT)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory stand-in for the external store: insertion-ordered items,
    /// dot-product scoring, same dimension/limit policies as the REST adapter.
    pub(crate) struct MemoryIndex {
        dimension: usize,
        items: Mutex<Vec<(String, Vec<f32>, HashMap<String, String>)>>,
        pub upserts: AtomicUsize,
    }

    impl MemoryIndex {
        pub(crate) fn new(dimension: usize) -> Self {
            Self {
                dimension,
                items: Mutex::new(Vec::new()),
                upserts: AtomicUsize::new(0),
            }
        }

        pub(crate) fn len(&self) -> usize {
            self.items.lock().expect("items lock").len()
        }

        pub(crate) fn metadata_of(&self, id: &str) -> Option<HashMap<String, String>> {
            self.items
                .lock()
                .expect("items lock")
                .iter()
                .find(|(item_id, _, _)| item_id == id)
                .map(|(_, _, m)| m.clone())
        }
    }

    impl VectorIndex for MemoryIndex {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn upsert(
            &self,
            id: &str,
            vector: &[f32],
            metadata: &HashMap<String, String>,
        ) -> Result<(), Error> {
            check_dimension(self.dimension, vector.len())?;
            self.upserts.fetch_add(1, Ordering::SeqCst);
            let mut items = self.items.lock().expect("items lock");
            if let Some(existing) = items.iter_mut().find(|(item_id, _, _)| item_id == id) {
                existing.1 = vector.to_vec();
                existing.2 = metadata.clone();
            } else {
                items.push((id.to_string(), vector.to_vec(), metadata.clone()));
            }
            Ok(())
        }

        fn query(
            &self,
            vector: &[f32],
            limit: usize,
            _filter: Option<&serde_json::Value>,
        ) -> Result<Vec<SearchHit>, Error> {
            check_dimension(self.dimension, vector.len())?;
            let items = self.items.lock().expect("items lock");
            let mut hits: Vec<SearchHit> = items
                .iter()
                .map(|(id, stored, _)| SearchHit {
                    id: id.clone(),
                    score: stored.iter().zip(vector).map(|(a, b)| a * b).sum(),
                })
                .collect();
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(clamp_limit(limit));
            Ok(hits)
        }

        fn is_reachable(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::MemoryIndex;
    use super::*;

    #[test]
    fn test_clamp_limit_caps_at_max() {
        assert_eq!(clamp_limit(100), config::store::MAX_QUERY_LIMIT);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(0), 0);
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(512, 512).is_ok());
        assert!(matches!(
            check_dimension(512, 384),
            Err(Error::DimensionMismatch {
                got: 384,
                expected: 512
            })
        ));
    }

    #[test]
    fn test_wrong_dimension_never_reaches_storage() {
        let index = MemoryIndex::new(4);
        let err = index.upsert("a", &[1.0, 0.0], &HashMap::new());
        assert!(matches!(err, Err(Error::DimensionMismatch { .. })));
        assert_eq!(index.upserts.load(Ordering::SeqCst), 0);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_upsert_same_id_overwrites() {
        let index = MemoryIndex::new(2);
        let mut meta = HashMap::new();
        meta.insert("type".to_string(), "text".to_string());
        index.upsert("a", &[1.0, 0.0], &meta).expect("upsert");
        meta.insert("category".to_string(), "rugs".to_string());
        index.upsert("a", &[0.0, 1.0], &meta).expect("upsert");

        assert_eq!(index.len(), 1);
        let stored = index.metadata_of("a").expect("item present");
        assert_eq!(stored.get("category").map(String::as_str), Some("rugs"));
    }

    #[test]
    fn test_query_orders_by_score_and_tolerates_large_limit() {
        let index = MemoryIndex::new(2);
        index.upsert("x", &[1.0, 0.0], &HashMap::new()).expect("upsert");
        index.upsert("y", &[0.0, 1.0], &HashMap::new()).expect("upsert");
        index
            .upsert("z", &[0.7071, 0.7071], &HashMap::new())
            .expect("upsert");

        let hits = index.query(&[1.0, 0.0], 100, None).expect("query");
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[1].id, "z");
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }
}
