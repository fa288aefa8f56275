//! Document-to-shard routing.
//!
//! Each shard contributes a fixed number of points to a hash ring; a document
//! id lands on the first point at or after its own hash, wrapping around.

use crate::types::ShardId;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

const POINTS_PER_SHARD: u32 = 128;

/// Routes document ids onto a fixed set of shards.
///
/// ```
/// use shardscroll_distributed::hashing::ShardRouter;
/// use shardscroll_distributed::types::ShardId;
///
/// let router = ShardRouter::new((0..3).map(ShardId::new));
/// let shard = router.route("doc-42").unwrap();
/// assert_eq!(router.route("doc-42"), Some(shard));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShardRouter {
    points: BTreeMap<u64, ShardId>,
}

impl ShardRouter {
    pub fn new(shards: impl IntoIterator<Item = ShardId>) -> Self {
        let mut points = BTreeMap::new();
        for shard in shards {
            for point in 0..POINTS_PER_SHARD {
                points.insert(hash_of(&(shard.as_u32(), point)), shard);
            }
        }
        Self { points }
    }

    /// Shard owning `doc_id`, or `None` when the router has no shards.
    pub fn route(&self, doc_id: &str) -> Option<ShardId> {
        let hash = hash_of(doc_id);
        self.points
            .range(hash..)
            .chain(self.points.iter())
            .next()
            .map(|(_, shard)| *shard)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn hash_of<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
