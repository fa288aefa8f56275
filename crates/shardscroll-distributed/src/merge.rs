//! Result merging.
//!
//! Hits from all participating shards are combined into one page by score,
//! highest first. Ties are broken by shard id and then by the order the
//! shard returned them, so a page depends only on which hits were buffered
//! and never on the order shards happened to answer in.

use crate::types::*;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Total order used for every merged page.
pub fn compare_hits(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.shard_id.cmp(&b.shard_id))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

/// Builds pages out of per-shard hit buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMerger;

impl ResultMerger {
    pub fn new() -> Self {
        Self
    }

    /// Take up to `page_size` hits from the shard buffers.
    ///
    /// Each buffer must already be in shard order (as returned by the
    /// shard). Hits not taken stay at the front of their buffer for the
    /// next page.
    pub fn merge_page<'a, I>(&self, buffers: I, page_size: usize) -> Vec<Hit>
    where
        I: IntoIterator<Item = &'a mut VecDeque<Hit>>,
    {
        let mut buffers: Vec<&'a mut VecDeque<Hit>> = buffers
            .into_iter()
            .filter(|buffer| !buffer.is_empty())
            .collect();
        let mut page = Vec::with_capacity(page_size);

        while page.len() < page_size {
            let next = buffers
                .iter()
                .enumerate()
                .filter_map(|(i, buffer)| buffer.front().map(|hit| (i, hit)))
                .min_by(|(_, a), (_, b)| compare_hits(a, b))
                .map(|(i, _)| i);

            let Some(i) = next else { break };
            if let Some(hit) = buffers[i].pop_front() {
                page.push(hit);
            }
        }

        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(shard: u32, doc: &str, score: f64, sequence: u64) -> Hit {
        Hit {
            sequence,
            ..Hit::new(ShardId::new(shard), doc, score, "{}")
        }
    }

    #[test]
    fn test_merge_page_sorting() {
        let merger = ResultMerger::new();
        let mut low: VecDeque<Hit> = vec![hit(0, "low", 0.3, 0)].into();
        let mut high: VecDeque<Hit> = vec![hit(1, "high", 0.9, 0)].into();
        let page = merger.merge_page([&mut low, &mut high], 10);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].doc_id, "high");
        assert_eq!(page[1].doc_id, "low");
    }

    #[test]
    fn test_merge_page_truncates() {
        let merger = ResultMerger::new();
        let mut buffer: VecDeque<Hit> =
            vec![hit(0, "a", 0.9, 0), hit(0, "b", 0.8, 1), hit(0, "c", 0.7, 2)].into();
        let page = merger.merge_page([&mut buffer], 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].doc_id, "b");
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_ties_break_by_shard_then_sequence() {
        let mut a = hit(1, "x", 1.0, 0);
        let b = hit(0, "y", 1.0, 5);
        assert_eq!(compare_hits(&b, &a), Ordering::Less);
        a.shard_id = ShardId::new(0);
        assert_eq!(compare_hits(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_merge_page_leaves_remainder_buffered() {
        let merger = ResultMerger::new();
        let mut shard0: VecDeque<Hit> =
            vec![hit(0, "a", 3.0, 0), hit(0, "b", 1.0, 1)].into();
        let mut shard1: VecDeque<Hit> =
            vec![hit(1, "c", 2.0, 0), hit(1, "d", 0.5, 1)].into();

        let page = merger.merge_page([&mut shard0, &mut shard1], 3);
        let ids: Vec<_> = page.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(shard0.is_empty());
        assert_eq!(shard1.len(), 1);
        assert_eq!(shard1[0].doc_id, "d");
    }

    #[test]
    fn test_merge_page_independent_of_buffer_order() {
        let merger = ResultMerger::new();
        let build = || -> (VecDeque<Hit>, VecDeque<Hit>) {
            (
                vec![hit(0, "a", 1.0, 0), hit(0, "b", 1.0, 1)].into(),
                vec![hit(1, "c", 2.0, 0), hit(1, "d", 1.0, 1)].into(),
            )
        };

        let (mut x0, mut x1) = build();
        let forward = merger.merge_page([&mut x0, &mut x1], 10);
        let (mut y0, mut y1) = build();
        let backward = merger.merge_page([&mut y1, &mut y0], 10);

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 4);
    }

    #[test]
    fn test_merge_page_empty_buffers() {
        let merger = ResultMerger::new();
        let mut empty = VecDeque::new();
        assert!(merger.merge_page([&mut empty], 10).is_empty());
    }
}
