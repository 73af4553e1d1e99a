//! Queue weighting

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Relative weights of named queues
///
/// Higher weight means the queue is polled first more often. Every queue
/// with a non-zero weight is eventually served.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueWeights {
    entries: Vec<(String, u32)>,
}

impl Default for QueueWeights {
    fn default() -> Self {
        Self::new([("critical", 6), ("default", 3), ("low", 1)])
    }
}

impl QueueWeights {
    /// Build from (name, weight) pairs; zero weights are dropped
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, weight)| (name.into(), weight))
            .filter(|(_, weight)| *weight > 0)
            .collect();
        Self { entries }
    }

    /// Queue names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Whether the queue is known
    pub fn contains(&self, queue: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == queue)
    }

    /// Number of queues
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no queues
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Polling order for one dequeue round
    ///
    /// Weighted sampling without replacement: the first queue is chosen with
    /// probability proportional to its weight, then the next among the rest.
    pub fn poll_order(&self) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let mut remaining: Vec<&(String, u32)> = self.entries.iter().collect();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let total: u32 = remaining.iter().map(|(_, w)| *w).sum();
            let mut pick = rng.gen_range(0..total);
            let mut index = 0;
            for (i, (_, weight)) in remaining.iter().enumerate() {
                if pick < *weight {
                    index = i;
                    break;
                }
                pick -= weight;
            }
            order.push(remaining.remove(index).0.clone());
        }

        order
    }
}
