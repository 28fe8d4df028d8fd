// history.rs - Rename log and code-change accounting

use crate::core::name::Name;
use serde::{Deserialize, Serialize};

/// A previously finalized name that changed because of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEvent {
    pub key: String,
    pub old: Name,
    pub new: Name,
}

/// Append-only log of rename events attached to a tree.
#[derive(Debug, Clone, Default)]
pub struct NameHistory {
    events: Vec<RenameEvent>,
}

impl NameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: &str, old: Name, new: Name) {
        self.events.push(RenameEvent {
            key: key.to_string(),
            old,
            new,
        });
    }

    pub fn events(&self) -> &[RenameEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events recorded since `mark` (a previous `len()`).
    pub fn since(&self, mark: usize) -> &[RenameEvent] {
        &self.events[mark.min(self.events.len())..]
    }
}

/// Counts code changes by the depth of the prefix the old and new code share.
///
/// Index `i` of each vector counts changes that kept exactly `i` leading levels.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeTracker {
    depth: usize,
    pub total: Vec<usize>,
    pub seed: Vec<usize>,
    pub post: Vec<usize>,
    /// Per-iteration totals, in iteration order.
    pub per_iteration: Vec<(usize, Vec<usize>)>,
}

impl ChangeTracker {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            total: vec![0; depth],
            seed: vec![0; depth],
            post: vec![0; depth],
            per_iteration: Vec::new(),
        }
    }

    /// Records one code change observed at `iteration`.
    ///
    /// Identical names are ignored.
    pub fn track(&mut self, old: &Name, new: &Name, iteration: usize, seed: bool) {
        if old == new {
            return;
        }
        let kept = old.common_prefix_len(new).min(self.depth.saturating_sub(1));
        self.total[kept] += 1;
        if seed {
            self.seed[kept] += 1;
        } else {
            self.post[kept] += 1;
        }

        match self.per_iteration.last_mut() {
            Some((it, counts)) if *it == iteration => counts[kept] += 1,
            _ => {
                let mut counts = vec![0; self.depth];
                counts[kept] += 1;
                self.per_iteration.push((iteration, counts));
            }
        }
    }

    /// Sum of all tracked changes.
    pub fn total_changes(&self) -> usize {
        self.total.iter().sum()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}
