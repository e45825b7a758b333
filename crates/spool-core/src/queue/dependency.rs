//! Dependency graph over the items of one box.
//!
//! Edges point from an item to the item it waits for. The graph is built on
//! demand from stored rows (see `QueueTable::insert`) to refuse rows that would
//! close a loop, since a loop can never drain.
//!
//! - Forward edges: item -> items it depends on
//! - Reverse edges: item -> items waiting on it
//! - Invariant: edges and reverse_edges are kept in sync

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::ItemId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<ItemId, HashSet<ItemId>>,
    reverse_edges: HashMap<ItemId, HashSet<ItemId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `item` waits for `depends_on`.
    pub fn add_dependency(&mut self, item: ItemId, depends_on: ItemId) {
        self.edges.entry(item).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(item);
    }

    /// Items `item` waits for, sorted.
    pub fn dependencies_of(&self, item: ItemId) -> Vec<ItemId> {
        let mut deps: Vec<ItemId> = self
            .edges
            .get(&item)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Items waiting on `item`, sorted.
    pub fn dependents_of(&self, item: ItemId) -> Vec<ItemId> {
        let mut waiting: Vec<ItemId> = self
            .reverse_edges
            .get(&item)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default();
        waiting.sort();
        waiting
    }

    /// First cycle found, as a path `a -> b -> ... -> a`, or `None` for a DAG.
    ///
    /// Kahn's algorithm peels off every node nothing depends on; whatever
    /// survives has an in-edge from another survivor, so walking those in-edges
    /// backwards must revisit a node.
    pub fn detect_cycle(&self) -> Option<Vec<ItemId>> {
        let mut in_degree: HashMap<ItemId, usize> = HashMap::new();
        for (item, deps) in &self.edges {
            in_degree.entry(*item).or_insert(0);
            for dep in deps {
                *in_degree.entry(*dep).or_insert(0) += 1;
            }
        }

        let mut ready: VecDeque<ItemId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(item, _)| *item)
            .collect();
        while let Some(item) = ready.pop_front() {
            in_degree.remove(&item);
            for dep in self.edges.get(&item).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dep) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*dep);
                    }
                }
            }
        }

        let start = in_degree.keys().min().copied()?;
        let mut path = vec![start];
        let mut seen: HashMap<ItemId, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let waiter = self
                .reverse_edges
                .get(&current)?
                .iter()
                .filter(|w| in_degree.contains_key(w))
                .min()
                .copied()?;
            if let Some(&pos) = seen.get(&waiter) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(waiter);
                cycle.reverse();
                return Some(cycle);
            }
            seen.insert(waiter, path.len());
            path.push(waiter);
            current = waiter;
        }
    }
}
