//! Response cache
//!
//! Holds fetched responses ("cache nodes") for reuse across requests. Only
//! nodes fetched with a whole-variable constraint are ever matched by
//! [`CacheStore::lookup`]; partial fetches are admitted for accounting but are
//! never reused for a later request.

use std::collections::BTreeSet;

use serde::Serialize;

use dapfetch_core::{Constraint, SchemaNodeId};

use crate::metrics;
use crate::remote::DataTree;

/// One retained response
pub struct CacheNode {
    tree: Box<dyn DataTree>,
    pub constraint: Constraint,
    pub vars: BTreeSet<SchemaNodeId>,
    pub whole_variable: bool,
    pub payload_size: usize,
}

impl CacheNode {
    pub fn new(
        tree: Box<dyn DataTree>,
        constraint: Constraint,
        vars: impl IntoIterator<Item = SchemaNodeId>,
        whole_variable: bool,
    ) -> Self {
        let payload_size = tree.payload_byte_size();
        Self {
            tree,
            constraint,
            vars: vars.into_iter().collect(),
            whole_variable,
            payload_size,
        }
    }

    pub fn tree(&self) -> &dyn DataTree {
        self.tree.as_ref()
    }

    pub fn covers(&self, var: SchemaNodeId) -> bool {
        self.vars.contains(&var)
    }
}

impl Drop for CacheNode {
    fn drop(&mut self) {
        tracing::trace!(
            bytes = self.payload_size,
            vars = self.vars.len(),
            "Releasing cache node"
        );
    }
}

impl std::fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("vars", &self.vars)
            .field("whole_variable", &self.whole_variable)
            .field("payload_size", &self.payload_size)
            .finish()
    }
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub nodes: usize,
    pub current_size: usize,
    pub size_limit: usize,
    pub count_limit: usize,
    pub has_prefetch: bool,
}

/// LRU store of cache nodes plus an optional prefetch node
#[derive(Debug)]
pub struct CacheStore {
    prefetch: Option<CacheNode>,
    /// Oldest first
    nodes: Vec<CacheNode>,
    size_limit: usize,
    count_limit: usize,
    current_size: usize,
}

impl CacheStore {
    pub fn new(size_limit: usize, count_limit: usize) -> Self {
        Self {
            prefetch: None,
            nodes: Vec::new(),
            size_limit,
            count_limit,
            current_size: 0,
        }
    }

    /// Find a node that fully covers `target`.
    ///
    /// The prefetch node is checked first. Otherwise retained nodes are
    /// scanned newest to oldest, skipping partial ones, and a hit is moved to
    /// the newest position.
    pub fn lookup(&mut self, target: SchemaNodeId) -> Option<&CacheNode> {
        if self.prefetch.as_ref().map_or(false, |p| p.covers(target)) {
            tracing::debug!(var = target.0, "Cache hit on prefetch node");
            metrics::record_cache_hit(metrics::HIT_PREFETCH);
            return self.prefetch.as_ref();
        }

        let position = self
            .nodes
            .iter()
            .rposition(|n| n.whole_variable && n.covers(target));
        match position {
            Some(i) => {
                let node = self.nodes.remove(i);
                self.nodes.push(node);
                tracing::debug!(var = target.0, "Cache hit");
                metrics::record_cache_hit(metrics::HIT_LRU);
                self.nodes.last()
            }
            None => {
                tracing::debug!(var = target.0, "Cache miss");
                metrics::record_cache_miss();
                None
            }
        }
    }

    /// Insert `node` as the newest entry, evicting oldest entries first to
    /// respect the size target and the count limit.
    pub fn admit(&mut self, node: CacheNode) {
        while self.current_size + node.payload_size > self.size_limit && !self.nodes.is_empty() {
            self.evict_oldest();
        }
        while !self.nodes.is_empty() && self.nodes.len() >= self.count_limit {
            self.evict_oldest();
        }
        if self.count_limit == 0 {
            tracing::debug!(bytes = node.payload_size, "Caching disabled, dropping node");
            return;
        }
        if node.payload_size > self.size_limit {
            tracing::warn!(
                bytes = node.payload_size,
                limit = self.size_limit,
                "Admitting node larger than cache size limit"
            );
        }
        self.current_size += node.payload_size;
        self.nodes.push(node);
        metrics::set_cache_size(self.current_size, self.nodes.len());
    }

    fn evict_oldest(&mut self) {
        let node = self.nodes.remove(0);
        self.current_size -= node.payload_size;
        tracing::debug!(bytes = node.payload_size, "Evicting cache node");
        metrics::record_eviction(node.payload_size);
        metrics::set_cache_size(self.current_size, self.nodes.len());
    }

    /// Replace the prefetch node
    pub fn set_prefetch(&mut self, node: CacheNode) {
        tracing::info!(
            vars = node.vars.len(),
            bytes = node.payload_size,
            "Installing prefetch node"
        );
        self.prefetch = Some(node);
    }

    pub fn prefetch(&self) -> Option<&CacheNode> {
        self.prefetch.as_ref()
    }

    /// Retained nodes, oldest first
    pub fn nodes(&self) -> &[CacheNode] {
        &self.nodes
    }

    /// Drop every node, prefetch included
    pub fn clear(&mut self) {
        self.prefetch = None;
        self.nodes.clear();
        self.current_size = 0;
        metrics::set_cache_size(0, 0);
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            nodes: self.nodes.len(),
            current_size: self.current_size,
            size_limit: self.size_limit,
            count_limit: self.count_limit,
            has_prefetch: self.prefetch.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{DataCursor, DataTree};
    use std::cell::Cell;
    use std::rc::Rc;

    struct FixedTree {
        size: usize,
        drops: Rc<Cell<usize>>,
    }

    impl DataTree for FixedTree {
        fn root(&self) -> Box<dyn DataCursor + '_> {
            unreachable!("not walked in cache tests")
        }

        fn payload_byte_size(&self) -> usize {
            self.size
        }
    }

    impl Drop for FixedTree {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn node(size: usize, var: usize, whole: bool, drops: &Rc<Cell<usize>>) -> CacheNode {
        CacheNode::new(
            Box::new(FixedTree {
                size,
                drops: drops.clone(),
            }),
            Constraint::default(),
            [SchemaNodeId(var)],
            whole,
        )
    }

    #[test]
    fn test_evicts_oldest_by_size() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(300, 10);
        store.admit(node(100, 1, true, &drops));
        store.admit(node(100, 2, true, &drops));
        store.admit(node(150, 3, true, &drops));

        assert_eq!(store.current_size(), 250);
        assert_eq!(store.nodes().len(), 2);
        assert!(store.lookup(SchemaNodeId(1)).is_none());
        assert!(store.lookup(SchemaNodeId(2)).is_some());
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_evicts_by_count() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(usize::MAX, 2);
        for var in 0..3 {
            store.admit(node(10, var, true, &drops));
        }
        assert_eq!(store.nodes().len(), 2);
        assert_eq!(store.current_size(), 20);
        assert!(store.lookup(SchemaNodeId(0)).is_none());
    }

    #[test]
    fn test_oversized_node_still_admitted() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(100, 10);
        store.admit(node(50, 1, true, &drops));
        store.admit(node(500, 2, true, &drops));
        assert_eq!(store.nodes().len(), 1);
        assert_eq!(store.current_size(), 500);
        store.admit(node(10, 3, true, &drops));
        assert_eq!(store.nodes().len(), 1);
        assert!(store.lookup(SchemaNodeId(3)).is_some());
    }

    #[test]
    fn test_count_limit_zero_keeps_nothing() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(1000, 0);
        store.admit(node(10, 1, true, &drops));
        assert!(store.nodes().is_empty());
        assert_eq!(store.current_size(), 0);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_partial_nodes_invisible() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(1000, 10);
        store.admit(node(10, 1, false, &drops));
        assert!(store.lookup(SchemaNodeId(1)).is_none());
    }

    #[test]
    fn test_lookup_promotes() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(1000, 10);
        store.admit(node(10, 1, true, &drops));
        store.admit(node(10, 2, true, &drops));
        assert!(store.lookup(SchemaNodeId(1)).is_some());
        assert!(store.nodes()[1].covers(SchemaNodeId(1)));
        assert!(store.nodes()[0].covers(SchemaNodeId(2)));
    }

    #[test]
    fn test_prefetch_checked_first_and_replaced() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(1000, 10);
        store.set_prefetch(node(10, 1, false, &drops));
        assert!(store.lookup(SchemaNodeId(1)).is_some());
        assert!(store.nodes().is_empty());

        store.set_prefetch(node(10, 2, false, &drops));
        assert_eq!(drops.get(), 1);
        assert!(store.lookup(SchemaNodeId(1)).is_none());
        assert!(store.stats().has_prefetch);
    }

    #[test]
    fn test_clear_releases_each_tree_once() {
        let drops = Rc::new(Cell::new(0));
        let mut store = CacheStore::new(1000, 10);
        store.set_prefetch(node(10, 1, true, &drops));
        store.admit(node(10, 2, true, &drops));
        store.admit(node(10, 3, true, &drops));
        store.clear();
        assert_eq!(drops.get(), 3);
        assert_eq!(store.stats().nodes, 0);
    }
}
