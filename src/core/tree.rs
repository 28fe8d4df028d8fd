// tree.rs - Arena-backed naming tree

use crate::core::history::NameHistory;
use crate::core::name::Name;
use crate::error::{NomenError, Result};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Opaque index of a node inside a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    /// Cluster ID -> child
    Internal(BTreeMap<i32, NodeHandle>),
    /// Sample keys sharing the full address of this node
    Named(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Node {
    id: i32,
    level: usize,
    parent: Option<NodeHandle>,
    kind: NodeKind,
}

/// A sample's code as published to the record system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedCode {
    pub key: String,
    pub code: String,
    pub name: Name,
    pub level: usize,
    pub complete: bool,
}

/// Hierarchy of clusters, one level per threshold.
///
/// Root sits at level 0; nodes at level `depth` are named nodes holding the
/// sample keys. Removed nodes leave an empty slot in the arena.
#[derive(Debug, Clone)]
pub struct Tree {
    depth: usize,
    nodes: Vec<Option<Node>>,
    names: BTreeMap<String, Name>,
    provisional: BTreeMap<String, Name>,
    history: NameHistory,
}

const ROOT: NodeHandle = NodeHandle(0);

impl Tree {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "tree depth must be at least 1");
        let root = Node {
            id: 0,
            level: 0,
            parent: None,
            kind: NodeKind::Internal(BTreeMap::new()),
        };
        Self {
            depth,
            nodes: vec![Some(root)],
            names: BTreeMap::new(),
            provisional: BTreeMap::new(),
            history: NameHistory::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> NodeHandle {
        ROOT
    }

    /// Number of samples holding a resolved name.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn history(&self) -> &NameHistory {
        &self.history
    }

    pub fn names(&self) -> &BTreeMap<String, Name> {
        &self.names
    }

    pub fn provisional_names(&self) -> &BTreeMap<String, Name> {
        &self.provisional
    }

    fn node(&self, handle: NodeHandle) -> &Node {
        match self.nodes.get(handle.0).and_then(|n| n.as_ref()) {
            Some(node) => node,
            None => panic!("stale node handle {}", handle.0),
        }
    }

    fn node_mut(&mut self, handle: NodeHandle) -> &mut Node {
        match self.nodes.get_mut(handle.0).and_then(|n| n.as_mut()) {
            Some(node) => node,
            None => panic!("stale node handle {}", handle.0),
        }
    }

    pub fn cluster_id(&self, handle: NodeHandle) -> i32 {
        self.node(handle).id
    }

    pub fn level(&self, handle: NodeHandle) -> usize {
        self.node(handle).level
    }

    pub fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.node(handle).parent
    }

    pub fn is_named_node(&self, handle: NodeHandle) -> bool {
        matches!(self.node(handle).kind, NodeKind::Named(_))
    }

    pub fn child(&self, handle: NodeHandle, id: i32) -> Option<NodeHandle> {
        match &self.node(handle).kind {
            NodeKind::Internal(children) => children.get(&id).copied(),
            NodeKind::Named(_) => None,
        }
    }

    /// Children in ascending cluster ID order.
    pub fn children(&self, handle: NodeHandle) -> Vec<(i32, NodeHandle)> {
        match &self.node(handle).kind {
            NodeKind::Internal(children) => children.iter().map(|(&id, &h)| (id, h)).collect(),
            NodeKind::Named(_) => Vec::new(),
        }
    }

    pub fn members(&self, handle: NodeHandle) -> Option<&BTreeSet<String>> {
        match &self.node(handle).kind {
            NodeKind::Named(members) => Some(members),
            NodeKind::Internal(_) => None,
        }
    }

    /// Direct children of an internal node, or members of a named node.
    pub fn size(&self, handle: NodeHandle) -> usize {
        match &self.node(handle).kind {
            NodeKind::Internal(children) => children.len(),
            NodeKind::Named(members) => members.len(),
        }
    }

    /// Creates the next sibling cluster under `parent` (max ID + 1, or 1).
    pub fn new_child(&mut self, parent: NodeHandle) -> NodeHandle {
        let next = match &self.node(parent).kind {
            NodeKind::Internal(children) => children.keys().next_back().map_or(1, |id| id + 1),
            NodeKind::Named(_) => panic!("named node {} cannot have children", parent.0),
        };
        self.insert_child(parent, next)
    }

    fn insert_child(&mut self, parent: NodeHandle, id: i32) -> NodeHandle {
        let level = self.level(parent) + 1;
        assert!(level <= self.depth, "node level {} exceeds depth {}", level, self.depth);

        let kind = if level == self.depth {
            NodeKind::Named(BTreeSet::new())
        } else {
            NodeKind::Internal(BTreeMap::new())
        };
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(Some(Node {
            id,
            level,
            parent: Some(parent),
            kind,
        }));

        match &mut self.node_mut(parent).kind {
            NodeKind::Internal(children) => {
                let previous = children.insert(id, handle);
                assert!(previous.is_none(), "duplicate cluster id {} under node {}", id, parent.0);
            }
            NodeKind::Named(_) => unreachable!(),
        }
        handle
    }

    /// Walks `path` from the root; an empty path is the root itself.
    pub fn traverse(&self, path: &[i32]) -> Option<NodeHandle> {
        path.iter()
            .try_fold(ROOT, |node, &id| self.child(node, id))
    }

    /// Cluster IDs from the root down to `handle`.
    pub fn address(&self, handle: NodeHandle) -> Name {
        let mut ids = Vec::with_capacity(self.depth);
        let mut current = handle;
        while let Some(parent) = self.parent(current) {
            ids.push(self.cluster_id(current));
            current = parent;
        }
        ids.reverse();
        Name::new(ids)
    }

    /// Resolved or provisional name of `key`.
    pub fn get_name(&self, key: &str) -> Option<&Name> {
        self.names.get(key).or_else(|| self.provisional.get(key))
    }

    /// First `level` components of the name of `key`.
    pub fn get_part(&self, key: &str, level: usize) -> Option<Name> {
        self.get_name(key).map(|name| name.prefix(level))
    }

    pub fn has_name(&self, key: &str) -> bool {
        self.names.contains_key(key) || self.provisional.contains_key(key)
    }

    pub fn has_resolved_name(&self, key: &str) -> bool {
        self.names.contains_key(key)
    }

    /// Registers `key` under a named node and returns the node's address.
    pub fn add_member(&mut self, handle: NodeHandle, key: &str) -> Name {
        match &mut self.node_mut(handle).kind {
            NodeKind::Named(members) => {
                members.insert(key.to_string());
            }
            NodeKind::Internal(_) => panic!("cannot add '{}' to internal node {}", key, handle.0),
        }
        self.address(handle)
    }

    /// Records `name` as the resolved name of `key`.
    ///
    /// The named node at `name` must already contain `key`.
    pub fn finalize_name(&mut self, key: &str, name: Name) {
        let node = self
            .traverse(name.parts())
            .unwrap_or_else(|| panic!("name {} of '{}' does not exist in the tree", name, key));
        let registered = self.members(node).is_some_and(|m| m.contains(key));
        assert!(registered, "named node {} does not contain '{}'", name, key);

        self.provisional.remove(key);
        self.names.insert(key.to_string(), name);
    }

    /// Stores an unresolved name for a sample that must not enter the tree.
    pub fn set_provisional(&mut self, key: &str, name: Name) {
        self.provisional.insert(key.to_string(), name);
    }

    pub fn drop_provisional(&mut self, key: &str) -> Option<Name> {
        self.provisional.remove(key)
    }

    /// Removes a resolved sample, pruning clusters left empty.
    pub fn remove_name(&mut self, key: &str) -> bool {
        let name = match self.names.remove(key) {
            Some(name) => name,
            None => return false,
        };
        let mut node = self
            .traverse(name.parts())
            .unwrap_or_else(|| panic!("name {} of '{}' does not exist in the tree", name, key));
        if let NodeKind::Named(members) = &mut self.node_mut(node).kind {
            members.remove(key);
        }

        while let Some(parent) = self.parent(node) {
            if self.size(node) > 0 {
                break;
            }
            self.detach(node);
            node = parent;
        }
        true
    }

    /// Named samples below (or in) `handle`.
    pub fn named_count(&self, handle: NodeHandle) -> usize {
        match &self.node(handle).kind {
            NodeKind::Named(members) => members.len(),
            NodeKind::Internal(children) => children.values().map(|&c| self.named_count(c)).sum(),
        }
    }

    /// Named nodes below (or equal to) `handle`, depth first in ID order.
    pub fn named_nodes(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            match &self.node(current).kind {
                NodeKind::Named(_) => out.push(current),
                NodeKind::Internal(children) => stack.extend(children.values().rev().copied()),
            }
        }
        out
    }

    /// Sample keys below (or in) `handle`.
    pub fn named_keys(&self, handle: NodeHandle) -> Vec<&str> {
        self.named_nodes(handle)
            .into_iter()
            .filter_map(|n| self.members(n))
            .flat_map(|members| members.iter().map(String::as_str))
            .collect()
    }

    /// Number of live clusters at each level (index 0 is level 1).
    pub fn clusters_per_level(&self) -> Vec<usize> {
        let mut counts = vec![0; self.depth];
        for node in self.nodes.iter().flatten() {
            if node.level > 0 {
                counts[node.level - 1] += 1;
            }
        }
        counts
    }

    /// Every cluster at `level` with its named-sample count, largest first.
    pub fn cluster_sizes(&self, level: usize) -> Vec<(Name, usize)> {
        let mut sizes: Vec<(Name, usize)> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.as_ref().is_some_and(|n| n.level == level))
            .map(|(i, _)| {
                let handle = NodeHandle(i);
                (self.address(handle), self.named_count(handle))
            })
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sizes
    }

    fn detach(&mut self, handle: NodeHandle) {
        let (id, parent) = {
            let node = self.node(handle);
            (node.id, node.parent)
        };
        if let Some(parent) = parent {
            if let NodeKind::Internal(children) = &mut self.node_mut(parent).kind {
                children.remove(&id);
            }
        }
        self.nodes[handle.0] = None;
    }

    /// Merges sibling clusters `ids` under `parent` into one survivor.
    ///
    /// The survivor is the cluster with the most named descendants, lowest ID
    /// on ties. Members (leaf level) or children (internal level) of the other
    /// clusters move into the survivor; moved children are renumbered after the
    /// survivor's highest child ID. Every name below the survivor is then
    /// re-derived and changes are recorded in the history.
    pub fn merge_nodes(&mut self, parent: NodeHandle, ids: &[i32]) -> NodeHandle {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        assert!(ids.len() >= 2, "merge needs at least two clusters, got {:?}", ids);

        let clusters: Vec<(i32, NodeHandle, usize)> = ids
            .iter()
            .map(|&id| {
                let handle = self
                    .child(parent, id)
                    .unwrap_or_else(|| panic!("cluster {} is not a child of node {}", id, parent.0));
                (id, handle, self.named_count(handle))
            })
            .collect();

        let (survivor_id, survivor, _) = clusters
            .iter()
            .copied()
            .max_by(|a, b| a.2.cmp(&b.2).then_with(|| b.0.cmp(&a.0)))
            .unwrap_or_else(|| unreachable!());

        let losers: Vec<NodeHandle> = clusters
            .iter()
            .filter(|(id, _, _)| *id != survivor_id)
            .map(|&(_, handle, _)| handle)
            .collect();

        if self.is_named_node(survivor) {
            for loser in losers {
                let moved = match &mut self.node_mut(loser).kind {
                    NodeKind::Named(members) => std::mem::take(members),
                    NodeKind::Internal(_) => panic!("sibling kinds differ during merge"),
                };
                if let NodeKind::Named(members) = &mut self.node_mut(survivor).kind {
                    members.extend(moved);
                }
                self.detach(loser);
            }
        } else {
            let mut next = self
                .children(survivor)
                .last()
                .map_or(1, |(id, _)| id + 1);
            for loser in losers {
                for (_, child) in self.children(loser) {
                    let node = self.node_mut(child);
                    node.id = next;
                    node.parent = Some(survivor);
                    if let NodeKind::Internal(children) = &mut self.node_mut(survivor).kind {
                        children.insert(next, child);
                    }
                    next += 1;
                }
                if let NodeKind::Internal(children) = &mut self.node_mut(loser).kind {
                    children.clear();
                }
                self.detach(loser);
            }
        }

        self.refresh_names(survivor);
        survivor
    }

    fn refresh_names(&mut self, handle: NodeHandle) {
        for named in self.named_nodes(handle) {
            let address = self.address(named);
            let keys: Vec<String> = self
                .members(named)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default();
            for key in keys {
                if let Some(old) = self.names.get(&key) {
                    if *old != address {
                        self.history.record(&key, old.clone(), address.clone());
                    }
                }
                self.finalize_name(&key, address.clone());
            }
        }
    }

    /// Rebuilds the arena from a flat `key -> name` map.
    ///
    /// Names whose length differs from `depth` are skipped with a warning.
    pub fn from_names(depth: usize, names: &BTreeMap<String, Name>) -> Result<Self> {
        let mut tree = Tree::new(depth);
        let mut mismatched = 0usize;

        for (key, name) in names {
            if name.len() != depth {
                mismatched += 1;
                continue;
            }
            if !name.is_resolved() {
                return Err(NomenError::Integrity(format!(
                    "stored name '{}' of '{}' has undefined levels",
                    name, key
                )));
            }

            let mut node = ROOT;
            for &id in name.parts() {
                node = match tree.child(node, id) {
                    Some(child) => child,
                    None => tree.insert_child(node, id),
                };
            }
            tree.add_member(node, key);
            tree.names.insert(key.clone(), name.clone());
        }

        if mismatched > 0 {
            warn!(
                "⚠️  Skipped {} stored names whose length differs from depth {}",
                mismatched, depth
            );
        }
        Ok(tree)
    }

    /// Loads a tree saved with [`Tree::save`].
    pub fn load(path: &Path, depth: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| NomenError::storage(path, e))?;
        let names: BTreeMap<String, Name> = serde_json::from_reader(BufReader::new(file))?;
        let tree = Self::from_names(depth, &names)?;
        info!("🌳 Loaded tree from {} ({} names)", path.display(), tree.len());
        Ok(tree)
    }

    /// Writes the resolved names as a JSON object `{key: "1.2.3"}`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| NomenError::storage(parent, e))?;
        }
        let file = File::create(path).map_err(|e| NomenError::storage(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.names)?;
        writer.flush().map_err(|e| NomenError::storage(path, e))?;
        Ok(())
    }

    /// Codes for every resolved sample, truncated where the lineage stops branching.
    ///
    /// Walking up from a sample's named node, the first node with more than
    /// one child (or member) fixes the published level, never shallower than 1.
    pub fn published_codes(&self, prefix: &str) -> Vec<PublishedCode> {
        let mut codes = Vec::with_capacity(self.names.len());
        for named in self.named_nodes(ROOT) {
            let mut level = 0;
            let mut current = Some(named);
            while let Some(node) = current {
                if self.size(node) > 1 {
                    level = self.level(node);
                    break;
                }
                current = self.parent(node);
            }
            let level = level.max(1);

            let address = self.address(named);
            let published = address.prefix(level);
            let code = if prefix.is_empty() {
                published.to_string()
            } else {
                format!("{} - {}", prefix, published)
            };
            if let Some(members) = self.members(named) {
                for key in members {
                    codes.push(PublishedCode {
                        key: key.clone(),
                        code: code.clone(),
                        name: address.clone(),
                        level,
                        complete: level == self.depth,
                    });
                }
            }
        }
        codes
    }
}
