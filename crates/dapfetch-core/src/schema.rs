//! Server schema tree
//!
//! The schema is built once per connection and never mutated afterwards.
//! Nodes live in a single arena and are addressed by [`SchemaNodeId`], so
//! membership tests on sets of variables are integer comparisons.

use serde::{Deserialize, Serialize};

use crate::types::AtomicType;
use crate::{Error, Result};

/// Handle of a node inside a [`SchemaTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaNodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dataset,
    Grid,
    Structure,
    Sequence,
    Atomic,
}

impl NodeKind {
    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Dataset | NodeKind::Grid | NodeKind::Structure)
    }
}

/// Synthetic dimensions that never appear in a server constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PseudoDim {
    /// Trailing axis addressing characters inside a string value
    String,
    /// Record axis of a sequence
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub declared_size: usize,
    #[serde(default)]
    pub pseudo: Option<PseudoDim>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, declared_size: usize) -> Self {
        Self {
            name: name.into(),
            declared_size,
            pseudo: None,
        }
    }

    /// Character axis of a string variable
    pub fn string(declared_size: usize) -> Self {
        Self {
            name: "maxStrlen".to_string(),
            declared_size,
            pseudo: Some(PseudoDim::String),
        }
    }

    /// Record axis of a sequence
    pub fn sequence(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            declared_size: limit,
            pseudo: Some(PseudoDim::Sequence),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.pseudo.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    pub kind: NodeKind,
    pub dims: Vec<Dimension>,
    pub children: Vec<SchemaNodeId>,
    pub container: Option<SchemaNodeId>,
    /// Set for Atomic nodes only
    pub element_type: Option<AtomicType>,
    /// Wrapper node with no counterpart in fetched data
    pub is_virtual: bool,
}

/// Read-only view of a schema, as consumed by the planner and walker
pub trait SchemaProvider {
    fn root(&self) -> SchemaNodeId;

    fn node(&self, id: SchemaNodeId) -> &SchemaNode;

    /// Root-to-node ancestor chain, dataset included
    fn resolve_path(&self, id: SchemaNodeId) -> Vec<SchemaNodeId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.node(current).container {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    fn children(&self, id: SchemaNodeId) -> &[SchemaNodeId] {
        &self.node(id).children
    }

    fn dimensions(&self, id: SchemaNodeId) -> &[Dimension] {
        &self.node(id).dims
    }

    fn element_type(&self, id: SchemaNodeId) -> Option<AtomicType> {
        self.node(id).element_type
    }

    /// True if `ancestor` is `node` or one of its containers
    fn is_ancestor(&self, ancestor: SchemaNodeId, node: SchemaNodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).container;
        }
        false
    }

    /// Atomic nodes below `id` (or `id` itself if it is atomic)
    fn leaves_under(&self, id: SchemaNodeId) -> Vec<SchemaNodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            if node.kind == NodeKind::Atomic {
                out.push(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Every atomic node in the schema
    fn leaves(&self) -> Vec<SchemaNodeId> {
        self.leaves_under(self.root())
    }

    /// Dotted name without the dataset root or virtual wrappers
    fn full_name(&self, id: SchemaNodeId) -> String {
        self.resolve_path(id)
            .into_iter()
            .skip(1)
            .filter(|n| !self.node(*n).is_virtual)
            .map(|n| self.node(n).name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Look up a node by its dotted full name
    fn find(&self, path: &str) -> Result<SchemaNodeId> {
        let mut current = self.root();
        for part in path.split('.').filter(|p| !p.is_empty()) {
            current = self
                .find_child(current, part)
                .ok_or_else(|| Error::UnknownVariable(path.to_string()))?;
        }
        Ok(current)
    }

    /// Child lookup that sees through virtual wrappers
    fn find_child(&self, parent: SchemaNodeId, name: &str) -> Option<SchemaNodeId> {
        for &child in self.children(parent) {
            let node = self.node(child);
            if node.is_virtual {
                if let Some(found) = self.find_child(child, name) {
                    return Some(found);
                }
            } else if node.name == name {
                return Some(child);
            }
        }
        None
    }

    /// True if `id` sits inside a sequence
    fn inside_sequence(&self, id: SchemaNodeId) -> bool {
        self.resolve_path(id)
            .iter()
            .any(|n| self.node(*n).kind == NodeKind::Sequence)
    }

    /// All dimensions from the root down to `id`, pseudo dimensions included
    fn all_dimensions(&self, id: SchemaNodeId) -> Vec<Dimension> {
        self.resolve_path(id)
            .into_iter()
            .flat_map(|n| self.node(n).dims.clone())
            .collect()
    }

    /// Estimated byte size of a variable: product of all declared sizes
    /// along its path times the element size.
    fn estimated_size(&self, id: SchemaNodeId) -> usize {
        let elements: usize = self
            .all_dimensions(id)
            .iter()
            .map(|d| d.declared_size)
            .product();
        let width = self.element_type(id).map(|t| t.size_of()).unwrap_or(0);
        elements.saturating_mul(width)
    }
}

/// Arena-backed schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
}

impl SchemaTree {
    /// Create a tree holding only the dataset root
    pub fn new(dataset_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![SchemaNode {
                name: dataset_name.into(),
                kind: NodeKind::Dataset,
                dims: Vec::new(),
                children: Vec::new(),
                container: None,
                element_type: None,
                is_virtual: false,
            }],
        }
    }

    fn push(&mut self, parent: SchemaNodeId, node: SchemaNode) -> SchemaNodeId {
        let id = SchemaNodeId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn add_structure(
        &mut self,
        parent: SchemaNodeId,
        name: impl Into<String>,
        dims: Vec<Dimension>,
    ) -> SchemaNodeId {
        self.add_container(parent, name, NodeKind::Structure, dims)
    }

    pub fn add_grid(&mut self, parent: SchemaNodeId, name: impl Into<String>) -> SchemaNodeId {
        self.add_container(parent, name, NodeKind::Grid, Vec::new())
    }

    /// Sequence with a record axis of `limit` entries
    pub fn add_sequence(
        &mut self,
        parent: SchemaNodeId,
        name: impl Into<String>,
        limit: usize,
    ) -> SchemaNodeId {
        let name = name.into();
        let dim = Dimension::sequence(format!("{}_records", name), limit);
        self.add_container(parent, name, NodeKind::Sequence, vec![dim])
    }

    /// Transparent wrapper; its children are addressed as if they belonged
    /// to `parent`.
    pub fn add_virtual(&mut self, parent: SchemaNodeId, name: impl Into<String>) -> SchemaNodeId {
        let id = self.add_container(parent, name, NodeKind::Structure, Vec::new());
        self.nodes[id.0].is_virtual = true;
        id
    }

    fn add_container(
        &mut self,
        parent: SchemaNodeId,
        name: impl Into<String>,
        kind: NodeKind,
        dims: Vec<Dimension>,
    ) -> SchemaNodeId {
        self.push(
            parent,
            SchemaNode {
                name: name.into(),
                kind,
                dims,
                children: Vec::new(),
                container: Some(parent),
                element_type: None,
                is_virtual: false,
            },
        )
    }

    /// Atomic variable. String and Url variables get a trailing character
    /// axis of `string_length` if `dims` does not already end in one.
    pub fn add_atomic(
        &mut self,
        parent: SchemaNodeId,
        name: impl Into<String>,
        element_type: AtomicType,
        mut dims: Vec<Dimension>,
        string_length: usize,
    ) -> SchemaNodeId {
        let has_string_dim = dims.last().map(|d| d.pseudo == Some(PseudoDim::String)).unwrap_or(false);
        if element_type.is_string() && !has_string_dim {
            dims.push(Dimension::string(string_length));
        }
        self.push(
            parent,
            SchemaNode {
                name: name.into(),
                kind: NodeKind::Atomic,
                dims,
                children: Vec::new(),
                container: Some(parent),
                element_type: Some(element_type),
                is_virtual: false,
            },
        )
    }
}

impl SchemaProvider for SchemaTree {
    fn root(&self) -> SchemaNodeId {
        SchemaNodeId(0)
    }

    fn node(&self, id: SchemaNodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }
}
