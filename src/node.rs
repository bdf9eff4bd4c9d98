//! Arena-backed tree of named nodes.
//!
//! Nodes live in a single `Vec` and refer to each other by [`NodeId`]. A
//! container owns the ordered list of its children; the parent link is a
//! plain index used for lookups only. Leaves own one [`ByteRange`] view, so
//! a decoded tree keeps its backing source alive until the tree (or the
//! subtree holding the last leaf) is dropped.
//!
//! ```
//! use ctrkit::node::NodeTree;
//! use ctrkit::source::ByteRange;
//!
//! let mut tree = NodeTree::new();
//! let docs = tree.add_container(tree.root(), "docs").unwrap();
//! tree.add_leaf(docs, "a.txt", ByteRange::from_vec(b"test".to_vec())).unwrap();
//!
//! let file = tree.find("docs/a.txt").unwrap();
//! assert_eq!(tree.path(file), "/docs/a.txt");
//! ```

use std::collections::{BTreeMap, VecDeque};

use crate::source::ByteRange;
use crate::{Error, Result};

/// Index of a node inside its [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Has ordered children, never data.
    Container,
    /// Has data (unless detached with [`Node::take_data`]), never children.
    Leaf,
}

/// Free-form value attached to a node under a string key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// One filesystem entry.
#[derive(Debug)]
pub struct Node {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: Option<ByteRange>,
    /// Caller-defined metadata; ignored by the codecs.
    pub tags: BTreeMap<String, TagValue>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_container(&self) -> bool {
        self.kind == NodeKind::Container
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order. Always empty for leaves.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Data view of a leaf. [`None`] for containers and detached leaves.
    pub fn data(&self) -> Option<&ByteRange> {
        self.data.as_ref()
    }

    /// Detach the data view from a leaf, leaving it without content.
    pub fn take_data(&mut self) -> Option<ByteRange> {
        self.data.take()
    }
}

/// Rooted, ordered tree of [`Node`]s. The root is an unnamed container.
///
/// The arena only grows: [`NodeTree::remove`] empties slots but never reuses
/// them, so a stale [`NodeId`] can never resolve to an unrelated node.
#[derive(Debug)]
pub struct NodeTree {
    nodes: Vec<Option<Node>>,
    live: usize,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            kind: NodeKind::Container,
            parent: None,
            children: Vec::new(),
            data: None,
            tags: BTreeMap::new(),
        };
        Self {
            nodes: vec![Some(root)],
            live: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a live node. [`None`] if `id` was removed.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the tree holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    /// Append a container named `name` to `parent`.
    pub fn add_container(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.push(parent, name, NodeKind::Container, None)
    }

    /// Append a leaf named `name` owning `data` to `parent`.
    pub fn add_leaf(&mut self, parent: NodeId, name: &str, data: ByteRange) -> Result<NodeId> {
        self.push(parent, name, NodeKind::Leaf, Some(data))
    }

    fn push(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        data: Option<ByteRange>,
    ) -> Result<NodeId> {
        match self.get(parent) {
            Some(p) if p.is_container() => {}
            Some(_) => {
                return Err(Error::InvalidNode {
                    path: self.path(parent),
                    reason: "leaves cannot have children",
                });
            }
            None => {
                return Err(Error::InvalidNode {
                    path: format!("#{}", parent.0),
                    reason: "parent does not exist",
                });
            }
        }

        let id = NodeId(self.nodes.len());
        self.live += 1;
        self.nodes.push(Some(Node {
            name: name.to_owned(),
            kind,
            parent: Some(parent),
            children: Vec::new(),
            data,
            tags: BTreeMap::new(),
        }));
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Remove `id` and its whole subtree, releasing every data view in it.
    ///
    /// The root cannot be removed; use [`NodeTree::new`] instead.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let parent = match self.get(id) {
            Some(node) => node.parent.ok_or_else(|| Error::InvalidNode {
                path: "/".to_owned(),
                reason: "the root cannot be removed",
            })?,
            None => return Ok(()),
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|&c| c != id);
        }

        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                self.live -= 1;
                pending.extend(node.children);
            }
        }
        Ok(())
    }

    /// Children of `id`, empty if it does not exist.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    /// Slash-separated path from the root, e.g. `/docs/a.txt`. The root is `/`.
    pub fn path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(node) = cur.and_then(|c| self.get(c)) {
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            cur = node.parent;
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Resolve a slash-separated path relative to the root. Returns the first
    /// child matching each component.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut cur = self.root();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cur = *self
                .children(cur)
                .iter()
                .find(|&&c| self.get(c).is_some_and(|n| n.name == part))?;
        }
        Some(cur)
    }

    /// Breadth-first iteration over the descendants of `start` (excluded).
    pub fn iter_breadth_first(&self, start: NodeId) -> BreadthFirst<'_> {
        BreadthFirst {
            tree: self,
            queue: self.children(start).iter().copied().collect(),
        }
    }
}

/// Iterator returned by [`NodeTree::iter_breadth_first`].
pub struct BreadthFirst<'a> {
    tree: &'a NodeTree,
    queue: VecDeque<NodeId>,
}

impl<'a> Iterator for BreadthFirst<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.queue.pop_front()?;
            if let Some(node) = self.tree.get(id) {
                self.queue.extend(node.children.iter().copied());
                return Some((id, node));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (NodeTree, ByteRange) {
        let source = ByteRange::from_vec(b"0123456789".to_vec());
        let mut tree = NodeTree::new();
        let root = tree.root();
        let a = tree.add_container(root, "a").unwrap();
        tree.add_leaf(root, "top.bin", source.slice(0, 2).unwrap())
            .unwrap();
        let b = tree.add_container(a, "b").unwrap();
        tree.add_leaf(b, "deep.bin", source.slice(2, 8).unwrap())
            .unwrap();
        (tree, source)
    }

    #[test]
    fn root_is_unnamed_and_parentless() {
        let tree = NodeTree::new();
        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.name(), "");
        assert_eq!(root.parent(), None);
        assert!(root.is_container());
        assert!(tree.is_empty());
        assert_eq!(tree.path(tree.root()), "/");
    }

    #[test]
    fn paths_and_lookup() {
        let (tree, _) = sample();
        let deep = tree.find("a/b/deep.bin").unwrap();
        assert_eq!(tree.path(deep), "/a/b/deep.bin");
        assert_eq!(tree.get(deep).unwrap().data().unwrap().len(), 8);
        assert!(tree.find("a/missing").is_none());
        assert_eq!(tree.find(""), Some(tree.root()));
    }

    #[test]
    fn breadth_first_visits_levels_in_order() {
        let (tree, _) = sample();
        let names: Vec<_> = tree
            .iter_breadth_first(tree.root())
            .map(|(_, n)| n.name().to_owned())
            .collect();
        assert_eq!(names, ["a", "top.bin", "b", "deep.bin"]);
    }

    #[test]
    fn leaves_reject_children() {
        let (mut tree, source) = sample();
        let leaf = tree.find("top.bin").unwrap();
        let err = tree.add_leaf(leaf, "x", source).unwrap_err();
        assert!(matches!(err, Error::InvalidNode { .. }));
    }

    #[test]
    fn removing_a_subtree_releases_its_views() {
        let (mut tree, source) = sample();
        assert_eq!(source.handle_count(), 3);

        let a = tree.find("a").unwrap();
        tree.remove(a).unwrap();
        assert_eq!(source.handle_count(), 2);
        assert!(tree.find("a/b").is_none());
        assert_eq!(tree.children(tree.root()).len(), 1);
        assert!(tree.remove(tree.root()).is_err());

        drop(tree);
        assert_eq!(source.handle_count(), 1);
    }

    #[test]
    fn removed_ids_stay_dead() {
        let (mut tree, source) = sample();
        assert_eq!(tree.len(), 5);

        let a = tree.find("a").unwrap();
        tree.remove(a).unwrap();
        assert_eq!(tree.len(), 2);
        tree.remove(a).unwrap();
        assert_eq!(tree.len(), 2);

        let fresh = tree.add_leaf(tree.root(), "new.bin", source).unwrap();
        assert_ne!(fresh, a);
        assert!(tree.get(a).is_none());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn tags_are_free_form() {
        let (mut tree, _) = sample();
        let a = tree.find("a").unwrap();
        let node = tree.get_mut(a).unwrap();
        node.tags.insert("origin".into(), "romfs".into());
        node.tags.insert("order".into(), 3i64.into());
        assert_eq!(node.tags["order"], TagValue::Int(3));
    }
}
