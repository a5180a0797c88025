use std::collections::BTreeMap;

use indexmap::IndexMap;

use opmd_types::{Attribute, Error, Result};

use crate::{FileHandle, FileState};

/// Index of a [`Node`] within a [`WritableRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

// a NodeId is its own hash
impl nohash_hasher::IsEnabled for NodeId {}

/// Location of a writable inside its file: the chain of group/dataset
/// names from the file root.
///
/// Invariant: a node's position extends its parent's position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePosition {
    pub segments: Vec<String>,
}

impl FilePosition {
    pub fn root() -> Self {
        Self::default()
    }

    /// Append a `/`-separated relative path; a leading `/` restarts from
    /// the file root.
    pub fn extended(&self, path: &str) -> Self {
        let mut segments = if path.starts_with('/') {
            Vec::new()
        } else {
            self.segments.clone()
        };
        segments.extend(path.split('/').filter(|s| !s.is_empty()).map(str::to_owned));
        Self { segments }
    }

    pub fn join(&self) -> String {
        self.segments.join("/")
    }
}

/// One node of the frontend mirror of the on-disk hierarchy.
#[derive(Debug, Default)]
pub struct Node {
    pub parent: Option<NodeId>,
    /// Name of this node within its parent's children.
    pub own_key: Option<String>,
    pub children: BTreeMap<String, NodeId>,
    /// Resource this node belongs to, inherited lazily from the parent.
    pub file: Option<FileHandle>,
    /// Set by the driver dispatch once the node exists on the backend.
    pub position: Option<FilePosition>,
    pub dirty: bool,
    pub written: bool,
    /// Frontend view of the node's attributes, in insertion order.
    pub attributes: IndexMap<String, Attribute>,
}

/// Arena of all writables of one series, plus the open files they live in.
///
/// The tree owns downward (parent holds child ids); the parent link is a
/// plain back-reference. Nodes stay allocated until [`Self::deregister`]
/// unlinks them, which keeps `NodeId`s stable for the series' lifetime.
#[derive(Debug, Default)]
pub struct WritableRegistry {
    nodes: Vec<Node>,
    files: Vec<FileState>,
}

impl WritableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unlinked node; link it with [`Self::adopt`] or use
    /// [`Self::create_child`] directly.
    pub fn create_node(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::default());
        id
    }

    /// Create a node and wire it under `parent` as `key`.
    pub fn create_child(&mut self, parent: NodeId, key: &str) -> NodeId {
        let child = self.create_node();
        self.adopt(parent, key, child);
        child
    }

    /// Wire the hierarchy: parent link and own key. The file association
    /// is resolved lazily through the ancestors (file-based series point
    /// the same subtrees at different files over time).
    pub fn adopt(&mut self, parent: NodeId, key: &str, child: NodeId) {
        {
            let node = self.node_mut(child);
            node.parent = Some(parent);
            node.own_key = Some(key.to_owned());
        }
        self.node_mut(parent).children.insert(key.to_owned(), child);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn child(&self, parent: NodeId, key: &str) -> Option<NodeId> {
        self.node(parent).children.get(key).copied()
    }

    /// Mark a node dirty; dirtiness propagates to every ancestor.
    pub fn mark_dirty(&mut self, id: NodeId) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node_mut(current);
            node.dirty = true;
            cursor = node.parent;
        }
    }

    /// Whether the node or any descendant is dirty.
    pub fn dirty_recursive(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.dirty || node.children.values().any(|&child| self.dirty_recursive(child))
    }

    /// Clear dirtiness of the node and its whole subtree after a
    /// successful flush.
    pub fn clear_dirty_recursive(&mut self, id: NodeId) {
        let children: Vec<NodeId> = {
            let node = self.node_mut(id);
            node.dirty = false;
            node.children.values().copied().collect()
        };
        for child in children {
            self.clear_dirty_recursive(child);
        }
    }

    /// Cut the tree link of a node about to be dropped by the frontend.
    pub fn deregister(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            let key = self.node(id).own_key.clone();
            if let Some(key) = key {
                self.node_mut(parent).children.remove(&key);
            }
        }
        let node = self.node_mut(id);
        node.parent = None;
        node.own_key = None;
    }

    // --- files ---

    pub fn register_file(&mut self, name: impl Into<String>) -> FileHandle {
        let name = name.into();
        // re-opening a known file revalidates it instead of duplicating
        for (i, file) in self.files.iter_mut().enumerate() {
            if file.name == name {
                file.valid = true;
                return FileHandle(i as u32);
            }
        }
        let handle = FileHandle(self.files.len() as u32);
        self.files.push(FileState::new(name));
        handle
    }

    pub fn file(&self, handle: FileHandle) -> &FileState {
        &self.files[handle.0 as usize]
    }

    pub fn file_mut(&mut self, handle: FileHandle) -> &mut FileState {
        &mut self.files[handle.0 as usize]
    }

    /// The file this node belongs to: its own, or the nearest ancestor's,
    /// cached on the node afterwards.
    pub fn resolve_file(&mut self, id: NodeId) -> Result<FileHandle> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(file) = self.node(current).file {
                self.node_mut(id).file = Some(file);
                return Ok(file);
            }
            cursor = self.node(current).parent;
        }
        Err(Error::Internal(
            "writable is not associated with any file".to_owned(),
        ))
    }

    /// The base position new children of this node start from: the node's
    /// own position, or failing that the nearest positioned ancestor's.
    pub fn base_position(&self, id: NodeId) -> FilePosition {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(position) = &self.node(current).position {
                return position.clone();
            }
            cursor = self.node(current).parent;
        }
        FilePosition::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_propagates_upward_and_clears_in_bulk() {
        let mut registry = WritableRegistry::new();
        let root = registry.create_node();
        let mid = registry.create_child(root, "data");
        let leaf = registry.create_child(mid, "100");

        assert!(!registry.dirty_recursive(root));

        registry.mark_dirty(leaf);
        assert!(registry.node(root).dirty);
        assert!(registry.node(mid).dirty);
        assert!(registry.dirty_recursive(root));
        assert!(registry.dirty_recursive(mid));

        registry.clear_dirty_recursive(root);
        assert!(!registry.dirty_recursive(root));

        // clearing a subtree leaves the ancestors alone
        registry.mark_dirty(leaf);
        registry.clear_dirty_recursive(mid);
        assert!(registry.node(root).dirty);
        assert!(!registry.dirty_recursive(mid));
    }

    #[test]
    fn positions_extend_their_parent() {
        let base = FilePosition::root().extended("data/100");
        assert_eq!(base.join(), "data/100");
        assert_eq!(base.extended("meshes").join(), "data/100/meshes");
        assert_eq!(base.extended("/absolute").join(), "absolute");
        assert_eq!(base.extended("").join(), "data/100");
    }

    #[test]
    fn file_inheritance() {
        let mut registry = WritableRegistry::new();
        let root = registry.create_node();
        let file = registry.register_file("data.json");
        registry.node_mut(root).file = Some(file);

        let child = registry.create_child(root, "child");
        assert_eq!(registry.resolve_file(child).unwrap(), file);

        // late association still resolves through the ancestors
        let orphanish = registry.create_node();
        registry.adopt(child, "grand", orphanish);
        assert_eq!(registry.resolve_file(orphanish).unwrap(), file);
    }

    #[test]
    fn reopening_a_file_revalidates_it() {
        let mut registry = WritableRegistry::new();
        let a = registry.register_file("a.json");
        registry.file_mut(a).invalidate();
        let b = registry.register_file("a.json");
        assert_eq!(a, b);
        assert!(registry.file(a).valid);
    }

    #[test]
    fn deregister_cuts_the_link() {
        let mut registry = WritableRegistry::new();
        let root = registry.create_node();
        let child = registry.create_child(root, "x");
        registry.deregister(child);
        assert_eq!(registry.child(root, "x"), None);
        assert_eq!(registry.node(child).parent, None);
    }
}
