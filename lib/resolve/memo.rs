//! Per-transaction memo of which path components are already locked, and how.

use std::collections::BTreeMap;

use crate::cache::{EntryValue, NodeIdent};

/// How strongly a transaction holds a path component. Ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    /// Not locked. The component is re-resolved on the next visit.
    None,
    /// Locked shared for a stable traversal or read.
    Shared,
    /// Locked exclusively to mutate an existing entry.
    Exclusive,
    /// Locked exclusively by the transaction that is creating the entry.
    ExclusiveForCreate,
}

impl LockLevel {
    /// Whether the transaction holds the component's lock exclusively.
    #[must_use]
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveForCreate)
    }
}

/// Index of a node in a [`LockTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct LockTreeNode {
    target: EntryValue,
    level: LockLevel,
    children: BTreeMap<Box<str>, NodeId>,
}

impl LockTreeNode {
    fn new(target: EntryValue, level: LockLevel) -> Self {
        Self {
            target,
            level,
            children: BTreeMap::new(),
        }
    }
}

/// Arena-backed tree mirroring the paths a transaction has resolved.
///
/// The root stands for the namespace root, which has no cache entry of its own and is never
/// locked, so it is recorded as shared.
#[derive(Debug)]
pub struct LockTree {
    nodes: Vec<LockTreeNode>,
}

impl LockTree {
    /// A tree holding only the root, which resolves to `root_id`.
    #[must_use]
    pub fn new(root_id: NodeIdent) -> Self {
        Self {
            nodes: vec![LockTreeNode::new(
                EntryValue::Known(root_id),
                LockLevel::Shared,
            )],
        }
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The child `name` of `parent`, if it was ever visited.
    #[must_use]
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.0].children.get(name).copied()
    }

    /// The child `name` of `parent`, adding an unlocked node if it was never visited.
    pub fn child_or_insert(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(id) = self.child(parent, name) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(LockTreeNode::new(EntryValue::Unknown, LockLevel::None));
        self.nodes[parent.0].children.insert(Box::from(name), id);
        id
    }

    /// The lock level recorded for `node`.
    #[must_use]
    pub fn level(&self, node: NodeId) -> LockLevel {
        self.nodes[node.0].level
    }

    /// What `node` resolved to when it was locked.
    #[must_use]
    pub fn target(&self, node: NodeId) -> EntryValue {
        self.nodes[node.0].target
    }

    /// Record that `node` is held at `level` and resolves to `target`.
    pub fn record(&mut self, node: NodeId, level: LockLevel, target: EntryValue) {
        let slot = &mut self.nodes[node.0];
        slot.level = level;
        slot.target = target;
    }

    /// Update what `node` resolves to, keeping its level.
    pub fn set_target(&mut self, node: NodeId, target: EntryValue) {
        self.nodes[node.0].target = target;
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the root is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order() {
        assert!(LockLevel::None < LockLevel::Shared);
        assert!(LockLevel::Shared < LockLevel::Exclusive);
        assert!(LockLevel::Exclusive < LockLevel::ExclusiveForCreate);
        assert!(!LockLevel::Shared.is_exclusive());
        assert!(LockLevel::ExclusiveForCreate.is_exclusive());
    }

    #[test]
    fn children_are_created_once() {
        let mut tree = LockTree::new(0);
        let root = tree.root();
        assert_eq!(tree.target(root), EntryValue::Known(0));

        let a = tree.child_or_insert(root, "a");
        assert_eq!(tree.level(a), LockLevel::None);
        assert_eq!(tree.child_or_insert(root, "a"), a);
        assert_eq!(tree.child(root, "a"), Some(a));
        assert_eq!(tree.child(a, "a"), None);

        tree.record(a, LockLevel::Shared, EntryValue::Known(4));
        assert_eq!(tree.level(a), LockLevel::Shared);
        tree.set_target(a, EntryValue::NotExist);
        assert_eq!(tree.level(a), LockLevel::Shared);
        assert_eq!(tree.len(), 2);
    }
}
