//! Hierarchical transform nodes with a lazily refreshed global cache.
//!
//! Nodes live in a generational arena. Each node records its parent and the nodes whose global
//! pose depends on it, so invalidation touches only the affected subtree and never owns a
//! reference cycle.

use crate::arena::{Arena, arena_key};
use crate::{Error, Transform};
use glam::{DQuat, DVec3};

arena_key!(
    /// Handle to a node in a [`NodeGraph`].
    NodeId
);

#[derive(Clone, Debug)]
struct Node {
    local: Transform,
    global: Transform,
    dirty: bool,
    parent: Option<NodeId>,
    dependents: Vec<NodeId>,
}

/// Arena of transform nodes.
///
/// Invariant: a clean node's `global` equals `parent.global ∘ local` (or `local` for a root), and a
/// dirty node's dependents are all dirty.
#[derive(Clone, Debug, Default)]
pub struct NodeGraph {
    nodes: Arena<NodeId, Node>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys()
    }

    fn node(&self, id: NodeId) -> Result<&Node, Error> {
        self.nodes
            .get(id)
            .ok_or(Error::UnknownNode { index: id.slot() })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, Error> {
        self.nodes
            .get_mut(id)
            .ok_or(Error::UnknownNode { index: id.slot() })
    }

    /// Inserts a node whose `local` pose is expressed in `parent`'s frame.
    pub fn insert(&mut self, local: Transform, parent: Option<NodeId>) -> Result<NodeId, Error> {
        if let Some(parent) = parent {
            self.node(parent)?;
        }
        let id = self.nodes.insert(Node {
            local,
            global: local,
            dirty: true,
            parent,
            dependents: Vec::new(),
        });
        if let Some(parent) = parent {
            self.node_mut(parent)?.dependents.push(id);
        }
        Ok(id)
    }

    pub fn insert_global(
        &mut self,
        global: Transform,
        parent: Option<NodeId>,
    ) -> Result<NodeId, Error> {
        let parent_global = match parent {
            Some(parent) => self.global(parent)?,
            None => Transform::IDENTITY,
        };
        self.insert(parent_global.inverse().mul_transform(&global), parent)
    }

    /// Removes a node. Its dependents are handed to its parent and keep their global pose.
    pub fn remove(&mut self, id: NodeId) -> Result<Transform, Error> {
        let (parent, dependents) = {
            let node = self.node(id)?;
            (node.parent, node.dependents.clone())
        };
        for dependent in dependents {
            self.set_parent(dependent, parent)?;
        }
        if let Some(parent) = parent {
            if let Ok(p) = self.node_mut(parent) {
                p.dependents.retain(|&d| d != id);
            }
        }
        let node = self
            .nodes
            .remove(id)
            .ok_or(Error::UnknownNode { index: id.slot() })?;
        Ok(node.local)
    }

    pub fn local(&self, id: NodeId) -> Option<Transform> {
        self.nodes.get(id).map(|n| n.local)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_dirty(&self, id: NodeId) -> Option<bool> {
        self.nodes.get(id).map(|n| n.dirty)
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.parent(id);
        while let Some(node) = cur {
            if node == ancestor {
                return true;
            }
            cur = self.parent(node);
        }
        false
    }

    fn mark_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        let mut first = true;
        while let Some(cur) = stack.pop() {
            let Some(node) = self.nodes.get_mut(cur) else {
                continue;
            };
            // A dirty node's dependents are already dirty.
            if node.dirty && !first {
                continue;
            }
            first = false;
            node.dirty = true;
            stack.extend(node.dependents.iter().copied());
        }
    }

    /// Recomputes the cached global pose of `id` (and any dirty ancestors).
    pub fn update_global(&mut self, id: NodeId) -> Result<(), Error> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            let node = self.node(node_id)?;
            if !node.dirty {
                break;
            }
            chain.push(node_id);
            cur = node.parent;
        }
        for &node_id in chain.iter().rev() {
            let (parent, local) = {
                let node = self.node(node_id)?;
                (node.parent, node.local)
            };
            let global = match parent {
                Some(parent) => self.node(parent)?.global.mul_transform(&local),
                None => local,
            };
            let node = self.node_mut(node_id)?;
            node.global = global;
            node.dirty = false;
        }
        Ok(())
    }

    pub fn global(&mut self, id: NodeId) -> Result<Transform, Error> {
        self.update_global(id)?;
        Ok(self.node(id)?.global)
    }

    /// Global pose computed without touching the cache.
    pub fn compute_global(&self, id: NodeId) -> Option<Transform> {
        let node = self.nodes.get(id)?;
        if !node.dirty {
            return Some(node.global);
        }
        match node.parent {
            Some(parent) => Some(self.compute_global(parent)?.mul_transform(&node.local)),
            None => Some(node.local),
        }
    }

    pub fn update_all(&mut self) -> Result<(), Error> {
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in ids {
            self.update_global(id)?;
        }
        Ok(())
    }

    pub fn set_local(&mut self, id: NodeId, local: Transform) -> Result<(), Error> {
        self.node_mut(id)?.local = local;
        self.mark_dirty(id);
        Ok(())
    }

    fn parent_global(&mut self, id: NodeId) -> Result<Transform, Error> {
        match self.node(id)?.parent {
            Some(parent) => self.global(parent),
            None => Ok(Transform::IDENTITY),
        }
    }

    /// Places `id` at `global` without changing its parent.
    pub fn set_global(&mut self, id: NodeId, global: Transform) -> Result<(), Error> {
        let parent_global = self.parent_global(id)?;
        self.set_local(id, parent_global.inverse().mul_transform(&global))
    }

    fn attach(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), Error> {
        if let Some(old) = self.node(id)?.parent {
            if let Ok(old) = self.node_mut(old) {
                old.dependents.retain(|&d| d != id);
            }
        }
        self.node_mut(id)?.parent = parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.dependents.push(id);
        }
        Ok(())
    }

    /// Breaks the cycle `id -> parent` would create by moving `parent` under `id`'s former parent.
    fn resolve_cycle(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), Error> {
        let Some(parent) = parent else {
            return Ok(());
        };
        self.node(parent)?;
        if parent == id {
            return Err(Error::NodeCycle { index: id.slot() });
        }
        if self.is_ancestor(id, parent) {
            let former = self.node(id)?.parent;
            self.set_parent(parent, former)?;
        }
        Ok(())
    }

    /// Reparents `id`, keeping its global pose.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), Error> {
        self.resolve_cycle(id, parent)?;
        let global = self.global(id)?;
        self.attach(id, parent)?;
        self.set_global(id, global)
    }

    /// Reparents `id`, keeping its local pose (the node moves with its new parent).
    pub fn set_parent_keep_local(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
    ) -> Result<(), Error> {
        self.resolve_cycle(id, parent)?;
        self.attach(id, parent)?;
        self.mark_dirty(id);
        Ok(())
    }

    /// Reparents `id` and moves it to `global`, while every dependent keeps the global pose it had
    /// before the change.
    pub fn slip_to(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        global: Transform,
    ) -> Result<(), Error> {
        let dependents = self.node(id)?.dependents.clone();
        let mut before = Vec::with_capacity(dependents.len());
        for dependent in dependents {
            before.push((dependent, self.global(dependent)?));
        }

        self.set_parent(id, parent)?;
        self.set_global(id, global)?;

        for (dependent, pose) in before {
            self.set_global(dependent, pose)?;
        }
        Ok(())
    }

    pub fn translate_to(&mut self, id: NodeId, translation: DVec3) -> Result<(), Error> {
        self.node_mut(id)?.local.translation = translation;
        self.mark_dirty(id);
        Ok(())
    }

    pub fn translate_by(&mut self, id: NodeId, delta: DVec3) -> Result<(), Error> {
        self.node_mut(id)?.local.translation += delta;
        self.mark_dirty(id);
        Ok(())
    }

    pub fn translate_to_global(&mut self, id: NodeId, position: DVec3) -> Result<(), Error> {
        let parent_global = self.parent_global(id)?;
        self.translate_to(id, parent_global.inverse_transform_point(position))
    }

    pub fn translate_by_global(&mut self, id: NodeId, delta: DVec3) -> Result<(), Error> {
        let parent_global = self.parent_global(id)?;
        let local_delta = parent_global.inverse().transform_vector(delta);
        let scale = if parent_global.scale.abs() > f64::EPSILON {
            1.0 / parent_global.scale
        } else {
            0.0
        };
        self.translate_by(id, local_delta * scale)
    }

    /// Applies `rotation`, expressed in the frame the node's local pose lives in (its parent's),
    /// about the node's own origin.
    pub fn rotate_by(&mut self, id: NodeId, rotation: DQuat) -> Result<(), Error> {
        let node = self.node_mut(id)?;
        node.local.rotation = (rotation * node.local.rotation).normalize();
        self.mark_dirty(id);
        Ok(())
    }

    /// Applies a world-space rotation about the node's own origin.
    pub fn rotate_by_global(&mut self, id: NodeId, rotation: DQuat) -> Result<(), Error> {
        let parent_rotation = self.parent_global(id)?.rotation;
        let in_parent = parent_rotation.inverse() * rotation * parent_rotation;
        self.rotate_by(id, in_parent)
    }

    /// Applies `rotation` expressed in the node's own axes.
    pub fn rotate_by_local_axes(&mut self, id: NodeId, rotation: DQuat) -> Result<(), Error> {
        let node = self.node_mut(id)?;
        node.local.rotation = (node.local.rotation * rotation).normalize();
        self.mark_dirty(id);
        Ok(())
    }

    pub fn rotate_about_y(&mut self, id: NodeId, angle: f64) -> Result<(), Error> {
        self.rotate_by_local_axes(id, DQuat::from_rotation_y(angle))
    }

    pub fn align_globals_to(&mut self, id: NodeId, other: NodeId) -> Result<(), Error> {
        let global = self.global(other)?;
        self.set_global(id, global)
    }

    pub fn align_locals_to(&mut self, id: NodeId, other: NodeId) -> Result<(), Error> {
        let local = self.node(other)?.local;
        self.set_local(id, local)
    }

    pub fn to_local_of(&mut self, id: NodeId, global_point: DVec3) -> Result<DVec3, Error> {
        Ok(self.global(id)?.inverse_transform_point(global_point))
    }

    pub fn to_global_of(&mut self, id: NodeId, local_point: DVec3) -> Result<DVec3, Error> {
        Ok(self.global(id)?.transform_point(local_point))
    }
}
