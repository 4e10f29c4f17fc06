use crate::arena::{Arena, arena_key};
use crate::qcp::rotation_between;
use crate::runtime::{Pin, SegmentTree};
use crate::{Error, Kusudama, NodeGraph, NodeId, SolverConfig, Transform};
use glam::{DQuat, DVec3};

arena_key!(
    /// Handle to a bone in a [`Skeleton`].
    BoneId
);

#[derive(Clone, Debug)]
pub struct Bone {
    pub(crate) tag: String,
    pub(crate) height: f64,
    pub(crate) parent: Option<BoneId>,
    pub(crate) children: Vec<BoneId>,
    pub(crate) frame: NodeId,
    pub(crate) constraint_frame: NodeId,
    pub(crate) constraint: Option<Kusudama>,
    pub(crate) pin: Option<Pin>,
    pub(crate) stiffness: f64,
    // Partition of `children` by whether an enabled pin exists in the child's subtree.
    pub(crate) free_children: Vec<BoneId>,
    pub(crate) effectored_children: Vec<BoneId>,
}

impl Bone {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Length along the local Y axis.
    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn parent(&self) -> Option<BoneId> {
        self.parent
    }

    pub fn children(&self) -> &[BoneId] {
        &self.children
    }

    pub fn frame(&self) -> NodeId {
        self.frame
    }

    /// Frame the constraint is evaluated against; shares the bone frame's parent.
    pub fn constraint_frame(&self) -> NodeId {
        self.constraint_frame
    }

    pub fn constraint(&self) -> Option<&Kusudama> {
        self.constraint.as_ref()
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    pub fn is_pinned(&self) -> bool {
        self.pin.as_ref().is_some_and(Pin::is_enabled)
    }

    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }

    pub fn free_children(&self) -> &[BoneId] {
        &self.free_children
    }

    pub fn effectored_children(&self) -> &[BoneId] {
        &self.effectored_children
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TopologyState {
    /// Pins or bones changed since segments were last built.
    Stale,
    Segmented,
}

/// A tree of bones sharing one transform graph, plus the pins that drive them.
#[derive(Clone, Debug)]
pub struct Skeleton {
    pub(crate) nodes: NodeGraph,
    pub(crate) armature: NodeId,
    pub(crate) bones: Arena<BoneId, Bone>,
    pub(crate) root: BoneId,
    pub(crate) config: SolverConfig,
    pub(crate) segments: SegmentTree,
    topology: TopologyState,
    edit_depth: usize,
    segment_rebuilds: usize,
}

fn check_length(length: f64) -> Result<(), Error> {
    if length.is_finite() && length >= 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "bone length must be finite and non-negative, got {length}"
        )))
    }
}

impl Skeleton {
    /// Creates a skeleton whose root bone starts at the armature origin and points along `heading`.
    pub fn new(root_tag: impl Into<String>, heading: DVec3, length: f64) -> Result<Self, Error> {
        check_length(length)?;
        let mut nodes = NodeGraph::new();
        let armature = nodes.insert(Transform::IDENTITY, None)?;
        let local = Transform::from_rotation(rotation_between(DVec3::Y, heading));
        let frame = nodes.insert(local, Some(armature))?;
        let constraint_frame = nodes.insert(local, Some(armature))?;

        let mut bones = Arena::new();
        let root = bones.insert(Bone {
            tag: root_tag.into(),
            height: length,
            parent: None,
            children: Vec::new(),
            frame,
            constraint_frame,
            constraint: None,
            pin: None,
            stiffness: 0.0,
            free_children: Vec::new(),
            effectored_children: Vec::new(),
        });

        let mut skeleton = Self {
            nodes,
            armature,
            bones,
            root,
            config: SolverConfig::default(),
            segments: SegmentTree::default(),
            topology: TopologyState::Stale,
            edit_depth: 0,
            segment_rebuilds: 0,
        };
        skeleton.rebuild_segments();
        Ok(skeleton)
    }

    pub fn with_config(mut self, config: SolverConfig) -> Result<Self, Error> {
        self.set_config(config)?;
        Ok(self)
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SolverConfig) -> Result<(), Error> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_default_iterations(&mut self, iterations: usize) {
        self.config.iterations = iterations;
    }

    pub fn set_default_dampening(&mut self, dampening: f64) -> Result<(), Error> {
        self.set_config(SolverConfig {
            dampening,
            ..self.config
        })
    }

    pub fn set_default_stabilizing_pass_count(&mut self, passes: usize) {
        self.config.stabilization_passes = passes;
    }

    pub fn root(&self) -> BoneId {
        self.root
    }

    /// Node every bone chain and pin target hangs from.
    pub fn armature_frame(&self) -> NodeId {
        self.armature
    }

    pub fn nodes(&self) -> &NodeGraph {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bone(&self, id: BoneId) -> Result<&Bone, Error> {
        self.bones
            .get(id)
            .ok_or(Error::UnknownBone { index: id.slot() })
    }

    pub(crate) fn bone_mut(&mut self, id: BoneId) -> Result<&mut Bone, Error> {
        self.bones
            .get_mut(id)
            .ok_or(Error::UnknownBone { index: id.slot() })
    }

    pub fn bone_ids(&self) -> impl Iterator<Item = BoneId> + '_ {
        self.bones.keys()
    }

    pub fn find_bone(&self, tag: &str) -> Option<BoneId> {
        self.bones
            .iter()
            .find(|(_, bone)| bone.tag == tag)
            .map(|(id, _)| id)
    }

    /// Adds a bone whose base sits at `parent`'s tip and whose Y axis points along `heading`
    /// (armature space).
    pub fn add_bone(
        &mut self,
        parent: BoneId,
        heading: DVec3,
        length: f64,
        tag: impl Into<String>,
    ) -> Result<BoneId, Error> {
        check_length(length)?;
        let (parent_frame, parent_height) = {
            let parent_bone = self.bone(parent)?;
            (parent_bone.frame, parent_bone.height)
        };
        let armature = self.nodes.global(self.armature)?;
        let parent_global = self.nodes.global(parent_frame)?;
        let heading = armature.transform_vector(heading);
        let rotation = rotation_between(parent_global.y_axis(), heading) * parent_global.rotation;
        let global = Transform {
            translation: parent_global.transform_point(DVec3::Y * parent_height),
            rotation: rotation.normalize(),
            scale: parent_global.scale,
        };

        let frame = self.nodes.insert_global(global, Some(parent_frame))?;
        let local = self
            .nodes
            .local(frame)
            .ok_or(Error::UnknownNode { index: frame.slot() })?;
        let constraint_frame = self.nodes.insert(local, Some(parent_frame))?;

        let id = self.bones.insert(Bone {
            tag: tag.into(),
            height: length,
            parent: Some(parent),
            children: Vec::new(),
            frame,
            constraint_frame,
            constraint: None,
            pin: None,
            stiffness: 0.0,
            free_children: Vec::new(),
            effectored_children: Vec::new(),
        });
        let parent_bone = self.bone_mut(parent)?;
        parent_bone.children.push(id);
        parent_bone.free_children.push(id);
        self.invalidate_topology();
        Ok(id)
    }

    /// Removes `id` and its whole subtree, including their pins.
    pub fn remove_bone(&mut self, id: BoneId) -> Result<(), Error> {
        let parent = self.bone(id)?.parent.ok_or(Error::RootRemoval)?;
        let subtree = self.subtree(id);

        self.begin_topology_edit();
        let result = self.remove_subtree(id, parent, &subtree);
        self.finalize_topology();
        result
    }

    fn remove_subtree(
        &mut self,
        id: BoneId,
        parent: BoneId,
        subtree: &[BoneId],
    ) -> Result<(), Error> {
        for &bone in subtree {
            if self.bone(bone)?.pin.is_some() {
                self.remove_pin(bone)?;
            }
        }
        let parent_bone = self.bone_mut(parent)?;
        parent_bone.children.retain(|&c| c != id);
        parent_bone.free_children.retain(|&c| c != id);
        parent_bone.effectored_children.retain(|&c| c != id);

        // Leaves first, so no removed frame hands dependents to another removed frame.
        for &bone in subtree.iter().rev() {
            if let Some(removed) = self.bones.remove(bone) {
                self.nodes.remove(removed.constraint_frame)?;
                self.nodes.remove(removed.frame)?;
            }
        }
        self.invalidate_topology();
        Ok(())
    }

    /// `id` followed by its descendants, parents before children.
    pub fn subtree(&self, id: BoneId) -> Vec<BoneId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(bone) = self.bones.get(cur) else {
                continue;
            };
            out.push(cur);
            stack.extend(bone.children.iter().rev().copied());
        }
        out
    }

    pub fn bone_global(&self, id: BoneId) -> Result<Transform, Error> {
        let frame = self.bone(id)?.frame;
        self.nodes
            .compute_global(frame)
            .ok_or(Error::UnknownNode { index: frame.slot() })
    }

    pub fn base(&self, id: BoneId) -> Result<DVec3, Error> {
        Ok(self.bone_global(id)?.translation)
    }

    /// Global position of the bone's end: local Y scaled by its height.
    pub fn tip(&self, id: BoneId) -> Result<DVec3, Error> {
        let height = self.bone(id)?.height;
        Ok(self.bone_global(id)?.transform_point(DVec3::Y * height))
    }

    /// Global pose of the bone's tip, oriented like the bone.
    pub fn tip_global(&self, id: BoneId) -> Result<Transform, Error> {
        let height = self.bone(id)?.height;
        let global = self.bone_global(id)?;
        Ok(Transform {
            translation: global.transform_point(DVec3::Y * height),
            ..global
        })
    }

    pub fn bone_local(&self, id: BoneId) -> Result<Transform, Error> {
        let frame = self.bone(id)?.frame;
        self.nodes
            .local(frame)
            .ok_or(Error::UnknownNode { index: frame.slot() })
    }

    pub fn set_bone_local(&mut self, id: BoneId, local: Transform) -> Result<(), Error> {
        let frame = self.bone(id)?.frame;
        self.nodes.set_local(frame, local)
    }

    /// Rotates a bone about its own origin by a global-space rotation.
    pub fn rotate_bone_global(&mut self, id: BoneId, rotation: DQuat) -> Result<(), Error> {
        let frame = self.bone(id)?.frame;
        self.nodes.rotate_by_global(frame, rotation)
    }

    /// Sets the local pose of the frame the bone's constraint is measured against.
    pub fn set_constraint_frame_pose(&mut self, id: BoneId, local: Transform) -> Result<(), Error> {
        let frame = self.bone(id)?.constraint_frame;
        self.nodes.set_local(frame, local)
    }

    pub fn set_stiffness(&mut self, id: BoneId, stiffness: f64) -> Result<(), Error> {
        if !stiffness.is_finite() {
            return Err(Error::invalid(format!(
                "stiffness must be finite, got {stiffness}"
            )));
        }
        self.bone_mut(id)?.stiffness = stiffness.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_constraint(&mut self, id: BoneId, constraint: Option<Kusudama>) -> Result<(), Error> {
        self.bone_mut(id)?.constraint = constraint;
        Ok(())
    }

    pub fn constraint_mut(&mut self, id: BoneId) -> Result<Option<&mut Kusudama>, Error> {
        Ok(self.bone_mut(id)?.constraint.as_mut())
    }

    /// Hard-snaps a bone into its constraint. Returns whether it moved.
    pub fn snap_to_constraint(&mut self, id: BoneId) -> Result<bool, Error> {
        let bone = self
            .bones
            .get(id)
            .ok_or(Error::UnknownBone { index: id.slot() })?;
        match &bone.constraint {
            Some(constraint) => {
                constraint.snap_to_limits(&mut self.nodes, bone.frame, bone.constraint_frame)
            }
            None => Ok(false),
        }
    }

    pub fn subtree_has_enabled_pin(&self, id: BoneId) -> bool {
        self.subtree(id)
            .into_iter()
            .any(|b| self.bones.get(b).is_some_and(Bone::is_pinned))
    }

    /// Moves the path from `id` to the root into the ancestors' effectored sets.
    pub(crate) fn notify_ancestors_of_pin(&mut self, id: BoneId) {
        let mut child = id;
        while let Some(parent) = self.bones.get(child).and_then(|b| b.parent) {
            let Some(parent_bone) = self.bones.get_mut(parent) else {
                break;
            };
            parent_bone.free_children.retain(|&c| c != child);
            if !parent_bone.effectored_children.contains(&child) {
                parent_bone.effectored_children.push(child);
            }
            child = parent;
        }
    }

    /// Walks rootward from `id`, returning children to their parents' free sets while no enabled
    /// pin remains beneath them.
    pub(crate) fn notify_ancestors_of_unpin(&mut self, id: BoneId) {
        let mut child = id;
        while let Some(parent) = self.bones.get(child).and_then(|b| b.parent) {
            if self.subtree_has_enabled_pin(child) {
                break;
            }
            let Some(parent_bone) = self.bones.get_mut(parent) else {
                break;
            };
            parent_bone.effectored_children.retain(|&c| c != child);
            if !parent_bone.free_children.contains(&child) {
                parent_bone.free_children.push(child);
            }
            child = parent;
        }
    }

    pub fn topology_state(&self) -> TopologyState {
        self.topology
    }

    pub fn segment_rebuilds(&self) -> usize {
        self.segment_rebuilds
    }

    pub fn segments(&self) -> &SegmentTree {
        &self.segments
    }

    /// Suppresses segment rebuilds until the matching [`Skeleton::finalize_topology`].
    pub fn begin_topology_edit(&mut self) {
        self.edit_depth += 1;
    }

    /// Ends a topology edit; the outermost call rebuilds segments once if anything changed.
    pub fn finalize_topology(&mut self) {
        self.edit_depth = self.edit_depth.saturating_sub(1);
        if self.edit_depth == 0 && self.topology == TopologyState::Stale {
            self.rebuild_segments();
        }
    }

    pub(crate) fn invalidate_topology(&mut self) {
        self.topology = TopologyState::Stale;
        if self.edit_depth == 0 {
            self.rebuild_segments();
        }
    }

    pub(crate) fn ensure_segmented(&mut self) {
        if self.topology == TopologyState::Stale {
            self.rebuild_segments();
        }
    }

    fn rebuild_segments(&mut self) {
        self.segments = SegmentTree::build(self);
        self.segment_rebuilds += 1;
        self.topology = TopologyState::Segmented;
        log::debug!(
            "rebuilt {} segments for {} bones",
            self.segments.len(),
            self.bones.len()
        );
    }
}
