//! Decomposition of the bone tree into linear chains bounded by pins and branch points.

use crate::runtime::{BoneId, Skeleton};
use std::collections::HashMap;

pub type SegmentIndex = usize;

#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub(crate) bones: Vec<BoneId>,
    pub(crate) parent: Option<SegmentIndex>,
    pub(crate) children: Vec<SegmentIndex>,
    pub(crate) base_pinned: bool,
    pub(crate) tip_pinned: bool,
    pub(crate) is_free: bool,
}

impl Segment {
    pub fn root(&self) -> BoneId {
        self.bones[0]
    }

    pub fn tip(&self) -> BoneId {
        self.bones[self.bones.len() - 1]
    }

    /// Bones from root to tip.
    pub fn bones(&self) -> &[BoneId] {
        &self.bones
    }

    pub fn parent(&self) -> Option<SegmentIndex> {
        self.parent
    }

    pub fn children(&self) -> &[SegmentIndex] {
        &self.children
    }

    /// The root bone's parent carries an enabled pin.
    pub fn base_pinned(&self) -> bool {
        self.base_pinned
    }

    pub fn tip_pinned(&self) -> bool {
        self.tip_pinned
    }

    /// No enabled pin is reachable through this segment.
    pub fn is_free(&self) -> bool {
        self.is_free
    }
}

/// Every bone of a skeleton belongs to exactly one segment. Segment 0 holds the root bone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentTree {
    segments: Vec<Segment>,
    by_bone: HashMap<BoneId, SegmentIndex>,
}

impl SegmentTree {
    pub(crate) fn build(skeleton: &Skeleton) -> Self {
        let mut tree = Self::default();
        if skeleton.bones.contains(skeleton.root) {
            tree.build_segment(skeleton, skeleton.root, None);
        }
        tree
    }

    fn build_segment(
        &mut self,
        skeleton: &Skeleton,
        root: BoneId,
        parent: Option<SegmentIndex>,
    ) -> SegmentIndex {
        let index = self.segments.len();
        self.segments.push(Segment {
            bones: Vec::new(),
            parent,
            children: Vec::new(),
            base_pinned: false,
            tip_pinned: false,
            is_free: true,
        });

        let mut bones = Vec::new();
        let mut spawned = Vec::new();
        let mut cur = root;
        while let Some(bone) = skeleton.bones.get(cur) {
            bones.push(cur);
            self.by_bone.insert(cur, index);
            if bone.is_pinned() || bone.effectored_children.len() >= 2 {
                spawned.extend(bone.children.iter().copied());
                break;
            }
            if let [next] = bone.effectored_children.as_slice() {
                let next = *next;
                spawned.extend(bone.children.iter().copied().filter(|&c| c != next));
                cur = next;
                continue;
            }
            match bone.children.as_slice() {
                [only] => cur = *only,
                children => {
                    spawned.extend(children.iter().copied());
                    break;
                }
            }
        }

        let base_pinned = skeleton
            .bones
            .get(root)
            .and_then(|b| b.parent)
            .and_then(|p| skeleton.bones.get(p))
            .is_some_and(|p| p.is_pinned());
        let tip_pinned = bones
            .last()
            .and_then(|&b| skeleton.bones.get(b))
            .is_some_and(|b| b.is_pinned());
        let is_free = !bones.iter().any(|&b| {
            skeleton
                .bones
                .get(b)
                .is_some_and(|bone| bone.is_pinned() || !bone.effectored_children.is_empty())
        });

        let mut children = Vec::with_capacity(spawned.len());
        for child in spawned {
            children.push(self.build_segment(skeleton, child, Some(index)));
        }

        let segment = &mut self.segments[index];
        segment.bones = bones;
        segment.children = children;
        segment.base_pinned = base_pinned;
        segment.tip_pinned = tip_pinned;
        segment.is_free = is_free;
        index
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, index: SegmentIndex) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn index_of(&self, bone: BoneId) -> Option<SegmentIndex> {
        self.by_bone.get(&bone).copied()
    }

    pub fn segment_of(&self, bone: BoneId) -> Option<&Segment> {
        self.index_of(bone).and_then(|i| self.segments.get(i))
    }

    /// Walks rootward from `index` to the first segment whose base is pinned (or the rootmost one).
    pub fn group_root(&self, mut index: SegmentIndex) -> SegmentIndex {
        while let Some(segment) = self.segments.get(index) {
            match segment.parent {
                Some(parent) if !segment.base_pinned => index = parent,
                _ => break,
            }
        }
        index
    }

    /// Solve order starting at `start`: a list of groups, each listing its segments outermost
    /// first. A group ends at pinned tips; the segments beyond them start later groups.
    pub fn solve_groups(&self, start: SegmentIndex) -> Vec<Vec<SegmentIndex>> {
        let mut groups = Vec::new();
        let mut pending = vec![start];
        let mut next = 0;
        while next < pending.len() {
            let mut order = Vec::new();
            let mut beyond = Vec::new();
            self.collect_group(pending[next], &mut order, &mut beyond);
            next += 1;
            if !order.is_empty() {
                groups.push(order);
            }
            pending.extend(beyond);
        }
        groups
    }

    fn collect_group(
        &self,
        index: SegmentIndex,
        order: &mut Vec<SegmentIndex>,
        beyond: &mut Vec<SegmentIndex>,
    ) {
        let Some(segment) = self.segments.get(index) else {
            return;
        };
        if segment.is_free {
            return;
        }
        for &child in &segment.children {
            if segment.tip_pinned {
                if self.segments.get(child).is_some_and(|c| !c.is_free) {
                    beyond.push(child);
                }
            } else {
                self.collect_group(child, order, beyond);
            }
        }
        order.push(index);
    }
}
