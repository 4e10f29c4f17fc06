use crate::runtime::{BoneId, Skeleton};
use crate::{Error, NodeId, Transform};
use glam::{DQuat, DVec3};

pub const MODE_X: u8 = 1;
pub const MODE_Y: u8 = 2;
pub const MODE_Z: u8 = 4;

/// A movable target for one bone's tip.
///
/// The target is a transform node in the skeleton's graph. Pins form their own tree: a child
/// pin's target moves with its parent pin's target.
#[derive(Clone, Debug, PartialEq)]
pub struct Pin {
    pub(crate) target: NodeId,
    pub(crate) enabled: bool,
    pub(crate) weight: f64,
    pub(crate) priorities: DVec3,
    pub(crate) depth_falloff: f64,
    pub(crate) parent_pin: Option<BoneId>,
    pub(crate) child_pins: Vec<BoneId>,
}

impl Pin {
    fn new(target: NodeId) -> Self {
        Self {
            target,
            enabled: true,
            weight: 1.0,
            priorities: DVec3::ZERO,
            depth_falloff: 1.0,
            parent_pin: None,
            child_pins: Vec::new(),
        }
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Per-axis orientation priorities; zero disables that axis.
    pub fn priorities(&self) -> DVec3 {
        self.priorities
    }

    pub fn max_priority(&self) -> f64 {
        self.priorities.max_element()
    }

    /// How much of this pin's descendants' influence reaches the bones above it: 0 hides them,
    /// 1 passes them through unchanged.
    pub fn depth_falloff(&self) -> f64 {
        self.depth_falloff
    }

    pub fn parent_pin(&self) -> Option<BoneId> {
        self.parent_pin
    }

    pub fn child_pins(&self) -> &[BoneId] {
        &self.child_pins
    }

    /// Bitmask of the active orientation objectives ([`MODE_X`], [`MODE_Y`], [`MODE_Z`]).
    pub fn mode_code(&self) -> u8 {
        let mut code = 0;
        if self.priorities.x > 0.0 {
            code |= MODE_X;
        }
        if self.priorities.y > 0.0 {
            code |= MODE_Y;
        }
        if self.priorities.z > 0.0 {
            code |= MODE_Z;
        }
        code
    }

    /// One position sub-target plus one per active orientation axis.
    pub fn subtarget_count(&self) -> usize {
        1 + self.mode_code().count_ones() as usize
    }
}

fn non_negative(value: f64, what: &str) -> Result<f64, Error> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(Error::invalid(format!(
            "{what} must be finite and non-negative, got {value}"
        )))
    }
}

impl Skeleton {
    fn pin_ref(&self, bone: BoneId) -> Result<&Pin, Error> {
        let owner = self.bone(bone)?;
        owner.pin.as_ref().ok_or_else(|| Error::NoPin {
            bone: owner.tag.clone(),
        })
    }

    fn pin_mut(&mut self, bone: BoneId) -> Result<&mut Pin, Error> {
        let owner = self.bone_mut(bone)?;
        let tag = owner.tag.clone();
        owner.pin.as_mut().ok_or(Error::NoPin { bone: tag })
    }

    pub fn pin(&self, bone: BoneId) -> Option<&Pin> {
        self.bones.get(bone).and_then(|b| b.pin.as_ref())
    }

    /// Enables the pin on `bone`, creating one at the bone's current tip pose if it has none.
    pub fn enable_pin(&mut self, bone: BoneId) -> Result<(), Error> {
        if self.bone(bone)?.pin.is_none() {
            let tip = self.tip_global(bone)?;
            let target = self.nodes.insert_global(tip, Some(self.armature))?;
            self.bone_mut(bone)?.pin = Some(Pin::new(target));
        } else {
            let pin = self.pin_mut(bone)?;
            if pin.enabled {
                return Ok(());
            }
            pin.enabled = true;
        }
        self.notify_ancestors_of_pin(bone);
        self.invalidate_topology();
        Ok(())
    }

    /// Disables the pin on `bone`, keeping its target and settings.
    pub fn disable_pin(&mut self, bone: BoneId) -> Result<(), Error> {
        let pin = self.pin_mut(bone)?;
        if !pin.enabled {
            return Ok(());
        }
        pin.enabled = false;
        self.notify_ancestors_of_unpin(bone);
        self.invalidate_topology();
        Ok(())
    }

    /// Removes the pin on `bone`. Its child pins are handed to its parent pin.
    pub fn remove_pin(&mut self, bone: BoneId) -> Result<(), Error> {
        let (target, parent_pin, children) = {
            let pin = self.pin_ref(bone)?;
            (pin.target, pin.parent_pin, pin.child_pins.clone())
        };
        for child in children {
            self.attach_pin(child, parent_pin)?;
        }
        if let Some(parent) = parent_pin {
            if let Ok(parent) = self.pin_mut(parent) {
                parent.child_pins.retain(|&c| c != bone);
            }
        }
        self.nodes.remove(target)?;
        self.bone_mut(bone)?.pin = None;
        self.notify_ancestors_of_unpin(bone);
        self.invalidate_topology();
        Ok(())
    }

    pub fn pin_target_global(&self, bone: BoneId) -> Result<Transform, Error> {
        let target = self.pin_ref(bone)?.target;
        self.nodes
            .compute_global(target)
            .ok_or(Error::UnknownNode { index: target.slot() })
    }

    pub fn set_pin_position(&mut self, bone: BoneId, position: DVec3) -> Result<(), Error> {
        let target = self.pin_ref(bone)?.target;
        self.nodes.translate_to_global(target, position)
    }

    pub fn set_pin_orientation(&mut self, bone: BoneId, rotation: DQuat) -> Result<(), Error> {
        let target = self.pin_ref(bone)?.target;
        let global = self.nodes.global(target)?;
        self.nodes.set_global(
            target,
            Transform {
                rotation: rotation.normalize(),
                ..global
            },
        )
    }

    pub fn set_pin_global(&mut self, bone: BoneId, global: Transform) -> Result<(), Error> {
        let target = self.pin_ref(bone)?.target;
        self.nodes.set_global(target, global)
    }

    pub fn set_pin_weight(&mut self, bone: BoneId, weight: f64) -> Result<(), Error> {
        let weight = non_negative(weight, "pin weight")?;
        self.pin_mut(bone)?.weight = weight;
        Ok(())
    }

    pub fn set_pin_priorities(&mut self, bone: BoneId, priorities: DVec3) -> Result<(), Error> {
        non_negative(priorities.x, "x priority")?;
        non_negative(priorities.y, "y priority")?;
        non_negative(priorities.z, "z priority")?;
        self.pin_mut(bone)?.priorities = priorities;
        Ok(())
    }

    pub fn set_pin_depth_falloff(&mut self, bone: BoneId, falloff: f64) -> Result<(), Error> {
        let falloff = non_negative(falloff, "depth falloff")?.min(1.0);
        self.pin_mut(bone)?.depth_falloff = falloff;
        Ok(())
    }

    /// Parents the pin on `child` under the pin on `parent` (or back to the armature). When
    /// `parent` is currently below `child`, `parent` is first moved up to `child`'s former parent
    /// pin.
    pub fn set_parent_pin(&mut self, child: BoneId, parent: Option<BoneId>) -> Result<(), Error> {
        self.pin_ref(child)?;
        if let Some(parent) = parent {
            self.pin_ref(parent)?;
            if parent == child {
                return Err(Error::invalid(format!(
                    "pin on '{}' cannot be its own parent",
                    self.bone(child)?.tag
                )));
            }
            if self.is_pin_ancestor(child, parent) {
                let former = self.pin_ref(child)?.parent_pin;
                log::warn!(
                    "re-rooting pin on '{}' to avoid a pin cycle",
                    self.bone(parent)?.tag
                );
                self.attach_pin(parent, former)?;
            }
        }
        self.attach_pin(child, parent)
    }

    /// True when the pin on `ancestor` is above the pin on `bone` in the pin tree.
    pub fn is_pin_ancestor(&self, ancestor: BoneId, bone: BoneId) -> bool {
        let mut cur = self.pin(bone).and_then(|p| p.parent_pin);
        while let Some(pin_owner) = cur {
            if pin_owner == ancestor {
                return true;
            }
            cur = self.pin(pin_owner).and_then(|p| p.parent_pin);
        }
        false
    }

    fn attach_pin(&mut self, child: BoneId, parent: Option<BoneId>) -> Result<(), Error> {
        let (target, old_parent) = {
            let pin = self.pin_ref(child)?;
            (pin.target, pin.parent_pin)
        };
        if let Some(old) = old_parent {
            if let Ok(old) = self.pin_mut(old) {
                old.child_pins.retain(|&c| c != child);
            }
        }
        let parent_node = match parent {
            Some(parent) => {
                let parent_pin = self.pin_mut(parent)?;
                parent_pin.child_pins.push(child);
                parent_pin.target
            }
            None => self.armature,
        };
        self.pin_mut(child)?.parent_pin = parent;
        self.nodes.set_parent(target, Some(parent_node))
    }
}
