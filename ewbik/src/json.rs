//! Rig descriptions in JSON.
//!
//! Bones are listed parents first. Exactly one bone has no parent; it becomes the skeleton
//! root. Angles are radians, vectors are `[x, y, z]` and quaternions are `[x, y, z, w]`.
//!
//! ```json
//! {
//!   "solver": { "iterations": 20, "dampening": 0.2 },
//!   "bones": [
//!     { "name": "hip", "length": 1.0 },
//!     { "name": "knee", "parent": "hip", "heading": [0, -1, 0], "length": 2.0,
//!       "constraint": { "cones": [{ "direction": [0, 1, 0], "radius": 0.6 }] },
//!       "pin": { "position": [0.5, -1.5, 0.0], "priorities": [0, 1, 0] } }
//!   ]
//! }
//! ```

use crate::{BoneId, Error, Kusudama, Skeleton, SolverConfig};
use glam::{DQuat, DVec3};
use serde::Deserialize;
use std::collections::HashMap;

fn default_one() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_heading() -> [f64; 3] {
    [0.0, 1.0, 0.0]
}

#[derive(Debug, Deserialize)]
struct RigDef {
    #[serde(default)]
    solver: Option<SolverConfig>,
    #[serde(default)]
    bones: Vec<BoneDef>,
}

#[derive(Debug, Deserialize)]
struct BoneDef {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default = "default_heading")]
    heading: [f64; 3],
    length: f64,
    #[serde(default)]
    stiffness: f64,
    #[serde(default)]
    constraint: Option<ConstraintDef>,
    #[serde(default)]
    pin: Option<PinDef>,
}

#[derive(Debug, Deserialize)]
struct ConstraintDef {
    #[serde(default)]
    cones: Vec<ConeDef>,
    #[serde(default)]
    twist: Option<TwistDef>,
    #[serde(default)]
    painfulness: f64,
}

#[derive(Debug, Deserialize)]
struct ConeDef {
    direction: [f64; 3],
    radius: f64,
}

#[derive(Debug, Deserialize)]
struct TwistDef {
    min: f64,
    range: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinDef {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    position: Option<[f64; 3]>,
    #[serde(default)]
    orientation: Option<[f64; 4]>,
    #[serde(default = "default_one")]
    weight: f64,
    #[serde(default)]
    priorities: [f64; 3],
    #[serde(default = "default_one")]
    depth_falloff: f64,
    #[serde(default)]
    parent: Option<String>,
}

impl ConstraintDef {
    fn build(&self) -> Kusudama {
        let mut limits = Kusudama::new();
        for cone in &self.cones {
            limits.add_limit_cone(DVec3::from_array(cone.direction), cone.radius);
        }
        if let Some(twist) = &self.twist {
            limits.set_axial_limits(twist.min, twist.range);
        }
        limits.set_painfulness(self.painfulness);
        limits
    }
}

impl Skeleton {
    /// Builds a skeleton from a JSON rig description. Pins start at the rest pose and are then
    /// moved to their listed position and orientation.
    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        let rig: RigDef = serde_json::from_str(input).map_err(|e| Error::JsonParse {
            message: e.to_string(),
        })?;

        let roots = rig.bones.iter().filter(|b| b.parent.is_none()).count();
        if roots != 1 {
            return Err(Error::JsonRootCount { count: roots });
        }
        let mut defs = rig.bones.into_iter();
        let Some(root_def) = defs.next() else {
            return Err(Error::JsonRootCount { count: 0 });
        };
        if let Some(parent) = root_def.parent {
            return Err(Error::JsonUnknownParent {
                bone: root_def.name,
                parent,
            });
        }

        let mut skeleton = Skeleton::new(
            root_def.name.clone(),
            DVec3::from_array(root_def.heading),
            root_def.length,
        )?;
        if let Some(config) = rig.solver {
            skeleton.set_config(config)?;
        }

        skeleton.begin_topology_edit();
        let loaded = load_bones(&mut skeleton, root_def, defs);
        skeleton.finalize_topology();
        loaded?;

        log::debug!("loaded rig with {} bones", skeleton.len());
        Ok(skeleton)
    }
}

fn load_bones(
    skeleton: &mut Skeleton,
    root_def: BoneDef,
    defs: impl Iterator<Item = BoneDef>,
) -> Result<(), Error> {
    let mut by_name = HashMap::<String, BoneId>::new();
    let mut pin_parents = Vec::<(BoneId, String)>::new();

    let root = skeleton.root();
    apply_bone_def(skeleton, root, &root_def, &mut pin_parents)?;
    by_name.insert(root_def.name, root);

    for def in defs {
        if by_name.contains_key(&def.name) {
            return Err(Error::JsonDuplicateBone { bone: def.name });
        }
        let parent_name = def.parent.as_deref().unwrap_or_default();
        let Some(&parent) = by_name.get(parent_name) else {
            return Err(Error::JsonUnknownParent {
                bone: def.name.clone(),
                parent: parent_name.to_string(),
            });
        };
        let id = skeleton.add_bone(
            parent,
            DVec3::from_array(def.heading),
            def.length,
            def.name.clone(),
        )?;
        apply_bone_def(skeleton, id, &def, &mut pin_parents)?;
        by_name.insert(def.name, id);
    }

    for (child, parent_name) in pin_parents {
        let Some(&parent) = by_name.get(&parent_name) else {
            return Err(Error::JsonUnknownParent {
                bone: skeleton.bone(child)?.tag().to_string(),
                parent: parent_name,
            });
        };
        skeleton.set_parent_pin(child, Some(parent))?;
    }
    Ok(())
}

fn apply_bone_def(
    skeleton: &mut Skeleton,
    id: BoneId,
    def: &BoneDef,
    pin_parents: &mut Vec<(BoneId, String)>,
) -> Result<(), Error> {
    skeleton.set_stiffness(id, def.stiffness)?;
    if let Some(constraint) = &def.constraint {
        skeleton.set_constraint(id, Some(constraint.build()))?;
    }
    let Some(pin) = &def.pin else {
        return Ok(());
    };

    skeleton.enable_pin(id)?;
    skeleton.set_pin_weight(id, pin.weight)?;
    skeleton.set_pin_priorities(id, DVec3::from_array(pin.priorities))?;
    skeleton.set_pin_depth_falloff(id, pin.depth_falloff)?;
    if let Some(orientation) = pin.orientation {
        let rotation = DQuat::from_array(orientation);
        if !rotation.is_finite() || rotation.length_squared() <= f64::EPSILON {
            return Err(Error::invalid(format!(
                "pin orientation of '{}' is not a rotation",
                def.name
            )));
        }
        skeleton.set_pin_orientation(id, rotation.normalize())?;
    }
    if let Some(position) = pin.position {
        skeleton.set_pin_position(id, DVec3::from_array(position))?;
    }
    if let Some(parent) = &pin.parent {
        pin_parents.push((id, parent.clone()));
    }
    if !pin.enabled {
        skeleton.disable_pin(id)?;
    }
    Ok(())
}
