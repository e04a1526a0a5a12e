//! Fixed joint hierarchy and parent-relative transforms.
//!
//! Parents are stored as [`JointType`] indices into the skeleton's own joint
//! array, so a skeleton can be cloned freely without fixing up references.

use glam::{Mat4, Quat, Vec3};

use crate::joint::{Joint, JointType, JOINT_COUNT};
use crate::middleware::RawJoint;

/// Parent/child pairs forming the skeleton tree, rooted at the torso.
pub const HIERARCHY: [(JointType, JointType); JOINT_COUNT - 1] = [
    (JointType::Torso, JointType::Neck),
    (JointType::Neck, JointType::Head),
    (JointType::Torso, JointType::LeftShoulder),
    (JointType::LeftShoulder, JointType::LeftElbow),
    (JointType::LeftElbow, JointType::LeftHand),
    (JointType::Torso, JointType::RightShoulder),
    (JointType::RightShoulder, JointType::RightElbow),
    (JointType::RightElbow, JointType::RightHand),
    (JointType::Torso, JointType::LeftHip),
    (JointType::LeftHip, JointType::LeftKnee),
    (JointType::LeftKnee, JointType::LeftFoot),
    (JointType::Torso, JointType::RightHip),
    (JointType::RightHip, JointType::RightKnee),
    (JointType::RightKnee, JointType::RightFoot),
];

/// Segments drawn by a 2D overlay: head to neck, the shoulder bar, both
/// shoulders to torso, torso to both hips and every limb.
pub const BONES: [(JointType, JointType); 14] = [
    (JointType::Head, JointType::Neck),
    (JointType::LeftShoulder, JointType::RightShoulder),
    (JointType::LeftShoulder, JointType::Torso),
    (JointType::RightShoulder, JointType::Torso),
    (JointType::LeftShoulder, JointType::LeftElbow),
    (JointType::LeftElbow, JointType::LeftHand),
    (JointType::RightShoulder, JointType::RightElbow),
    (JointType::RightElbow, JointType::RightHand),
    (JointType::Torso, JointType::LeftHip),
    (JointType::Torso, JointType::RightHip),
    (JointType::LeftHip, JointType::LeftKnee),
    (JointType::LeftKnee, JointType::LeftFoot),
    (JointType::RightHip, JointType::RightKnee),
    (JointType::RightKnee, JointType::RightFoot),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    joints: [Joint; JOINT_COUNT],
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new()
    }
}

impl Skeleton {
    /// Creates a skeleton at rest with the parent tree already bound.
    pub fn new() -> Self {
        let mut skeleton = Self {
            joints: JointType::ALL.map(Joint::new),
        };
        skeleton.build_hierarchy();
        skeleton
    }

    fn build_hierarchy(&mut self) {
        for joint in &mut self.joints {
            joint.set_parent(None);
        }
        for (parent, child) in HIERARCHY {
            self.joints[child.index()].set_parent(Some(parent));
        }
    }

    pub fn joint(&self, kind: JointType) -> &Joint {
        &self.joints[kind.index()]
    }

    pub fn joints(&self) -> &[Joint; JOINT_COUNT] {
        &self.joints
    }

    pub fn parent(&self, kind: JointType) -> Option<&Joint> {
        self.joint(kind).parent().map(|parent| self.joint(parent))
    }

    pub fn children(&self, kind: JointType) -> impl Iterator<Item = &Joint> + '_ {
        self.joints
            .iter()
            .filter(move |joint| joint.parent() == Some(kind))
    }

    /// Copies every raw joint, in joint-type order, into the skeleton.
    pub fn update(&mut self, raw: &[RawJoint; JOINT_COUNT]) {
        for (joint, data) in self.joints.iter_mut().zip(raw.iter()) {
            joint.update(data);
        }
    }

    /// Position of `kind` expressed in its parent's frame. The root is
    /// returned unchanged.
    pub fn local_position(&self, kind: JointType) -> Vec3 {
        let joint = self.joint(kind);
        match self.parent(kind) {
            Some(parent) => {
                parent.orientation().inverse() * (joint.position() - parent.position())
            }
            None => joint.position(),
        }
    }

    /// Orientation of `kind` relative to its parent's orientation.
    pub fn local_orientation(&self, kind: JointType) -> Quat {
        let joint = self.joint(kind);
        match self.parent(kind) {
            Some(parent) => parent.orientation().inverse() * joint.orientation(),
            None => joint.orientation(),
        }
    }

    pub fn global_transform(&self, kind: JointType) -> Mat4 {
        let joint = self.joint(kind);
        Mat4::from_rotation_translation(joint.orientation(), joint.position())
    }

    pub fn local_transform(&self, kind: JointType) -> Mat4 {
        Mat4::from_rotation_translation(self.local_orientation(kind), self.local_position(kind))
    }
}
