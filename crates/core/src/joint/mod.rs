use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::middleware::RawJoint;

/// Number of joint types reported by the middleware.
pub const JOINT_COUNT: usize = 15;

/// Skeletal landmark categories in the middleware's own order. The
/// discriminant doubles as the index into a skeleton's joint array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JointType {
    Head = 0,
    Neck,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftHand,
    RightHand,
    Torso,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftFoot,
    RightFoot,
}

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::Head,
        JointType::Neck,
        JointType::LeftShoulder,
        JointType::RightShoulder,
        JointType::LeftElbow,
        JointType::RightElbow,
        JointType::LeftHand,
        JointType::RightHand,
        JointType::Torso,
        JointType::LeftHip,
        JointType::RightHip,
        JointType::LeftKnee,
        JointType::RightKnee,
        JointType::LeftFoot,
        JointType::RightFoot,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Converts a sensor-space point into the renderer's convention by
/// negating depth. Applying it twice returns the input.
pub fn flip_axis(position: Vec3) -> Vec3 {
    Vec3::new(position.x, position.y, -position.z)
}

/// Converts the middleware's left-handed orientation into the renderer's
/// convention: X and Y are negated, Z and W kept.
pub fn flip_orientation(orientation: Quat) -> Quat {
    Quat::from_xyzw(-orientation.x, -orientation.y, orientation.z, orientation.w)
}

/// Global pose of a single joint plus its place in the skeleton tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    kind: JointType,
    parent: Option<JointType>,
    position: Vec3,
    orientation: Quat,
    position_confidence: f32,
    orientation_confidence: f32,
}

impl Joint {
    pub fn new(kind: JointType) -> Self {
        Self {
            kind,
            parent: None,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            position_confidence: 0.0,
            orientation_confidence: 0.0,
        }
    }

    pub fn kind(&self) -> JointType {
        self.kind
    }

    pub fn parent(&self) -> Option<JointType> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<JointType>) {
        self.parent = parent;
    }

    /// Position in the renderer's convention (depth negated).
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn position_confidence(&self) -> f32 {
        self.position_confidence
    }

    pub fn orientation_confidence(&self) -> f32 {
        self.orientation_confidence
    }

    /// Copies a raw middleware joint into this one, applying the axis
    /// convention flip.
    pub fn update(&mut self, raw: &RawJoint) {
        self.position = flip_axis(raw.position);
        self.orientation = flip_orientation(raw.orientation);
        self.position_confidence = raw.position_confidence;
        self.orientation_confidence = raw.orientation_confidence;
    }
}
