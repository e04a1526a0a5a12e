use std::sync::Arc;

use glam::{Vec2, Vec3};

use crate::joint::{flip_axis, JointType, JOINT_COUNT};
use crate::middleware::{DepthConverter, SkeletonState, UserData, UserId};
use crate::skeleton::{Skeleton, BONES};

/// Weight given to the newest torso displacement in the activity metric.
pub const ACTIVITY_SMOOTHING: f32 = 0.1;

/// Shared handle to a user record. The tracker updates records through
/// [`Arc::make_mut`], so a listener that keeps a clone holds a snapshot.
pub type UserRef = Arc<User>;

/// Depth-image positions of every named joint, valid from the last frame in
/// which the skeleton was tracked.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenJoints {
    points: [Vec2; JOINT_COUNT],
}

impl ScreenJoints {
    pub fn get(&self, kind: JointType) -> Vec2 {
        self.points[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointType, Vec2)> + '_ {
        JointType::ALL.iter().map(move |kind| (*kind, self.get(*kind)))
    }

    pub fn head(&self) -> Vec2 {
        self.get(JointType::Head)
    }

    pub fn torso(&self) -> Vec2 {
        self.get(JointType::Torso)
    }

    /// Depth-image endpoints of every overlay bone in [`BONES`] order.
    pub fn segments(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        BONES
            .iter()
            .map(move |(from, to)| (self.get(*from), self.get(*to)))
    }

    fn set(&mut self, kind: JointType, point: Vec2) {
        self.points[kind.index()] = point;
    }
}

/// Persistent state of one tracked subject.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    id: UserId,
    visible: bool,
    state: SkeletonState,
    skeleton: Skeleton,
    screen: ScreenJoints,
    center_of_mass: Vec3,
    previous_torso: Vec3,
    activity: f32,
    status: String,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            visible: false,
            state: SkeletonState::None,
            skeleton: Skeleton::new(),
            screen: ScreenJoints::default(),
            center_of_mass: Vec3::ZERO,
            previous_torso: Vec3::ZERO,
            activity: 0.0,
            status: String::new(),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn state(&self) -> SkeletonState {
        self.state
    }

    pub fn is_tracked(&self) -> bool {
        self.state == SkeletonState::Tracked
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn screen_joints(&self) -> &ScreenJoints {
        &self.screen
    }

    /// Center of mass with depth negated.
    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    /// Exponentially smoothed torso displacement per frame.
    pub fn activity(&self) -> f32 {
        self.activity
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Applies one frame's detection to the record.
    pub fn update(&mut self, data: &UserData, converter: &dyn DepthConverter) {
        self.visible = data.is_visible;
        self.state = data.state;
        self.skeleton.update(&data.joints);

        if data.state == SkeletonState::Tracked {
            for kind in JointType::ALL {
                self.screen
                    .set(kind, joint_in_depth_coordinates(data, kind, converter));
            }
        }

        self.status = status_line(data);
        self.center_of_mass = flip_axis(data.center_of_mass);

        let torso = self.skeleton.joint(JointType::Torso).position();
        self.activity += (torso.distance(self.previous_torso) - self.activity) * ACTIVITY_SMOOTHING;
        self.previous_torso = torso;
    }
}

/// Projects a single raw joint of `data` onto the depth image.
pub fn joint_in_depth_coordinates(
    data: &UserData,
    kind: JointType,
    converter: &dyn DepthConverter,
) -> Vec2 {
    converter.convert_joint_to_depth(data.joint(kind).position)
}

fn status_line(data: &UserData) -> String {
    let visibility = if data.is_visible {
        "Visible"
    } else {
        "Out of Scene"
    };
    let message = match data.state {
        state if state.is_calibration_error() => "Calibration Failed...",
        SkeletonState::Calibrating => "Calibrating...",
        SkeletonState::Tracked => "Tracking!",
        _ => "Stopped tracking.",
    };
    format!("[{}]\n{visibility}\n{message}", data.id)
}
