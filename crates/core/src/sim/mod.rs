//! Synthetic stand-in for the skeleton middleware.
//!
//! [`SimulatedBackend`] answers tracking requests and projects joints with a
//! pinhole model built from the sensor's field of view. [`SyntheticScene`]
//! scripts users that walk in, calibrate, get tracked, step out of view and
//! are finally reported lost. The scene can also fail reads periodically,
//! the way a real device times out now and then.

use std::collections::BTreeSet;

use glam::{Quat, Vec2, Vec3};

use crate::config::SensorConfig;
use crate::joint::JointType;
use crate::middleware::{
    DepthConverter, DepthFrame, MiddlewareVersion, RawJoint, SkeletonBackend, SkeletonState,
    UserData, UserId, UserTrackerFrame,
};
use crate::{Result, TrackerError};

const CALIBRATION_FRAMES: u32 = 20;
const OUT_OF_FRAME_FRAMES: u32 = 30;
const BACKGROUND_DEPTH: u16 = 3500;

/// Pinhole projection from sensor-space millimetres to depth pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeProjection {
    width: f32,
    height: f32,
    focal_x: f32,
    focal_y: f32,
}

impl PinholeProjection {
    pub fn from_sensor(sensor: &SensorConfig) -> Self {
        let width = sensor.width as f32;
        let height = sensor.height as f32;
        Self {
            width,
            height,
            focal_x: (width * 0.5) / (sensor.horizontal_fov_deg.to_radians() * 0.5).tan(),
            focal_y: (height * 0.5) / (sensor.vertical_fov_deg.to_radians() * 0.5).tan(),
        }
    }

    /// Points at or behind the sensor plane project to the origin.
    pub fn project(&self, position: Vec3) -> Vec2 {
        if position.z <= 0.0 {
            return Vec2::ZERO;
        }
        Vec2::new(
            self.width * 0.5 + self.focal_x * position.x / position.z,
            self.height * 0.5 - self.focal_y * position.y / position.z,
        )
    }
}

/// Middleware double that remembers which skeletons it was asked to track.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    projection: PinholeProjection,
    tracking: BTreeSet<UserId>,
    smoothing: f32,
}

impl SimulatedBackend {
    pub fn new(sensor: &SensorConfig) -> Self {
        Self {
            projection: PinholeProjection::from_sensor(sensor),
            tracking: BTreeSet::new(),
            smoothing: 0.0,
        }
    }

    pub fn tracked_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.tracking.iter().copied()
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }
}

impl DepthConverter for SimulatedBackend {
    fn convert_joint_to_depth(&self, position: Vec3) -> Vec2 {
        self.projection.project(position)
    }
}

impl SkeletonBackend for SimulatedBackend {
    fn initialize(&self) -> Result<MiddlewareVersion> {
        Ok(MiddlewareVersion {
            major: 2,
            minor: 2,
            maintenance: 0,
            build: 0,
        })
    }

    fn set_skeleton_smoothing(&mut self, factor: f32) {
        self.smoothing = factor;
    }

    fn start_skeleton_tracking(&mut self, id: UserId) {
        self.tracking.insert(id);
    }

    fn stop_skeleton_tracking(&mut self, id: UserId) {
        self.tracking.remove(&id);
    }
}

/// Deterministic script of users entering and leaving the sensor's view.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    users: u16,
    entry_gap: u32,
    lifetime: u32,
    drop_every: u32,
    sensor: SensorConfig,
    projection: PinholeProjection,
}

impl SyntheticScene {
    pub fn new(users: u16, sensor: &SensorConfig) -> Self {
        Self {
            users,
            entry_gap: 30,
            lifetime: 240,
            drop_every: 0,
            sensor: sensor.clone(),
            projection: PinholeProjection::from_sensor(sensor),
        }
    }

    /// Frame index after which every scripted user has been reported lost.
    pub fn total_frames(&self) -> u32 {
        u32::from(self.users.saturating_sub(1)) * self.entry_gap + self.lifetime
    }

    /// Fails every `every`-th read; 0 never fails. Frames that announce or
    /// lose a user are always delivered.
    pub fn with_dropped_frames(mut self, every: u32) -> Self {
        self.drop_every = every;
        self
    }

    pub fn frame(&self, index: u32) -> UserTrackerFrame {
        let users: Vec<UserData> = (0..self.users)
            .filter_map(|slot| self.user_at(slot, index))
            .collect();
        let (depth, user_map) = self.depth_for(&users);
        let mut frame = UserTrackerFrame::new(users, depth);
        frame.user_map = user_map;
        frame
    }

    /// Reads frame `index` the way a device would, failing on dropped frames.
    pub fn read_frame(&self, index: u32) -> Result<UserTrackerFrame> {
        let frame = self.frame(index);
        let dropped = self.drop_every > 0
            && (index + 1) % self.drop_every == 0
            && !frame.users.iter().any(|user| user.is_new || user.is_lost);
        if dropped {
            return Err(TrackerError::FrameRead(format!(
                "timed out waiting for frame {index}"
            )));
        }
        Ok(frame)
    }

    fn user_at(&self, slot: u16, index: u32) -> Option<UserData> {
        let start = u32::from(slot) * self.entry_gap;
        if index < start || index >= start + self.lifetime {
            return None;
        }
        let age = index - start;
        let id = slot + 1;

        let torso = Vec3::new(
            -600.0 + 400.0 * f32::from(slot) + 300.0 * (age as f32 * 0.05).sin(),
            0.0,
            2800.0 + 150.0 * f32::from(slot),
        );
        let mut data = UserData::new(id).with_center_of_mass(torso - Vec3::new(0.0, 50.0, 0.0));
        for kind in JointType::ALL {
            data = data.with_joint(kind, pose_joint(kind, torso, age));
        }

        data.state = match age {
            0 => SkeletonState::None,
            a if a <= CALIBRATION_FRAMES => SkeletonState::Calibrating,
            _ => SkeletonState::Tracked,
        };
        data.is_new = age == 0;
        data.is_visible = age + OUT_OF_FRAME_FRAMES < self.lifetime - 1;
        data.is_lost = age == self.lifetime - 1;
        Some(data)
    }

    /// Renders each visible user as a box at torso depth and labels the
    /// same pixels with the user's id.
    fn depth_for(&self, users: &[UserData]) -> (DepthFrame, Vec<UserId>) {
        let width = self.sensor.width;
        let height = self.sensor.height;
        let mut depth = DepthFrame::blank(width, height);
        depth.pixels.fill(BACKGROUND_DEPTH);
        let mut labels = vec![0; depth.pixels.len()];

        for user in users.iter().filter(|user| user.is_visible) {
            let top = self.projection.project(user.joint(JointType::Head).position);
            let bottom = self.projection.project(user.joint(JointType::LeftFoot).position);
            let center = self.projection.project(user.center_of_mass);
            let half_width = ((bottom.y - top.y) * 0.15).max(1.0);
            let user_depth = user.center_of_mass.z.clamp(0.0, f32::from(u16::MAX)) as u16;

            let x0 = (center.x - half_width).max(0.0) as u32;
            let x1 = ((center.x + half_width).max(0.0) as u32).min(width);
            let y0 = top.y.max(0.0) as u32;
            let y1 = (bottom.y.max(0.0) as u32).min(height);
            for y in y0..y1 {
                let row = (y * width) as usize;
                for x in x0..x1 {
                    depth.pixels[row + x as usize] = user_depth;
                    labels[row + x as usize] = user.id;
                }
            }
        }
        (depth, labels)
    }
}

/// Standing pose around `torso` with gently swinging arms.
fn pose_joint(kind: JointType, torso: Vec3, age: u32) -> RawJoint {
    let swing = 120.0 * (age as f32 * 0.2).sin();
    let offset = match kind {
        JointType::Head => Vec3::new(0.0, 450.0, 0.0),
        JointType::Neck => Vec3::new(0.0, 250.0, 0.0),
        JointType::LeftShoulder => Vec3::new(-180.0, 220.0, 0.0),
        JointType::RightShoulder => Vec3::new(180.0, 220.0, 0.0),
        JointType::LeftElbow => Vec3::new(-200.0, 0.0, swing * 0.5),
        JointType::RightElbow => Vec3::new(200.0, 0.0, -swing * 0.5),
        JointType::LeftHand => Vec3::new(-210.0, -220.0, swing),
        JointType::RightHand => Vec3::new(210.0, -220.0, -swing),
        JointType::Torso => Vec3::ZERO,
        JointType::LeftHip => Vec3::new(-100.0, -200.0, 0.0),
        JointType::RightHip => Vec3::new(100.0, -200.0, 0.0),
        JointType::LeftKnee => Vec3::new(-100.0, -600.0, 0.0),
        JointType::RightKnee => Vec3::new(100.0, -600.0, 0.0),
        JointType::LeftFoot => Vec3::new(-100.0, -1000.0, 0.0),
        JointType::RightFoot => Vec3::new(100.0, -1000.0, 0.0),
    };
    RawJoint {
        position: torso + offset,
        orientation: Quat::IDENTITY,
        position_confidence: 1.0,
        orientation_confidence: 0.5,
    }
}
