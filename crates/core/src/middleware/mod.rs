//! Contract with the external skeleton middleware.
//!
//! The middleware is a black box: it hands over one [`UserTrackerFrame`] per
//! sensor frame, starts and stops per-user skeleton tracking on request and
//! projects sensor-space points onto the depth image.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::joint::{JointType, JOINT_COUNT};
use crate::{Result, TrackerError};

/// Stable handle assigned by the middleware to a tracked subject.
pub type UserId = u16;

/// Calibration/tracking progress of one user's skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SkeletonState {
    #[default]
    None,
    Calibrating,
    Tracked,
    CalibrationErrorNotInPose,
    CalibrationErrorHands,
    CalibrationErrorHead,
    CalibrationErrorLegs,
    CalibrationErrorTorso,
}

impl SkeletonState {
    pub fn is_calibration_error(self) -> bool {
        matches!(
            self,
            SkeletonState::CalibrationErrorNotInPose
                | SkeletonState::CalibrationErrorHands
                | SkeletonState::CalibrationErrorHead
                | SkeletonState::CalibrationErrorLegs
                | SkeletonState::CalibrationErrorTorso
        )
    }
}

/// One joint exactly as the middleware reports it, in sensor space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawJoint {
    pub position: Vec3,
    pub orientation: Quat,
    pub position_confidence: f32,
    pub orientation_confidence: f32,
}

impl RawJoint {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            position_confidence: 1.0,
            ..Default::default()
        }
    }
}

/// Per-user detection delivered with a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    pub id: UserId,
    pub is_new: bool,
    pub is_lost: bool,
    pub is_visible: bool,
    pub state: SkeletonState,
    pub joints: [RawJoint; JOINT_COUNT],
    pub center_of_mass: Vec3,
}

impl UserData {
    /// A visible, already-known user with an untracked skeleton.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            is_new: false,
            is_lost: false,
            is_visible: true,
            state: SkeletonState::None,
            joints: [RawJoint::default(); JOINT_COUNT],
            center_of_mass: Vec3::ZERO,
        }
    }

    pub fn appeared(mut self) -> Self {
        self.is_new = true;
        self
    }

    pub fn lost(mut self) -> Self {
        self.is_lost = true;
        self
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.is_visible = visible;
        self
    }

    pub fn with_state(mut self, state: SkeletonState) -> Self {
        self.state = state;
        self
    }

    pub fn with_joint(mut self, kind: JointType, joint: RawJoint) -> Self {
        self.joints[kind.index()] = joint;
        self
    }

    pub fn with_center_of_mass(mut self, center_of_mass: Vec3) -> Self {
        self.center_of_mass = center_of_mass;
        self
    }

    pub fn joint(&self, kind: JointType) -> &RawJoint {
        &self.joints[kind.index()]
    }
}

/// Single-channel depth image in millimetres.
#[derive(Clone, PartialEq, Default)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u16>,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(TrackerError::msg(format!(
                "depth frame expects {expected} pixels for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Maps depth in `[near, far]` linearly onto `[0, 255]` (or `[255, 0]`
    /// when inverted). Missing readings and values outside the window are 0.
    pub fn remap_to_range(&self, near: u16, far: u16, invert: bool) -> Vec<u8> {
        let span = f32::from(far.saturating_sub(near)).max(1.0);
        self.pixels
            .iter()
            .map(|&depth| {
                if depth == 0 || depth < near || depth > far {
                    return 0;
                }
                let t = f32::from(depth - near) / span;
                let t = if invert { 1.0 - t } else { t };
                (t * 255.0).round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

impl fmt::Debug for DepthFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepthFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels", &self.pixels.len())
            .finish()
    }
}

/// Everything the middleware delivers for one sensor frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserTrackerFrame {
    pub users: Vec<UserData>,
    pub depth: DepthFrame,
    /// Per-pixel user id over the depth image, 0 for background. Empty when
    /// the middleware did not segment the frame.
    pub user_map: Vec<UserId>,
}

impl UserTrackerFrame {
    pub fn new(users: Vec<UserData>, depth: DepthFrame) -> Self {
        Self {
            users,
            depth,
            user_map: Vec::new(),
        }
    }

    /// Attaches a label map; it must cover the depth image pixel for pixel.
    pub fn with_user_map(mut self, user_map: Vec<UserId>) -> Result<Self> {
        if user_map.len() != self.depth.pixels.len() {
            return Err(TrackerError::msg(format!(
                "user map has {} labels for {} depth pixels",
                user_map.len(),
                self.depth.pixels.len()
            )));
        }
        self.user_map = user_map;
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareVersion {
    pub major: u8,
    pub minor: u8,
    pub maintenance: u16,
    pub build: u32,
}

impl fmt::Display for MiddlewareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.maintenance, self.build
        )
    }
}

/// Projection from sensor space (millimetres) onto the depth image.
pub trait DepthConverter {
    fn convert_joint_to_depth(&self, position: Vec3) -> Vec2;
}

/// Commands the tracker issues to the middleware.
pub trait SkeletonBackend: DepthConverter {
    /// Brings the middleware up. Called at most once per process through
    /// [`MiddlewareRuntime::ensure_initialized`].
    fn initialize(&self) -> Result<MiddlewareVersion>;

    fn set_skeleton_smoothing(&mut self, _factor: f32) {}

    /// Idempotent; repeated requests for the same id are harmless.
    fn start_skeleton_tracking(&mut self, id: UserId);

    /// Idempotent; stopping an unknown id is harmless.
    fn stop_skeleton_tracking(&mut self, id: UserId);
}

/// Process-wide record of whether the middleware has been initialized.
#[derive(Debug, Default)]
pub struct MiddlewareRuntime {
    version: Mutex<Option<MiddlewareVersion>>,
}

static GLOBAL_RUNTIME: MiddlewareRuntime = MiddlewareRuntime::new();

impl MiddlewareRuntime {
    pub const fn new() -> Self {
        Self {
            version: Mutex::new(None),
        }
    }

    /// The runtime shared by the whole process.
    pub fn global() -> &'static MiddlewareRuntime {
        &GLOBAL_RUNTIME
    }

    /// Initializes the middleware through `backend` the first time it is
    /// called; later calls return the recorded version without touching the
    /// backend. A failed attempt leaves the runtime uninitialized.
    pub fn ensure_initialized(&self, backend: &dyn SkeletonBackend) -> Result<MiddlewareVersion> {
        let mut slot = self.lock()?;
        if let Some(version) = *slot {
            return Ok(version);
        }

        let version = backend.initialize()?;
        tracing::info!(%version, "skeleton middleware initialised");
        *slot = Some(version);
        Ok(version)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<MiddlewareVersion>>> {
        self.version
            .lock()
            .map_err(|_| TrackerError::Poisoned("middleware runtime"))
    }
}
