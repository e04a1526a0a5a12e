//! Core library for the skeleton user tracker.
//!
//! Raw per-frame detections from a skeleton middleware are handed off
//! through a [`FrameIngestionBuffer`] and reconciled by a [`UserTracker`]
//! into a stable set of [`User`] records, each owning a hierarchical
//! [`Skeleton`] and its depth-image projection. Lifecycle transitions are
//! reported as [`UserEvent`]s.

pub mod config;
pub mod error;
pub mod ingest;
pub mod joint;
pub mod middleware;
pub mod sim;
pub mod skeleton;
pub mod tracker;
pub mod user;

pub use config::{AppConfig, DepthRangeConfig, SensorConfig, TrackerConfig};
pub use error::{Result, TrackerError};
pub use ingest::FrameIngestionBuffer;
pub use joint::{Joint, JointType, JOINT_COUNT};
pub use middleware::{
    DepthConverter, DepthFrame, MiddlewareRuntime, MiddlewareVersion, RawJoint, SkeletonBackend,
    SkeletonState, UserData, UserId, UserTrackerFrame,
};
pub use sim::{PinholeProjection, SimulatedBackend, SyntheticScene};
pub use skeleton::{Skeleton, BONES, HIERARCHY};
pub use tracker::{UserEvent, UserListener, UserTracker};
pub use user::{ScreenJoints, User, UserRef};
