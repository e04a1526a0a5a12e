use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::middleware::{DepthFrame, UserData, UserId, UserTrackerFrame};
use crate::{Result, TrackerError};

/// Weight kept from the previous estimate on every frame arrival.
pub const FPS_SMOOTHING: f32 = 0.8;

/// Hand-off point between the middleware's frame callback and the
/// consumer's update tick. Clones share the same buffer.
#[derive(Clone)]
pub struct FrameIngestionBuffer {
    shared: Arc<Mutex<Pending>>,
    epoch: Instant,
}

#[derive(Debug, Default)]
struct Pending {
    detections: Vec<UserData>,
    depth: Option<DepthFrame>,
    user_map: Vec<UserId>,
    frames_received: u64,
    last_arrival_ms: Option<u64>,
    fps: f32,
}

impl Default for FrameIngestionBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameIngestionBuffer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Pending::default())),
            epoch: Instant::now(),
        }
    }

    /// Producer entry point for the result of a frame read. A failed read is
    /// logged and leaves the buffer untouched.
    pub fn on_frame_read(&self, frame: Result<UserTrackerFrame>) -> Result<()> {
        match frame {
            Ok(frame) => self.on_frame_arrived(frame),
            Err(err) => {
                tracing::warn!(error = %err, "skipping frame");
                Ok(())
            }
        }
    }

    /// Appends a frame, timestamped with the buffer's own clock.
    pub fn on_frame_arrived(&self, frame: UserTrackerFrame) -> Result<()> {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.on_frame_arrived_at(frame, now_ms)
    }

    /// Appends a frame that arrived at `timestamp_ms` and folds the arrival
    /// into the smoothed frame rate.
    pub fn on_frame_arrived_at(&self, frame: UserTrackerFrame, timestamp_ms: u64) -> Result<()> {
        let UserTrackerFrame {
            users,
            depth,
            user_map,
        } = frame;
        let mut pending = self.lock()?;

        if let Some(last) = pending.last_arrival_ms {
            let delta = timestamp_ms.saturating_sub(last);
            if delta > 0 {
                let instantaneous = 1000.0 / delta as f32;
                pending.fps = FPS_SMOOTHING * pending.fps + (1.0 - FPS_SMOOTHING) * instantaneous;
            }
        }
        pending.last_arrival_ms = Some(timestamp_ms);

        pending.detections.extend(users);
        pending.depth = Some(depth);
        pending.user_map = user_map;
        pending.frames_received += 1;
        Ok(())
    }

    /// Moves every detection accumulated since the previous drain to the
    /// caller, in arrival order.
    pub fn drain(&self) -> Result<Vec<UserData>> {
        let mut pending = self.lock()?;
        Ok(std::mem::take(&mut pending.detections))
    }

    /// Drops pending detections without processing them.
    pub fn clear(&self) -> Result<Vec<UserData>> {
        self.drain()
    }

    pub fn fps(&self) -> Result<f32> {
        Ok(self.lock()?.fps)
    }

    pub fn frames_received(&self) -> Result<u64> {
        Ok(self.lock()?.frames_received)
    }

    pub fn latest_depth(&self) -> Result<Option<DepthFrame>> {
        Ok(self.lock()?.depth.clone())
    }

    /// Label map delivered with the latest frame; empty if none was.
    pub fn latest_user_map(&self) -> Result<Vec<UserId>> {
        Ok(self.lock()?.user_map.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Pending>> {
        self.shared
            .lock()
            .map_err(|_| TrackerError::Poisoned("frame ingestion buffer"))
    }
}

impl std::fmt::Debug for FrameIngestionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameIngestionBuffer").finish()
    }
}
