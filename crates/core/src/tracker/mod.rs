//! Per-tick reconciliation of raw detections into persistent users.
//!
//! The middleware's frame callback feeds a [`FrameIngestionBuffer`]; once per
//! application update the consumer calls [`UserTracker::update`], which
//! drains the buffer and runs every detection through the lifecycle rules:
//!
//! 1. a detection flagged new creates a record and starts skeleton tracking;
//! 2. a known id flagged lost, or invisible while out-of-frame tracking is
//!    off, emits [`UserEvent::LostUser`], stops tracking and is removed;
//! 3. detections for unknown ids are dropped;
//! 4. surviving records take the detection's pose;
//! 5. records created in step 1 then emit [`UserEvent::NewUser`].
//!
//! An id emits at most one event per tick. When frames are merged before a
//! drain, detections for an id that already emitted this tick are held back
//! and replayed first on the next tick.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::TrackerConfig;
use crate::ingest::FrameIngestionBuffer;
use crate::middleware::{
    MiddlewareRuntime, MiddlewareVersion, SkeletonBackend, SkeletonState, UserData, UserId,
};
use crate::user::{User, UserRef};
use crate::Result;

/// Lifecycle transition reported to listeners.
#[derive(Debug, Clone)]
pub enum UserEvent {
    NewUser(UserRef),
    LostUser(UserRef),
}

impl UserEvent {
    pub fn user(&self) -> &UserRef {
        match self {
            UserEvent::NewUser(user) | UserEvent::LostUser(user) => user,
        }
    }

    pub fn id(&self) -> UserId {
        self.user().id()
    }
}

/// Receives lifecycle events synchronously during [`UserTracker::update`].
pub trait UserListener: Send {
    fn on_user_event(&mut self, event: &UserEvent);
}

impl<F> UserListener for F
where
    F: FnMut(&UserEvent) + Send,
{
    fn on_user_event(&mut self, event: &UserEvent) {
        self(event)
    }
}

pub struct UserTracker<B: SkeletonBackend> {
    backend: B,
    ingest: FrameIngestionBuffer,
    users: BTreeMap<UserId, UserRef>,
    active: Vec<UserRef>,
    deferred: Vec<UserData>,
    track_out_of_frame: bool,
    tracking_started: HashMap<UserId, Instant>,
    listeners: Vec<Box<dyn UserListener>>,
    version: MiddlewareVersion,
}

impl<B: SkeletonBackend> UserTracker<B> {
    /// Initializes the middleware through `runtime` (a no-op after the first
    /// success in the process) and wires up a tracker around `backend`.
    pub fn setup(
        mut backend: B,
        config: &TrackerConfig,
        runtime: &MiddlewareRuntime,
    ) -> Result<Self> {
        let version = runtime.ensure_initialized(&backend)?;
        backend.set_skeleton_smoothing(config.skeleton_smoothing);

        Ok(Self {
            backend,
            ingest: FrameIngestionBuffer::new(),
            users: BTreeMap::new(),
            active: Vec::new(),
            deferred: Vec::new(),
            track_out_of_frame: config.track_out_of_frame,
            tracking_started: HashMap::new(),
            listeners: Vec::new(),
            version,
        })
    }

    /// Handle for the producer side; clones share the tracker's buffer.
    pub fn ingest(&self) -> &FrameIngestionBuffer {
        &self.ingest
    }

    pub fn add_listener(&mut self, listener: impl UserListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn set_track_out_of_frame(&mut self, enabled: bool) {
        self.track_out_of_frame = enabled;
    }

    pub fn track_out_of_frame(&self) -> bool {
        self.track_out_of_frame
    }

    pub fn middleware_version(&self) -> MiddlewareVersion {
        self.version
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn user(&self, id: UserId) -> Option<&UserRef> {
        self.users.get(&id)
    }

    /// Live users ordered by id.
    pub fn users(&self) -> impl Iterator<Item = &UserRef> + '_ {
        self.users.values()
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Users updated by the last tick that had detections, in detection
    /// order.
    pub fn active_users(&self) -> &[UserRef] {
        &self.active
    }

    pub fn fps(&self) -> Result<f32> {
        self.ingest.fps()
    }

    /// Latest depth image remapped to 8-bit grey, if a frame has arrived.
    pub fn depth_pixels(&self, near: u16, far: u16, invert: bool) -> Result<Option<Vec<u8>>> {
        Ok(self
            .ingest
            .latest_depth()?
            .map(|depth| depth.remap_to_range(near, far, invert)))
    }

    /// Drains the ingestion buffer and reconciles the batch. Returns the
    /// events emitted during the tick, in emission order.
    pub fn update(&mut self) -> Result<Vec<UserEvent>> {
        let detections = self.ingest.drain()?;
        Ok(self.reconcile(detections))
    }

    /// Detections held back from the last tick.
    pub fn deferred_detections(&self) -> &[UserData] {
        &self.deferred
    }

    /// Runs one batch of detections, preceded by any held back from the
    /// previous tick, through the lifecycle rules.
    pub fn reconcile(&mut self, detections: Vec<UserData>) -> Vec<UserEvent> {
        let mut events = Vec::new();
        let mut batch = std::mem::take(&mut self.deferred);
        batch.extend(detections);
        if batch.is_empty() {
            return events;
        }

        self.active.clear();
        let mut updated: Vec<UserId> = Vec::with_capacity(batch.len());
        let mut announced: HashSet<UserId> = HashSet::new();

        for data in batch.iter() {
            let id = data.id;
            if announced.contains(&id) {
                self.deferred.push(data.clone());
                continue;
            }
            let mut created = false;

            if data.is_new {
                if self.users.contains_key(&id) {
                    tracing::debug!(id, "new detection for a live user; keeping existing record");
                } else {
                    self.users.insert(id, Arc::new(User::new(id)));
                    self.tracking_started.insert(id, Instant::now());
                    created = true;
                }
                self.backend.start_skeleton_tracking(id);
            } else if let Some(existing) = self.users.get(&id) {
                if data.is_lost || (!data.is_visible && !self.track_out_of_frame) {
                    let event = UserEvent::LostUser(Arc::clone(existing));
                    self.emit(event, &mut events);
                    announced.insert(id);
                    tracing::info!(id, "lost user");

                    self.backend.stop_skeleton_tracking(id);
                    self.users.remove(&id);
                    self.tracking_started.remove(&id);
                    continue;
                }
            }

            let Some(entry) = self.users.get_mut(&id) else {
                tracing::debug!(id, "dropping detection for unknown user");
                continue;
            };

            if !created && data.state == SkeletonState::Tracked {
                if let Some(started) = self.tracking_started.remove(&id) {
                    let secs = started.elapsed().as_secs_f32();
                    tracing::info!(id, secs, "user skeleton found");
                }
            }

            Arc::make_mut(entry).update(data, &self.backend);
            if !updated.contains(&id) {
                updated.push(id);
            }

            if created {
                let event = UserEvent::NewUser(Arc::clone(entry));
                self.emit(event, &mut events);
                announced.insert(id);
                tracing::info!(id, "new user");
            }
        }

        self.active = updated
            .iter()
            .filter_map(|id| self.users.get(id).cloned())
            .collect();
        tracing::debug!(
            detections = batch.len(),
            deferred = self.deferred.len(),
            live = self.users.len(),
            events = events.len(),
            "reconciled detections"
        );
        events
    }

    /// Stops tracking every pending and live user and forgets all of them.
    pub fn clear(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.deferred);
        for data in pending.iter().chain(self.ingest.clear()?.iter()) {
            self.backend.stop_skeleton_tracking(data.id);
        }
        for id in self.users.keys() {
            self.backend.stop_skeleton_tracking(*id);
        }
        self.users.clear();
        self.active.clear();
        self.tracking_started.clear();
        Ok(())
    }

    /// Stops tracking every live user. Also runs on drop.
    pub fn shutdown(&mut self) {
        for id in self.users.keys() {
            self.backend.stop_skeleton_tracking(*id);
        }
        self.users.clear();
        self.active.clear();
        self.deferred.clear();
        self.tracking_started.clear();
    }

    fn emit(&mut self, event: UserEvent, events: &mut Vec<UserEvent>) {
        for listener in &mut self.listeners {
            listener.on_user_event(&event);
        }
        events.push(event);
    }
}

impl<B: SkeletonBackend> Drop for UserTracker<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B: SkeletonBackend> std::fmt::Debug for UserTracker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTracker")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("track_out_of_frame", &self.track_out_of_frame)
            .field("listeners", &self.listeners.len())
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use glam::{Vec2, Vec3};

    use super::*;
    use crate::joint::JointType;
    use crate::middleware::{DepthConverter, DepthFrame, RawJoint, UserTrackerFrame};
    use crate::TrackerError;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start(UserId),
        Stop(UserId),
        Smoothing(f32),
    }

    #[derive(Default)]
    struct RecordingBackend {
        calls: Vec<Call>,
    }

    impl DepthConverter for RecordingBackend {
        fn convert_joint_to_depth(&self, position: Vec3) -> Vec2 {
            Vec2::new(position.x + 320.0, 240.0 - position.y)
        }
    }

    impl SkeletonBackend for RecordingBackend {
        fn initialize(&self) -> Result<MiddlewareVersion> {
            Ok(MiddlewareVersion {
                major: 2,
                minor: 2,
                maintenance: 0,
                build: 11,
            })
        }

        fn set_skeleton_smoothing(&mut self, factor: f32) {
            self.calls.push(Call::Smoothing(factor));
        }

        fn start_skeleton_tracking(&mut self, id: UserId) {
            self.calls.push(Call::Start(id));
        }

        fn stop_skeleton_tracking(&mut self, id: UserId) {
            self.calls.push(Call::Stop(id));
        }
    }

    struct BrokenBackend;

    impl DepthConverter for BrokenBackend {
        fn convert_joint_to_depth(&self, _position: Vec3) -> Vec2 {
            Vec2::ZERO
        }
    }

    impl SkeletonBackend for BrokenBackend {
        fn initialize(&self) -> Result<MiddlewareVersion> {
            Err(TrackerError::MiddlewareInit("device missing".into()))
        }

        fn start_skeleton_tracking(&mut self, _id: UserId) {}

        fn stop_skeleton_tracking(&mut self, _id: UserId) {}
    }

    fn tracker() -> UserTracker<RecordingBackend> {
        UserTracker::setup(
            RecordingBackend::default(),
            &TrackerConfig::default(),
            &MiddlewareRuntime::new(),
        )
        .unwrap()
    }

    fn kinds(events: &[UserEvent]) -> Vec<(&'static str, UserId)> {
        events
            .iter()
            .map(|event| match event {
                UserEvent::NewUser(user) => ("new", user.id()),
                UserEvent::LostUser(user) => ("lost", user.id()),
            })
            .collect()
    }

    #[test]
    fn setup_applies_smoothing_and_reports_version() {
        let tracker = tracker();
        assert_eq!(tracker.backend().calls, vec![Call::Smoothing(0.5)]);
        assert_eq!(tracker.middleware_version().major, 2);
    }

    #[test]
    fn setup_fails_when_middleware_cannot_start() {
        let err = UserTracker::setup(
            BrokenBackend,
            &TrackerConfig::default(),
            &MiddlewareRuntime::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TrackerError::MiddlewareInit(_)));
    }

    #[test]
    fn new_detection_creates_user_and_emits_after_update() {
        let mut tracker = tracker();
        let events = tracker.reconcile(vec![UserData::new(1).appeared()]);

        assert_eq!(kinds(&events), vec![("new", 1)]);
        assert!(events[0].user().status().contains("Stopped tracking"));
        assert!(tracker.user(1).is_some());
        assert!(tracker.backend().calls.contains(&Call::Start(1)));
        assert_eq!(tracker.active_users().len(), 1);
    }

    #[test]
    fn lost_detection_emits_and_removes() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(1).appeared()]);

        let events = tracker.reconcile(vec![UserData::new(1).lost()]);
        assert_eq!(kinds(&events), vec![("lost", 1)]);
        assert!(tracker.user(1).is_none());
        assert!(tracker.backend().calls.contains(&Call::Stop(1)));
        assert!(tracker.active_users().is_empty());
    }

    #[test]
    fn invisible_user_is_lost_unless_out_of_frame_tracking() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(2).appeared()]);
        let events = tracker.reconcile(vec![UserData::new(2).with_visibility(false)]);
        assert_eq!(kinds(&events), vec![("lost", 2)]);
        assert_eq!(tracker.num_users(), 0);

        tracker.set_track_out_of_frame(true);
        tracker.reconcile(vec![UserData::new(3).appeared()]);
        let events = tracker.reconcile(vec![UserData::new(3).with_visibility(false)]);
        assert!(events.is_empty());
        let user = tracker.user(3).unwrap();
        assert!(!user.is_visible());
        assert!(user.status().contains("Out of Scene"));
    }

    #[test]
    fn lost_event_carries_last_known_record_before_removal() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(1)
            .appeared()
            .with_center_of_mass(Vec3::new(1.0, 2.0, 3.0))]);

        let seen_live = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen_live);
        tracker.add_listener(move |event: &UserEvent| {
            sink.lock().unwrap().push(event.user().center_of_mass());
        });

        let events = tracker.reconcile(vec![UserData::new(1)
            .lost()
            .with_center_of_mass(Vec3::new(9.0, 9.0, 9.0))]);
        assert_eq!(events.len(), 1);
        // no pose update after the lost transition
        assert_eq!(*seen_live.lock().unwrap(), vec![Vec3::new(1.0, 2.0, -3.0)]);
    }

    #[test]
    fn duplicate_new_keeps_single_record_and_event() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(5).appeared()]);
        let before = Arc::clone(tracker.user(5).unwrap());

        let events = tracker.reconcile(vec![UserData::new(5)
            .appeared()
            .with_state(SkeletonState::Calibrating)]);
        assert!(events.is_empty());
        assert_eq!(tracker.num_users(), 1);
        assert!(tracker.user(5).unwrap().status().contains("Calibrating"));
        // the retained snapshot is not mutated underneath its holder
        assert!(before.status().contains("Stopped tracking"));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut tracker = tracker();
        let events = tracker.reconcile(vec![UserData::new(7), UserData::new(8).lost()]);
        assert!(events.is_empty());
        assert_eq!(tracker.num_users(), 0);
        assert!(!tracker
            .backend()
            .calls
            .iter()
            .any(|call| matches!(call, Call::Stop(_))));
    }

    #[test]
    fn a_detection_never_yields_two_events() {
        let mut tracker = tracker();
        let events = tracker.reconcile(vec![UserData::new(1)
            .appeared()
            .lost()
            .with_visibility(false)]);
        assert_eq!(kinds(&events), vec![("new", 1)]);
        assert!(tracker.user(1).is_some());
    }

    #[test]
    fn merged_frames_spread_transitions_across_ticks() {
        let mut tracker = tracker();
        let producer = tracker.ingest().clone();
        producer
            .on_frame_arrived_at(
                UserTrackerFrame::new(vec![UserData::new(1).appeared()], DepthFrame::default()),
                0,
            )
            .unwrap();
        producer
            .on_frame_arrived_at(
                UserTrackerFrame::new(
                    vec![UserData::new(1).lost(), UserData::new(2).appeared()],
                    DepthFrame::default(),
                ),
                33,
            )
            .unwrap();

        let first = tracker.update().unwrap();
        assert_eq!(kinds(&first), vec![("new", 1), ("new", 2)]);
        assert!(tracker.user(1).is_some());
        assert_eq!(tracker.deferred_detections().len(), 1);

        let second = tracker.update().unwrap();
        assert_eq!(kinds(&second), vec![("lost", 1)]);
        assert!(tracker.user(1).is_none());
        assert!(tracker.deferred_detections().is_empty());
        assert!(tracker.update().unwrap().is_empty());
    }

    #[test]
    fn deferred_detections_replay_before_newer_ones() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(3).appeared()]);

        let events = tracker.reconcile(vec![
            UserData::new(3).lost(),
            UserData::new(3).appeared(),
            UserData::new(3).with_state(SkeletonState::Calibrating),
        ]);
        assert_eq!(kinds(&events), vec![("lost", 3)]);
        assert_eq!(tracker.deferred_detections().len(), 2);

        let events = tracker.reconcile(vec![UserData::new(3).with_state(SkeletonState::Tracked)]);
        assert_eq!(kinds(&events), vec![("new", 3)]);
        // both later detections for 3 wait behind the new one
        assert_eq!(tracker.deferred_detections().len(), 2);

        let events = tracker.reconcile(Vec::new());
        assert!(events.is_empty());
        assert!(tracker.user(3).unwrap().is_tracked());
    }

    #[test]
    fn time_to_track_starts_counting_only_after_creation() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(6)
            .appeared()
            .with_state(SkeletonState::Tracked)]);
        assert!(tracker.tracking_started.contains_key(&6));

        tracker.reconcile(vec![UserData::new(6).with_state(SkeletonState::Tracked)]);
        assert!(!tracker.tracking_started.contains_key(&6));
    }

    #[test]
    fn tracked_detection_fills_screen_joints() {
        let mut tracker = tracker();
        let data = UserData::new(1)
            .appeared()
            .with_state(SkeletonState::Tracked)
            .with_joint(JointType::Head, RawJoint::at(Vec3::new(10.0, 200.0, 2000.0)))
            .with_joint(JointType::RightFoot, RawJoint::at(Vec3::new(-80.0, -700.0, 2100.0)))
            .with_center_of_mass(Vec3::new(5.0, -50.0, 2050.0));
        tracker.reconcile(vec![data]);

        let user = tracker.user(1).unwrap();
        assert_eq!(user.screen_joints().head(), Vec2::new(330.0, 40.0));
        assert_eq!(
            user.screen_joints().get(JointType::RightFoot),
            Vec2::new(240.0, 940.0)
        );
        assert_eq!(user.center_of_mass(), Vec3::new(5.0, -50.0, -2050.0));
        assert!(user.is_tracked());
    }

    #[test]
    fn events_follow_detection_order_and_reach_listeners() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(1).appeared(), UserData::new(2).appeared()]);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        tracker.add_listener(move |event: &UserEvent| {
            sink.lock().unwrap().push(event.id());
        });

        let events = tracker.reconcile(vec![
            UserData::new(2).lost(),
            UserData::new(3).appeared(),
            UserData::new(1),
        ]);
        assert_eq!(kinds(&events), vec![("lost", 2), ("new", 3)]);
        assert_eq!(*received.lock().unwrap(), vec![2, 3]);
        let active: Vec<_> = tracker.active_users().iter().map(|u| u.id()).collect();
        assert_eq!(active, vec![3, 1]);
    }

    #[test]
    fn update_drains_frames_from_producer_handle() {
        let mut tracker = tracker();
        let producer = tracker.ingest().clone();
        producer
            .on_frame_arrived_at(
                UserTrackerFrame::new(vec![UserData::new(1).appeared()], DepthFrame::blank(2, 1)),
                0,
            )
            .unwrap();
        producer
            .on_frame_arrived_at(
                UserTrackerFrame::new(
                    vec![UserData::new(1).with_state(SkeletonState::Calibrating)],
                    DepthFrame::new(2, 1, vec![1000, 0]).unwrap(),
                ),
                40,
            )
            .unwrap();

        let events = tracker.update().unwrap();
        assert_eq!(kinds(&events), vec![("new", 1)]);
        assert!(tracker.user(1).unwrap().status().contains("Stopped tracking"));
        assert!(tracker.fps().unwrap() > 0.0);
        assert_eq!(
            tracker.depth_pixels(0, 1000, false).unwrap(),
            Some(vec![255, 0])
        );

        // the second frame's detection follows on the next tick
        assert!(tracker.update().unwrap().is_empty());
        assert!(tracker.user(1).unwrap().status().contains("Calibrating"));
        assert_eq!(tracker.active_users().len(), 1);

        assert!(tracker.update().unwrap().is_empty());
        assert_eq!(tracker.active_users().len(), 1);
    }

    #[test]
    fn clear_stops_every_pending_and_live_user() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(1).appeared()]);
        tracker
            .ingest()
            .on_frame_arrived_at(
                UserTrackerFrame::new(vec![UserData::new(4)], DepthFrame::default()),
                0,
            )
            .unwrap();

        tracker.clear().unwrap();
        assert_eq!(tracker.num_users(), 0);
        let calls = &tracker.backend().calls;
        assert!(calls.contains(&Call::Stop(1)));
        assert!(calls.contains(&Call::Stop(4)));
        assert!(tracker.update().unwrap().is_empty());
    }

    #[test]
    fn clear_drops_deferred_detections() {
        let mut tracker = tracker();
        tracker.reconcile(vec![UserData::new(1).appeared(), UserData::new(1).lost()]);
        assert_eq!(tracker.deferred_detections().len(), 1);

        tracker.clear().unwrap();
        assert!(tracker.deferred_detections().is_empty());
        assert!(tracker.update().unwrap().is_empty());
    }
}
