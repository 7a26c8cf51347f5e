//! # Workout Tracker
//!
//! The state machine behind the record-workout screen. It owns the
//! [`WorkoutState`], and on every timer tick inspects the state, the location
//! feed and the clock, resolves pending user requests, and feeds fixes to the
//! statistics engine.
//!
//! ## Single writer
//!
//! Only the tick resolves states. User commands (`pause_workout`,
//! `resume_workout`, `stop_workout`) merely write a `Requested*` marker with
//! an atomic check-and-set on the state channel. The tick commits each
//! transition with a compare-and-swap against the state it observed, so a
//! request that races with a tick is never overwritten; it is picked up by
//! the next tick instead.
//!
//! All collaborators are passed in by the caller:
//!
//! ```no_run
//! use std::sync::Arc;
//! use jetrun_tracker::{
//!     LocationSource, SharedLocationFeed, SystemClock, TokioTimer, WorkoutStatsEngine,
//!     WorkoutTracker,
//! };
//!
//! # fn platform() -> Arc<dyn LocationSource> { unimplemented!() }
//! # async fn run() -> jetrun_tracker::Result<()> {
//! let feed = Arc::new(SharedLocationFeed::new(platform()));
//! let stats = Arc::new(WorkoutStatsEngine::new());
//! let tracker = WorkoutTracker::new(
//!     Arc::new(TokioTimer::current()?),
//!     feed.clone(),
//!     stats.clone(),
//!     Arc::new(SystemClock::new()),
//! );
//!
//! tracker.start()?;
//! let mut states = tracker.workout_state();
//! while let Some(state) = states.changed().await {
//!     println!("{:?} {}", state.phase(), stats.current().formatted_distance());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::geo_fix::GeoFix;
use crate::location::{LocationFeed, SubscriptionHandle};
use crate::observable::Observable;
use crate::state::{Paused, Started, WaitingForLocation, WorkoutState};
use crate::stats::WorkoutStatistics;
use crate::timer::{RepeatingTimer, TickCallback};

/// Configuration for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackerConfig {
    /// Period of the state machine tick.
    /// Default: 1000 ms
    pub tick_period_ms: u64,

    /// How long a user pause may keep GPS running before the location
    /// subscription is released to save battery.
    /// Default: 60000 ms
    pub pause_idle_timeout_ms: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 1000,
            pause_idle_timeout_ms: 60_000,
        }
    }
}

/// Orchestrates timer, location feed, statistics and clock for one workout at a time.
///
/// Cloning yields another handle to the same tracker.
#[derive(Clone)]
pub struct WorkoutTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    config: TrackerConfig,
    timer: Arc<dyn RepeatingTimer>,
    location: Arc<dyn LocationFeed>,
    stats: Arc<dyn WorkoutStatistics>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<WorkoutState>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    paused_at: AtomicI64,
    tick_guard: Mutex<()>,
}

impl WorkoutTracker {
    pub fn new(
        timer: Arc<dyn RepeatingTimer>,
        location: Arc<dyn LocationFeed>,
        stats: Arc<dyn WorkoutStatistics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(timer, location, stats, clock, TrackerConfig::default())
    }

    pub fn with_config(
        timer: Arc<dyn RepeatingTimer>,
        location: Arc<dyn LocationFeed>,
        stats: Arc<dyn WorkoutStatistics>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                timer,
                location,
                stats,
                clock,
                state: watch::Sender::new(WorkoutState::None),
                subscription: Mutex::new(None),
                paused_at: AtomicI64::new(0),
                tick_guard: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Stream of workout states.
    pub fn workout_state(&self) -> Observable<WorkoutState> {
        Observable::new(self.inner.state.subscribe())
    }

    /// The current workout state.
    pub fn current_state(&self) -> WorkoutState {
        self.inner.state.borrow().clone()
    }

    /// Current state as JSON (for efficient FFI).
    pub fn state_json(&self) -> String {
        serde_json::to_string(&self.current_state()).unwrap_or_else(|_| "\"None\"".to_string())
    }

    /// Begin a workout and start ticking.
    ///
    /// Fails with [`TrackerError::AlreadyStarted`] unless the state is `None`.
    /// Missing permission is not an error: the workout starts in `NoPermission`
    /// and waits for it.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.state.borrow().is_none() {
            return Err(TrackerError::AlreadyStarted);
        }

        let target = if inner.location.has_permission() {
            match inner.start_getting_location() {
                Ok(()) => WorkoutState::INITIAL_WAITING,
                Err(e) => {
                    warn!("[WorkoutTracker] Could not subscribe to location: {}", e);
                    WorkoutState::NO_PERMISSION
                }
            }
        } else {
            WorkoutState::NO_PERMISSION
        };

        let claimed = inner.state.send_if_modified(|state| {
            if state.is_none() {
                *state = target;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(TrackerError::AlreadyStarted);
        }
        info!(
            "[WorkoutTracker] Workout started ({:?})",
            inner.state.borrow().phase()
        );

        let tracker: Weak<TrackerInner> = Arc::downgrade(inner);
        let callback: TickCallback = Arc::new(move || {
            if let Some(inner) = tracker.upgrade() {
                inner.on_tick();
            }
        });

        let period = Duration::from_millis(inner.config.tick_period_ms);
        if let Err(e) = inner.timer.start(period, callback) {
            warn!("[WorkoutTracker] Timer refused to start: {}", e);
            inner.clean_up();
            inner.state.send_replace(WorkoutState::None);
            return Err(e);
        }
        Ok(())
    }

    /// Request the workout to stop. No-op when no workout is running.
    pub fn stop_workout(&self) {
        let requested = self.inner.state.send_if_modified(|state| {
            if state.is_none() {
                return false;
            }
            *state = WorkoutState::REQUESTED_STOP;
            true
        });
        if requested {
            debug!("[WorkoutTracker] Stop requested");
        }
    }

    /// Request a pause. No-op unless the workout is running and not
    /// already paused, pausing or stopping.
    pub fn pause_workout(&self) {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let requested = inner.state.send_if_modified(|state| match state {
            WorkoutState::None
            | WorkoutState::Started(
                Started::Paused(_) | Started::RequestedPause | Started::RequestedStop,
            ) => false,
            WorkoutState::Started(_) => {
                inner.paused_at.store(now, Ordering::SeqCst);
                *state = WorkoutState::REQUESTED_PAUSE;
                true
            }
        });
        if requested {
            debug!("[WorkoutTracker] Pause requested at {}", now);
        }
    }

    /// Request a resume. No-op unless paused.
    pub fn resume_workout(&self) {
        let requested = self.inner.state.send_if_modified(|state| {
            if !state.is_paused() {
                return false;
            }
            *state = WorkoutState::REQUESTED_RESUME;
            true
        });
        if requested {
            debug!("[WorkoutTracker] Resume requested");
        }
    }

    /// One-button control: start when idle, resume when paused, pause otherwise.
    pub fn toggle_pause_resume(&self) -> Result<()> {
        let state = self.current_state();
        if state.is_none() {
            self.start()
        } else {
            if state.is_paused() {
                self.resume_workout();
            } else {
                self.pause_workout();
            }
            Ok(())
        }
    }

    /// Stop the timer, release the location subscription and reset statistics.
    ///
    /// Idempotent. Does not change the state; the tick does that.
    pub fn clean_up(&self) {
        self.inner.clean_up();
    }
}

impl TrackerInner {
    fn on_tick(&self) {
        let _guard = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("[WorkoutTracker] Previous tick still running, skipping");
                return;
            }
        };

        let observed = self.state.borrow().clone();
        let started = match &observed {
            WorkoutState::None => {
                self.clean_up();
                return;
            }
            WorkoutState::Started(started) => started,
        };

        match started {
            Started::WaitingForLocation(WaitingForLocation::NoPermission) => {
                if self.location.has_permission() {
                    match self.start_getting_location() {
                        Ok(()) => {
                            self.commit(&observed, WorkoutState::INITIAL_WAITING);
                        }
                        Err(e) => warn!("[WorkoutTracker] Permission granted but subscribe failed: {}", e),
                    }
                }
            }

            Started::WaitingForLocation(WaitingForLocation::InitialWaiting) => {
                if let Some(fix) = self.location.latest_fix() {
                    if self.commit(&observed, WorkoutState::ACTIVE) {
                        self.send_fix_to_stats(&fix);
                    }
                }
            }

            Started::Paused(Paused::ByUser) => {
                let paused_for = self.clock.now_millis() - self.paused_at.load(Ordering::SeqCst);
                if paused_for >= self.config.pause_idle_timeout_ms {
                    self.stop_location_updates();
                }
            }

            Started::WaitingForLocation(WaitingForLocation::AfterPauseWaiting(fix_at_pause)) => {
                if let Some(fix) = self.location.latest_fix() {
                    if !Arc::ptr_eq(&fix, fix_at_pause)
                        && self.commit(&observed, WorkoutState::ACTIVE)
                    {
                        self.send_fix_to_stats(&fix);
                    }
                }
            }

            Started::Active => {
                if let Some(fix) = self.location.latest_fix() {
                    self.send_fix_to_stats(&fix);
                }
            }

            Started::RequestedPause => {
                if self.commit(&observed, WorkoutState::PAUSED_BY_USER) {
                    if let Some(fix) = self.location.latest_fix() {
                        self.send_fix_to_stats(&fix);
                    }
                    self.stats.on_paused();
                }
            }

            Started::RequestedResume => {
                let next = if self.location.has_permission() {
                    match self.start_getting_location() {
                        Ok(()) => self
                            .location
                            .latest_fix()
                            .map(WorkoutState::after_pause_waiting)
                            .unwrap_or(WorkoutState::INITIAL_WAITING),
                        Err(e) => {
                            warn!("[WorkoutTracker] Could not resubscribe to location: {}", e);
                            WorkoutState::NO_PERMISSION
                        }
                    }
                } else {
                    WorkoutState::NO_PERMISSION
                };
                self.commit(&observed, next);
            }

            Started::RequestedStop => {
                self.clean_up();
                if self.commit(&observed, WorkoutState::None) {
                    info!("[WorkoutTracker] Workout stopped");
                }
            }
        }
    }

    /// Replace the state only if it is still `observed`.
    fn commit(&self, observed: &WorkoutState, next: WorkoutState) -> bool {
        let from = observed.phase();
        let to = next.phase();
        let committed = self.state.send_if_modified(|state| {
            if *state == *observed {
                *state = next;
                true
            } else {
                false
            }
        });
        if committed {
            debug!("[WorkoutTracker] {:?} -> {:?}", from, to);
        } else {
            debug!(
                "[WorkoutTracker] {:?} -> {:?} superseded by a user request",
                from, to
            );
        }
        committed
    }

    fn send_fix_to_stats(&self, fix: &Arc<GeoFix>) {
        if let Err(e) = self.stats.update(fix, self.clock.now_millis()) {
            warn!("[WorkoutTracker] Statistics rejected fix: {}", e);
        }
    }

    fn start_getting_location(&self) -> Result<()> {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.is_none() {
            *subscription = Some(self.location.start(true)?);
        }
        Ok(())
    }

    fn stop_location_updates(&self) {
        let handle = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            debug!("[WorkoutTracker] Releasing location subscription {}", handle.id());
            self.location.stop(handle);
        }
    }

    fn clean_up(&self) {
        self.timer.stop();
        self.stop_location_updates();
        self.stats.reset_stats();
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.timer.stop();
        self.stop_location_updates();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::stats::{OfferResult, WorkoutStatsEngine};
    use crate::timer::ManualTimer;
    use crate::WorkoutPhase;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};

    // ------------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeFeed {
        permission: AtomicBool,
        latest: Mutex<Option<Arc<GeoFix>>>,
        next_id: AtomicU64,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl FakeFeed {
        fn granted() -> Arc<Self> {
            let feed = Self::default();
            feed.permission.store(true, Ordering::SeqCst);
            Arc::new(feed)
        }

        fn denied() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_permission(&self, granted: bool) {
            self.permission.store(granted, Ordering::SeqCst);
        }

        fn publish(&self, fix: GeoFix) -> Arc<GeoFix> {
            let fix = Arc::new(fix);
            *self.latest.lock().unwrap() = Some(Arc::clone(&fix));
            fix
        }

        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    impl LocationFeed for FakeFeed {
        fn has_permission(&self) -> bool {
            self.permission.load(Ordering::SeqCst)
        }

        fn start(&self, require_start: bool) -> Result<SubscriptionHandle> {
            if require_start && !self.has_permission() {
                return Err(TrackerError::PermissionDenied);
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriptionHandle::new(
                self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            ))
        }

        fn stop(&self, _handle: SubscriptionHandle) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn latest_fix(&self) -> Option<Arc<GeoFix>> {
            self.latest.lock().unwrap().clone()
        }

        fn fixes(&self) -> Observable<Option<Arc<GeoFix>>> {
            let (_tx, rx) = watch::channel(self.latest_fix());
            Observable::new(rx)
        }
    }

    #[derive(Default)]
    struct RecordingStats {
        updates: Mutex<Vec<(Arc<GeoFix>, i64)>>,
        paused: AtomicUsize,
        resets: AtomicUsize,
    }

    impl RecordingStats {
        fn update_count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }

        fn paused(&self) -> usize {
            self.paused.load(Ordering::SeqCst)
        }
    }

    impl WorkoutStatistics for RecordingStats {
        fn update(&self, fix: &Arc<GeoFix>, timestamp_millis: i64) -> Result<OfferResult> {
            self.updates
                .lock()
                .unwrap()
                .push((Arc::clone(fix), timestamp_millis));
            Ok(OfferResult::Accepted)
        }

        fn on_paused(&self) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }

        fn reset_stats(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        tracker: WorkoutTracker,
        timer: Arc<ManualTimer>,
        feed: Arc<FakeFeed>,
        stats: Arc<RecordingStats>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn with_feed(feed: Arc<FakeFeed>) -> Self {
            let timer = Arc::new(ManualTimer::new());
            let stats = Arc::new(RecordingStats::default());
            let clock = Arc::new(ManualClock::new());
            let tracker = WorkoutTracker::new(
                timer.clone(),
                feed.clone(),
                stats.clone(),
                clock.clone(),
            );
            Self {
                tracker,
                timer,
                feed,
                stats,
                clock,
            }
        }

        fn new() -> Self {
            Self::with_feed(FakeFeed::granted())
        }

        /// Advance the clock by one period and run one tick.
        fn tick(&self) {
            self.clock.advance_millis(1000).unwrap();
            self.timer.fire();
        }

        fn ticks(&self, count: usize) {
            for _ in 0..count {
                self.tick();
            }
        }

        fn phase(&self) -> WorkoutPhase {
            self.tracker.current_state().phase()
        }

        /// Started, first fix applied, now Active.
        fn active(&self) -> Arc<GeoFix> {
            self.tracker.start().unwrap();
            let fix = self.feed.publish(GeoFix::new(52.0, 21.0, 100.0, 0));
            self.tick();
            assert_eq!(self.phase(), WorkoutPhase::Active);
            fix
        }
    }

    // ------------------------------------------------------------------------
    // Starting
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_state_is_none() {
        let h = Harness::new();
        assert!(h.tracker.current_state().is_none());
        assert!(!h.timer.is_running());
    }

    #[test]
    fn test_start_fails_if_already_started() {
        let h = Harness::new();
        h.tracker.start().unwrap();
        assert_eq!(h.tracker.start(), Err(TrackerError::AlreadyStarted));
        // The failed call changed nothing
        assert_eq!(h.timer.start_count(), 1);
        assert_eq!(h.feed.starts(), 1);
    }

    #[test]
    fn test_start_with_permission_waits_for_fix() {
        let h = Harness::new();
        h.tracker.start().unwrap();

        assert!(h.tracker.current_state().is_started());
        assert_eq!(h.phase(), WorkoutPhase::InitialWaiting);
        assert_eq!(h.feed.starts(), 1);
        assert_eq!(h.timer.period(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_waits_for_permission_before_requesting_updates() {
        let h = Harness::with_feed(FakeFeed::denied());
        h.tracker.start().unwrap();
        assert_eq!(h.phase(), WorkoutPhase::NoPermission);
        assert!(h.timer.is_running());

        h.ticks(8);
        assert_eq!(h.phase(), WorkoutPhase::NoPermission);
        assert_eq!(h.feed.starts(), 0);

        h.feed.set_permission(true);
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::InitialWaiting);
        assert_eq!(h.feed.starts(), 1);
    }

    #[test]
    fn test_changes_to_active_when_got_location() {
        let h = Harness::new();
        h.tracker.start().unwrap();
        h.ticks(3);
        assert_eq!(h.phase(), WorkoutPhase::InitialWaiting);
        assert_eq!(h.stats.update_count(), 0);

        let fix = h.feed.publish(GeoFix::at(52.0, 21.0));
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::Active);

        let updates = h.stats.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert!(Arc::ptr_eq(&updates[0].0, &fix));
        assert_eq!(updates[0].1, 4000);
    }

    #[test]
    fn test_forwards_location_to_stats_every_tick() {
        let h = Harness::new();
        h.tracker.start().unwrap();
        h.feed.publish(GeoFix::at(52.0, 21.0));

        h.ticks(3);
        assert_eq!(h.stats.update_count(), 3);
    }

    // ------------------------------------------------------------------------
    // Pause / resume
    // ------------------------------------------------------------------------

    #[test]
    fn test_pause_ignored_before_start() {
        let h = Harness::new();
        h.tracker.pause_workout();
        assert!(h.tracker.current_state().is_none());
    }

    #[test]
    fn test_pauses_when_requested() {
        let h = Harness::new();
        h.active();

        h.tracker.pause_workout();
        assert_eq!(h.phase(), WorkoutPhase::RequestedPause);

        h.tick();
        assert!(h.tracker.current_state().is_paused());
        assert_eq!(h.phase(), WorkoutPhase::PausedByUser);
        assert_eq!(h.stats.paused(), 1);
    }

    #[test]
    fn test_pause_stops_stats_updates() {
        let h = Harness::new();
        h.active();
        assert_eq!(h.stats.update_count(), 1);
        assert_eq!(h.stats.paused(), 0);

        h.tracker.pause_workout();
        h.feed.publish(GeoFix::at(52.001, 21.0));
        h.tick();

        // The fix current at pause time is still applied, then nothing more
        assert_eq!(h.stats.update_count(), 2);
        assert_eq!(h.stats.paused(), 1);

        h.ticks(10);
        assert_eq!(h.stats.update_count(), 2);
        assert_eq!(h.stats.paused(), 1);
    }

    #[test]
    fn test_repeated_pause_is_idempotent() {
        let h = Harness::new();
        h.active();
        h.tracker.pause_workout();
        h.tick();
        let paused_at = h.tracker.inner.paused_at.load(Ordering::SeqCst);

        h.clock.advance_millis(5000).unwrap();
        h.tracker.pause_workout();
        h.tracker.pause_workout();
        assert_eq!(h.phase(), WorkoutPhase::PausedByUser);
        h.tick();

        assert_eq!(h.phase(), WorkoutPhase::PausedByUser);
        assert_eq!(h.tracker.inner.paused_at.load(Ordering::SeqCst), paused_at);
        assert_eq!(h.stats.paused(), 1);
        assert_eq!(h.stats.update_count(), 2);
    }

    #[test]
    fn test_resume_waits_for_new_location_then_becomes_active() {
        let h = Harness::new();
        h.active();

        let seen_before_pause = h.feed.publish(GeoFix::at(52.001, 21.0));
        h.tracker.pause_workout();
        h.tick();
        assert_eq!(h.stats.update_count(), 2);

        h.tracker.resume_workout();
        assert_eq!(h.phase(), WorkoutPhase::RequestedResume);
        h.tick();
        assert!(h.tracker.current_state().is_waiting_for_location());
        assert_eq!(h.phase(), WorkoutPhase::AfterPauseWaiting);

        // The stale fix does not wake the workout
        h.ticks(3);
        assert_eq!(h.phase(), WorkoutPhase::AfterPauseWaiting);
        assert_eq!(h.stats.update_count(), 2);

        let fresh = h.feed.publish(GeoFix::at(52.002, 21.0));
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::Active);

        let updates = h.stats.updates.lock().unwrap();
        assert_eq!(updates.len(), 3);
        assert!(Arc::ptr_eq(&updates[2].0, &fresh));
        assert!(!Arc::ptr_eq(&updates[2].0, &seen_before_pause));
    }

    #[test]
    fn test_resume_without_fix_goes_to_initial_waiting() {
        let h = Harness::new();
        h.tracker.start().unwrap();
        h.tracker.pause_workout();
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::PausedByUser);

        h.tracker.resume_workout();
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::InitialWaiting);
    }

    #[test]
    fn test_resume_without_permission_goes_to_no_permission() {
        let h = Harness::new();
        h.active();
        h.tracker.pause_workout();
        h.tick();

        h.feed.set_permission(false);
        h.tracker.resume_workout();
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::NoPermission);
    }

    #[test]
    fn test_resume_ignored_unless_paused() {
        let h = Harness::new();
        h.tracker.resume_workout();
        assert!(h.tracker.current_state().is_none());

        h.active();
        h.tracker.resume_workout();
        assert_eq!(h.phase(), WorkoutPhase::Active);
    }

    #[test]
    fn test_long_pause_releases_location_once() {
        let h = Harness::new();
        h.active();
        h.tracker.pause_workout();
        h.tick();

        h.clock.advance_millis(58_000).unwrap();
        h.timer.fire();
        assert_eq!(h.feed.stops(), 0);

        h.clock.advance_millis(1_000).unwrap();
        h.timer.fire();
        assert_eq!(h.feed.stops(), 1);
        assert_eq!(h.phase(), WorkoutPhase::PausedByUser);

        h.ticks(30);
        assert_eq!(h.feed.stops(), 1);

        h.tracker.resume_workout();
        h.tick();
        assert_eq!(h.feed.starts(), 2);
        assert_eq!(h.phase(), WorkoutPhase::AfterPauseWaiting);
    }

    #[test]
    fn test_short_pause_keeps_location() {
        let h = Harness::new();
        h.active();
        h.tracker.pause_workout();
        h.ticks(30);
        assert_eq!(h.feed.stops(), 0);

        h.tracker.resume_workout();
        h.tick();
        // The subscription was kept, nothing to re-acquire
        assert_eq!(h.feed.starts(), 1);
    }

    #[test]
    fn test_toggle_pause_resume() {
        let h = Harness::new();
        h.tracker.toggle_pause_resume().unwrap();
        assert_eq!(h.phase(), WorkoutPhase::InitialWaiting);

        h.tracker.toggle_pause_resume().unwrap();
        assert_eq!(h.phase(), WorkoutPhase::RequestedPause);
        h.tick();

        h.tracker.toggle_pause_resume().unwrap();
        assert_eq!(h.phase(), WorkoutPhase::RequestedResume);
    }

    // ------------------------------------------------------------------------
    // Stopping
    // ------------------------------------------------------------------------

    #[test]
    fn test_stop_workout_stops_location_service() {
        let h = Harness::new();
        h.active();
        h.ticks(4);

        h.tracker.stop_workout();
        assert_eq!(h.phase(), WorkoutPhase::RequestedStop);

        h.tick();
        assert!(h.tracker.current_state().is_none());
        assert!(!h.timer.is_running());
        assert_eq!(h.feed.starts(), 1);
        assert_eq!(h.feed.stops(), 1);
        assert_eq!(h.stats.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_ignored_when_idle() {
        let h = Harness::new();
        h.tracker.stop_workout();
        assert!(h.tracker.current_state().is_none());
    }

    #[test]
    fn test_pause_ignored_while_stopping() {
        let h = Harness::new();
        h.active();
        h.tracker.stop_workout();
        h.tracker.pause_workout();
        assert_eq!(h.phase(), WorkoutPhase::RequestedStop);
    }

    #[test]
    fn test_clean_up_forwards_stop_and_is_idempotent() {
        let h = Harness::new();
        h.tracker.start().unwrap();

        h.tracker.clean_up();
        h.tracker.clean_up();

        assert_eq!(h.feed.stops(), 1);
        assert!(!h.timer.is_running());
        assert_eq!(h.stats.resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_can_start_again_after_stop() {
        let h = Harness::new();
        h.active();
        h.tracker.stop_workout();
        h.tick();
        assert!(h.tracker.current_state().is_none());

        h.tracker.start().unwrap();
        assert_eq!(h.timer.start_count(), 2);
        assert_eq!(h.feed.starts(), 2);
        // The last known fix is still there, so the next tick goes active
        h.tick();
        assert_eq!(h.phase(), WorkoutPhase::Active);
    }

    #[test]
    fn test_dropping_tracker_stops_timer_and_location() {
        let h = Harness::new();
        h.tracker.start().unwrap();
        let Harness {
            tracker,
            timer,
            feed,
            ..
        } = h;

        drop(tracker);
        assert!(!timer.is_running());
        assert_eq!(feed.stops(), 1);
        assert!(!timer.fire());
    }

    // ------------------------------------------------------------------------
    // With the real statistics engine
    // ------------------------------------------------------------------------

    #[test]
    fn test_drives_real_stats_engine() {
        let feed = FakeFeed::granted();
        let timer = Arc::new(ManualTimer::new());
        let clock = Arc::new(ManualClock::new());
        let stats = Arc::new(WorkoutStatsEngine::new());
        let tracker = WorkoutTracker::new(timer.clone(), feed.clone(), stats.clone(), clock.clone());

        tracker.start().unwrap();
        for step in 0..5 {
            feed.publish(GeoFix::new(step as f64 * 0.0001, 0.0, 0.0, step * 1000));
            clock.advance_millis(1000).unwrap();
            timer.fire();
        }
        let moving = stats.current();
        assert_eq!(moving.total_millis, 4000);
        assert!(moving.total_meters > 40.0 && moving.total_meters < 50.0);
        assert!(moving.current_average_speed_kmh > 0.0);

        tracker.pause_workout();
        clock.advance_millis(1000).unwrap();
        timer.fire();
        let paused = stats.current();
        assert_eq!(paused.current_average_speed_kmh, 0.0);
        assert_eq!(paused.total_meters, moving.total_meters);

        // A clock that did not move is logged, not fatal
        tracker.resume_workout();
        timer.fire();
        feed.publish(GeoFix::new(0.0006, 0.0, 0.0, 9000));
        timer.fire();
        timer.fire();
        assert_eq!(tracker.current_state().phase(), WorkoutPhase::Active);

        tracker.stop_workout();
        timer.fire();
        assert_eq!(stats.current(), crate::WorkoutStats::default());
    }

    #[test]
    fn test_state_json() {
        let h = Harness::new();
        assert_eq!(h.tracker.state_json(), r#""None""#);
        h.tracker.start().unwrap();
        assert_eq!(
            h.tracker.state_json(),
            r#"{"Started":{"WaitingForLocation":"InitialWaiting"}}"#
        );
    }

    #[tokio::test]
    async fn test_observers_see_transitions() {
        let h = Harness::new();
        let mut states = h.tracker.workout_state();

        h.tracker.start().unwrap();
        assert_eq!(
            states.changed().await.map(|s| s.phase()),
            Some(WorkoutPhase::InitialWaiting)
        );

        h.feed.publish(GeoFix::at(1.0, 1.0));
        h.tick();
        assert_eq!(states.current().phase(), WorkoutPhase::Active);
    }
}
