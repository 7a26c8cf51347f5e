//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host keeps a single workout session alive for the lifetime of the
//! recording screen. It supplies location through the [`LocationPlatform`]
//! callback interface and pushes fixes back with [`session_push_fix`]; the
//! timer runs on a runtime owned by the session.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Runtime};

use crate::{
    init_logging, GeoFix, LocationSource, Result, SharedLocationFeed, SystemClock, TokioTimer,
    TrackerConfig, TrackerError, WorkoutPhase, WorkoutStats, WorkoutStatsEngine, WorkoutTracker,
};

// ============================================================================
// Location Callback Interface
// ============================================================================

/// Platform location service, implemented in Kotlin/Swift.
#[uniffi::export(callback_interface)]
pub trait LocationPlatform: Send + Sync {
    /// Whether the app currently holds location permission.
    fn has_permission(&self) -> bool;
    /// Begin delivering fixes via `session_push_fix`.
    fn activate(&self);
    /// Stop delivering fixes.
    fn deactivate(&self);
}

struct PlatformSource(Box<dyn LocationPlatform>);

impl LocationSource for PlatformSource {
    fn has_permission(&self) -> bool {
        self.0.has_permission()
    }

    fn activate(&self) {
        self.0.activate();
    }

    fn deactivate(&self) {
        self.0.deactivate();
    }
}

// ============================================================================
// Session
// ============================================================================

/// Everything one recording screen needs. Fields drop in order, so the
/// runtime outlives the timer task it hosts.
struct WorkoutSession {
    handles: SessionHandles,
    _runtime: Runtime,
}

/// Cheap clones of the session's components, used outside the session lock.
#[derive(Clone)]
struct SessionHandles {
    tracker: WorkoutTracker,
    feed: Arc<SharedLocationFeed>,
    stats: Arc<WorkoutStatsEngine>,
}

impl WorkoutSession {
    fn new(platform: Box<dyn LocationPlatform>, config: TrackerConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("jetrun-tick")
            .enable_time()
            .build()
            .map_err(|e| TrackerError::Runtime {
                message: e.to_string(),
            })?;

        let feed = Arc::new(SharedLocationFeed::new(Arc::new(PlatformSource(platform))));
        let stats = Arc::new(WorkoutStatsEngine::new());
        let tracker = WorkoutTracker::with_config(
            Arc::new(TokioTimer::new(runtime.handle().clone())),
            feed.clone(),
            stats.clone(),
            Arc::new(SystemClock::new()),
            config,
        );

        Ok(Self {
            handles: SessionHandles {
                tracker,
                feed,
                stats,
            },
            _runtime: runtime,
        })
    }
}

static SESSION: Lazy<Mutex<Option<WorkoutSession>>> = Lazy::new(|| Mutex::new(None));

/// Run `f` against the current session without holding the session lock,
/// so platform callbacks may re-enter `session_*` functions.
fn with_session<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&SessionHandles) -> R,
{
    let handles = SESSION
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|session| session.handles.clone())
        .ok_or(TrackerError::SessionNotInitialized)?;
    Ok(f(&handles))
}

// ============================================================================
// FFI Exports
// ============================================================================

/// Create the session (call when the recording screen opens).
///
/// Replaces any previous session, stopping its workout.
#[uniffi::export]
pub fn session_init(platform: Box<dyn LocationPlatform>, config: TrackerConfig) -> Result<()> {
    init_logging();
    let session = WorkoutSession::new(platform, config)?;
    let previous = SESSION
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(session);
    if let Some(previous) = previous {
        previous.handles.tracker.clean_up();
    }
    info!("[WorkoutSession] Initialized");
    Ok(())
}

/// Tear the session down, releasing GPS and the tick thread.
#[uniffi::export]
pub fn session_clear() {
    let previous = SESSION
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(previous) = previous {
        previous.handles.tracker.clean_up();
        info!("[WorkoutSession] Cleared");
    }
}

#[uniffi::export]
pub fn session_start() -> Result<()> {
    with_session(|s| s.tracker.start())?
}

#[uniffi::export]
pub fn session_pause() -> Result<()> {
    with_session(|s| s.tracker.pause_workout())
}

#[uniffi::export]
pub fn session_resume() -> Result<()> {
    with_session(|s| s.tracker.resume_workout())
}

#[uniffi::export]
pub fn session_stop() -> Result<()> {
    with_session(|s| s.tracker.stop_workout())
}

/// Start, pause or resume depending on the current phase.
#[uniffi::export]
pub fn session_toggle() -> Result<()> {
    with_session(|s| s.tracker.toggle_pause_resume())?
}

/// Deliver a fix from the platform location service.
#[uniffi::export]
pub fn session_push_fix(fix: GeoFix) -> Result<()> {
    debug!(
        "[WorkoutSession] Fix {:.6},{:.6} at {}",
        fix.latitude, fix.longitude, fix.timestamp_millis
    );
    with_session(|s| {
        s.feed.publish(fix);
    })
}

/// Tell the session the permission may have changed.
///
/// Returns the number of deferred subscriptions that became active.
#[uniffi::export]
pub fn session_permission_changed() -> Result<u32> {
    with_session(|s| s.feed.refresh_permission() as u32)
}

#[uniffi::export]
pub fn session_current_phase() -> Result<WorkoutPhase> {
    with_session(|s| s.tracker.current_state().phase())
}

#[uniffi::export]
pub fn session_current_stats() -> Result<WorkoutStats> {
    with_session(|s| s.stats.current())
}

/// Current state as JSON.
#[uniffi::export]
pub fn session_state_json() -> Result<String> {
    with_session(|s| s.tracker.state_json())
}

/// Current statistics as JSON.
#[uniffi::export]
pub fn session_stats_json() -> Result<String> {
    with_session(|s| s.stats.stats_json())
}
