//! # JetRun Tracker
//!
//! Workout tracking core for the JetRun running app.
//!
//! This library provides:
//! - A tick-driven workout state machine (start, pause, resume, stop)
//! - A shared GPS location feed with permission handling
//! - Live statistics: distance, active time and a trailing-window average speed
//!
//! ## Features
//!
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use jetrun_tracker::{GeoFix, WorkoutStatistics, WorkoutStatsEngine};
//!
//! let stats = WorkoutStatsEngine::new();
//! stats.update(&Arc::new(GeoFix::new(51.5074, -0.1278, 0.0, 0)), 0).unwrap();
//! stats.update(&Arc::new(GeoFix::new(51.5084, -0.1278, 0.0, 0)), 60_000).unwrap();
//!
//! let current = stats.current();
//! println!("{} in {}", current.formatted_distance(), current.formatted_duration());
//! ```

// Unified error handling
pub mod error;
pub use error::{Result, TrackerError};

// Millisecond time sources
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// GPS fixes and great-circle distance
pub mod geo_fix;
pub use geo_fix::{GeoFix, EARTH_RADIUS_METERS};

// Read-only latest-value streams
pub mod observable;
pub use observable::Observable;

// Shared location subscription
pub mod location;
pub use location::{LocationFeed, LocationSource, SharedLocationFeed, SubscriptionHandle};

// Repeating tick timers
pub mod timer;
pub use timer::{ManualTimer, RepeatingTimer, TickCallback, TokioTimer};

// Distance, time and speed accumulation
pub mod stats;
pub use stats::{
    OfferResult, StatsConfig, TimestampPolicy, WorkoutStatistics, WorkoutStats,
    WorkoutStatsEngine,
};

// Workout lifecycle states
pub mod state;
pub use state::{Paused, Started, WaitingForLocation, WorkoutPhase, WorkoutState};

// The tick-driven state machine
pub mod tracker;
pub use tracker::{TrackerConfig, WorkoutTracker};

// FFI bindings for mobile platforms
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("JetRunTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}
