//! Workout statistics: total distance, active time, rolling average speed.
//!
//! The engine consumes `(fix, timestamp)` pairs while a workout is active.
//! Distance and duration accumulate between consecutive accepted fixes;
//! a pause breaks the chain so the time spent paused is never counted.
//!
//! ## Rolling average speed
//!
//! Every accepted fix appends a `(cumulative distance, timestamp)` sample to
//! a FIFO window. Before appending, samples older than
//! `timestamp - speed_window_ms` are evicted; the average speed is the
//! distance covered since the oldest surviving sample divided by the time
//! since it. An empty window (first fix, or a gap longer than the window)
//! yields 0 km/h until fresh samples refill it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Result, TrackerError};
use crate::geo_fix::GeoFix;
use crate::observable::Observable;

/// Immutable statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct WorkoutStats {
    /// Distance covered while active, in meters
    pub total_meters: f64,
    /// Time spent active, in milliseconds
    pub total_millis: i64,
    /// Average speed over the trailing window, in km/h
    pub current_average_speed_kmh: f64,
}

impl WorkoutStats {
    /// Distance rendered as meters with two decimals, e.g. `"1234.57m"`.
    pub fn formatted_distance(&self) -> String {
        format!("{:.2}m", self.total_meters)
    }

    /// Active time rendered as whole seconds, e.g. `"75s"`.
    pub fn formatted_duration(&self) -> String {
        format!("{}s", self.total_millis / 1000)
    }
}

/// How the engine treats fixes whose timestamp does not advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum TimestampPolicy {
    /// Reject with [`TrackerError::NonMonotonicTimestamp`] and leave state untouched
    #[default]
    Strict,
    /// Accept anything; a non-advancing pair contributes no speed sample
    Lenient,
}

/// Configuration for the statistics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct StatsConfig {
    /// Length of the rolling average speed window.
    /// Default: 15000 ms
    pub speed_window_ms: i64,

    /// Timestamp ordering policy for `update`.
    /// Default: Strict
    pub timestamp_policy: TimestampPolicy,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            speed_window_ms: 15_000,
            timestamp_policy: TimestampPolicy::Strict,
        }
    }
}

/// Outcome of offering a fix to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResult {
    Accepted,
}

/// The statistics operations the tracker drives.
pub trait WorkoutStatistics: Send + Sync {
    /// Account for a fix observed at `timestamp_millis`.
    fn update(&self, fix: &Arc<GeoFix>, timestamp_millis: i64) -> Result<OfferResult>;

    /// The workout was paused: zero the average speed and forget the reference fix.
    fn on_paused(&self);

    /// Back to the just-constructed state.
    fn reset_stats(&self);
}

/// Window sample: cumulative distance at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DistanceTimestamp {
    total_distance: f64,
    timestamp: i64,
}

#[derive(Debug, Default)]
struct Accumulator {
    last_fix: Option<Arc<GeoFix>>,
    last_timestamp: i64,
    window: VecDeque<DistanceTimestamp>,
}

/// Default [`WorkoutStatistics`] implementation, publishing [`WorkoutStats`].
pub struct WorkoutStatsEngine {
    config: StatsConfig,
    state: Mutex<Accumulator>,
    stats: watch::Sender<WorkoutStats>,
}

impl Default for WorkoutStatsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkoutStatsEngine {
    pub fn new() -> Self {
        Self::with_config(StatsConfig::default())
    }

    pub fn with_config(config: StatsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(Accumulator::default()),
            stats: watch::Sender::new(WorkoutStats::default()),
        }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Latest statistics snapshot.
    pub fn current(&self) -> WorkoutStats {
        *self.stats.borrow()
    }

    /// Stream of statistics snapshots.
    pub fn stats(&self) -> Observable<WorkoutStats> {
        Observable::new(self.stats.subscribe())
    }

    /// Latest snapshot as JSON (for efficient FFI).
    pub fn stats_json(&self) -> String {
        serde_json::to_string(&self.current()).unwrap_or_else(|_| "{}".to_string())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Accumulator> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evict stale samples, append the new one, return the average speed in km/h.
    fn advance_window(
        &self,
        window: &mut VecDeque<DistanceTimestamp>,
        latest: DistanceTimestamp,
    ) -> f64 {
        let cutoff = latest.timestamp - self.config.speed_window_ms;
        while window.front().is_some_and(|s| s.timestamp < cutoff) {
            window.pop_front();
        }

        let first = window.front().copied();
        window.push_back(latest);

        match first {
            Some(first) if latest.timestamp > first.timestamp => {
                let km = (latest.total_distance - first.total_distance) / 1000.0;
                let hours = (latest.timestamp - first.timestamp) as f64 / 1000.0 / 3600.0;
                km / hours
            }
            _ => 0.0,
        }
    }
}

impl WorkoutStatistics for WorkoutStatsEngine {
    fn update(&self, fix: &Arc<GeoFix>, timestamp_millis: i64) -> Result<OfferResult> {
        let mut state = self.lock_state();

        let Some(last) = state.last_fix.clone() else {
            // First fix after construction, reset or pause: only a reference point
            let total = self.current().total_meters;
            state.window.push_back(DistanceTimestamp {
                total_distance: total,
                timestamp: timestamp_millis,
            });
            state.last_fix = Some(Arc::clone(fix));
            state.last_timestamp = timestamp_millis;
            return Ok(OfferResult::Accepted);
        };

        if self.config.timestamp_policy == TimestampPolicy::Strict
            && timestamp_millis <= state.last_timestamp
        {
            return Err(TrackerError::NonMonotonicTimestamp {
                previous: state.last_timestamp,
                current: timestamp_millis,
            });
        }

        let distance = if Arc::ptr_eq(&last, fix) {
            0.0
        } else {
            last.distance_to(fix)
        };
        let duration = timestamp_millis - state.last_timestamp;

        let current = self.current();
        let total_meters = current.total_meters + distance;
        let speed = self.advance_window(
            &mut state.window,
            DistanceTimestamp {
                total_distance: total_meters,
                timestamp: timestamp_millis,
            },
        );

        self.stats.send_replace(WorkoutStats {
            total_meters,
            total_millis: current.total_millis + duration,
            current_average_speed_kmh: speed,
        });

        state.last_fix = Some(Arc::clone(fix));
        state.last_timestamp = timestamp_millis;
        Ok(OfferResult::Accepted)
    }

    fn on_paused(&self) {
        let mut state = self.lock_state();
        state.last_fix = None;
        state.last_timestamp = 0;
        self.stats.send_modify(|stats| stats.current_average_speed_kmh = 0.0);
        debug!("[WorkoutStats] Paused at {}", self.current().formatted_distance());
    }

    fn reset_stats(&self) {
        let mut state = self.lock_state();
        *state = Accumulator::default();
        self.stats.send_replace(WorkoutStats::default());
    }
}
