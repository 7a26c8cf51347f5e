//! Workout lifecycle states.
//!
//! ```text
//! None ──start──> WaitingForLocation(NoPermission | InitialWaiting)
//!                   │ fix arrives
//!                   v
//!                 Active ──pause──> RequestedPause ──tick──> Paused(ByUser)
//!                   ^                                          │ resume
//!                   │ new fix                                  v
//!   WaitingForLocation(AfterPauseWaiting) <──tick── RequestedResume
//!
//! any Started ──stop──> RequestedStop ──tick──> None
//! ```
//!
//! The `Requested*` states are written by user commands and resolved by the
//! next tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geo_fix::GeoFix;

/// What the current workout is doing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum WorkoutState {
    /// No workout in progress
    #[default]
    None,
    Started(Started),
}

/// States of a workout in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Started {
    WaitingForLocation(WaitingForLocation),
    Paused(Paused),
    /// Fixes are applied to the statistics
    Active,
    RequestedStop,
    RequestedPause,
    RequestedResume,
}

/// Why the tracker is not applying fixes yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WaitingForLocation {
    /// Location permission is missing
    NoPermission,
    /// Permission present, no fix yet
    InitialWaiting,
    /// Resumed; waiting for a fix other than the one seen when pausing
    AfterPauseWaiting(Arc<GeoFix>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Paused {
    ByUser,
}

/// Flat view of [`WorkoutState`] for hosts that cannot match nested enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum WorkoutPhase {
    None,
    NoPermission,
    InitialWaiting,
    AfterPauseWaiting,
    Active,
    PausedByUser,
    RequestedStop,
    RequestedPause,
    RequestedResume,
}

impl WorkoutState {
    pub const NO_PERMISSION: Self =
        Self::Started(Started::WaitingForLocation(WaitingForLocation::NoPermission));
    pub const INITIAL_WAITING: Self =
        Self::Started(Started::WaitingForLocation(WaitingForLocation::InitialWaiting));
    pub const ACTIVE: Self = Self::Started(Started::Active);
    pub const PAUSED_BY_USER: Self = Self::Started(Started::Paused(Paused::ByUser));
    pub const REQUESTED_STOP: Self = Self::Started(Started::RequestedStop);
    pub const REQUESTED_PAUSE: Self = Self::Started(Started::RequestedPause);
    pub const REQUESTED_RESUME: Self = Self::Started(Started::RequestedResume);

    pub fn after_pause_waiting(fix_at_pause: Arc<GeoFix>) -> Self {
        Self::Started(Started::WaitingForLocation(
            WaitingForLocation::AfterPauseWaiting(fix_at_pause),
        ))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Started(Started::Paused(_)))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started(Started::Active))
    }

    pub fn is_waiting_for_location(&self) -> bool {
        matches!(self, Self::Started(Started::WaitingForLocation(_)))
    }

    pub fn phase(&self) -> WorkoutPhase {
        match self {
            Self::None => WorkoutPhase::None,
            Self::Started(started) => match started {
                Started::WaitingForLocation(WaitingForLocation::NoPermission) => {
                    WorkoutPhase::NoPermission
                }
                Started::WaitingForLocation(WaitingForLocation::InitialWaiting) => {
                    WorkoutPhase::InitialWaiting
                }
                Started::WaitingForLocation(WaitingForLocation::AfterPauseWaiting(_)) => {
                    WorkoutPhase::AfterPauseWaiting
                }
                Started::Paused(Paused::ByUser) => WorkoutPhase::PausedByUser,
                Started::Active => WorkoutPhase::Active,
                Started::RequestedStop => WorkoutPhase::RequestedStop,
                Started::RequestedPause => WorkoutPhase::RequestedPause,
                Started::RequestedResume => WorkoutPhase::RequestedResume,
            },
        }
    }
}
