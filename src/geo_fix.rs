//! GPS fixes and great-circle distance.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the distance formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_366_000.0;

/// A single GPS position sample.
///
/// # Example
/// ```
/// use jetrun_tracker::GeoFix;
/// let fix = GeoFix::new(52.2297, 21.0122, 110.0, 1_000); // Warsaw
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Time the platform produced the fix, in milliseconds
    pub timestamp_millis: i64,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            timestamp_millis,
        }
    }

    /// A fix with only a position (altitude and timestamp zero).
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, 0.0, 0)
    }

    /// Check if the fix has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Great-circle distance to `other` in meters (spherical law of cosines).
    ///
    /// For nearly identical points rounding can push the `acos` argument
    /// slightly above 1.0; the distance is then 0.0, never NaN.
    pub fn distance_to(&self, other: &GeoFix) -> f64 {
        let a1 = self.latitude.to_radians();
        let a2 = self.longitude.to_radians();
        let b1 = other.latitude.to_radians();
        let b2 = other.longitude.to_radians();

        let t1 = a1.cos() * a2.cos() * b1.cos() * b2.cos();
        let t2 = a1.cos() * a2.sin() * b1.cos() * b2.sin();
        let t3 = a1.sin() * b1.sin();
        let angle = (t1 + t2 + t3).acos();

        if angle.is_nan() {
            0.0
        } else {
            EARTH_RADIUS_METERS * angle
        }
    }
}
