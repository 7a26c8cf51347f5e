//! Location feed with reference-counted platform subscriptions.
//!
//! The platform (Android `LocationManager`, CoreLocation, a simulator) sits
//! behind [`LocationSource`]. [`SharedLocationFeed`] turns it into a
//! [`LocationFeed`]:
//!
//! - every interested party gets its own [`SubscriptionHandle`]
//! - the platform listener is activated for the first handle and
//!   deactivated when the last one is released
//! - fixes delivered by the platform callback land in a last-write-wins slot
//!   that observers read without blocking
//!
//! Handle bookkeeping happens under one mutex so concurrent start/stop calls
//! cannot double-activate or prematurely deactivate the listener.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::error::{Result, TrackerError};
use crate::geo_fix::GeoFix;
use crate::observable::Observable;

/// Opaque token representing one caller's interest in location updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Mint a handle. [`LocationFeed`] implementations choose the ids.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Location updates as consumed by the tracker.
pub trait LocationFeed: Send + Sync {
    /// Whether the app currently holds location permission.
    fn has_permission(&self) -> bool;

    /// Register interest in updates.
    ///
    /// With `require_start` set, fails with [`TrackerError::PermissionDenied`]
    /// when permission is missing. Without it, the handle is issued anyway and
    /// activates once permission shows up on a later call.
    fn start(&self, require_start: bool) -> Result<SubscriptionHandle>;

    /// Release a handle. Releasing an unknown or already released handle is a no-op.
    fn stop(&self, handle: SubscriptionHandle);

    /// The most recent fix, if any arrived yet.
    fn latest_fix(&self) -> Option<Arc<GeoFix>>;

    /// Stream of the most recent fix.
    fn fixes(&self) -> Observable<Option<Arc<GeoFix>>>;
}

/// The platform side of a location feed.
///
/// `activate` must start delivering fixes to [`SharedLocationFeed::publish`];
/// `deactivate` must stop them. Both should return quickly.
pub trait LocationSource: Send + Sync {
    fn has_permission(&self) -> bool;
    fn activate(&self);
    fn deactivate(&self);
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    active: HashSet<SubscriptionHandle>,
    /// Issued without permission, waiting to become active
    pending: HashSet<SubscriptionHandle>,
    activated: bool,
}

impl Registry {
    fn issue(&mut self) -> SubscriptionHandle {
        self.next_id += 1;
        SubscriptionHandle(self.next_id)
    }
}

/// [`LocationFeed`] that shares one platform subscription between all handles.
pub struct SharedLocationFeed {
    source: Arc<dyn LocationSource>,
    registry: Mutex<Registry>,
    latest: watch::Sender<Option<Arc<GeoFix>>>,
}

impl SharedLocationFeed {
    pub fn new(source: Arc<dyn LocationSource>) -> Self {
        Self {
            source,
            registry: Mutex::new(Registry::default()),
            latest: watch::Sender::new(None),
        }
    }

    /// Platform callback entry: replace the latest fix.
    ///
    /// Fixes with non-finite or out-of-range coordinates are dropped and
    /// `false` is returned. Safe to call from any thread.
    pub fn publish(&self, fix: GeoFix) -> bool {
        if !fix.is_valid() {
            warn!(
                "[LocationFeed] Dropping fix with invalid coordinates {},{}",
                fix.latitude, fix.longitude
            );
            return false;
        }
        self.latest.send_replace(Some(Arc::new(fix)));
        true
    }

    /// Promote handles issued without permission if permission is now granted.
    ///
    /// Returns the number of handles that became active.
    pub fn refresh_permission(&self) -> usize {
        if !self.source.has_permission() {
            return 0;
        }
        let mut registry = self.lock_registry();
        let promoted = self.promote_pending(&mut registry);
        if !registry.active.is_empty() {
            self.ensure_activated(&mut registry);
        }
        promoted
    }

    /// Number of handles currently keeping the platform listener alive.
    pub fn active_handles(&self) -> usize {
        self.lock_registry().active.len()
    }

    /// Whether the platform listener is running.
    pub fn is_activated(&self) -> bool {
        self.lock_registry().activated
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn promote_pending(&self, registry: &mut Registry) -> usize {
        let pending: Vec<SubscriptionHandle> = registry.pending.drain().collect();
        let promoted = pending.len();
        registry.active.extend(pending);
        if promoted > 0 {
            debug!("[LocationFeed] Promoted {} deferred handles", promoted);
        }
        promoted
    }

    fn ensure_activated(&self, registry: &mut Registry) {
        if !registry.activated {
            info!("[LocationFeed] Activating platform location updates");
            self.source.activate();
            registry.activated = true;
        }
    }
}

impl LocationFeed for SharedLocationFeed {
    fn has_permission(&self) -> bool {
        self.source.has_permission()
    }

    fn start(&self, require_start: bool) -> Result<SubscriptionHandle> {
        let permitted = self.source.has_permission();
        if require_start && !permitted {
            return Err(TrackerError::PermissionDenied);
        }

        let mut registry = self.lock_registry();
        let handle = registry.issue();
        if permitted {
            self.promote_pending(&mut registry);
            registry.active.insert(handle);
            self.ensure_activated(&mut registry);
        } else {
            debug!(
                "[LocationFeed] Deferring handle {} until permission is granted",
                handle.id()
            );
            registry.pending.insert(handle);
        }
        Ok(handle)
    }

    fn stop(&self, handle: SubscriptionHandle) {
        let mut registry = self.lock_registry();
        registry.pending.remove(&handle);
        if !registry.active.remove(&handle) {
            return;
        }
        if registry.active.is_empty() && registry.activated {
            info!("[LocationFeed] Last handle released, deactivating platform updates");
            self.source.deactivate();
            registry.activated = false;
        }
    }

    fn latest_fix(&self) -> Option<Arc<GeoFix>> {
        self.latest.borrow().clone()
    }

    fn fixes(&self) -> Observable<Option<Arc<GeoFix>>> {
        Observable::new(self.latest.subscribe())
    }
}
