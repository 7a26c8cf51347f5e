//! Latest-value streams.
//!
//! [`Observable`] is the read-only side of a `tokio::sync::watch` channel:
//! observers can read the current value synchronously at any time, or await
//! the next replacement. Only the owning component holds the sender.

use tokio::sync::watch;

/// Read-only handle to a continuously updated value.
///
/// Cloning is cheap; every clone tracks "seen" versions independently.
#[derive(Debug, Clone)]
pub struct Observable<T> {
    receiver: watch::Receiver<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(receiver: watch::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// The latest value.
    pub fn current(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Whether a value was published since this handle last looked.
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the next published value and return it.
    ///
    /// Returns `None` once the owning component is dropped.
    pub async fn changed(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}
