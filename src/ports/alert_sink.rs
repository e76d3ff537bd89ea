//! Alert sink port

use crate::domain::AlertPayload;

/// Notification delivery
///
/// `publish` must not block: implementations queue or log the alert and
/// deal with delivery failures themselves. Callers never learn whether an
/// alert was delivered.
pub trait AlertSink: Send + Sync {
    fn publish(&self, alert: AlertPayload);
}
