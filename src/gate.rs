//! Request gate: admission control, single-flight serialization, and
//! field validation that every LVM-touching RPC passes through before
//! reaching the volume controller, node publisher, or VG manager.
//!
//! The single-flight lock is a `tokio::sync::Mutex` held across the
//! async handler body rather than wired through a tower layer, since
//! the handler needs to hold it across `.await` points spanning
//! child-process waits — an interceptor only sees the request before
//! the handler runs.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::csi::v1::Version;
use crate::error::PluginError;

/// The only API version this plugin answers GetSupportedVersions with.
pub const CURRENT_VERSION: Version = Version {
    major: 1,
    minor: 0,
    patch: 0,
};

pub struct RequestGate {
    admission: Arc<Semaphore>,
    serialize: Mutex<()>,
}

/// Held for the lifetime of one admitted RPC; dropping it returns the slot.
pub struct AdmissionPermit(#[allow(dead_code)] OwnedSemaphorePermit);

impl RequestGate {
    pub fn new(limit: usize) -> Self {
        Self {
            admission: Arc::new(Semaphore::new(limit.max(1))),
            serialize: Mutex::new(()),
        }
    }

    /// Non-blocking admission check. Arrivals over the limit are rejected
    /// immediately; they never queue.
    pub fn admit(&self) -> Result<AdmissionPermit, PluginError> {
        Arc::clone(&self.admission)
            .try_acquire_owned()
            .map(AdmissionPermit)
            .map_err(|_| PluginError::BacklogExceeded)
    }

    /// Serialize every RPC that can touch LVM state. Held across the
    /// entire handler body by the caller.
    pub async fn serialize(&self) -> MutexGuard<'_, ()> {
        self.serialize.lock().await
    }
}

/// Reject a request with an empty required field, before the
/// serialization mutex is ever taken.
pub fn require_field(value: &str, field: &str) -> Result<(), PluginError> {
    if value.is_empty() {
        Err(PluginError::MissingRequiredField(field.to_string()))
    } else {
        Ok(())
    }
}

pub fn require_non_empty<T>(items: &[T], field: &str) -> Result<(), PluginError> {
    if items.is_empty() {
        Err(PluginError::MissingRequiredField(field.to_string()))
    } else {
        Ok(())
    }
}

/// Reject a request carrying a major version this plugin doesn't speak.
/// A request that omits the field entirely is let through: only callers
/// old enough to have negotiated via `GetSupportedVersions` stamp it.
pub fn require_supported_version(version: &Option<Version>) -> Result<(), PluginError> {
    match version {
        None => Ok(()),
        Some(v) if v.major == CURRENT_VERSION.major => Ok(()),
        Some(_) => Err(PluginError::UnsupportedVersion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_field_rejects_empty() {
        assert!(require_field("", "volume_id").is_err());
        assert!(require_field("testvg_v1", "volume_id").is_ok());
    }

    #[test]
    fn version_check_allows_absent_and_matching_major() {
        assert!(require_supported_version(&None).is_ok());
        assert!(require_supported_version(&Some(Version { major: 1, minor: 9, patch: 9 })).is_ok());
    }

    #[test]
    fn version_check_rejects_mismatched_major() {
        assert!(require_supported_version(&Some(Version { major: 2, minor: 0, patch: 0 })).is_err());
    }

    #[tokio::test]
    async fn admission_bound_is_enforced() {
        let gate = RequestGate::new(1);
        let first = gate.admit().expect("first admission should succeed");
        assert!(gate.admit().is_err(), "second concurrent admission should be refused");
        drop(first);
        assert!(gate.admit().is_ok(), "slot should be free again after drop");
    }

    #[tokio::test]
    async fn serialize_lock_is_exclusive() {
        let gate = RequestGate::new(10);
        let guard = gate.serialize().await;
        drop(guard);

        // A second acquisition after the first is dropped must not block.
        let _guard = gate.serialize().await;
    }
}
