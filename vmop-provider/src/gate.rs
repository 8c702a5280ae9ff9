//! Bounded gate on concurrent VM creates.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits how many backend create calls are in flight at once.
///
/// Cloning a gate shares its permits.
#[derive(Debug, Clone)]
pub struct CreateGate {
    permits: Arc<Semaphore>,
    max: usize,
}

/// Held for the duration of one create. Dropping it releases the slot.
#[derive(Debug)]
pub struct CreatePermit {
    _permit: OwnedSemaphorePermit,
}

impl CreateGate {
    /// Capacity above the semaphore's limit is clamped to it.
    pub fn new(max: usize) -> Self {
        let max = max.min(Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Take a slot without waiting. `None` when the gate is at capacity.
    pub fn try_enter(&self) -> Option<CreatePermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| CreatePermit { _permit: permit })
    }

    pub fn in_flight(&self) -> usize {
        self.max - self.permits.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_limits_and_releases() {
        let gate = CreateGate::new(1);
        let first = gate.try_enter();
        assert!(first.is_some());
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.try_enter().is_none());

        drop(first);
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn test_clones_share_permits() {
        let gate = CreateGate::new(2);
        let other = gate.clone();
        let _a = gate.try_enter().unwrap();
        let _b = other.try_enter().unwrap();
        assert!(gate.try_enter().is_none());
        assert_eq!(other.in_flight(), 2);
    }

    #[test]
    fn test_zero_capacity_always_defers() {
        let gate = CreateGate::new(0);
        assert!(gate.try_enter().is_none());
        assert_eq!(gate.max(), 0);
    }

    #[test]
    fn test_oversized_capacity_is_clamped() {
        let gate = CreateGate::new(usize::MAX);
        assert_eq!(gate.max(), Semaphore::MAX_PERMITS);
        assert!(gate.try_enter().is_some());
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_permit_released_across_tasks() {
        let gate = CreateGate::new(1);
        let permit = gate.try_enter().unwrap();
        let handle = tokio::spawn(async move {
            drop(permit);
        });
        handle.await.unwrap();
        assert!(gate.try_enter().is_some());
    }
}
