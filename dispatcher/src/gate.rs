//! Admission gate: a resizable counting limit on concurrently running jobs.
//!
//! # Generations
//!
//! Every resize installs a new immutable [`GateGeneration`]. A permit keeps a
//! reference to the generation it was admitted under, so releasing it never
//! touches a gate that was swapped out underneath it.
//!
//! Occupancy is counted once, across generations. Shrinking the cap therefore
//! never aborts running jobs; it only holds back new admissions until enough of
//! them finish:
//!
//! ```text
//! cap 4, running 3 ──resize(1)──► cap 1, running 3   (admission refused)
//!                                  cap 1, running 0   (admission allowed)
//! ```
//!
//! | Operation | Cost |
//! |-----------|------|
//! | try_acquire | shared lock + CAS loop |
//! | release (Drop) | two atomic decrements/increments |
//! | resize | exclusive lock |

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{DispatchError, Result};

/// One immutable configuration of the gate.
#[derive(Debug)]
pub struct GateGeneration {
    /// Sequence number, starting at 0.
    number: u64,

    /// Maximum concurrently admitted jobs while this generation is current.
    capacity: usize,

    /// Permits issued under this generation.
    admitted: AtomicU64,

    /// Permits from this generation that have been released.
    released: AtomicU64,
}

impl GateGeneration {
    fn new(number: u64, capacity: usize) -> Self {
        Self {
            number,
            capacity,
            admitted: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Sequence number of this generation.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Capacity of this generation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits from this generation still held by jobs.
    pub fn outstanding(&self) -> u64 {
        let admitted = self.admitted.load(Ordering::Acquire);
        admitted.saturating_sub(self.released.load(Ordering::Acquire))
    }
}

/// Counting gate that admits at most `capacity` jobs at once.
#[derive(Debug)]
pub struct AdmissionGate {
    current: RwLock<Arc<GateGeneration>>,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` units. Zero falls back to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(GateGeneration::new(0, capacity.max(1)))),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take one unit without waiting. Returns `None` when the gate is saturated.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        // Held across the CAS so a concurrent resize cannot slip between the
        // capacity check and the increment.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        let capacity = guard.capacity;

        let mut observed = self.in_flight.load(Ordering::Acquire);
        loop {
            if observed >= capacity {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                observed,
                observed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => observed = actual,
            }
        }

        guard.admitted.fetch_add(1, Ordering::AcqRel);
        Some(AdmissionPermit {
            generation: Arc::clone(&guard),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Install a new generation with `capacity` units and retire the current one.
    ///
    /// Returns the new generation number. Permits issued earlier stay valid and
    /// keep counting against occupancy until released.
    pub fn resize(&self, capacity: usize) -> Result<u64> {
        if capacity == 0 {
            return Err(DispatchError::InvalidCapacity(capacity));
        }

        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if guard.capacity == capacity {
            debug!("Gate capacity unchanged at {capacity}");
            return Ok(guard.number);
        }

        let next = Arc::new(GateGeneration::new(guard.number + 1, capacity));
        let retired = std::mem::replace(&mut *guard, next);

        info!(
            "Admission gate resized: {} -> {} (generation {}, {} running, {} from retired generation)",
            retired.capacity,
            capacity,
            guard.number,
            self.in_flight.load(Ordering::Acquire),
            retired.outstanding()
        );
        Ok(guard.number)
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.current().capacity
    }

    /// Number of permits currently held, across all generations.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Units that could be acquired right now.
    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_flight())
    }

    /// Current generation number.
    pub fn generation(&self) -> u64 {
        self.current().number
    }

    fn current(&self) -> Arc<GateGeneration> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

/// One unit of gate capacity held by a job.
///
/// The unit is returned exactly once: by [`AdmissionPermit::release`] or on drop.
#[derive(Debug)]
#[must_use = "AdmissionPermit releases its unit on drop; not holding it defeats the gate"]
pub struct AdmissionPermit {
    generation: Arc<GateGeneration>,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionPermit {
    /// Generation this permit was admitted under.
    pub fn generation(&self) -> u64 {
        self.generation.number
    }

    /// Return the unit to the gate.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "AdmissionPermit released into an empty gate");
        self.generation.released.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_never_exceeds_capacity() {
        let gate = AdmissionGate::new(2);

        let a = gate.try_acquire();
        let b = gate.try_acquire();
        let c = gate.try_acquire();

        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn test_release_frees_unit() {
        let gate = AdmissionGate::new(1);

        let permit = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());

        permit.release();
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let gate = AdmissionGate::new(3);

        assert!(matches!(
            gate.resize(0),
            Err(DispatchError::InvalidCapacity(0))
        ));
        assert_eq!(gate.capacity(), 3);
        assert_eq!(AdmissionGate::new(0).capacity(), 1);
    }

    #[test]
    fn test_shrink_waits_for_running_jobs() {
        let gate = AdmissionGate::new(4);
        let mut running: Vec<_> = (0..3).map(|_| gate.try_acquire().unwrap()).collect();

        assert_eq!(gate.resize(1).unwrap(), 1);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.in_flight(), 3);
        assert!(gate.try_acquire().is_none());

        running.pop();
        running.pop();
        assert!(gate.try_acquire().is_none());

        running.pop();
        let permit = gate.try_acquire().unwrap();
        assert_eq!(permit.generation(), 1);
        assert!(gate.try_acquire().is_none());
    }

    #[test]
    fn test_grow_admits_immediately() {
        let gate = AdmissionGate::new(1);
        let _held = gate.try_acquire().unwrap();

        gate.resize(3).unwrap();
        assert!(gate.try_acquire().is_some());
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_retired_permits_release_cleanly() {
        let gate = AdmissionGate::new(2);
        let old = gate.try_acquire().unwrap();
        assert_eq!(old.generation(), 0);

        gate.resize(5).unwrap();
        gate.resize(2).unwrap();
        assert_eq!(gate.generation(), 2);

        old.release();
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn test_same_capacity_keeps_generation() {
        let gate = AdmissionGate::new(2);
        assert_eq!(gate.resize(2).unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_respects_cap() {
        let gate = Arc::new(AdmissionGate::new(3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let gate = Arc::clone(&gate);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    if let Some(permit) = gate.try_acquire() {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_micros(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        permit.release();
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_flight(), 0);
    }
}
