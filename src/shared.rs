//! Hand-off of breakdown vectors from the sampler thread to the renderer.
//!
//! A single slot holding the newest whole `R`-wide vector: the renderer
//! never sees a half-written one, and a renderer stuck on a stalled panel
//! costs at most one pending vector.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Slot = Mutex<Option<Vec<f32>>>;

pub fn breakdown_channel() -> (BreakdownPublisher, BreakdownReceiver) {
    let slot = Arc::new(Mutex::new(None));
    (
        BreakdownPublisher { slot: Arc::downgrade(&slot) },
        BreakdownReceiver { slot },
    )
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Vec<f32>>> {
    // The slot holds a whole Vec even after a peer panicked
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sampler end
#[derive(Debug)]
pub struct BreakdownPublisher {
    slot: Weak<Slot>,
}

impl BreakdownPublisher {
    /// Replace whatever is pending. Returns false once the renderer has gone away.
    pub fn publish(&self, breakdowns: Vec<f32>) -> bool {
        match self.slot.upgrade() {
            Some(slot) => {
                *lock(&slot) = Some(breakdowns);
                true
            }
            None => false,
        }
    }
}

/// Renderer end
#[derive(Debug)]
pub struct BreakdownReceiver {
    slot: Arc<Slot>,
}

impl BreakdownReceiver {
    /// Take the newest vector, if one arrived since the last call
    pub fn latest(&mut self) -> Option<Vec<f32>> {
        lock(&self.slot).take()
    }

    /// The sampler dropped its publisher
    pub fn is_closed(&self) -> bool {
        Arc::weak_count(&self.slot) == 0
    }
}
