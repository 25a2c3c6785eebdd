use std::sync::{Condvar, Mutex, PoisonError};
use thiserror::Error as ThisError;

/// Returned by `PhaseBarrier::wait` once the barrier has been aborted.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
#[error("phase barrier aborted")]
pub struct BarrierAborted;

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// Reusable rendezvous for a fixed number of threads that can be torn down
/// while threads are blocked in it.
#[derive(Debug)]
pub struct PhaseBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl PhaseBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Blocks until all parties arrived. The last thread to arrive gets `Ok(true)`.
    pub fn wait(&self) -> Result<bool, BarrierAborted> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            return Err(BarrierAborted);
        }
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(true);
        }

        let generation = state.generation;
        while state.generation == generation && !state.aborted {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.generation != generation {
            Ok(false)
        } else {
            Err(BarrierAborted)
        }
    }

    /// Wakes every waiting thread with `BarrierAborted`; later waits fail immediately.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.aborted = true;
        self.released.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aborted
    }
}
