//! Single-shot wake signal for a parked executor.
//!
//! A fresh event is created every time an executor parks; it is never reset.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct OneShotEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl OneShotEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the event, releasing every current and future waiter.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        if !*signaled {
            *signaled = true;
            self.cond.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until signaled.
    pub fn block(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait until signaled or `timeout` elapses. Returns whether it was signaled.
    pub fn block_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            signaled = self
                .cond
                .wait_timeout(signaled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
