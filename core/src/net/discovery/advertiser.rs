//! Display-side presence and invitation policy
//!
//! Advertising means answering matching probes. Invitations are accepted
//! automatically until `capacity` controllers are held, at which point
//! advertising stops on its own. With the default capacity of one this is
//! "accept the first invitation, then go quiet".

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::net::packet::RejectReason;

/// Outcome of an inbound invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteDecision {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug)]
struct AdvertiserState {
    advertising: bool,
    /// Set by `stop()`; blocks automatic re-advertising
    explicitly_stopped: bool,
    /// Started again after `stop()`; the driver opens a new cycle
    restarted: bool,
    capacity: usize,
    /// Controller slots currently taken
    held: usize,
}

/// Shared handle to the Display's advertiser.
#[derive(Debug, Clone)]
pub struct Advertiser {
    shared: Arc<AdvertiserShared>,
}

#[derive(Debug)]
struct AdvertiserShared {
    service_id: String,
    state: Mutex<AdvertiserState>,
}

impl Advertiser {
    pub(crate) fn new(service_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(AdvertiserShared {
                service_id: service_id.into(),
                state: Mutex::new(AdvertiserState {
                    advertising: false,
                    explicitly_stopped: false,
                    restarted: false,
                    capacity: capacity.max(1),
                    held: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdvertiserState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn service_id(&self) -> &str {
        &self.shared.service_id
    }

    /// Begin answering probes. Idempotent.
    ///
    /// A full advertiser stays quiet until a slot frees up.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.explicitly_stopped {
            state.restarted = true;
        }
        state.explicitly_stopped = false;
        if state.advertising {
            return;
        }
        if state.held < state.capacity {
            state.advertising = true;
            tracing::info!(service = %self.shared.service_id, "Advertising started");
        } else {
            tracing::debug!(held = state.held, "Advertiser full, not advertising");
        }
    }

    /// Stop answering probes and refuse further invitations. Idempotent and
    /// safe to call while an invitation is being decided.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.explicitly_stopped = true;
        if state.advertising {
            state.advertising = false;
            tracing::info!(service = %self.shared.service_id, "Advertising stopped");
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.lock().advertising
    }

    /// Controllers currently holding a slot.
    pub fn accepted_count(&self) -> usize {
        self.lock().held
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub(crate) fn should_announce(&self, service_id: &str) -> bool {
        service_id == self.shared.service_id && self.lock().advertising
    }

    /// Decide an invitation, reserving a slot on acceptance.
    ///
    /// Runs under the state lock, so a concurrent `stop()` either happens
    /// first (and the invitation is rejected) or after the slot is taken.
    pub(crate) fn decide(&self, service_id: &str) -> InviteDecision {
        if service_id != self.shared.service_id {
            return InviteDecision::Reject(RejectReason::ServiceMismatch);
        }

        let mut state = self.lock();
        if !state.advertising {
            let reason = if state.held >= state.capacity {
                RejectReason::Full
            } else {
                RejectReason::NotAdvertising
            };
            return InviteDecision::Reject(reason);
        }

        state.held += 1;
        if state.held >= state.capacity {
            state.advertising = false;
            tracing::info!(
                held = state.held,
                "Controller capacity reached, advertising stopped"
            );
        }
        InviteDecision::Accept
    }

    /// True once after a `start()` that followed a `stop()`.
    pub(crate) fn take_restart(&self) -> bool {
        std::mem::take(&mut self.lock().restarted)
    }

    /// Free a slot taken by [`decide`](Self::decide).
    pub(crate) fn release(&self) {
        let mut state = self.lock();
        state.held = state.held.saturating_sub(1);
    }

    /// Re-publish presence after peer loss, unless the game stopped
    /// advertising on purpose. Returns whether advertising is now on.
    pub(crate) fn resume_after_loss(&self) -> bool {
        let mut state = self.lock();
        if !state.explicitly_stopped && !state.advertising && state.held < state.capacity {
            state.advertising = true;
            tracing::info!(service = %self.shared.service_id, "Advertising resumed");
        }
        state.advertising
    }
}
