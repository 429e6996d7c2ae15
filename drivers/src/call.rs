/*++

Licensed under the Apache-2.0 license.

File Name:

    call.rs

Abstract:

    File contains the pending call shared by a blocking caller and the
    completion path, and the signal that can interrupt its wait.

--*/

use crate::program::CompletionStatus;
use c3_error::{C3Error, C3Result};
use log::{error, warn};
use smlang::statemachine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

statemachine! {
    derive_states: [Clone, Copy, Debug],
    transitions: {
        *Issued + Wait = Waiting,
        Issued + Complete = Delivered,
        Waiting + Complete = Delivered,
        // The caller gave up; the completion path now owns the cleanup.
        Waiting + Interrupt = Abandoned,
        Abandoned + Complete = CleanedUp,
    }
}

/// Pending call extended variables.
#[derive(Default)]
pub struct CallContext {
    status: Option<CompletionStatus>,
}

impl StateMachineContext for CallContext {}

/// What the completion path did with a pending call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum CompleteOutcome {
    /// The waiter was woken with the status.
    Woken,
    /// The caller had abandoned the call; it is now freed.
    CleanedUp,
}

/// What a wait returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum WaitOutcome {
    Delivered(CompletionStatus),
    Abandoned,
}

/// One in-flight blocking request.
///
/// Every transition happens under one mutex, so the race between a signal
/// and the completion path is resolved by whichever takes it first.
pub struct PendingCall {
    state_machine: Mutex<StateMachine<CallContext>>,
    cond: Condvar,
}

impl PendingCall {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state_machine: Mutex::new(StateMachine::new(CallContext::default())),
            cond: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StateMachine<CallContext>> {
        self.state_machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> States {
        *self.lock().state()
    }

    /// The completion has been recorded ("stopped").
    pub fn is_stopped(&self) -> bool {
        matches!(self.state(), States::Delivered | States::CleanedUp)
    }

    /// Marks the call as dispatched. A no-op when the completion path got
    /// there first.
    pub(crate) fn mark_waiting(&self) {
        let mut sm = self.lock();
        if *sm.state() == States::Issued && sm.process_event(Events::Wait).is_err() {
            error!("c3: pending call failed to enter Waiting");
        }
    }

    /// Called by the deferred completion path, after the call's mappings have
    /// been released.
    pub(crate) fn complete(&self, status: CompletionStatus) -> C3Result<CompleteOutcome> {
        let mut sm = self.lock();
        if sm.process_event(Events::Complete).is_err() {
            error!("c3: completion for a pending call in state {:?}", sm.state());
            Err(C3Error::DRIVER_CALL_STATE)?
        }
        match *sm.state() {
            States::Delivered => {
                sm.context_mut().status = Some(status);
                drop(sm);
                self.cond.notify_all();
                Ok(CompleteOutcome::Woken)
            }
            _ => {
                warn!("c3: cleaned up abandoned call, status {:#010x}", status.raw());
                Ok(CompleteOutcome::CleanedUp)
            }
        }
    }

    /// Blocks until the call completes or `signal` is raised.
    ///
    /// A completion that was already recorded wins over a raised signal.
    pub(crate) fn wait(self: &Arc<Self>, signal: &Signal) -> C3Result<WaitOutcome> {
        let _attached = signal.attach(self);
        let mut sm = self.lock();
        let outcome = loop {
            match *sm.state() {
                States::Delivered => {
                    let status = sm.context().status.ok_or(C3Error::DRIVER_CALL_STATE)?;
                    break WaitOutcome::Delivered(status);
                }
                States::Issued | States::Waiting if signal.is_raised() => {
                    if *sm.state() == States::Issued {
                        sm.process_event(Events::Wait)
                            .map_err(|_| C3Error::DRIVER_CALL_STATE)?;
                    }
                    sm.process_event(Events::Interrupt)
                        .map_err(|_| C3Error::DRIVER_CALL_STATE)?;
                    break WaitOutcome::Abandoned;
                }
                States::Issued | States::Waiting => {
                    sm = self.cond.wait(sm).unwrap_or_else(PoisonError::into_inner);
                }
                state => {
                    error!("c3: wait on a pending call in state {state:?}");
                    Err(C3Error::DRIVER_CALL_STATE)?
                }
            }
        };
        Ok(outcome)
    }

    fn wake(&self) {
        let _sm = self.lock();
        self.cond.notify_all();
    }
}

/// Caller-owned interruption token. Raising it wakes every call waiting on
/// it; one signal may be shared by several waiters.
#[derive(Default)]
pub struct Signal {
    raised: AtomicBool,
    waiters: Mutex<Vec<Weak<PendingCall>>>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, Vec<Weak<PendingCall>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        // Woken outside the list lock; a waiter detaches while holding its
        // call lock.
        let calls: Vec<Arc<PendingCall>> =
            self.waiters().iter().filter_map(Weak::upgrade).collect();
        for call in calls {
            call.wake();
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Calls currently waiting on this signal.
    pub fn waiter_count(&self) -> usize {
        self.waiters().len()
    }

    fn attach(&self, call: &Arc<PendingCall>) -> Attached<'_> {
        let call = Arc::downgrade(call);
        self.waiters().push(call.clone());
        Attached { signal: self, call }
    }
}

/// Registration of a waiting call on a [`Signal`]; removed when dropped.
struct Attached<'a> {
    signal: &'a Signal,
    call: Weak<PendingCall>,
}

impl Drop for Attached<'_> {
    fn drop(&mut self) {
        self.signal
            .waiters()
            .retain(|waiter| !Weak::ptr_eq(waiter, &self.call));
    }
}
