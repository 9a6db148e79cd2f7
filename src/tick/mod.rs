//! Tick driver: the host clock driving the interpreter's scheduler
//!
//! Each tick forwards the elapsed host time as a clock event and then polls
//! the completion signal. Ticks are mutually exclusive through an
//! [`ExecSlot`]; a tick that finds the slot busy is dropped, never queued.
//!
//! ```text
//! Idle → Loading → [Compiling] → Running → Done | Errored
//! ```

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::engine::{EngineSession, SchedulerHandle};
use crate::error::EvalError;
use crate::host::Clock;
use crate::lifecycle::{Lifecycle, RunState};

/// Default tick period (about 60 wake-ups per second)
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(16);

/// Registration of the periodic host callback.
///
/// Deregistering is idempotent; only the first call takes effect.
#[derive(Debug)]
pub struct Registration {
    active: AtomicBool,
    deregistrations: AtomicUsize,
    notify: Notify,
}

impl Registration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            deregistrations: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop the callback; `true` if this call is the one that did it
    pub fn deregister(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if was_active {
            self.deregistrations.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        }
        was_active
    }

    /// Number of deregistrations that took effect (0 or 1)
    pub fn deregistration_count(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }

    /// Resolves once the registration is gone.
    pub async fn deregistered(&self) {
        while self.is_active() {
            self.notify.notified().await;
        }
    }
}

/// Host-level stop request, usable from any thread.
///
/// Deregisters immediately, without waiting for the script to cooperate.
#[derive(Debug, Clone)]
pub struct StopHandle {
    registration: Arc<Registration>,
}

impl StopHandle {
    pub fn new(registration: Arc<Registration>) -> Self {
        Self { registration }
    }

    pub fn stop(&self) {
        if self.registration.deregister() {
            info!("host stop request, periodic callback removed");
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.registration.is_active()
    }
}

/// Single execution slot guarding calls into the interpreter.
#[derive(Debug, Clone, Default)]
pub struct ExecSlot {
    busy: Arc<AtomicBool>,
}

impl ExecSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or `None` if a call is already in flight
    pub fn try_enter(&self) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SlotGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Holds the slot; released on drop, whatever the exit path.
#[derive(Debug)]
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The callback is deregistered; the interpreter was not touched
    Inactive,
    /// A previous call is still in flight; this tick was dropped
    Busy,
    /// Program still running
    Pending,
    /// The run reached a terminal state during this tick
    Finished(RunState),
    /// The callback was removed on request before the program finished
    Cancelled,
}

/// Drives one running session to completion.
pub struct TickDriver {
    session: EngineSession,
    scheduler: SchedulerHandle,
    clock: Arc<dyn Clock>,
    completion_flag: String,
    last_host_time: Cell<i64>,
    lifecycle: RefCell<Lifecycle>,
    slot: ExecSlot,
    registration: Arc<Registration>,
    period: Duration,
}

impl TickDriver {
    /// Take over a session whose entry point was started.
    pub fn new(
        session: EngineSession,
        scheduler: SchedulerHandle,
        clock: Arc<dyn Clock>,
        completion_flag: impl Into<String>,
        lifecycle: Lifecycle,
        registration: Arc<Registration>,
    ) -> Self {
        let now = clock.now();
        Self {
            session,
            scheduler,
            clock,
            completion_flag: completion_flag.into(),
            last_host_time: Cell::new(now),
            lifecycle: RefCell::new(lifecycle),
            slot: ExecSlot::new(),
            registration,
            period: DEFAULT_PERIOD,
        }
    }

    pub fn with_period(
        mut self,
        period: Duration,
    ) -> Self {
        self.period = period;
        self
    }

    pub fn session(&self) -> &EngineSession {
        &self.session
    }

    pub fn slot(&self) -> &ExecSlot {
        &self.slot
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.borrow().state()
    }

    pub fn last_host_time(&self) -> i64 {
        self.last_host_time.get()
    }

    /// One invocation of the periodic callback.
    pub fn tick(&self) -> TickOutcome {
        if !self.registration.is_active() {
            return TickOutcome::Inactive;
        }
        let Some(_guard) = self.slot.try_enter() else {
            trace!("tick dropped, interpreter call in flight");
            return TickOutcome::Busy;
        };

        let now = self.clock.now();
        match self.step(now) {
            Ok(true) => self.finish(),
            Ok(false) if self.registration.is_active() => TickOutcome::Pending,
            Ok(false) => TickOutcome::Cancelled,
            Err(err) => {
                self.registration.deregister();
                self.lifecycle.borrow_mut().fail(err.into());
                TickOutcome::Finished(RunState::Errored)
            }
        }
    }

    /// Clock injection plus completion poll; `Ok(true)` once completed.
    fn step(
        &self,
        now: i64,
    ) -> Result<bool, EvalError> {
        let dt = now - self.last_host_time.get();
        if dt > 0 {
            self.last_host_time.set(now);
            self.scheduler.emit_clock(dt, now)?;
        }
        if self.session.take_close_request() && self.registration.deregister() {
            debug!("script requested close, periodic callback removed");
        }
        self.session.global_is_truthy(&self.completion_flag)
    }

    fn finish(&self) -> TickOutcome {
        self.registration.deregister();
        let stopped = self.scheduler.stop();
        let mut lifecycle = self.lifecycle.borrow_mut();
        match stopped {
            Ok(()) => {
                lifecycle.advance(RunState::Done);
                TickOutcome::Finished(RunState::Done)
            }
            Err(err) => {
                lifecycle.fail(err.into());
                TickOutcome::Finished(RunState::Errored)
            }
        }
    }

    /// Run the periodic callback until the run ends or is cancelled.
    ///
    /// Missed periods are skipped rather than delivered in a burst.
    pub async fn drive(self) -> Lifecycle {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let registration = Arc::clone(&self.registration);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = registration.deregistered() => {
                    debug!("tick loop left after deregistration");
                    break;
                }
            }
            match self.tick() {
                TickOutcome::Pending | TickOutcome::Busy => {}
                TickOutcome::Finished(state) => {
                    debug!(%state, "tick loop finished");
                    break;
                }
                TickOutcome::Inactive | TickOutcome::Cancelled => break,
            }
        }
        self.lifecycle.into_inner()
    }
}

impl std::fmt::Debug for TickDriver {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TickDriver")
            .field("completion_flag", &self.completion_flag)
            .field("last_host_time", &self.last_host_time.get())
            .field("state", &self.state())
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
