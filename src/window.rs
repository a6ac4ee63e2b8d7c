use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TraceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Delay,
    Duration,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimerKind::Delay => "delay",
            TimerKind::Duration => "duration",
        })
    }
}

/// `Idle` and `Tracing` record calls; `DelayPending` and `Stopped` do not.
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Idle,
    DelayPending,
    Tracing,
    Stopped,
}

impl WindowState {
    pub fn is_tracing(&self) -> bool {
        matches!(self, WindowState::Idle | WindowState::Tracing)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Gate {
    enabled: bool,
    interval: Duration,
}

impl Gate {
    fn get(&self) -> Option<Duration> {
        self.enabled.then_some(self.interval)
    }
}

struct ProfilerTimer {
    interval: Duration,
    started: bool,
    cancel: CancellationToken,
}

struct WindowInner {
    state: WindowState,
    delay: Gate,
    duration: Gate,
    delay_timer: Option<ProfilerTimer>,
    duration_timer: Option<ProfilerTimer>,
}

impl WindowInner {
    fn timer_mut(&mut self, kind: TimerKind) -> &mut Option<ProfilerTimer> {
        match kind {
            TimerKind::Delay => &mut self.delay_timer,
            TimerKind::Duration => &mut self.duration_timer,
        }
    }

    fn gate_mut(&mut self, kind: TimerKind) -> &mut Gate {
        match kind {
            TimerKind::Delay => &mut self.delay,
            TimerKind::Duration => &mut self.duration,
        }
    }
}

struct Shared {
    inner: Mutex<WindowInner>,
    tracing: AtomicBool,
    timer_runtime: Option<Handle>,
}

/// Gates tracing with an optional start delay followed by an optional
/// duration. Both timers complete into one state machine, so the duration
/// timer can only start once the delay (if any) has fired.
pub struct WindowController {
    shared: Arc<Shared>,
}

impl WindowController {
    /// `timer_runtime` drives the timers; when `None`, the runtime current at
    /// timer creation is used.
    pub fn new(timer_runtime: Option<Handle>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(WindowInner {
                    state: WindowState::Idle,
                    delay: Gate::default(),
                    duration: Gate::default(),
                    delay_timer: None,
                    duration_timer: None,
                }),
                tracing: AtomicBool::new(true),
                timer_runtime,
            }),
        }
    }

    /// A configured delay pauses tracing right away; the delay timer started
    /// by [`WindowController::arm`] is what resumes it.
    pub fn enable_profile_delay_start(&self, enabled: bool, delay: Duration) {
        let mut inner = self.shared.inner.lock();
        inner.delay = Gate {
            enabled,
            interval: if enabled { delay } else { Duration::ZERO },
        };

        let delay_started = inner.delay_timer.as_ref().is_some_and(|t| t.started);
        let state = inner.state;
        match state {
            WindowState::Idle if enabled && !delay.is_zero() => {
                self.shared.transition(&mut inner, WindowState::DelayPending)
            }
            WindowState::DelayPending if !enabled && !delay_started => {
                self.shared.transition(&mut inner, WindowState::Idle)
            }
            _ => {}
        }
    }

    pub fn enable_profile_duration(&self, enabled: bool, duration: Duration) {
        self.shared.inner.lock().duration = Gate {
            enabled,
            interval: if enabled { duration } else { Duration::ZERO },
        };
    }

    pub fn is_profiler_delay_enabled(&self) -> Option<Duration> {
        self.shared.inner.lock().delay.get()
    }

    pub fn is_profiler_duration_enabled(&self) -> Option<Duration> {
        self.shared.inner.lock().duration.get()
    }

    pub fn state(&self) -> WindowState {
        self.shared.inner.lock().state
    }

    #[inline]
    pub fn is_tracing(&self) -> bool {
        self.shared.tracing.load(Ordering::Acquire)
    }

    pub fn has_timer(&self, kind: TimerKind) -> bool {
        self.shared.inner.lock().timer_mut(kind).is_some()
    }

    pub fn create_timer(&self, kind: TimerKind, interval: Duration) {
        let mut inner = self.shared.inner.lock();
        self.shared.create_timer(&mut inner, kind, interval);
    }

    pub fn start_timer(&self, kind: TimerKind) {
        let mut inner = self.shared.inner.lock();
        Shared::start_timer(&self.shared, &mut inner, kind);
    }

    /// Attach-time setup: hold tracing behind the delay timer if one is
    /// configured, otherwise start the duration timer right away.
    pub fn arm(&self) {
        let mut inner = self.shared.inner.lock();
        if let Some(delay) = inner.delay.get() {
            self.shared.create_timer(&mut inner, TimerKind::Delay, delay);
            Shared::start_timer(&self.shared, &mut inner, TimerKind::Delay);
            if !inner.delay_timer.as_ref().is_some_and(|t| t.started) {
                tracing::warn!("delay timer unavailable, tracing without a start delay");
                self.shared.transition(&mut inner, WindowState::Idle);
            }
        } else if let Some(duration) = inner.duration.get() {
            self.shared
                .create_timer(&mut inner, TimerKind::Duration, duration);
            Shared::start_timer(&self.shared, &mut inner, TimerKind::Duration);
        }
    }

    pub fn resume_tracing(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.transition(&mut inner, WindowState::Tracing);
    }

    /// Stops tracing for good. An armed duration timer is left to fire into
    /// the terminal state.
    pub fn stop_tracing(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.transition(&mut inner, WindowState::Stopped);
    }

    /// Cancels and releases both timers.
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner.lock();
        for kind in [TimerKind::Delay, TimerKind::Duration] {
            if let Some(timer) = inner.timer_mut(kind).take() {
                timer.cancel.cancel();
                tracing::debug!("{kind} timer released");
            }
        }
    }
}

impl Drop for WindowController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn transition(&self, inner: &mut WindowInner, next: WindowState) {
        if inner.state == WindowState::Stopped {
            tracing::debug!("tracing already stopped, ignoring transition to {next:?}");
            return;
        }

        if inner.state != next {
            tracing::info!("tracing window {:?} -> {next:?}", inner.state);
        }
        inner.state = next;
        self.tracing.store(next.is_tracing(), Ordering::Release);
    }

    fn create_timer(&self, inner: &mut WindowInner, kind: TimerKind, interval: Duration) {
        if inner.timer_mut(kind).is_some() || interval.is_zero() {
            return;
        }

        if let Err(err) = self.runtime_handle(kind) {
            tracing::error!("failed to create {kind} timer: {err}");
            return;
        }

        *inner.timer_mut(kind) = Some(ProfilerTimer {
            interval,
            started: false,
            cancel: CancellationToken::new(),
        });
        *inner.gate_mut(kind) = Gate {
            enabled: true,
            interval,
        };
        tracing::debug!("created {kind} timer ({interval:?})");
    }

    fn start_timer(this: &Arc<Self>, inner: &mut WindowInner, kind: TimerKind) {
        match inner.timer_mut(kind) {
            Some(timer) if !timer.started => {}
            Some(_) => return,
            None => {
                tracing::debug!("no {kind} timer to start");
                return;
            }
        }

        let next = match (kind, inner.state) {
            (TimerKind::Delay, WindowState::Idle | WindowState::DelayPending) => {
                WindowState::DelayPending
            }
            (TimerKind::Duration, WindowState::Idle | WindowState::Tracing) => WindowState::Tracing,
            (_, state) => {
                tracing::warn!("cannot start {kind} timer while {state:?}");
                return;
            }
        };

        let handle = match this.runtime_handle(kind) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!("failed to start {kind} timer: {err}");
                return;
            }
        };

        if let Some(timer) = inner.timer_mut(kind).as_mut() {
            timer.started = true;
            let deadline = Instant::now() + timer.interval;
            handle.spawn(run_timer(
                Arc::downgrade(this),
                kind,
                deadline,
                timer.cancel.clone(),
            ));
        }

        this.transition(inner, next);
        tracing::info!("{kind} timer started");
    }

    fn on_timer_fired(this: &Arc<Self>, kind: TimerKind) {
        let mut inner = this.inner.lock();
        tracing::info!("{kind} timer fired");

        match (kind, inner.state) {
            (TimerKind::Delay, WindowState::DelayPending) => {
                this.transition(&mut inner, WindowState::Tracing);
                if let Some(duration) = inner.duration.get() {
                    this.create_timer(&mut inner, TimerKind::Duration, duration);
                    Shared::start_timer(this, &mut inner, TimerKind::Duration);
                }
            }
            (TimerKind::Duration, WindowState::Tracing | WindowState::Idle) => {
                this.transition(&mut inner, WindowState::Stopped);
            }
            (_, state) => tracing::debug!("{kind} timer fired while {state:?}, ignoring"),
        }
    }

    fn runtime_handle(&self, kind: TimerKind) -> Result<Handle, TraceError> {
        match &self.timer_runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| TraceError::TimerUnavailable(kind)),
        }
    }
}

async fn run_timer(
    shared: Weak<Shared>,
    kind: TimerKind,
    deadline: Instant,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        _ = cancel.cancelled() => {
            tracing::debug!("{kind} timer cancelled");
            return;
        }
    }

    if let Some(shared) = shared.upgrade() {
        Shared::on_timer_fired(&shared, kind);
    }
}
