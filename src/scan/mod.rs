//! Scan execution engine
//!
//! [`ScanEngine`] runs a [`RecipeConfig`] on a background worker thread and
//! controls it with pause, resume and stop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  flags (pause, stop)  ┌──────────────┐
//! │  ScanEngine  │ ────────────────────▶ │  ScanWorker  │
//! │ (controller) │                       │   (thread)   │
//! └──────────────┘                       └──────────────┘
//!        │                                  │        │
//!        │ events()          ScanEvent      │        │ ScanPoint
//!        ▼            (unbounded channel)   │        ▼ (bounded queue)
//!   consumer ◀──────────────────────────────┘    DataCollector::drain
//! ```
//!
//! # States
//!
//! `Idle → Running → {Paused ⇄ Running} → Finished | Stopped | Errored`.
//! In continuous mode a finished pass starts over instead of reaching
//! `Finished`, until the scan is stopped or the mode is turned off.
//! Terminal states are at rest like `Idle`: the configuration may be edited
//! and a new scan started. While a scan runs, the shared [`RunActivity`]
//! flag is set and [`ConfigManager`](crate::recipe::ConfigManager) and
//! [`VariableStore`](crate::variables::VariableStore) reject mutations.
//!
//! The consumer should drain the queue once more after a terminal event;
//! `Errored` is drained like `Finished`.

mod worker;

use crate::data::ScanPoint;
use crate::error::{Result, ScanError};
use crate::recipe::{RecipeConfig, RunActivity};
use crate::variables::SharedVariableStore;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use worker::{Outcome, RunFlags, ScanWorker};

/// Default capacity of the result queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// No scan was started yet
    #[default]
    Idle,
    /// The worker is executing recipes
    Running,
    /// The worker is blocked until resumed or stopped
    Paused,
    /// Every active recipe completed
    Finished,
    /// The scan was stopped by the caller
    Stopped,
    /// A step or device call failed
    Errored,
}

impl ScanState {
    /// Returns true while a worker exists (`Running` or `Paused`)
    pub fn is_active(&self) -> bool {
        matches!(self, ScanState::Running | ScanState::Paused)
    }

    /// Returns true for `Finished`, `Stopped` and `Errored`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Finished | ScanState::Stopped | ScanState::Errored
        )
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScanState::Idle => "idle",
            ScanState::Running => "running",
            ScanState::Paused => "paused",
            ScanState::Finished => "finished",
            ScanState::Stopped => "stopped",
            ScanState::Errored => "errored",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle notifications, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A scan was started
    Started { total_points: usize },
    /// About to write a sweep value to the parameter element
    ParameterStarted { recipe: String, index: usize, value: f64 },
    /// The sweep value was written
    ParameterFinished { recipe: String, index: usize, value: f64 },
    /// About to execute a step
    StepStarted { recipe: String, step: String },
    /// The step completed
    StepFinished { recipe: String, step: String },
    /// A point was pushed onto the result queue
    PointAvailable { recipe: String, index: usize },
    /// The step list of a recipe completed for one sweep point
    RecipeCompleted { recipe: String, index: usize },
    /// Every sweep point of a recipe completed
    SweepCompleted { recipe: String },
    /// The scan was paused
    Paused,
    /// The scan was resumed
    Resumed,
    /// Terminal: every active recipe completed
    Finished,
    /// Terminal: stopped by the caller
    Stopped,
    /// Terminal: a step failed; the error is available from the engine
    Errored { error: String },
}

impl ScanEvent {
    /// Returns true for the last event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Finished | ScanEvent::Stopped | ScanEvent::Errored { .. }
        )
    }
}

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOptions {
    /// Result queue capacity; the worker waits when it is full
    pub queue_capacity: usize,
    /// Sleep between checks while paused
    pub pause_poll: Duration,
    /// How long one queue push waits before the stop flag is re-checked
    pub send_timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pause_poll: Duration::from_millis(20),
            send_timeout: Duration::from_millis(50),
        }
    }
}

/// Controller of the scan worker
pub struct ScanEngine {
    variables: SharedVariableStore,
    options: ScanOptions,
    activity: RunActivity,
    flags: RunFlags,
    state: ScanState,
    worker: Option<JoinHandle<Result<Outcome>>>,
    points: Option<Receiver<ScanPoint>>,
    event_tx: Sender<ScanEvent>,
    event_rx: Receiver<ScanEvent>,
    error: Option<ScanError>,
}

impl ScanEngine {
    /// Create an idle engine evaluating step values with `variables`
    pub fn new(variables: SharedVariableStore, options: ScanOptions) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            variables,
            options,
            activity: RunActivity::new(),
            flags: RunFlags::default(),
            state: ScanState::Idle,
            worker: None,
            points: None,
            event_tx,
            event_rx,
            error: None,
        }
    }

    /// Flag set while a scan runs, to attach to the config and variable owners
    pub fn activity(&self) -> RunActivity {
        self.activity.clone()
    }

    /// Event receiver shared by every clone
    ///
    /// Each event is delivered to one receiver. Events left over from a
    /// previous run are discarded by [`start`](Self::start), so `Started`
    /// is always the first event a run produces.
    pub fn events(&self) -> Receiver<ScanEvent> {
        self.event_rx.clone()
    }

    /// Result queue of the current or last run
    pub fn points(&self) -> Option<Receiver<ScanPoint>> {
        self.points.clone()
    }

    /// Options used for the next run
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Change options; only allowed at rest
    pub fn set_options(&mut self, options: ScanOptions) -> Result<()> {
        self.ensure_at_rest("change scan options")?;
        self.options = options;
        Ok(())
    }

    /// Repeat the active recipes until stopped
    ///
    /// Takes effect at the end of the current pass when changed during a
    /// run. [`stop`](Self::stop) turns it off.
    pub fn set_continuous(&self, continuous: bool) {
        self.flags.continuous.store(continuous, Ordering::SeqCst);
        info!("Continuous mode {}", if continuous { "on" } else { "off" });
    }

    /// Whether continuous mode is on
    pub fn is_continuous(&self) -> bool {
        self.flags.continuous()
    }

    /// Error of the last run, if it ended in `Errored`
    pub fn error(&self) -> Option<&ScanError> {
        self.error.as_ref()
    }

    /// Take the error of the last run
    pub fn take_error(&mut self) -> Option<ScanError> {
        self.error.take()
    }

    fn ensure_at_rest(&mut self, operation: &str) -> Result<()> {
        let state = self.state();
        if state.is_active() {
            return Err(ScanError::Busy(format!(
                "cannot {} while the scan is {}",
                operation, state
            )));
        }
        Ok(())
    }

    /// Current state, joining the worker if it has exited
    pub fn state(&mut self) -> ScanState {
        if self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            self.join_worker();
        }
        self.state
    }

    /// Validate `config` and run it on a new worker thread
    ///
    /// Validation errors are returned without any state change. The
    /// returned receiver yields one point per sweep value and disconnects
    /// when the worker exits.
    pub fn start(&mut self, config: Arc<RecipeConfig>) -> Result<Receiver<ScanPoint>> {
        self.ensure_at_rest("start a scan")?;
        config.validate()?;

        let (point_tx, point_rx) = bounded(self.options.queue_capacity.max(1));
        self.flags.reset();
        self.error = None;
        self.activity.set(true);

        let total_points = config.total_points();
        let worker = ScanWorker {
            config,
            variables: self.variables.clone(),
            flags: self.flags.clone(),
            activity: self.activity.clone(),
            points: point_tx,
            events: self.event_tx.clone(),
            total_points,
            pause_poll: self.options.pause_poll,
            send_timeout: self.options.send_timeout,
        };

        let stale = self.event_rx.try_iter().count();
        if stale > 0 {
            debug!("Discarded {} events of the previous run", stale);
        }
        let handle = std::thread::Builder::new()
            .name("scan-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.activity.set(false);
                ScanError::from(e)
            })?;

        info!("Scan started ({} points)", total_points);
        self.worker = Some(handle);
        self.points = Some(point_rx.clone());
        self.state = ScanState::Running;
        Ok(point_rx)
    }

    /// Suspend the worker at its next checkpoint
    pub fn pause(&mut self) -> Result<()> {
        let state = self.state();
        if state != ScanState::Running {
            return Err(ScanError::InvalidState(format!("cannot pause while {}", state)));
        }
        self.flags.pause.store(true, Ordering::SeqCst);
        self.state = ScanState::Paused;
        let _ = self.event_tx.send(ScanEvent::Paused);
        info!("Scan paused");
        Ok(())
    }

    /// Let a paused worker continue where it left off
    pub fn resume(&mut self) -> Result<()> {
        let state = self.state();
        if state != ScanState::Paused {
            return Err(ScanError::InvalidState(format!("cannot resume while {}", state)));
        }
        self.flags.pause.store(false, Ordering::SeqCst);
        self.state = ScanState::Running;
        let _ = self.event_tx.send(ScanEvent::Resumed);
        info!("Scan resumed");
        Ok(())
    }

    /// Stop the worker and wait for it to exit
    ///
    /// No point is pushed onto the queue after this returns. Returns the
    /// resulting terminal state, which is `Finished` or `Errored` if the
    /// worker ended before it saw the request.
    pub fn stop(&mut self) -> Result<ScanState> {
        let state = self.state();
        if !state.is_active() {
            return Err(ScanError::InvalidState(format!("cannot stop while {}", state)));
        }
        self.flags.stop.store(true, Ordering::SeqCst);
        self.flags.pause.store(false, Ordering::SeqCst);
        self.join_worker();
        self.flags.continuous.store(false, Ordering::SeqCst);
        Ok(self.state)
    }

    /// Block until the worker exits; returns the final state
    pub fn wait(&mut self) -> ScanState {
        self.join_worker();
        self.state
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.state = match handle.join() {
            Ok(Ok(Outcome::Finished)) => ScanState::Finished,
            Ok(Ok(Outcome::Stopped)) => ScanState::Stopped,
            Ok(Err(e)) => {
                self.error = Some(e);
                ScanState::Errored
            }
            Err(_) => {
                warn!("Scan worker panicked");
                self.activity.set(false);
                self.error = Some(ScanError::Channel("scan worker panicked".to_string()));
                let _ = self.event_tx.send(ScanEvent::Errored {
                    error: "scan worker panicked".to_string(),
                });
                ScanState::Errored
            }
        };
    }
}

impl Drop for ScanEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.flags.stop.store(true, Ordering::SeqCst);
            self.flags.pause.store(false, Ordering::SeqCst);
            self.join_worker();
        }
    }
}
