//! Supervisor-side control of engine runs.
//!
//! [`SimulationController`] starts runs on a dedicated thread (or on the
//! caller's thread), pauses and stops them, backsteps between runs and
//! publishes START/STOP [`LifecycleEvent`]s to a registered observer.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::debug;

use crate::{
    AddressFault, Engine, EngineConfig, LifecycleEvent, LifecycleObserver, RunOutcome,
    Simulation, Statement, StopReason, UndoError,
};

/// Controller operation failures.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Operation needs the engine to be idle.
    #[error("a run is in progress")]
    AlreadyRunning,
    /// Execution thread panicked before returning an outcome.
    #[error("execution thread panicked")]
    ThreadPanicked,
    /// Execution thread could not be created.
    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[source] io::Error),
    /// Backstep replay failed.
    #[error(transparent)]
    Undo(#[from] UndoError),
    /// Program did not fit in the text segment.
    #[error("program load failed: {0}")]
    Load(#[from] AddressFault),
}

/// Owns the execution thread of one [`Simulation`].
pub struct SimulationController {
    sim: Arc<Simulation>,
    observer: Option<Arc<dyn LifecycleObserver>>,
    worker: Option<JoinHandle<RunOutcome>>,
    last_outcome: Option<RunOutcome>,
}

impl std::fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationController")
            .field("sim", &self.sim)
            .field("observer", &self.observer.is_some())
            .field("running", &self.is_running())
            .field("last_outcome", &self.last_outcome)
            .finish()
    }
}

impl SimulationController {
    /// Creates a controller over a fresh simulation.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_simulation(Arc::new(Simulation::new(config)))
    }

    /// Creates a controller over an existing simulation.
    #[must_use]
    pub const fn with_simulation(sim: Arc<Simulation>) -> Self {
        Self {
            sim,
            observer: None,
            worker: None,
            last_outcome: None,
        }
    }

    /// Controlled simulation.
    #[must_use]
    pub const fn simulation(&self) -> &Arc<Simulation> {
        &self.sim
    }

    /// Registers the lifecycle observer, replacing any previous one. Takes
    /// effect from the next run.
    pub fn set_observer(&mut self, observer: impl LifecycleObserver + 'static) {
        self.observer = Some(Arc::new(observer));
    }

    /// Returns `true` while the execution thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Outcome of the most recently collected run.
    #[must_use]
    pub const fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    /// Starts a run on a new thread and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyRunning`] if a run is active,
    /// [`ControllerError::ThreadPanicked`] if the previous run panicked and
    /// [`ControllerError::Spawn`] if the thread cannot be created.
    pub fn start(
        &mut self,
        pc: u32,
        max_steps: u64,
        breakpoints: &[u32],
    ) -> Result<(), ControllerError> {
        if self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }
        self.join()?;
        self.sim.signal().clear();

        let engine = Engine::new(Arc::clone(&self.sim));
        let observer = self.observer.clone();
        let breakpoints = breakpoints.to_vec();
        let worker = thread::Builder::new()
            .name("retrace-engine".into())
            .spawn(move || {
                run_with_events(&engine, observer.as_deref(), pc, max_steps, &breakpoints)
            })
            .map_err(ControllerError::Spawn)?;
        self.worker = Some(worker);
        debug!(pc, max_steps, "execution thread started");
        Ok(())
    }

    /// Starts a run from the current PC.
    ///
    /// # Errors
    ///
    /// Same as [`Self::start`].
    pub fn resume(&mut self, max_steps: u64, breakpoints: &[u32]) -> Result<(), ControllerError> {
        let pc = self.sim.pc();
        self.start(pc, max_steps, breakpoints)
    }

    /// Runs on the calling thread until the engine stops.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyRunning`] if a threaded run is
    /// active.
    pub fn run_blocking(
        &mut self,
        pc: u32,
        max_steps: u64,
        breakpoints: &[u32],
    ) -> Result<RunOutcome, ControllerError> {
        if self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }
        self.join()?;
        self.sim.signal().clear();
        let engine = Engine::new(Arc::clone(&self.sim));
        let outcome = run_with_events(&engine, self.observer.as_deref(), pc, max_steps, breakpoints);
        self.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Requests a resumable stop.
    pub fn pause(&self) {
        debug!("pause requested");
        self.sim.request_stop(StopReason::Pause);
    }

    /// Requests a terminal stop.
    pub fn stop(&self) {
        debug!("stop requested");
        self.sim.request_stop(StopReason::Stop);
    }

    /// Waits for the execution thread and returns its outcome, or `None`
    /// when no threaded run was started since the last join.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::ThreadPanicked`] if the thread panicked.
    pub fn join(&mut self) -> Result<Option<RunOutcome>, ControllerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let outcome = worker.join().map_err(|_| ControllerError::ThreadPanicked)?;
        self.last_outcome = Some(outcome.clone());
        Ok(Some(outcome))
    }

    /// Undoes one instruction or trap entry. Returns the number of entries
    /// replayed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyRunning`] during a run and
    /// [`ControllerError::Undo`] when replay fails.
    pub fn back_step(&self) -> Result<usize, ControllerError> {
        if self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }
        Ok(self.sim.back_step()?)
    }

    /// Loads a program and resets the simulation around it.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyRunning`] during a run and
    /// [`ControllerError::Load`] when the program does not fit.
    pub fn load_program<I>(&mut self, base: u32, program: I) -> Result<u32, ControllerError>
    where
        I: IntoIterator<Item = Statement>,
    {
        if self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }
        self.join()?;
        self.last_outcome = None;
        Ok(self.sim.load_program(base, program)?)
    }

    /// Resets registers, undo history and pending interrupts.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::AlreadyRunning`] during a run.
    pub fn reset(&mut self) -> Result<(), ControllerError> {
        if self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }
        self.join()?;
        self.last_outcome = None;
        self.sim.reset();
        Ok(())
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
            // A panicked worker has nothing left to report.
            let _ = self.join();
        }
    }
}

fn run_with_events(
    engine: &Engine,
    observer: Option<&dyn LifecycleObserver>,
    pc: u32,
    max_steps: u64,
    breakpoints: &[u32],
) -> RunOutcome {
    let speed = engine.simulation().config().speed;
    if let Some(observer) = observer {
        observer.on_lifecycle(&LifecycleEvent::started(speed, pc));
    }
    let outcome = engine.run(pc, max_steps, breakpoints);
    if let Some(observer) = observer {
        observer.on_lifecycle(&LifecycleEvent::stopped(speed, &outcome));
    }
    outcome
}
