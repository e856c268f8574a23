// src/controller.rs - single-job gate, cancellation and lifecycle state
//! Owns the single-job gate, the per-job cancellation token and the lifecycle
//! [`JobState`]. Jobs run on a background task that holds the gate for its
//! whole lifetime; the gate is an owned mutex guard, so it is released on every
//! exit path, including a panic inside the pipeline.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use uv_studio_shared::config::{Config, ScreenConfig};
use uv_studio_shared::{JobKind, JobState, ScreenDriver};

use crate::bus::BusHandle;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::reporter::StatusReporter;
use crate::step::StepContext;
use crate::workflows::Workflows;

/// Why a controller operation was refused. Refusals never change [`JobState`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Cannot start {0} print - another print job is already running")]
    JobAlreadyRunning(JobKind),
    #[error("Cannot start {requested} print - the last {failed} print failed; clear it first")]
    ErrorNotCleared { requested: JobKind, failed: JobKind },
    #[error("No print job is currently running")]
    NoJobRunning,
    #[error("{0} print is already stopping")]
    StopInProgress(JobKind),
    #[error("{0} print is still active; use stop instead")]
    JobActive(JobKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A running job was signalled and the machine-stop sequence was attempted.
    Cancelling(JobKind),
    /// No job was alive; a leftover error or stopping state was reset to idle.
    Cleared(JobKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared(JobKind),
    NothingToClear,
}

struct Inner {
    state: watch::Sender<JobState>,
    job_lock: Arc<Mutex<()>>,
    cancel: StdMutex<Option<CancellationToken>>,
    stop_gate: Mutex<()>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    stops: StdMutex<JoinSet<()>>,
    root: CancellationToken,
    driver: Arc<dyn ScreenDriver>,
    workflows: Workflows,
    screen: ScreenConfig,
    reporter: StatusReporter,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cheap to clone; every clone drives the same job.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(config: &Config, driver: Arc<dyn ScreenDriver>, bus: BusHandle) -> Self {
        let (state, job_rx) = watch::channel(JobState::Idle);
        let reporter = StatusReporter::new(bus, job_rx);
        Self {
            inner: Arc::new(Inner {
                state,
                job_lock: Arc::new(Mutex::new(())),
                cancel: StdMutex::new(None),
                stop_gate: Mutex::new(()),
                worker: StdMutex::new(None),
                stops: StdMutex::new(JoinSet::new()),
                root: CancellationToken::new(),
                driver,
                workflows: Workflows::new(config.workflow.clone(), &config.screen),
                screen: config.screen.clone(),
                reporter,
            }),
        }
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.inner.reporter
    }

    /// Current state. Never blocks.
    pub fn query_state(&self) -> JobState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.inner.state.subscribe()
    }

    /// Start a print of `kind` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, kind: JobKind) -> Result<(), Rejection> {
        let guard = match self.inner.job_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return Err(self.reject(Rejection::JobAlreadyRunning(kind))),
        };
        if let JobState::Error(failed) = self.query_state() {
            return Err(self.reject(Rejection::ErrorNotCleared { requested: kind, failed }));
        }

        let token = self.inner.root.child_token();
        *lock(&self.inner.cancel) = Some(token.clone());
        self.inner.state.send_replace(JobState::Running(kind));
        self.inner.reporter.info(format!("{} print job started", kind));

        let job_id = Uuid::new_v4();
        let span = tracing::info_span!("job", %job_id, %kind);
        let handle = tokio::spawn(self.clone().run_job(kind, token, guard).instrument(span));
        *lock(&self.inner.worker) = Some(handle);
        Ok(())
    }

    async fn run_job(self, kind: JobKind, token: CancellationToken, _guard: OwnedMutexGuard<()>) {
        let running = JobState::Running(kind);
        match self.execute(self.inner.workflows.print(kind), token.clone()).await {
            PipelineOutcome::Success => {
                self.finish_to_idle(kind);
                self.inner.reporter.info(format!("Completed {} print successfully", kind));
            }
            // Error is only entered from Running; a stop accepted meanwhile wins.
            PipelineOutcome::Failure { step, reason }
                if !token.is_cancelled() && self.advance(running, JobState::Error(kind)) =>
            {
                self.inner
                    .reporter
                    .error(format!("Failed to complete {} print: {}: {}", kind, step, reason));
            }
            PipelineOutcome::Failure { step, .. } | PipelineOutcome::Cancelled { step } => {
                tracing::info!(step = %step, "Print cancelled");
                self.advance(running, JobState::Stopping(kind));
                self.inner.reporter.info(format!("{} print was stopped", kind));
                self.run_stop_pipeline().await;
                self.finish_to_idle(kind);
            }
        }

        *lock(&self.inner.cancel) = None;
        self.inner.reporter.info(format!("{} print job finished", kind));
    }

    /// Run `pipeline` on its own task so a panic in a step surfaces as a failure.
    async fn execute(&self, pipeline: Pipeline, token: CancellationToken) -> PipelineOutcome {
        let mut ctx = StepContext::new(
            self.inner.driver.clone(),
            token,
            self.inner.reporter.clone(),
            &self.inner.screen,
        );
        let name = pipeline.name().to_string();
        let task = tokio::spawn(async move { pipeline.run(&mut ctx).await }.in_current_span());
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(pipeline = %name, error = %e, "Pipeline task died");
                PipelineOutcome::Failure {
                    step: name,
                    reason: format!("unexpected fault: {}", e),
                }
            }
        }
    }

    /// The machine-stop sequence. Runs are serialised and ignore job cancellation.
    async fn run_stop_pipeline(&self) {
        let _gate = self.inner.stop_gate.lock().await;
        self.inner.reporter.info("Stopping");
        match self.execute(self.inner.workflows.stop(), CancellationToken::new()).await {
            PipelineOutcome::Success => tracing::info!("Machine stop sequence completed"),
            PipelineOutcome::Failure { step, reason } => {
                self.inner.reporter.error(format!("Could not stop: {}: {}", step, reason));
            }
            PipelineOutcome::Cancelled { step } => {
                self.inner.reporter.error(format!("Could not stop: {} was interrupted", step));
            }
        }
    }

    /// Cancel the running job, or reset a leftover error/stopping state when none is alive.
    pub async fn request_stop(&self) -> Result<StopOutcome, Rejection> {
        loop {
            let current = self.query_state();
            match current {
                JobState::Running(kind) => {
                    if !self.advance(current, JobState::Stopping(kind)) {
                        continue;
                    }
                    let token = lock(&self.inner.cancel).clone();
                    if let Some(token) = token {
                        token.cancel();
                    }
                    self.run_stop_pipeline().await;
                    self.inner.reporter.info("Print job stop signal sent");
                    return Ok(StopOutcome::Cancelling(kind));
                }
                JobState::Stopping(kind) if self.job_alive() => {
                    return Err(self.reject(Rejection::StopInProgress(kind)));
                }
                JobState::Error(kind) | JobState::Stopping(kind) => {
                    if self.advance(current, JobState::Idle) {
                        self.inner.reporter.info(format!("Cleared {} print state", kind));
                        return Ok(StopOutcome::Cleared(kind));
                    }
                }
                JobState::Idle => return Err(self.reject(Rejection::NoJobRunning)),
            }
        }
    }

    /// Reset an error (or a stopping state nobody is winding down) to idle.
    pub fn clear_error(&self) -> Result<ClearOutcome, Rejection> {
        let current = self.query_state();
        match current {
            JobState::Idle => {
                tracing::info!("Nothing to clear, already idle");
                Ok(ClearOutcome::NothingToClear)
            }
            JobState::Running(kind) => Err(self.reject(Rejection::JobActive(kind))),
            JobState::Stopping(kind) if self.job_alive() => {
                Err(self.reject(Rejection::JobActive(kind)))
            }
            JobState::Error(kind) | JobState::Stopping(kind) => {
                if !self.advance(current, JobState::Idle) {
                    // Changed underneath us; only the controller's own job can do that.
                    return Err(self.reject(Rejection::JobActive(kind)));
                }
                self.inner.reporter.info(format!("Cleared {} print error", kind));
                Ok(ClearOutcome::Cleared(kind))
            }
        }
    }

    pub fn report_status(&self) {
        let state = self.query_state();
        self.inner
            .reporter
            .info(format!("Print job running: {} ({})", state.is_active(), state));
    }

    /// Run [`request_stop`](Self::request_stop) in the background.
    ///
    /// The task is tracked so [`shutdown`](Self::shutdown) waits for a stop
    /// sequence that is already clicking through the machine.
    pub fn spawn_stop(&self) {
        let controller = self.clone();
        let mut stops = lock(&self.inner.stops);
        while stops.try_join_next().is_some() {}
        stops.spawn(
            async move {
                if let Ok(outcome) = controller.request_stop().await {
                    tracing::debug!(?outcome, "Stop handled");
                }
            }
            .in_current_span(),
        );
    }

    /// Cancel any active job and wait up to `grace` for it and any in-flight
    /// stop sequence to wind down.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.root.cancel();
        let deadline = Instant::now() + grace;
        let grace_ms = grace.as_millis() as u64;

        let worker = lock(&self.inner.worker).take();
        if let Some(worker) = worker {
            match tokio::time::timeout_at(deadline, worker).await {
                Ok(Ok(())) => tracing::info!("Job worker finished"),
                Ok(Err(e)) => tracing::error!(error = %e, "Job worker failed"),
                Err(_) => tracing::warn!(grace_ms, "Job worker did not finish in time"),
            }
        }

        let mut stops = std::mem::take(&mut *lock(&self.inner.stops));
        let drained = async {
            while let Some(joined) = stops.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Stop task failed");
                }
            }
        };
        if tokio::time::timeout_at(deadline, drained).await.is_err() {
            tracing::warn!(grace_ms, "Stop sequence did not finish in time");
        }
    }

    /// A job task holds the gate from submission until it has reported its end.
    fn job_alive(&self) -> bool {
        self.inner.job_lock.try_lock().is_err()
    }

    /// Compare-and-set on the job state.
    fn advance(&self, expected: JobState, next: JobState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == expected {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// The job's own exit: whatever it left behind, running or stopping, becomes idle.
    fn finish_to_idle(&self, kind: JobKind) {
        self.inner.state.send_if_modified(|state| {
            if *state == JobState::Running(kind) || *state == JobState::Stopping(kind) {
                *state = JobState::Idle;
                true
            } else {
                false
            }
        });
    }

    fn reject(&self, rejection: Rejection) -> Rejection {
        self.inner.reporter.warning(rejection.to_string());
        rejection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::state::BusConnectionState;
    use crate::reporter::Outbound;
    use tokio::sync::mpsc;
    use uv_studio_shared::{StatusEvent, StatusLevel};
    use uv_studio_shared::simulated::{SimulatedScreen, Visibility};

    fn controller(screen: SimulatedScreen) -> (JobController, mpsc::Receiver<Outbound>) {
        controller_with(&Config::default(), screen)
    }

    fn controller_with(
        config: &Config,
        screen: SimulatedScreen,
    ) -> (JobController, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(256);
        let (_bus_tx, bus_rx) = watch::channel(BusConnectionState::Connected);
        let bus = BusHandle::new(tx, bus_rx);
        (JobController::new(config, Arc::new(screen), bus), rx)
    }

    fn statuses(rx: &mut mpsc::Receiver<Outbound>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Outbound::Status(event) = message {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn stale_stopping_state_is_cleared_by_stop() {
        let (controller, _rx) = controller(SimulatedScreen::new());
        controller.inner.state.send_replace(JobState::Stopping(JobKind::TwelveMM));

        assert_eq!(controller.request_stop().await, Ok(StopOutcome::Cleared(JobKind::TwelveMM)));
        assert_eq!(controller.query_state(), JobState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_error_refuses_a_running_job() {
        let screen = SimulatedScreen::new().with("print_complete.png", Visibility::Hidden);
        let (controller, _rx) = controller(screen);
        controller.submit(JobKind::SixteenMM).unwrap();

        assert_eq!(controller.clear_error(), Err(Rejection::JobActive(JobKind::SixteenMM)));
        assert_eq!(controller.query_state(), JobState::Running(JobKind::SixteenMM));
        controller.shutdown(Duration::from_secs(600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_the_current_state() {
        let (controller, mut rx) = controller(SimulatedScreen::new());
        controller.report_status();
        match rx.recv().await.unwrap() {
            Outbound::Status(event) => assert_eq!(event.message, "Print job running: false (idle)"),
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_after_an_accepted_stop_still_ends_idle() {
        let mut config = Config::default();
        config.workflow.poll_interval_ms = 50;
        config.workflow.transition_delay_ms = 10;
        config.screen.settle_ms = 1;
        let screen = SimulatedScreen::new()
            .with("online.png", Visibility::Hidden)
            .with("printing.png", Visibility::Hidden);
        let (controller, mut rx) = controller_with(&config, screen);
        controller.submit(JobKind::TwelveMM).unwrap();

        // Holding the token slot parks the stop between "Stopping" and cancelling.
        let slot = lock(&controller.inner.cancel);
        let stopper = controller.clone();
        let stop = tokio::spawn(async move { stopper.request_stop().await });
        let mut states = controller.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == JobState::Stopping(JobKind::TwelveMM)),
        )
        .await
        .unwrap()
        .unwrap();

        // "Check online" runs out of attempts while the token is still live.
        tokio::time::timeout(Duration::from_secs(10), states.wait_for(|s| *s == JobState::Idle))
            .await
            .unwrap()
            .unwrap();
        drop(slot);

        assert_eq!(stop.await.unwrap(), Ok(StopOutcome::Cancelling(JobKind::TwelveMM)));
        while controller.job_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(controller.query_state(), JobState::Idle);
        let events = statuses(&mut rx);
        assert!(events.iter().any(|e| e.message == "12mm print was stopped"));
        assert!(events.iter().all(|e| e.level != StatusLevel::Error));
        assert!(events.iter().all(|e| !e.job_state.is_error()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_a_stop_already_in_flight() {
        let screen = SimulatedScreen::new().with("printing.png", Visibility::Hidden);
        let (controller, mut rx) = controller(screen);
        controller.inner.state.send_replace(JobState::Running(JobKind::SixteenMM));
        *lock(&controller.inner.cancel) = Some(CancellationToken::new());

        controller.spawn_stop();
        controller.shutdown(Duration::from_secs(600)).await;

        let events = statuses(&mut rx);
        let texts: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        assert!(texts.contains(&"Stopping"));
        assert_eq!(texts.last(), Some(&"Print job stop signal sent"));
    }
}
