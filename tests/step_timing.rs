// Timing bounds for step polling and cancellation under paused time

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uv_studio::bus::BusHandle;
use uv_studio::bus::state::BusConnectionState;
use uv_studio::pipeline::{Pipeline, PipelineOutcome};
use uv_studio::reporter::StatusReporter;
use uv_studio::step::{Attempts, Condition, Step, StepContext, StepOutcome};
use uv_studio_shared::config::ScreenConfig;
use uv_studio_shared::simulated::{SimulatedScreen, Visibility};
use uv_studio_shared::{JobState, Template};

fn context(screen: Arc<SimulatedScreen>, token: CancellationToken) -> StepContext {
    let (tx, _rx) = mpsc::channel(64);
    let (_bus, bus_rx) = watch::channel(BusConnectionState::Disconnected);
    let (_job, job_rx) = watch::channel(JobState::Idle);
    let reporter = StatusReporter::new(BusHandle::new(tx, bus_rx), job_rx);
    StepContext::new(screen, token, reporter, &ScreenConfig::default())
}

fn never_visible(attempts: Attempts, interval: Duration) -> Step {
    Step::new(
        "Wait until ready",
        Condition::Visible(Template::new("ready_to_start.png", 0.9)),
        attempts,
        interval,
    )
}

#[tokio::test(start_paused = true)]
async fn failing_step_takes_between_n_and_n_plus_one_intervals() {
    for (n, millis) in [(1u32, 250u64), (3, 1000), (7, 40)] {
        let screen = Arc::new(SimulatedScreen::new().with_default(Visibility::Hidden));
        let mut ctx = context(screen.clone(), CancellationToken::new());
        let interval = Duration::from_millis(millis);
        let step = never_visible(Attempts::Limited(n), interval);

        let started = Instant::now();
        assert_eq!(step.attempt(&mut ctx).await.unwrap(), StepOutcome::Failure);
        let elapsed = started.elapsed();

        assert!(elapsed >= interval * n, "n={} elapsed={:?}", n, elapsed);
        assert!(elapsed <= interval * (n + 1), "n={} elapsed={:?}", n, elapsed);
        assert_eq!(screen.polls("ready_to_start.png"), n);
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_observed_within_one_interval() {
    let screen = Arc::new(SimulatedScreen::new().with_default(Visibility::Hidden));
    let token = CancellationToken::new();
    let mut ctx = context(screen.clone(), token.clone());
    let interval = Duration::from_secs(1);
    let step = never_visible(Attempts::NoDeadline, interval);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(4500)).await;
        token.cancel();
        Instant::now()
    });
    let outcome = step.attempt(&mut ctx).await.unwrap();
    let observed = Instant::now();
    let cancelled_at = canceller.await.unwrap();

    assert_eq!(outcome, StepOutcome::Cancelled);
    assert!(observed - cancelled_at <= interval);
    assert_eq!(screen.polls("ready_to_start.png"), 5);
}

#[tokio::test(start_paused = true)]
async fn pipeline_reports_the_step_that_was_cancelled() {
    let screen = Arc::new(
        SimulatedScreen::new()
            .with("idle.png", Visibility::AfterPolls(2))
            .with("ready_to_start.png", Visibility::Hidden),
    );
    let token = CancellationToken::new();
    let mut ctx = context(screen.clone(), token.clone());
    let interval = Duration::from_millis(500);
    let pipeline = Pipeline::new(
        "print",
        vec![
            Step::new(
                "Wait for scan",
                Condition::Visible(Template::new("idle.png", 0.9)),
                Attempts::Limited(5),
                interval,
            ),
            never_visible(Attempts::Limited(600), interval),
        ],
    );

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
    });
    assert_eq!(
        pipeline.run(&mut ctx).await,
        PipelineOutcome::Cancelled {
            step: "Wait until ready".to_string()
        }
    );
    assert_eq!(screen.polls("idle.png"), 3);
}
