// src/step.rs - bounded poll-and-act unit of a workflow
//
// A step runs its pre-actions once, then polls its condition until it is satisfied,
// the attempt budget runs out, or the job's cancellation token fires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uv_studio_shared::config::ScreenConfig;
use uv_studio_shared::{Point, Rect, ScreenDriver, ScreenError, Template};

use crate::reporter::StatusReporter;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Screen driver error: {0}")]
    Screen(#[from] ScreenError),
    #[error("Target window has not been prepared")]
    NoWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure,
    Cancelled,
}

/// How many times a condition may be evaluated before the step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    Limited(u32),
    /// Poll until satisfied or cancelled. Used only for waits with no natural bound.
    NoDeadline,
}

impl Attempts {
    fn exhausted(self, made: u32) -> bool {
        match self {
            Attempts::Limited(max) => made >= max,
            Attempts::NoDeadline => false,
        }
    }
}

impl fmt::Display for Attempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempts::Limited(max) => write!(f, "{} attempts", max),
            Attempts::NoDeadline => f.write_str("no deadline"),
        }
    }
}

/// A click target relative to the prepared window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    FromLeft { x: f64, y: f64 },
    FromRight { x: f64, y: f64 },
}

impl Anchor {
    pub fn resolve(&self, window: &Rect) -> Point {
        match *self {
            Anchor::FromLeft { x, y } => window.offset(x, y),
            Anchor::FromRight { x, y } => window.offset_from_right(x, y),
        }
    }
}

/// Performed once, in order, before the first poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(Anchor),
    Wait(Duration),
    Control(String),
}

/// The external condition a step waits for.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Find and activate the target window, remembering its bounds for later clicks.
    TargetWindow,
    Visible(Template),
    Absent(Template),
    /// Wait for the template, then click its center.
    ClickWhenVisible(Template),
    /// Click the template if it is on screen; satisfied either way.
    ClickIfVisible(Template),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::TargetWindow => f.write_str("target window"),
            Condition::Visible(t) => write!(f, "{} visible", t.name),
            Condition::Absent(t) => write!(f, "{} absent", t.name),
            Condition::ClickWhenVisible(t) => write!(f, "{} clickable", t.name),
            Condition::ClickIfVisible(t) => write!(f, "optional {}", t.name),
        }
    }
}

/// Everything a step needs while it runs. Owned by one pipeline execution.
pub struct StepContext {
    pub driver: Arc<dyn ScreenDriver>,
    pub token: CancellationToken,
    pub reporter: StatusReporter,
    pub window_title: String,
    pub display_scale: f64,
    pub settle: Duration,
    pub window: Option<Rect>,
}

impl StepContext {
    pub fn new(
        driver: Arc<dyn ScreenDriver>,
        token: CancellationToken,
        reporter: StatusReporter,
        screen: &ScreenConfig,
    ) -> Self {
        Self {
            driver,
            token,
            reporter,
            window_title: screen.window_title.clone(),
            display_scale: screen.display_scale(),
            settle: screen.settle(),
            window: None,
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns false on cancellation.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn click_window(&self, anchor: Anchor) -> Result<(), StepError> {
        let window = self.window.ok_or(StepError::NoWindow)?;
        self.driver.click(anchor.resolve(&window)).await?;
        self.driver.sleep(self.settle).await;
        Ok(())
    }

    async fn click_match(&self, template: &Template) -> Result<bool, StepError> {
        match self.driver.locate_template(template).await? {
            Some(center) => {
                self.driver.click(center.scaled(self.display_scale)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Immutable descriptor; holds no state between invocations.
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    announce: Option<String>,
    actions: Vec<Action>,
    condition: Condition,
    attempts: Attempts,
    poll_interval: Duration,
}

impl Step {
    pub fn new(
        name: impl Into<String>,
        condition: Condition,
        attempts: Attempts,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            announce: None,
            actions: Vec::new(),
            condition,
            attempts,
            poll_interval,
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// Operator-facing message published when the step begins.
    pub fn announce(mut self, message: impl Into<String>) -> Self {
        self.announce = Some(message.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn announcement(&self) -> Option<&str> {
        self.announce.as_deref()
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn attempts(&self) -> Attempts {
        self.attempts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub async fn attempt(&self, ctx: &mut StepContext) -> Result<StepOutcome, StepError> {
        for action in &self.actions {
            if ctx.token.is_cancelled() {
                return Ok(StepOutcome::Cancelled);
            }
            match action {
                Action::Click(anchor) => ctx.click_window(*anchor).await?,
                Action::Wait(duration) => {
                    if !ctx.pause(*duration).await {
                        return Ok(StepOutcome::Cancelled);
                    }
                }
                Action::Control(name) => ctx.reporter.control(name),
            }
        }

        let mut made = 0u32;
        loop {
            if self.attempts.exhausted(made) {
                tracing::warn!(
                    step = %self.name,
                    condition = %self.condition,
                    attempts = made,
                    "Step exhausted its attempts"
                );
                return Ok(StepOutcome::Failure);
            }
            if ctx.token.is_cancelled() {
                return Ok(StepOutcome::Cancelled);
            }
            if self.evaluate(ctx).await? {
                tracing::debug!(step = %self.name, attempts = made + 1, "Step satisfied");
                return Ok(StepOutcome::Success);
            }
            made += 1;
            if !ctx.pause(self.poll_interval).await {
                return Ok(StepOutcome::Cancelled);
            }
        }
    }

    async fn evaluate(&self, ctx: &mut StepContext) -> Result<bool, StepError> {
        match &self.condition {
            Condition::TargetWindow => {
                let window = ctx.driver.find_and_activate_window(&ctx.window_title).await?;
                if window.is_some() {
                    ctx.window = window;
                }
                Ok(window.is_some())
            }
            Condition::Visible(template) => Ok(ctx.driver.poll_for_template(template).await?),
            Condition::Absent(template) => Ok(!ctx.driver.poll_for_template(template).await?),
            Condition::ClickWhenVisible(template) => ctx.click_match(template).await,
            Condition::ClickIfVisible(template) => {
                ctx.click_match(template).await?;
                Ok(true)
            }
        }
    }
}
