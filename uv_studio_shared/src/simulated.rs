// src/simulated.rs - deterministic in-memory screen driver
//! Deterministic in-memory [`ScreenDriver`].
//!
//! Every template follows a [`Visibility`] script evaluated against the number of
//! times it has been looked up so far. Lookups and clicks are recorded so callers
//! can assert on what a workflow did.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::screen::{Point, Rect, ScreenDriver, ScreenError, Template};

#[derive(Debug, Clone, PartialEq)]
pub enum Visibility {
    Visible,
    Hidden,
    /// Hidden for the first `n` lookups, visible afterwards.
    AfterPolls(u32),
    /// Visible for the first `n` lookups, hidden afterwards.
    UntilPolls(u32),
    /// Every lookup fails with a capture error.
    Fault(String),
}

#[derive(Debug)]
struct SimState {
    window: Option<Rect>,
    default: Visibility,
    rules: HashMap<String, Visibility>,
    polls: HashMap<String, u32>,
    clicks: Vec<Point>,
    activations: u32,
}

#[derive(Debug)]
pub struct SimulatedScreen {
    state: Mutex<SimState>,
}

const MATCH_CENTER: Point = Point { x: 640.0, y: 400.0 };

impl Default for SimulatedScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedScreen {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                window: Some(Rect::new(0.0, 0.0, 1280.0, 800.0)),
                default: Visibility::Visible,
                rules: HashMap::new(),
                polls: HashMap::new(),
                clicks: Vec::new(),
                activations: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves plain counters behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_default(self, visibility: Visibility) -> Self {
        self.lock().default = visibility;
        self
    }

    pub fn with(self, template: &str, visibility: Visibility) -> Self {
        self.set(template, visibility);
        self
    }

    pub fn set(&self, template: &str, visibility: Visibility) {
        self.lock().rules.insert(template.to_string(), visibility);
    }

    pub fn hide_all<'a>(&self, templates: impl IntoIterator<Item = &'a String>) {
        let mut state = self.lock();
        for name in templates {
            state.rules.insert(name.clone(), Visibility::Hidden);
        }
    }

    pub fn set_window(&self, window: Option<Rect>) {
        self.lock().window = window;
    }

    pub fn polls(&self, template: &str) -> u32 {
        self.lock().polls.get(template).copied().unwrap_or(0)
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.lock().clicks.clone()
    }

    pub fn activations(&self) -> u32 {
        self.lock().activations
    }
}

#[async_trait]
impl ScreenDriver for SimulatedScreen {
    async fn find_and_activate_window(&self, title: &str) -> Result<Option<Rect>, ScreenError> {
        let mut state = self.lock();
        state.activations += 1;
        tracing::debug!(title, found = state.window.is_some(), "simulated window lookup");
        Ok(state.window)
    }

    async fn locate_template(&self, template: &Template) -> Result<Option<Point>, ScreenError> {
        let mut state = self.lock();
        let seen = {
            let count = state.polls.entry(template.name.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let rule = state
            .rules
            .get(&template.name)
            .cloned()
            .unwrap_or_else(|| state.default.clone());
        let visible = match rule {
            Visibility::Visible => true,
            Visibility::Hidden => false,
            Visibility::AfterPolls(n) => seen >= n,
            Visibility::UntilPolls(n) => seen < n,
            Visibility::Fault(reason) => return Err(ScreenError::Capture(reason)),
        };
        Ok(visible.then_some(MATCH_CENTER))
    }

    async fn click(&self, point: Point) -> Result<(), ScreenError> {
        self.lock().clicks.push(point);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str) -> Template {
        Template::new(name, 0.9)
    }

    #[tokio::test]
    async fn scripts_follow_poll_counts() {
        let screen = SimulatedScreen::new()
            .with("idle.png", Visibility::AfterPolls(2))
            .with("printing.png", Visibility::UntilPolls(1));

        assert!(!screen.poll_for_template(&template("idle.png")).await.unwrap());
        assert!(!screen.poll_for_template(&template("idle.png")).await.unwrap());
        assert!(screen.poll_for_template(&template("idle.png")).await.unwrap());

        assert!(screen.poll_for_template(&template("printing.png")).await.unwrap());
        assert!(!screen.poll_for_template(&template("printing.png")).await.unwrap());

        assert_eq!(screen.polls("idle.png"), 3);
        assert_eq!(screen.polls("never.png"), 0);
    }

    #[tokio::test]
    async fn faults_surface_as_errors() {
        let screen =
            SimulatedScreen::new().with("online.png", Visibility::Fault("display asleep".into()));
        let err = screen.locate_template(&template("online.png")).await.unwrap_err();
        assert_eq!(err, ScreenError::Capture("display asleep".into()));
    }

    #[tokio::test]
    async fn records_window_and_clicks() {
        let screen = SimulatedScreen::new();
        assert!(screen.find_and_activate_window("eufy").await.unwrap().is_some());
        screen.click(Point::new(1.0, 2.0)).await.unwrap();
        screen.set_window(None);
        assert!(screen.find_and_activate_window("eufy").await.unwrap().is_none());
        assert_eq!(screen.activations(), 2);
        assert_eq!(screen.clicks(), vec![Point::new(1.0, 2.0)]);
    }
}
