// src/workflows.rs - pipelines for the print variants and the physical stop sequence

use std::time::Duration;
use uv_studio_shared::config::{ScreenConfig, WorkflowConfig};
use uv_studio_shared::{JobKind, Template};

use crate::pipeline::Pipeline;
use crate::step::{Action, Anchor, Attempts, Condition, Step};

/// Action name sent on the control topic when the printer's own start button must be pressed.
pub const PRESS_START_BUTTON: &str = "press_start_button";

pub mod templates {
    pub const CLEAN_BAR: &str = "clean-bar.png";
    pub const ONLINE: &str = "online.png";
    pub const IDLE: &str = "idle.png";
    pub const LOW_INK: &str = "low-ink.png";
    pub const SNAPSHOT: &str = "snapshot.png";
    pub const PRINT: &str = "print.png";
    pub const READY_TO_START: &str = "ready_to_start.png";
    pub const PRINTING: &str = "printing.png";
    pub const PRINT_COMPLETE: &str = "print_complete.png";
    pub const FINISH: &str = "finish.png";
    pub const STOP: &str = "stop.png";
    pub const CONFIRM: &str = "confirm.png";
    pub const STOP_FINISH: &str = "stop-finish.png";
}

// Window-relative layout of the studio application.
const HOME_BUTTON: Anchor = Anchor::FromLeft { x: 45.0, y: 45.0 };
const MACHINE_TAB: Anchor = Anchor::FromLeft { x: 130.0, y: 45.0 };
const SCAN_TRAY_OPTION: Anchor = Anchor::FromRight { x: 36.0, y: 360.0 };
const CANVAS_TABS_LEFT: f64 = 168.0;
const CANVAS_TAB_WIDTH: f64 = 128.0;
const TAB_ROW_Y: f64 = 45.0;
const CLEAN_BAR_CONFIDENCE: f32 = 0.8;

fn canvas_tab(kind: JobKind) -> Anchor {
    let index = kind.canvas_index() as f64;
    Anchor::FromLeft {
        x: CANVAS_TABS_LEFT + index * CANVAS_TAB_WIDTH + CANVAS_TAB_WIDTH / 2.0,
        y: TAB_ROW_Y,
    }
}

/// Builds pipelines from configuration. Cheap to clone and rebuild per job.
#[derive(Debug, Clone)]
pub struct Workflows {
    workflow: WorkflowConfig,
    confidence: f32,
}

impl Workflows {
    pub fn new(workflow: WorkflowConfig, screen: &ScreenConfig) -> Self {
        Self {
            workflow,
            confidence: screen.confidence,
        }
    }

    fn template(&self, name: &str) -> Template {
        Template::new(name, self.confidence)
    }

    fn interval(&self) -> Duration {
        self.workflow.poll_interval()
    }

    fn check(&self, name: &str, condition: Condition) -> Step {
        Step::new(name, condition, Attempts::Limited(self.workflow.check_attempts), self.interval())
    }

    fn prepare_window(&self) -> Step {
        Step::new(
            "Prepare window",
            Condition::TargetWindow,
            Attempts::Limited(self.workflow.window_attempts),
            self.interval(),
        )
    }

    pub fn print(&self, kind: JobKind) -> Pipeline {
        use templates::*;

        let wf = &self.workflow;
        let interval = self.interval();
        let tab = canvas_tab(kind);
        let settle = wf.transition_delay();

        let mut steps = vec![
            self.prepare_window().announce("Preparing eufy Make Studio"),
            self.check(
                "Reset UI",
                Condition::Visible(Template::new(CLEAN_BAR, CLEAN_BAR_CONFIDENCE)),
            )
            .with_actions(vec![Action::Click(HOME_BUTTON)]),
            self.check("Check online", Condition::Visible(self.template(ONLINE)))
                .with_actions(vec![Action::Click(tab)]),
            self.check("Check idle", Condition::Visible(self.template(IDLE)))
                .with_actions(vec![Action::Click(MACHINE_TAB)]),
        ];
        if wf.check_ink_level {
            steps.push(
                self.check("Check ink level", Condition::Absent(self.template(LOW_INK)))
                    .with_actions(vec![Action::Click(MACHINE_TAB)]),
            );
        }
        steps.extend([
            self.check("Scan tray", Condition::ClickWhenVisible(self.template(SNAPSHOT)))
                .with_actions(vec![Action::Click(tab), Action::Click(SCAN_TRAY_OPTION)])
                .announce("Scanning the tray"),
            Step::new(
                "Wait for scan",
                Condition::Visible(self.template(IDLE)),
                Attempts::Limited(wf.scan_max_polls),
                interval,
            )
            .with_actions(vec![Action::Wait(settle), Action::Click(MACHINE_TAB)]),
            self.check("Open print dialog", Condition::ClickWhenVisible(self.template(PRINT)))
                .with_actions(vec![Action::Click(tab)])
                .announce(format!("Starting {} print", kind)),
            Step::new(
                "Wait until ready",
                Condition::Visible(self.template(READY_TO_START)),
                Attempts::Limited(wf.ready_max_polls),
                interval,
            )
            .with_actions(vec![Action::Wait(settle)]),
            Step::new(
                "Press start button",
                Condition::Visible(self.template(PRINTING)),
                Attempts::Limited(wf.printing_max_polls),
                interval,
            )
            .with_actions(vec![
                Action::Control(PRESS_START_BUTTON.to_string()),
                Action::Wait(wf.start_button_delay()),
                Action::Click(MACHINE_TAB),
            ])
            .announce("Waiting for the printer to start"),
            // A print runs as long as the artwork needs; only a stop ends this wait early.
            Step::new(
                "Wait for completion",
                Condition::Visible(self.template(PRINT_COMPLETE)),
                Attempts::NoDeadline,
                interval,
            )
            .with_actions(vec![Action::Wait(settle)])
            .announce("Printing"),
            self.check("Finish print", Condition::ClickWhenVisible(self.template(FINISH))),
        ]);

        Pipeline::new(format!("{} print", kind), steps).with_prefix(kind.prefix())
    }

    /// Machine-stop sequence: press stop, confirm, wait for printing to end, then
    /// dismiss the final dialog.
    pub fn stop(&self) -> Pipeline {
        use templates::*;

        let wf = &self.workflow;
        let settle = wf.transition_delay();
        let steps = vec![
            self.prepare_window(),
            self.check("Press stop", Condition::ClickWhenVisible(self.template(STOP)))
                .with_actions(vec![Action::Click(MACHINE_TAB)]),
            self.check("Confirm stop", Condition::ClickWhenVisible(self.template(CONFIRM)))
                .with_actions(vec![Action::Wait(settle)]),
            Step::new(
                "Wait for printing to end",
                Condition::Absent(self.template(PRINTING)),
                Attempts::Limited(wf.stop_wait_max_polls),
                self.interval(),
            )
            .with_actions(vec![Action::Wait(settle)]),
            Step::new(
                "Dismiss stop dialog",
                Condition::ClickIfVisible(self.template(STOP_FINISH)),
                Attempts::Limited(1),
                self.interval(),
            )
            .with_actions(vec![Action::Wait(settle)]),
        ];
        Pipeline::new("stop", steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflows(check_ink_level: bool) -> Workflows {
        let workflow = WorkflowConfig {
            check_ink_level,
            ..WorkflowConfig::default()
        };
        Workflows::new(workflow, &ScreenConfig::default())
    }

    fn names(pipeline: &Pipeline) -> Vec<&str> {
        pipeline.steps().iter().map(|s| s.name()).collect()
    }

    #[test]
    fn print_pipeline_order() {
        let pipeline = workflows(false).print(JobKind::TwelveMM);
        assert_eq!(
            names(&pipeline),
            vec![
                "Prepare window",
                "Reset UI",
                "Check online",
                "Check idle",
                "Scan tray",
                "Wait for scan",
                "Open print dialog",
                "Wait until ready",
                "Press start button",
                "Wait for completion",
                "Finish print",
            ]
        );
        assert_eq!(pipeline.name(), "12mm print");
    }

    #[test]
    fn ink_check_is_optional() {
        let pipeline = workflows(true).print(JobKind::SixteenMM);
        assert!(names(&pipeline).contains(&"Check ink level"));
    }

    #[test]
    fn canvas_tab_follows_job_kind() {
        assert_eq!(canvas_tab(JobKind::TwelveMM), Anchor::FromLeft { x: 232.0, y: 45.0 });
        assert_eq!(canvas_tab(JobKind::SixteenMM), Anchor::FromLeft { x: 360.0, y: 45.0 });
    }

    #[test]
    fn only_completion_wait_has_no_deadline() {
        let pipeline = workflows(false).print(JobKind::TwelveMM);
        let unbounded: Vec<&str> = pipeline
            .steps()
            .iter()
            .filter(|s| s.attempts() == Attempts::NoDeadline)
            .map(|s| s.name())
            .collect();
        assert_eq!(unbounded, vec!["Wait for completion"]);
        let stop = workflows(false).stop();
        assert!(stop.steps().iter().all(|s| s.attempts() != Attempts::NoDeadline));
    }

    #[test]
    fn start_button_is_requested_over_control_topic() {
        let pipeline = workflows(false).print(JobKind::TwelveMM);
        let press = pipeline.steps().iter().find(|s| s.name() == "Press start button").unwrap();
        assert_eq!(press.actions()[0], Action::Control(PRESS_START_BUTTON.to_string()));
    }
}
