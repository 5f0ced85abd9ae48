//! Back/next gating and phase transitions of a single wizard step.

use crate::error::{WizardError, WizardResult};
use crate::model::{Gating, OverallStatus, StepPhase};

/// Snapshot of everything gating depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInputs {
    pub form_valid: bool,
    pub chosen: usize,
    pub overall: OverallStatus,
}

/// Outcome of asking to proceed from `Editing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proceed {
    /// The operator has to confirm before anything is launched.
    Confirm,
    /// Launch right away.
    Launch,
}

#[derive(Debug, Clone)]
pub struct WizardStepController {
    phase: StepPhase,
    requires_confirmation: bool,
    selection_driven: bool,
}

impl WizardStepController {
    pub fn new(requires_confirmation: bool, selection_driven: bool) -> Self {
        Self {
            phase: StepPhase::Editing,
            requires_confirmation,
            selection_driven,
        }
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn gating(&self, inputs: StepInputs) -> Gating {
        let overall = inputs.overall;
        let (back_enabled, next_enabled) = match self.phase {
            StepPhase::Editing => (
                true,
                inputs.form_valid && (!self.selection_driven || inputs.chosen > 0),
            ),
            StepPhase::AwaitingConfirmation => (false, false),
            StepPhase::Executing => (
                matches!(overall, OverallStatus::Complete | OverallStatus::Failed),
                overall == OverallStatus::Complete,
            ),
            StepPhase::Complete => (true, true),
            StepPhase::Failed => (true, false),
        };
        Gating {
            phase: self.phase,
            back_enabled,
            next_enabled,
            show_failure_banner: overall == OverallStatus::Failed,
        }
    }

    /// Editing -> AwaitingConfirmation (or straight to launch when no confirmation is needed).
    pub fn request_proceed(&mut self, inputs: StepInputs) -> WizardResult<Proceed> {
        if self.phase != StepPhase::Editing {
            return Err(self.not_allowed("proceed"));
        }
        if !self.gating(inputs).next_enabled {
            return Err(WizardError::Validation(
                "the form is incomplete or nothing is selected".into(),
            ));
        }
        if self.requires_confirmation {
            self.phase = StepPhase::AwaitingConfirmation;
            Ok(Proceed::Confirm)
        } else {
            Ok(Proceed::Launch)
        }
    }

    /// AwaitingConfirmation -> Executing. Also accepts Editing for steps without confirmation.
    pub fn begin_executing(&mut self) -> WizardResult<()> {
        match self.phase {
            StepPhase::AwaitingConfirmation => {}
            StepPhase::Editing if !self.requires_confirmation => {}
            _ => return Err(self.not_allowed("launch")),
        }
        self.phase = StepPhase::Executing;
        Ok(())
    }

    /// AwaitingConfirmation -> Editing, nothing executed.
    pub fn cancel(&mut self) -> WizardResult<()> {
        if self.phase != StepPhase::AwaitingConfirmation {
            return Err(self.not_allowed("cancel"));
        }
        self.phase = StepPhase::Editing;
        Ok(())
    }

    /// Resume a step whose runs were already in flight when it was mounted.
    pub fn resume_executing(&mut self) {
        self.phase = StepPhase::Executing;
    }

    /// Fold a new overall status into the phase.
    pub fn observe(&mut self, overall: OverallStatus) -> StepPhase {
        if self.phase == StepPhase::Executing {
            self.phase = match overall {
                OverallStatus::Complete => StepPhase::Complete,
                OverallStatus::Failed => StepPhase::Failed,
                OverallStatus::Running | OverallStatus::Unknown => StepPhase::Executing,
            };
        }
        self.phase
    }

    /// Back to a clean `Editing` state, as on re-entry.
    pub fn restart(&mut self) {
        self.phase = StepPhase::Editing;
    }

    fn not_allowed(&self, action: &str) -> WizardError {
        WizardError::NotAllowed(format!("cannot {action} while {:?}", self.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(form_valid: bool, chosen: usize, overall: OverallStatus) -> StepInputs {
        StepInputs {
            form_valid,
            chosen,
            overall,
        }
    }

    #[test]
    fn editing_needs_valid_form_and_selection() {
        let ctl = WizardStepController::new(true, true);
        let g = ctl.gating(inputs(true, 0, OverallStatus::Unknown));
        assert!(g.back_enabled);
        assert!(!g.next_enabled);
        assert!(!ctl.gating(inputs(false, 2, OverallStatus::Unknown)).next_enabled);
        assert!(ctl.gating(inputs(true, 2, OverallStatus::Unknown)).next_enabled);

        let plain = WizardStepController::new(false, false);
        assert!(plain.gating(inputs(true, 0, OverallStatus::Unknown)).next_enabled);
    }

    #[test]
    fn confirmation_round_trip_has_no_side_effects() {
        let mut ctl = WizardStepController::new(true, true);
        let ready = inputs(true, 1, OverallStatus::Unknown);
        assert_eq!(ctl.request_proceed(ready).unwrap(), Proceed::Confirm);
        let g = ctl.gating(ready);
        assert!(!g.back_enabled && !g.next_enabled);
        ctl.cancel().unwrap();
        assert_eq!(ctl.phase(), StepPhase::Editing);
        ctl.request_proceed(ready).unwrap();
        ctl.begin_executing().unwrap();
        assert_eq!(ctl.phase(), StepPhase::Executing);
    }

    #[test]
    fn proceed_refused_when_gated() {
        let mut ctl = WizardStepController::new(true, true);
        assert!(matches!(
            ctl.request_proceed(inputs(true, 0, OverallStatus::Unknown)),
            Err(WizardError::Validation(_))
        ));
        assert!(ctl.begin_executing().is_err());
        assert!(ctl.cancel().is_err());
    }

    #[test]
    fn executing_gates_on_overall_status() {
        let mut ctl = WizardStepController::new(false, true);
        assert_eq!(
            ctl.request_proceed(inputs(true, 1, OverallStatus::Unknown))
                .unwrap(),
            Proceed::Launch
        );
        ctl.begin_executing().unwrap();

        let running = ctl.gating(inputs(true, 1, OverallStatus::Running));
        assert!(!running.back_enabled && !running.next_enabled);

        assert_eq!(ctl.observe(OverallStatus::Running), StepPhase::Executing);
        assert_eq!(ctl.observe(OverallStatus::Complete), StepPhase::Complete);
        let done = ctl.gating(inputs(true, 1, OverallStatus::Complete));
        assert!(done.back_enabled && done.next_enabled && !done.show_failure_banner);
    }

    #[test]
    fn failure_shows_banner_and_allows_back() {
        let mut ctl = WizardStepController::new(false, true);
        ctl.begin_executing().unwrap();
        assert_eq!(ctl.observe(OverallStatus::Failed), StepPhase::Failed);
        let g = ctl.gating(inputs(true, 1, OverallStatus::Failed));
        assert!(g.back_enabled && !g.next_enabled && g.show_failure_banner);
        ctl.restart();
        assert_eq!(ctl.phase(), StepPhase::Editing);
    }
}
