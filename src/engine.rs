//! The step engine: validates attempted actions against the instruction
//! script, mutates the bench on success, advances the cursor, auto-runs
//! internal steps, and keeps the undo history and action journal.

use crate::{
    data_table::{DataTable, UNKNOWN_ROW_ID},
    history::History,
    instructions::{default_script, InstructionStep, Script, StepRequirement},
    lab_objects::{starting_bench, InstrumentState, LabBench, ObjectId, WASTE_ID},
    optics::{
        absorbance_from_percent_t, percent_t_from_absorbance, simulated_percent_transmittance,
        MAX_ABS, UNKNOWN_CONCENTRATION,
    },
};
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt};

pub type ActionId = String;

/// Volumes this close to zero are treated as empty; transfers are conserved
/// to within this amount.
pub const VOLUME_EPSILON: f64 = 0.001;
/// How far a dispensed volume may deviate from the step's required volume.
pub const DISPENSE_VOLUME_TOLERANCE: f64 = 0.01;
/// Concentrations this close to zero count as blank.
pub const BLANK_CONCENTRATION_TOLERANCE: f64 = 0.0001;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorCode {
    SequenceMismatch,
    Precondition,
    OffScale,
    Internal,
    Io,
    InvalidInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for SimError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Success,
    Info,
    Error,
}

/// The latest user-facing message, kept for the presentation surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: ActionId,
    pub messages: Vec<String>,
    pub warnings: Vec<String>,
    pub severity: Severity,
    pub step_completed: bool,
    pub state_changed: bool,
    pub steps_auto_advanced: usize,
}

/// A user-attemptable action. `ToggleMode` and `RemoveCuvette` are never
/// gated by the script; everything else must match the current step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    FillPipette {
        pipette_id: ObjectId,
        source_id: ObjectId,
    },
    DispensePipette {
        pipette_id: ObjectId,
        dest_id: ObjectId,
        volume: f64,
    },
    EmptyCuvette {
        cuvette_id: ObjectId,
        waste_id: ObjectId,
    },
    InsertCuvette {
        cuvette_id: ObjectId,
        spec_id: ObjectId,
    },
    RemoveCuvette {
        cuvette_id: ObjectId,
    },
    ZeroSpec,
    Measure,
    ToggleMode,
}

/// The full undoable domain state: one snapshot of this struct is pushed to
/// history before every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabState {
    pub current_step: usize,
    pub bench: LabBench,
    pub instrument: InstrumentState,
    pub table: DataTable,
}

impl Default for LabState {
    fn default() -> Self {
        LabState {
            current_step: 0,
            bench: starting_bench(),
            instrument: InstrumentState::default(),
            table: DataTable::initial(),
        }
    }
}

impl LabState {
    pub fn load_from_path(path: &str) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|e| SimError {
            code: ErrorCode::Io,
            message: format!("Could not read state file '{path}': {e}"),
        })?;
        serde_json::from_str(&text).map_err(|e| SimError {
            code: ErrorCode::InvalidInput,
            message: format!("Could not parse state JSON '{path}': {e}"),
        })
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), SimError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| SimError {
            code: ErrorCode::Internal,
            message: format!("Could not serialize state: {e}"),
        })?;
        std::fs::write(path, text).map_err(|e| SimError {
            code: ErrorCode::Io,
            message: format!("Could not write state file '{path}': {e}"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub result: ActionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_actions: Vec<String>,
    pub supported_export_formats: Vec<String>,
    pub deterministic_action_log: bool,
}

pub trait Engine {
    fn apply(&mut self, action: Action) -> Result<ActionOutcome, SimError>;
    fn undo(&mut self) -> Result<ActionOutcome, SimError>;
    fn snapshot(&self) -> &LabState;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulator {
    script: Script,
    state: LabState,
    history: History<LabState>,
    feedback: Feedback,
    journal: Vec<ActionRecord>,
    action_counter: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Simulator {
        Self::with_script(default_script())
    }

    pub fn with_script(script: Script) -> Simulator {
        Self::build(script, LabState::default())
    }

    pub fn from_state(state: LabState) -> Simulator {
        Self::build(default_script(), state)
    }

    fn build(script: Script, state: LabState) -> Simulator {
        let mut sim = Simulator {
            script,
            state,
            history: History::default(),
            feedback: Feedback {
                message: "Welcome! Follow the instructions.".to_string(),
                severity: Severity::Info,
            },
            journal: Vec::new(),
            action_counter: 0,
        };
        // Leading internal steps run immediately, as they would after any
        // completed action.
        let mut outcome = ActionOutcome {
            action_id: "init".to_string(),
            messages: vec![],
            warnings: vec![],
            severity: Severity::Info,
            step_completed: false,
            state_changed: false,
            steps_auto_advanced: 0,
        };
        sim.auto_advance(&mut outcome);
        if !outcome.warnings.is_empty() {
            sim.feedback = Feedback {
                message: outcome.warnings.join(" "),
                severity: Severity::Error,
            };
        }
        sim
    }

    pub fn state(&self) -> &LabState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LabState {
        &mut self.state
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    pub fn action_log(&self) -> &[ActionRecord] {
        &self.journal
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn history_depth(&self) -> usize {
        self.history.len()
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: "v1".to_string(),
            supported_actions: vec![
                "FillPipette".to_string(),
                "DispensePipette".to_string(),
                "EmptyCuvette".to_string(),
                "InsertCuvette".to_string(),
                "RemoveCuvette".to_string(),
                "ZeroSpec".to_string(),
                "Measure".to_string(),
                "ToggleMode".to_string(),
                "Undo".to_string(),
            ],
            supported_export_formats: vec!["Csv".to_string(), "GraphSvg".to_string()],
            deterministic_action_log: true,
        }
    }

    fn next_action_id(&mut self) -> ActionId {
        self.action_counter += 1;
        format!("act-{}", self.action_counter)
    }

    fn current_step(&self) -> Option<&InstructionStep> {
        self.script.step(self.state.current_step)
    }

    fn sequence_mismatch(&self) -> SimError {
        let hint = self
            .current_step()
            .and_then(|step| step.hint.clone())
            .unwrap_or_else(|| "Follow the instructions.".to_string());
        SimError {
            code: ErrorCode::SequenceMismatch,
            message: format!("Incorrect action. {hint}"),
        }
    }

    fn save_snapshot(&mut self) {
        self.history.push(self.state.clone());
    }

    /// Advances past the just-satisfied step, then runs any internal steps
    /// sitting at the new cursor.
    fn complete_current_step(&mut self, outcome: &mut ActionOutcome) {
        self.state.current_step += 1;
        outcome.step_completed = true;
        self.auto_advance(outcome);
    }

    /// Skips `Info` steps and executes `SetUnknownFlag` steps until the
    /// cursor rests on an interactive step (or an internal action fails,
    /// which leaves the cursor in place and surfaces a warning). Each
    /// iteration re-reads the step at the current cursor.
    fn auto_advance(&mut self, outcome: &mut ActionOutcome) {
        loop {
            let requires = match self.script.step(self.state.current_step) {
                Some(step) => step.requires.clone(),
                None => break,
            };
            match requires {
                StepRequirement::Info => {
                    self.save_snapshot();
                    self.state.current_step += 1;
                    outcome.steps_auto_advanced += 1;
                }
                StepRequirement::SetUnknownFlag { cuvette } => {
                    self.save_snapshot();
                    match self.set_unknown_flag(&cuvette) {
                        Ok(()) => {
                            self.state.current_step += 1;
                            outcome.steps_auto_advanced += 1;
                        }
                        Err(err) => {
                            outcome.warnings.push(err.message);
                            return;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn set_unknown_flag(&mut self, cuvette_id: &str) -> Result<(), SimError> {
        let Some(cuvette) = self.state.bench.cuvette_mut(cuvette_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal simulation error setting unknown flag.".to_string(),
            });
        };
        cuvette.concentration = UNKNOWN_CONCENTRATION;
        Ok(())
    }

    fn placeholder_reading(&self) -> String {
        if self.state.instrument.absorbance_mode {
            "-- Abs".to_string()
        } else {
            "-- %T".to_string()
        }
    }

    fn zero_reading(&self) -> String {
        if self.state.instrument.absorbance_mode {
            "0.000 Abs".to_string()
        } else {
            "100.0 %T".to_string()
        }
    }

    fn over_range_reading(&self) -> String {
        if self.state.instrument.absorbance_mode {
            ">1.5 Abs".to_string()
        } else {
            "0.0 %T".to_string()
        }
    }

    fn measured_reading(&self, percent_t: f64, absorbance: f64) -> String {
        if self.state.instrument.absorbance_mode {
            if absorbance.is_infinite() || absorbance > 10.0 {
                ">10 Abs".to_string()
            } else {
                format!("{:.3} Abs", absorbance)
            }
        } else {
            format!("{:.1} %T", percent_t)
        }
    }

    fn apply_action(&mut self, action: Action) -> Result<ActionOutcome, SimError> {
        let action_id = self.next_action_id();
        let mut outcome = ActionOutcome {
            action_id,
            messages: vec![],
            warnings: vec![],
            severity: Severity::Success,
            step_completed: false,
            state_changed: false,
            steps_auto_advanced: 0,
        };
        match action {
            Action::FillPipette {
                pipette_id,
                source_id,
            } => self.try_fill_pipette(&pipette_id, &source_id, &mut outcome)?,
            Action::DispensePipette {
                pipette_id,
                dest_id,
                volume,
            } => self.try_dispense_pipette(&pipette_id, &dest_id, volume, &mut outcome)?,
            Action::EmptyCuvette {
                cuvette_id,
                waste_id,
            } => self.try_empty_cuvette(&cuvette_id, &waste_id, &mut outcome)?,
            Action::InsertCuvette {
                cuvette_id,
                spec_id,
            } => self.try_insert_cuvette(&cuvette_id, &spec_id, &mut outcome)?,
            Action::RemoveCuvette { cuvette_id } => {
                self.try_remove_cuvette(&cuvette_id, &mut outcome)?
            }
            Action::ZeroSpec => self.try_zero_spec(&mut outcome)?,
            Action::Measure => self.try_measure(&mut outcome)?,
            Action::ToggleMode => self.toggle_mode(&mut outcome),
        }
        Ok(outcome)
    }

    fn try_fill_pipette(
        &mut self,
        pipette_id: &str,
        source_id: &str,
        outcome: &mut ActionOutcome,
    ) -> Result<(), SimError> {
        let required_volume = match self.current_step().map(|step| &step.requires) {
            Some(StepRequirement::FillPipette {
                pipette,
                source,
                volume,
            }) if pipette.as_str() == pipette_id && source.as_str() == source_id => *volume,
            _ => return Err(self.sequence_mismatch()),
        };

        let Some(source) = self.state.bench.object(source_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Pipette or source not found.".to_string(),
            });
        };
        let source_volume = source.current_volume();
        let source_label = source.label().to_string();
        let source_concentration = source.transfer_concentration().unwrap_or(0.0);

        let Some(pipette) = self.state.bench.pipette(pipette_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Pipette or source not found.".to_string(),
            });
        };
        if pipette.current_volume > 0.0 {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Pipette must be empty before filling.".to_string(),
            });
        }
        if source_volume < required_volume {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: format!(
                    "Not enough liquid in {}. Need {}mL.",
                    source_label, required_volume
                ),
            });
        }

        self.save_snapshot();
        if let Some(pipette) = self.state.bench.pipette_mut(pipette_id) {
            pipette.current_volume = required_volume;
            pipette.contents_concentration = source_concentration;
        }
        if let Some(source) = self.state.bench.object_mut(source_id) {
            source.set_current_volume(source_volume - required_volume);
        }
        outcome.state_changed = true;
        outcome.messages.push(format!(
            "Pipette filled with {}mL from {}.",
            required_volume, source_label
        ));
        self.complete_current_step(outcome);
        Ok(())
    }

    fn try_dispense_pipette(
        &mut self,
        pipette_id: &str,
        dest_id: &str,
        volume: f64,
        outcome: &mut ActionOutcome,
    ) -> Result<(), SimError> {
        let step_volume = match self.current_step().map(|step| &step.requires) {
            Some(StepRequirement::DispensePipette {
                pipette,
                destination,
                volume: step_volume,
            }) if pipette.as_str() == pipette_id && destination.as_str() == dest_id => *step_volume,
            _ => return Err(self.sequence_mismatch()),
        };
        if let Some(required) = step_volume {
            if (volume - required).abs() > DISPENSE_VOLUME_TOLERANCE {
                return Err(SimError {
                    code: ErrorCode::SequenceMismatch,
                    message: format!("Incorrect volume dispensed. Expected {}mL.", required),
                });
            }
        }

        let Some(pipette) = self.state.bench.pipette(pipette_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Pipette or destination not found.".to_string(),
            });
        };
        let pipette_volume = pipette.current_volume;
        let added_concentration = pipette.contents_concentration;
        if pipette_volume < volume - VOLUME_EPSILON {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Not enough liquid in pipette.".to_string(),
            });
        }

        let Some(dest) = self.state.bench.object(dest_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Pipette or destination not found.".to_string(),
            });
        };
        let dest_volume = dest.current_volume();
        let dest_concentration = dest.transfer_concentration();
        let dest_label = dest.label().to_string();
        let dest_is_cuvette = dest.is_cuvette();
        if dest_volume + volume > dest.max_volume() + VOLUME_EPSILON {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: format!("{} will overflow.", dest_label),
            });
        }

        let final_volume = dest_volume + volume;
        let final_concentration = if final_volume > VOLUME_EPSILON {
            if dest_concentration.is_none() || dest_volume < VOLUME_EPSILON {
                // An effectively empty destination takes the added liquid's
                // concentration verbatim, avoiding drift from a 0-volume term.
                added_concentration
            } else if dest_is_cuvette
                && added_concentration == 0.0
                && dest_concentration == Some(0.0)
            {
                0.0
            } else {
                let c1 = dest_concentration.unwrap_or(0.0);
                (c1 * dest_volume + added_concentration * volume) / final_volume
            }
        } else {
            0.0
        };

        self.save_snapshot();
        if let Some(dest) = self.state.bench.object_mut(dest_id) {
            dest.set_current_volume(final_volume);
            dest.set_concentration(final_concentration);
        }
        if let Some(pipette) = self.state.bench.pipette_mut(pipette_id) {
            pipette.current_volume -= volume;
            if pipette.current_volume < VOLUME_EPSILON {
                pipette.current_volume = 0.0;
                pipette.contents_concentration = 0.0;
            }
        }
        outcome.state_changed = true;
        outcome
            .messages
            .push(format!("Dispensed {:.1}mL into {}.", volume, dest_label));
        self.complete_current_step(outcome);
        Ok(())
    }

    /// Emptying is always physically allowed; only a step match advances the
    /// cursor and only a matching step's `mark_clean` leaves the cuvette
    /// clean.
    fn try_empty_cuvette(
        &mut self,
        cuvette_id: &str,
        waste_id: &str,
        outcome: &mut ActionOutcome,
    ) -> Result<(), SimError> {
        if waste_id != WASTE_ID {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Can only empty into Waste.".to_string(),
            });
        }
        if self.state.bench.object(waste_id).is_none() {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error.".to_string(),
            });
        }
        let Some(cuvette) = self.state.bench.cuvette(cuvette_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error.".to_string(),
            });
        };
        if cuvette.is_in_spec {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message:
                    "Cannot empty cuvette while inside the Spectrophotometer. Drag it out first."
                        .to_string(),
            });
        }
        let cuvette_volume = cuvette.current_volume;
        if cuvette_volume <= 0.0 {
            outcome.severity = Severity::Info;
            outcome
                .messages
                .push("Cuvette is already empty.".to_string());
            return Ok(());
        }

        let step_matches = matches!(
            self.current_step().map(|step| &step.requires),
            Some(StepRequirement::EmptyCuvette {
                cuvette,
                destination,
            }) if cuvette.as_str() == cuvette_id && destination.as_str() == waste_id
        );
        let mark_clean = step_matches
            && self
                .current_step()
                .map(|step| step.flags.mark_clean)
                .unwrap_or(false);

        self.save_snapshot();
        if let Some(waste) = self.state.bench.object_mut(waste_id) {
            let new_volume = (waste.current_volume() + cuvette_volume).min(waste.max_volume());
            waste.set_current_volume(new_volume);
        }
        if let Some(cuvette) = self.state.bench.cuvette_mut(cuvette_id) {
            cuvette.current_volume = 0.0;
            cuvette.concentration = 0.0;
            cuvette.is_clean = mark_clean;
        }
        outcome.state_changed = true;
        outcome
            .messages
            .push("Cuvette emptied into Waste.".to_string());
        if mark_clean {
            outcome.messages.push("It is now clean.".to_string());
        }
        if step_matches {
            outcome.messages.push("Step complete.".to_string());
            self.complete_current_step(outcome);
        }
        Ok(())
    }

    fn try_insert_cuvette(
        &mut self,
        cuvette_id: &str,
        spec_id: &str,
        outcome: &mut ActionOutcome,
    ) -> Result<(), SimError> {
        let flags = match self
            .current_step()
            .map(|step| (&step.requires, &step.flags))
        {
            Some((
                StepRequirement::InsertCuvette {
                    cuvette,
                    destination,
                },
                flags,
            )) if cuvette.as_str() == cuvette_id && destination.as_str() == spec_id => {
                flags.clone()
            }
            _ => return Err(self.sequence_mismatch()),
        };

        if self.state.instrument.id != spec_id {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Cuvette or Spectrophotometer not found.".to_string(),
            });
        }
        let Some(cuvette) = self.state.bench.cuvette(cuvette_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Cuvette or Spectrophotometer not found.".to_string(),
            });
        };
        if self.state.instrument.cuvette_inside_id.is_some() {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Spectrophotometer already contains a cuvette.".to_string(),
            });
        }
        if cuvette.is_in_spec {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cuvette is already in the Spectrophotometer.".to_string(),
            });
        }
        if cuvette.current_volume <= 0.0 && !flags.allow_empty {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cannot insert an empty cuvette at this step.".to_string(),
            });
        }
        if !cuvette.is_clean && !flags.allow_dirty_insert {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cuvette must be rinsed before adding a new sample.".to_string(),
            });
        }

        self.save_snapshot();
        if let Some(cuvette) = self.state.bench.cuvette_mut(cuvette_id) {
            cuvette.is_in_spec = true;
        }
        self.state.instrument.cuvette_inside_id = Some(cuvette_id.to_string());
        self.state.instrument.reading = self.placeholder_reading();
        outcome.state_changed = true;
        outcome
            .messages
            .push("Cuvette inserted into Spectrophotometer.".to_string());
        self.complete_current_step(outcome);
        Ok(())
    }

    fn try_remove_cuvette(
        &mut self,
        cuvette_id: &str,
        outcome: &mut ActionOutcome,
    ) -> Result<(), SimError> {
        let Some(cuvette) = self.state.bench.cuvette(cuvette_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Cuvette not found.".to_string(),
            });
        };
        if !cuvette.is_in_spec {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cuvette is not in the Spectrophotometer.".to_string(),
            });
        }

        self.save_snapshot();
        if let Some(cuvette) = self.state.bench.cuvette_mut(cuvette_id) {
            cuvette.is_in_spec = false;
        }
        self.state.instrument.cuvette_inside_id = None;
        self.state.instrument.reading = self.placeholder_reading();
        outcome.state_changed = true;
        outcome.severity = Severity::Info;
        outcome
            .messages
            .push("Cuvette removed from the spectrophotometer.".to_string());
        Ok(())
    }

    fn try_zero_spec(&mut self, outcome: &mut ActionOutcome) -> Result<(), SimError> {
        match self.current_step().map(|step| &step.requires) {
            Some(StepRequirement::ZeroSpec) => {}
            _ => return Err(self.sequence_mismatch()),
        }

        let Some(inside_id) = self.state.instrument.cuvette_inside_id.clone() else {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cannot zero. Insert Blank (0 µM) cuvette first.".to_string(),
            });
        };
        let Some(cuvette) = self.state.bench.cuvette(&inside_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Cuvette not found.".to_string(),
            });
        };
        if cuvette.concentration.abs() > BLANK_CONCENTRATION_TOLERANCE {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cannot zero. Insert Blank (0 µM) cuvette first.".to_string(),
            });
        }

        self.save_snapshot();
        self.state.instrument.is_zeroed = true;
        self.state.instrument.reading = self.zero_reading();
        outcome.state_changed = true;
        outcome
            .messages
            .push("Spectrophotometer zeroed.".to_string());
        self.complete_current_step(outcome);
        Ok(())
    }

    fn try_measure(&mut self, outcome: &mut ActionOutcome) -> Result<(), SimError> {
        let (target_row_id, flags) = match self
            .current_step()
            .map(|step| (&step.requires, &step.flags))
        {
            Some((StepRequirement::Measure { target_data_row_id }, flags)) => {
                (target_data_row_id.clone(), flags.clone())
            }
            _ => return Err(self.sequence_mismatch()),
        };

        let Some(inside_id) = self.state.instrument.cuvette_inside_id.clone() else {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cannot measure. No cuvette in Spectrophotometer.".to_string(),
            });
        };
        if !self.state.instrument.is_zeroed {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cannot measure. Spectrophotometer must be zeroed first.".to_string(),
            });
        }
        let Some(cuvette) = self.state.bench.cuvette(&inside_id) else {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: "Internal error: Cuvette not found.".to_string(),
            });
        };
        let concentration = cuvette.concentration;
        if concentration.abs() < BLANK_CONCENTRATION_TOLERANCE && !flags.allow_blank_measure {
            return Err(SimError {
                code: ErrorCode::Precondition,
                message: "Cannot measure the blank again at this step.".to_string(),
            });
        }

        let percent_t = simulated_percent_transmittance(concentration);
        let absorbance = absorbance_from_percent_t(percent_t);
        if absorbance > MAX_ABS && !flags.allow_high_abs {
            // The display still flips to the out-of-range indicator; no
            // history push, no cursor advance.
            self.state.instrument.reading = self.over_range_reading();
            return Err(SimError {
                code: ErrorCode::OffScale,
                message: "Absorbance too high (> 1.5) to measure accurately.".to_string(),
            });
        }

        let row_id = target_row_id.unwrap_or_else(|| UNKNOWN_ROW_ID.to_string());
        if self.state.table.row(&row_id).is_none() {
            return Err(SimError {
                code: ErrorCode::Internal,
                message: format!("Internal error: data row '{}' not found.", row_id),
            });
        }

        self.save_snapshot();
        self.state.instrument.reading = self.measured_reading(percent_t, absorbance);
        if let Some(row) = self.state.table.row_mut(&row_id) {
            row.record(percent_t, absorbance);
        }
        outcome.state_changed = true;
        outcome.messages.push(format!(
            "Measurement complete: {}.",
            self.state.instrument.reading
        ));
        self.complete_current_step(outcome);
        Ok(())
    }

    fn toggle_mode(&mut self, outcome: &mut ActionOutcome) {
        let to_absorbance = !self.state.instrument.absorbance_mode;
        let new_reading = self.toggled_reading(to_absorbance);
        self.state.instrument.absorbance_mode = to_absorbance;
        self.state.instrument.reading = new_reading;
        outcome.state_changed = true;
        outcome.severity = Severity::Info;
        outcome.messages.push(format!(
            "Display mode changed to: {}.",
            if to_absorbance {
                "Absorbance"
            } else {
                "%Transmittance"
            }
        ));
    }

    /// Re-renders the current reading on the other scale. Conversion order
    /// matters: a live numeric reading converts by value; the zeroed blank
    /// and the out-of-range indicator map to their fixed counterparts;
    /// anything else falls back to the placeholder.
    fn toggled_reading(&self, to_absorbance: bool) -> String {
        let instrument = &self.state.instrument;
        let reading = instrument.reading.as_str();
        let cuvette_inside = instrument.cuvette_inside_id.is_some();

        if cuvette_inside && reading != "-- %T" && reading != "-- Abs" && !reading.starts_with('>')
        {
            if let Some(value) = reading
                .split_whitespace()
                .next()
                .and_then(|token| token.parse::<f64>().ok())
            {
                return if to_absorbance {
                    let absorbance = absorbance_from_percent_t(value);
                    if absorbance.is_infinite() || absorbance > 10.0 {
                        ">10 Abs".to_string()
                    } else {
                        format!("{:.3} Abs", absorbance)
                    }
                } else {
                    format!("{:.1} %T", percent_t_from_absorbance(value))
                };
            }
        }

        if instrument.is_zeroed && cuvette_inside {
            if let Some(inside_id) = &instrument.cuvette_inside_id {
                if let Some(cuvette) = self.state.bench.cuvette(inside_id) {
                    if cuvette.concentration == 0.0 {
                        return if to_absorbance {
                            "0.000 Abs".to_string()
                        } else {
                            "100.0 %T".to_string()
                        };
                    }
                }
            }
        }

        if reading.starts_with('>') {
            return if to_absorbance {
                ">1.5 Abs".to_string()
            } else {
                "0.0 %T".to_string()
            };
        }

        if to_absorbance {
            "-- Abs".to_string()
        } else {
            "-- %T".to_string()
        }
    }
}

impl Engine for Simulator {
    fn apply(&mut self, action: Action) -> Result<ActionOutcome, SimError> {
        let result = self.apply_action(action.clone());
        match &result {
            Ok(outcome) => {
                self.feedback = if outcome.warnings.is_empty() {
                    Feedback {
                        message: outcome.messages.join(" "),
                        severity: outcome.severity,
                    }
                } else {
                    Feedback {
                        message: outcome.warnings.join(" "),
                        severity: Severity::Error,
                    }
                };
                if outcome.state_changed {
                    self.journal.push(ActionRecord {
                        action,
                        result: outcome.clone(),
                    });
                }
            }
            Err(err) => {
                self.feedback = Feedback {
                    message: err.message.clone(),
                    severity: Severity::Error,
                };
            }
        }
        result
    }

    fn undo(&mut self) -> Result<ActionOutcome, SimError> {
        let Some(previous) = self.history.pop() else {
            let err = SimError {
                code: ErrorCode::Precondition,
                message: "Nothing to undo.".to_string(),
            };
            self.feedback = Feedback {
                message: err.message.clone(),
                severity: Severity::Error,
            };
            return Err(err);
        };
        self.state = previous;
        let outcome = ActionOutcome {
            action_id: self.next_action_id(),
            messages: vec!["Undo successful.".to_string()],
            warnings: vec![],
            severity: Severity::Info,
            step_completed: false,
            state_changed: true,
            steps_auto_advanced: 0,
        };
        self.feedback = Feedback {
            message: "Undo successful.".to_string(),
            severity: Severity::Info,
        };
        Ok(outcome)
    }

    fn snapshot(&self) -> &LabState {
        &self.state
    }
}
