//! Read-only projection of the simulation for presentation surfaces. The
//! summary is plain data (strings and flags), so a UI or the shell can
//! render it without touching the engine.

use crate::{
    data_table::DataRowDisplay,
    engine::{Feedback, Simulator},
    instructions::GRAPH_ANALYSIS_STEP_ID,
    lab_objects::ObjectId,
    optics::KNOWN_SLOPE,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub current_step: usize,
    /// Number of steps with something to do; the terminal marker is not
    /// counted.
    pub total_steps: usize,
    pub completed: bool,
    pub step_text: String,
    pub step_hint: Option<String>,
    pub highlight: Vec<ObjectId>,
    pub feedback: Feedback,
    pub reading: String,
    pub wavelength: u32,
    pub absorbance_mode: bool,
    pub is_zeroed: bool,
    pub cuvette_inside: Option<ObjectId>,
    pub can_undo: bool,
    pub table: Vec<DataRowDisplay>,
    /// Calibration slope caption, revealed once the graph-reading step has
    /// been passed.
    pub slope_display: Option<String>,
    /// Back-calculated unknown concentration, present once the unknown has
    /// been measured on scale.
    pub unknown_result: Option<String>,
}

pub fn summarize(sim: &Simulator) -> StateSummary {
    let state = sim.state();
    let script = sim.script();
    let step = script.step(state.current_step);

    let slope_display = match script.find_step_id(GRAPH_ANALYSIS_STEP_ID) {
        Some(index) if state.current_step >= index => Some(format!(
            "Calibration slope (Abs/µM) ≈ {}",
            KNOWN_SLOPE
        )),
        _ => None,
    };
    let unknown_result = state
        .table
        .derived_unknown_concentration()
        .map(|c| format!("Unknown concentration ≈ {:.3} µM", c));

    StateSummary {
        current_step: state.current_step,
        total_steps: script.len().saturating_sub(1),
        completed: script.is_terminal(state.current_step),
        step_text: step.map(|s| s.text.clone()).unwrap_or_default(),
        step_hint: step.and_then(|s| s.hint.clone()),
        highlight: step.map(|s| s.highlight.clone()).unwrap_or_default(),
        feedback: sim.feedback().clone(),
        reading: state.instrument.reading.clone(),
        wavelength: state.instrument.wavelength,
        absorbance_mode: state.instrument.absorbance_mode,
        is_zeroed: state.instrument.is_zeroed,
        cuvette_inside: state.instrument.cuvette_inside_id.clone(),
        can_undo: sim.can_undo(),
        table: state.table.rows.iter().map(|row| row.display()).collect(),
        slope_display,
        unknown_result,
    }
}
