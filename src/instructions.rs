//! Instruction scripts: the ordered sequence of required actions that gates
//! the simulation. Steps are declarative contracts (action tag + required
//! parameters + policy flags); the engine in `engine.rs` enforces them.

use crate::lab_objects::{
    ObjectId, CUVETTE_ID, PIPETTE_ID, SPEC_ID, STOCK_BOTTLE_ID, UNKNOWN_BOTTLE_ID, WASTE_ID,
    WATER_BOTTLE_ID,
};
use itertools::chain;
use serde::{Deserialize, Serialize};

/// Volume transferred into the cuvette for every zero/measure cycle, in mL.
pub const SAMPLE_VOLUME: f64 = 3.0;

/// Stable id of the graph-reading step; the presentation surface reveals
/// the calibration slope once the cursor has passed it.
pub const GRAPH_ANALYSIS_STEP_ID: &str = "graph_analysis";

/// What the current step requires before the cursor may advance. `Info` and
/// `SetUnknownFlag` are internal (auto-advanced, never user-performed);
/// `Complete` is the terminal marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepRequirement {
    FillPipette {
        pipette: ObjectId,
        source: ObjectId,
        volume: f64,
    },
    DispensePipette {
        pipette: ObjectId,
        destination: ObjectId,
        volume: Option<f64>,
    },
    InsertCuvette {
        cuvette: ObjectId,
        destination: ObjectId,
    },
    EmptyCuvette {
        cuvette: ObjectId,
        destination: ObjectId,
    },
    ZeroSpec,
    Measure {
        target_data_row_id: Option<ObjectId>,
    },
    Info,
    SetUnknownFlag {
        cuvette: ObjectId,
    },
    Complete,
}

/// Per-step policy flags loosening the engine's default gates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepFlags {
    /// Permit inserting an empty cuvette.
    #[serde(default)]
    pub allow_empty: bool,
    /// Permit inserting a cuvette that has not been rinsed.
    #[serde(default)]
    pub allow_dirty_insert: bool,
    /// Permit re-measuring a zero-concentration blank.
    #[serde(default)]
    pub allow_blank_measure: bool,
    /// Emptying under this step leaves the cuvette clean.
    #[serde(default)]
    pub mark_clean: bool,
    /// Record an off-scale absorbance instead of rejecting the measurement.
    #[serde(default)]
    pub allow_high_abs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionStep {
    pub text: String,
    pub requires: StepRequirement,
    #[serde(default)]
    pub flags: StepFlags,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    /// Object/panel ids the presentation layer should call attention to.
    #[serde(default)]
    pub highlight: Vec<ObjectId>,
}

impl InstructionStep {
    pub fn new(text: &str, requires: StepRequirement) -> InstructionStep {
        InstructionStep {
            text: text.to_string(),
            requires,
            flags: StepFlags::default(),
            hint: None,
            id: None,
            highlight: Vec::new(),
        }
    }

    pub fn hint(mut self, hint: &str) -> InstructionStep {
        self.hint = Some(hint.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> InstructionStep {
        self.id = Some(id.to_string());
        self
    }

    pub fn highlight(mut self, ids: &[&str]) -> InstructionStep {
        self.highlight = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn allow_empty(mut self) -> InstructionStep {
        self.flags.allow_empty = true;
        self
    }

    pub fn allow_dirty_insert(mut self) -> InstructionStep {
        self.flags.allow_dirty_insert = true;
        self
    }

    pub fn allow_blank_measure(mut self) -> InstructionStep {
        self.flags.allow_blank_measure = true;
        self
    }

    pub fn mark_clean(mut self) -> InstructionStep {
        self.flags.mark_clean = true;
        self
    }

    pub fn allow_high_abs(mut self) -> InstructionStep {
        self.flags.allow_high_abs = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<InstructionStep>,
}

impl Script {
    pub fn new(steps: Vec<InstructionStep>) -> Script {
        Script { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&InstructionStep> {
        self.steps.get(index)
    }

    pub fn find_step_id(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id.as_deref() == Some(id))
    }

    /// True once the cursor sits on the final (complete) step.
    pub fn is_terminal(&self, index: usize) -> bool {
        index + 1 >= self.steps.len()
    }
}

/// Dilution recipe per test tube: (tube id, tube label, stock mL, water mL).
const PREP_MIXES: [(&str, &str, f64, f64); 6] = [
    ("tube_10_0", "10/0", 10.0, 0.0),
    ("tube_8_2", "8/2", 8.0, 2.0),
    ("tube_6_4", "6/4", 6.0, 4.0),
    ("tube_4_6", "4/6", 4.0, 6.0),
    ("tube_2_8", "2/8", 2.0, 8.0),
    ("tube_0_10", "0/10 (Blank)", 0.0, 10.0),
];

/// Standards measured after zeroing, strongest first; the blank is
/// re-measured separately at the end of the calibration block.
const MEASURE_ORDER: [(&str, &str); 5] = [
    ("tube_10_0", "10/0"),
    ("tube_8_2", "8/2"),
    ("tube_6_4", "6/4"),
    ("tube_4_6", "4/6"),
    ("tube_2_8", "2/8"),
];

const BLANK_TUBE_ID: &str = "tube_0_10";
const BLANK_TUBE_TEXT: &str = "0/10 (Blank) tube";

fn fill_step(source_id: &str, source_text: &str, volume: f64) -> InstructionStep {
    InstructionStep::new(
        &format!("Fill the pipette with {} mL from the {}.", volume, source_text),
        StepRequirement::FillPipette {
            pipette: PIPETTE_ID.to_string(),
            source: source_id.to_string(),
            volume,
        },
    )
    .hint(&format!("Drag the pipette to the {}.", source_text))
    .highlight(&[PIPETTE_ID, source_id])
}

fn dispense_tube_step(tube_id: &str, tube_label: &str, volume: f64) -> InstructionStep {
    InstructionStep::new(
        &format!("Dispense {} mL into the {} test tube.", volume, tube_label),
        StepRequirement::DispensePipette {
            pipette: PIPETTE_ID.to_string(),
            destination: tube_id.to_string(),
            volume: Some(volume),
        },
    )
    .hint(&format!("Drag the pipette to the {} test tube.", tube_label))
    .highlight(&[PIPETTE_ID, tube_id])
}

fn dispense_cuvette_step(text: &str) -> InstructionStep {
    InstructionStep::new(
        text,
        StepRequirement::DispensePipette {
            pipette: PIPETTE_ID.to_string(),
            destination: CUVETTE_ID.to_string(),
            volume: Some(SAMPLE_VOLUME),
        },
    )
    .hint("Drag the pipette to the cuvette.")
    .highlight(&[PIPETTE_ID, CUVETTE_ID])
}

fn insert_step(text: &str) -> InstructionStep {
    InstructionStep::new(
        text,
        StepRequirement::InsertCuvette {
            cuvette: CUVETTE_ID.to_string(),
            destination: SPEC_ID.to_string(),
        },
    )
    .hint("Drag the cuvette onto the spectrophotometer.")
    .highlight(&[CUVETTE_ID, SPEC_ID])
}

fn empty_step(text: &str) -> InstructionStep {
    InstructionStep::new(
        text,
        StepRequirement::EmptyCuvette {
            cuvette: CUVETTE_ID.to_string(),
            destination: WASTE_ID.to_string(),
        },
    )
    .hint("Drag cuvette out of Spec first, then drag to Waste.")
    .highlight(&[CUVETTE_ID, WASTE_ID])
}

fn measure_step(text: &str, target_data_row_id: &str) -> InstructionStep {
    InstructionStep::new(
        text,
        StepRequirement::Measure {
            target_data_row_id: Some(target_data_row_id.to_string()),
        },
    )
    .hint("Click the 'Measure' button.")
    .highlight(&[SPEC_ID])
}

fn prep_steps() -> Vec<InstructionStep> {
    let mut steps = Vec::new();
    for (tube_id, tube_label, stock_vol, water_vol) in PREP_MIXES {
        if stock_vol > 0.0 {
            steps.push(fill_step(STOCK_BOTTLE_ID, "Stock Blue#1 bottle", stock_vol));
            steps.push(dispense_tube_step(tube_id, tube_label, stock_vol));
        }
        if water_vol > 0.0 {
            steps.push(fill_step(WATER_BOTTLE_ID, "Distilled H₂O bottle", water_vol));
            steps.push(dispense_tube_step(tube_id, tube_label, water_vol));
        }
    }
    steps
}

fn zeroing_steps() -> Vec<InstructionStep> {
    vec![
        fill_step(BLANK_TUBE_ID, BLANK_TUBE_TEXT, SAMPLE_VOLUME),
        dispense_cuvette_step("Dispense 3 mL of the blank into the cuvette."),
        insert_step("Place the blank cuvette into the spectrophotometer."),
        InstructionStep::new(
            "Zero the spectrophotometer with the blank inside.",
            StepRequirement::ZeroSpec,
        )
        .hint("Click the 'Zero' button.")
        .highlight(&[SPEC_ID]),
        empty_step("Empty the cuvette into the Waste beaker.").mark_clean(),
    ]
}

fn rinse_steps() -> Vec<InstructionStep> {
    vec![
        fill_step(WATER_BOTTLE_ID, "Distilled H₂O bottle", SAMPLE_VOLUME),
        dispense_cuvette_step("Rinse: dispense the water into the cuvette."),
        empty_step("Empty the rinse water into the Waste beaker.").mark_clean(),
    ]
}

fn measure_cycle_steps() -> Vec<InstructionStep> {
    let mut steps = Vec::new();
    for (tube_id, tube_label) in MEASURE_ORDER {
        steps.push(fill_step(tube_id, &format!("{} tube", tube_label), SAMPLE_VOLUME));
        steps.push(dispense_cuvette_step("Dispense 3 mL into the cuvette."));
        steps.push(insert_step("Place the cuvette into the spectrophotometer."));
        steps.push(measure_step(
            &format!("Measure the {} sample.", tube_label),
            tube_id,
        ));
        steps.push(empty_step("Empty the cuvette into the Waste beaker."));
        steps.extend(rinse_steps());
    }
    steps
}

fn blank_recheck_steps() -> Vec<InstructionStep> {
    vec![
        fill_step(BLANK_TUBE_ID, BLANK_TUBE_TEXT, SAMPLE_VOLUME),
        dispense_cuvette_step("Dispense 3 mL of the blank into the cuvette."),
        insert_step("Place the blank cuvette into the spectrophotometer."),
        measure_step("Measure the blank. It should read 100 %T.", BLANK_TUBE_ID)
            .allow_blank_measure(),
    ]
}

fn unknown_steps() -> Vec<InstructionStep> {
    vec![
        fill_step(UNKNOWN_BOTTLE_ID, "Unknown Drink bottle", SAMPLE_VOLUME),
        dispense_cuvette_step("Dispense 3 mL of the unknown into the cuvette."),
        InstructionStep::new(
            "Preparing the unknown sample.",
            StepRequirement::SetUnknownFlag {
                cuvette: CUVETTE_ID.to_string(),
            },
        ),
        insert_step("Place the cuvette into the spectrophotometer."),
        measure_step("Measure the unknown sample.", crate::data_table::UNKNOWN_ROW_ID),
        InstructionStep::new(
            "Find the unknown's concentration: its absorbance divided by the calibration slope.",
            StepRequirement::Info,
        )
        .highlight(&["data-panel", "graph-panel"]),
    ]
}

/// The full guided experiment: prepare six standards, zero on the blank,
/// measure five standards with a rinse after each, re-check the blank, read
/// the graph, then measure the unknown.
pub fn default_script() -> Script {
    let steps = chain!(
        prep_steps(),
        zeroing_steps(),
        measure_cycle_steps(),
        blank_recheck_steps(),
        [InstructionStep::new(
            "Look at the data table and graph: absorbance rises linearly with concentration.",
            StepRequirement::Info,
        )
        .id(GRAPH_ANALYSIS_STEP_ID)
        .highlight(&["data-panel", "graph-panel"])],
        [empty_step("Empty the blank into the Waste beaker.").mark_clean()],
        unknown_steps(),
        [InstructionStep::new(
            "Experiment Complete! Analysis finished.",
            StepRequirement::Complete,
        )],
    )
    .collect();
    Script::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_script_shape() {
        let script = default_script();
        assert_eq!(script.len(), 78);
        assert_eq!(
            script.steps[0].requires,
            StepRequirement::FillPipette {
                pipette: "pipette".to_string(),
                source: "stockBottle".to_string(),
                volume: 10.0,
            }
        );
        assert_eq!(script.steps[77].requires, StepRequirement::Complete);
        assert_eq!(script.find_step_id(GRAPH_ANALYSIS_STEP_ID), Some(69));
        assert!(script.is_terminal(77));
        assert!(!script.is_terminal(76));
    }

    #[test]
    fn test_zeroing_block_indices() {
        let script = default_script();
        assert_eq!(script.steps[23].requires, StepRequirement::ZeroSpec);
        assert!(script.steps[24].flags.mark_clean);
        match &script.steps[20].requires {
            StepRequirement::FillPipette { source, volume, .. } => {
                assert_eq!(source, "tube_0_10");
                assert_eq!(*volume, 3.0);
            }
            other => panic!("unexpected requirement: {:?}", other),
        }
    }

    #[test]
    fn test_measure_cycles_rinse_flags() {
        let script = default_script();
        // First sample cycle: measure at 28, dirty empty at 29, rinse empty at 32.
        assert_eq!(
            script.steps[28].requires,
            StepRequirement::Measure {
                target_data_row_id: Some("tube_10_0".to_string()),
            }
        );
        assert!(!script.steps[29].flags.mark_clean);
        assert!(script.steps[32].flags.mark_clean);
        // Blank re-measure is the only measure step allowing a blank.
        assert!(script.steps[68].flags.allow_blank_measure);
        assert_eq!(
            script.steps[68].requires,
            StepRequirement::Measure {
                target_data_row_id: Some("tube_0_10".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_block() {
        let script = default_script();
        assert_eq!(
            script.steps[73].requires,
            StepRequirement::SetUnknownFlag {
                cuvette: "cuvette".to_string(),
            }
        );
        assert_eq!(
            script.steps[75].requires,
            StepRequirement::Measure {
                target_data_row_id: Some("unknown".to_string()),
            }
        );
        assert_eq!(script.steps[76].requires, StepRequirement::Info);
    }

    #[test]
    fn test_cuvette_dispenses_carry_exact_volume() {
        let script = default_script();
        for step in &script.steps {
            if let StepRequirement::DispensePipette {
                destination,
                volume,
                ..
            } = &step.requires
            {
                if destination == "cuvette" {
                    assert_eq!(*volume, Some(SAMPLE_VOLUME));
                }
            }
        }
    }

    #[test]
    fn test_requirement_serde_shape() {
        let script = default_script();
        let value = serde_json::to_value(&script.steps[0].requires).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "FillPipette": {
                    "pipette": "pipette",
                    "source": "stockBottle",
                    "volume": 10.0,
                }
            })
        );
    }
}
