//! Line-oriented shell surface over the simulator. Commands map onto engine
//! actions (the bench has one pipette, one cuvette, and one instrument, so
//! the action commands take at most a source/destination and a volume) plus
//! inspection and export commands.

use crate::engine::{Action, Engine, LabState, Simulator};
use crate::lab_objects::{CUVETTE_ID, PIPETTE_ID, SPEC_ID, WASTE_ID};
use crate::render_graph::save_calibration_svg_to_path;
use crate::view::summarize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Help,
    Capabilities,
    StateSummary,
    Table,
    Script,
    Journal,
    Fill { source: String },
    Dispense { destination: String, volume: f64 },
    Insert,
    Remove,
    Empty,
    Zero,
    Measure,
    Mode,
    Undo,
    Reset,
    SaveState { path: String },
    LoadState { path: String },
    ExportCsv { path: String },
    ExportGraphSvg { path: String },
}

#[derive(Debug, Clone)]
pub struct ShellRunResult {
    pub state_changed: bool,
    pub output: Value,
}

impl ShellCommand {
    pub fn preview(&self) -> String {
        match self {
            Self::Help => "show shell command help".to_string(),
            Self::Capabilities => "inspect engine capabilities".to_string(),
            Self::StateSummary => "show simulation state summary".to_string(),
            Self::Table => "show the data table".to_string(),
            Self::Script => "list the instruction script".to_string(),
            Self::Journal => "show the action journal".to_string(),
            Self::Fill { source } => format!("fill the pipette from '{source}'"),
            Self::Dispense {
                destination,
                volume,
            } => format!("dispense {volume} mL into '{destination}'"),
            Self::Insert => "insert the cuvette into the spectrophotometer".to_string(),
            Self::Remove => "remove the cuvette from the spectrophotometer".to_string(),
            Self::Empty => "empty the cuvette into the waste beaker".to_string(),
            Self::Zero => "zero the spectrophotometer".to_string(),
            Self::Measure => "measure the current sample".to_string(),
            Self::Mode => "toggle between %T and absorbance display".to_string(),
            Self::Undo => "undo the last action".to_string(),
            Self::Reset => "reset the simulation to the start".to_string(),
            Self::SaveState { path } => format!("save simulation state to '{path}'"),
            Self::LoadState { path } => format!("load simulation state from '{path}'"),
            Self::ExportCsv { path } => format!("export the data table CSV to '{path}'"),
            Self::ExportGraphSvg { path } => {
                format!("export the calibration graph SVG to '{path}'")
            }
        }
    }

    pub fn is_state_mutating(&self) -> bool {
        matches!(
            self,
            Self::Fill { .. }
                | Self::Dispense { .. }
                | Self::Insert
                | Self::Remove
                | Self::Empty
                | Self::Zero
                | Self::Measure
                | Self::Mode
                | Self::Undo
                | Self::Reset
                | Self::LoadState { .. }
        )
    }
}

pub fn shell_help_text() -> &'static str {
    "SpectroLab Shell commands:\n\
help\n\
capabilities\n\
state-summary\n\
table\n\
script\n\
journal\n\
fill SOURCE_ID\n\
dispense DEST_ID VOLUME_ML\n\
insert\n\
remove\n\
empty\n\
zero\n\
measure\n\
mode\n\
undo\n\
reset\n\
save-state PATH\n\
load-state PATH\n\
export-csv PATH\n\
export-graph-svg PATH\n\
SOURCE_ID/DEST_ID are bench object ids, e.g. stockBottle, tube_10_0, cuvette"
}

fn token_error(command: &str) -> String {
    format!("Invalid '{command}' usage. Try: help")
}

fn parse_volume(raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .map_err(|_| format!("Invalid volume '{raw}', expected a number of mL"))
}

pub fn parse_shell_tokens(tokens: &[String]) -> Result<ShellCommand, String> {
    if tokens.is_empty() {
        return Err("Missing shell command".to_string());
    }
    let cmd = tokens[0].as_str();
    match cmd {
        "help" | "-h" | "--help" => Ok(ShellCommand::Help),
        "capabilities" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Capabilities)
            } else {
                Err(token_error(cmd))
            }
        }
        "state-summary" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::StateSummary)
            } else {
                Err(token_error(cmd))
            }
        }
        "table" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Table)
            } else {
                Err(token_error(cmd))
            }
        }
        "script" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Script)
            } else {
                Err(token_error(cmd))
            }
        }
        "journal" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Journal)
            } else {
                Err(token_error(cmd))
            }
        }
        "fill" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::Fill {
                    source: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "dispense" => {
            if tokens.len() == 3 {
                Ok(ShellCommand::Dispense {
                    destination: tokens[1].clone(),
                    volume: parse_volume(&tokens[2])?,
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "insert" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Insert)
            } else {
                Err(token_error(cmd))
            }
        }
        "remove" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Remove)
            } else {
                Err(token_error(cmd))
            }
        }
        "empty" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Empty)
            } else {
                Err(token_error(cmd))
            }
        }
        "zero" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Zero)
            } else {
                Err(token_error(cmd))
            }
        }
        "measure" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Measure)
            } else {
                Err(token_error(cmd))
            }
        }
        "mode" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Mode)
            } else {
                Err(token_error(cmd))
            }
        }
        "undo" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Undo)
            } else {
                Err(token_error(cmd))
            }
        }
        "reset" => {
            if tokens.len() == 1 {
                Ok(ShellCommand::Reset)
            } else {
                Err(token_error(cmd))
            }
        }
        "save-state" | "export-state" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::SaveState {
                    path: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "load-state" | "import-state" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::LoadState {
                    path: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "export-csv" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::ExportCsv {
                    path: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        "export-graph-svg" => {
            if tokens.len() == 2 {
                Ok(ShellCommand::ExportGraphSvg {
                    path: tokens[1].clone(),
                })
            } else {
                Err(token_error(cmd))
            }
        }
        other => Err(format!("Unknown shell command '{other}'. Try: help")),
    }
}

pub fn parse_shell_line(line: &str) -> Result<ShellCommand, String> {
    let tokens = split_shell_words(line)?;
    parse_shell_tokens(&tokens)
}

pub fn split_shell_words(line: &str) -> Result<Vec<String>, String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Normal,
        SingleQuoted,
        DoubleQuoted,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut mode = Mode::Normal;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Normal => match ch {
                '\'' => mode = Mode::SingleQuoted,
                '"' => mode = Mode::DoubleQuoted,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        out.push(current.clone());
                        current.clear();
                    }
                }
                _ => current.push(ch),
            },
            Mode::SingleQuoted => {
                if ch == '\'' {
                    mode = Mode::Normal;
                } else {
                    current.push(ch);
                }
            }
            Mode::DoubleQuoted => {
                if ch == '"' {
                    mode = Mode::Normal;
                } else if ch == '\\' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else {
                    current.push(ch);
                }
            }
        }
    }

    if mode != Mode::Normal {
        return Err("Unterminated quoted string in shell command".to_string());
    }
    if !current.is_empty() {
        out.push(current);
    }
    if out.is_empty() {
        return Err("Empty shell command".to_string());
    }
    Ok(out)
}

fn run_action(sim: &mut Simulator, action: Action) -> Result<ShellRunResult, String> {
    let outcome = sim.apply(action).map_err(|e| e.to_string())?;
    Ok(ShellRunResult {
        state_changed: outcome.state_changed,
        output: json!({ "result": outcome, "feedback": sim.feedback() }),
    })
}

pub fn execute_shell_command(
    sim: &mut Simulator,
    command: &ShellCommand,
) -> Result<ShellRunResult, String> {
    let result = match command {
        ShellCommand::Help => ShellRunResult {
            state_changed: false,
            output: json!({ "help": shell_help_text() }),
        },
        ShellCommand::Capabilities => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(Simulator::capabilities())
                .map_err(|e| format!("Could not serialize capabilities: {e}"))?,
        },
        ShellCommand::StateSummary => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(summarize(sim))
                .map_err(|e| format!("Could not serialize state summary: {e}"))?,
        },
        ShellCommand::Table => {
            let rows = sim
                .state()
                .table
                .rows
                .iter()
                .map(|row| row.display())
                .collect::<Vec<_>>();
            ShellRunResult {
                state_changed: false,
                output: serde_json::to_value(rows)
                    .map_err(|e| format!("Could not serialize data table: {e}"))?,
            }
        }
        ShellCommand::Script => {
            let steps = sim
                .script()
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| {
                    json!({
                        "index": index,
                        "text": step.text,
                        "current": index == sim.state().current_step,
                    })
                })
                .collect::<Vec<_>>();
            ShellRunResult {
                state_changed: false,
                output: json!({ "steps": steps }),
            }
        }
        ShellCommand::Journal => ShellRunResult {
            state_changed: false,
            output: serde_json::to_value(sim.action_log())
                .map_err(|e| format!("Could not serialize journal: {e}"))?,
        },
        ShellCommand::Fill { source } => run_action(
            sim,
            Action::FillPipette {
                pipette_id: PIPETTE_ID.to_string(),
                source_id: source.clone(),
            },
        )?,
        ShellCommand::Dispense {
            destination,
            volume,
        } => run_action(
            sim,
            Action::DispensePipette {
                pipette_id: PIPETTE_ID.to_string(),
                dest_id: destination.clone(),
                volume: *volume,
            },
        )?,
        ShellCommand::Insert => run_action(
            sim,
            Action::InsertCuvette {
                cuvette_id: CUVETTE_ID.to_string(),
                spec_id: SPEC_ID.to_string(),
            },
        )?,
        ShellCommand::Remove => run_action(
            sim,
            Action::RemoveCuvette {
                cuvette_id: CUVETTE_ID.to_string(),
            },
        )?,
        ShellCommand::Empty => run_action(
            sim,
            Action::EmptyCuvette {
                cuvette_id: CUVETTE_ID.to_string(),
                waste_id: WASTE_ID.to_string(),
            },
        )?,
        ShellCommand::Zero => run_action(sim, Action::ZeroSpec)?,
        ShellCommand::Measure => run_action(sim, Action::Measure)?,
        ShellCommand::Mode => run_action(sim, Action::ToggleMode)?,
        ShellCommand::Undo => {
            let outcome = sim.undo().map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: outcome.state_changed,
                output: json!({ "result": outcome, "feedback": sim.feedback() }),
            }
        }
        ShellCommand::Reset => {
            *sim = Simulator::new();
            ShellRunResult {
                state_changed: true,
                output: json!({
                    "message": "Simulation reset.",
                    "summary": summarize(sim)
                }),
            }
        }
        ShellCommand::SaveState { path } => {
            sim.state().save_to_path(path).map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: false,
                output: json!({ "message": format!("Saved state to '{path}'") }),
            }
        }
        ShellCommand::LoadState { path } => {
            let state = LabState::load_from_path(path).map_err(|e| e.to_string())?;
            *sim = Simulator::from_state(state);
            ShellRunResult {
                state_changed: true,
                output: json!({
                    "message": format!("Loaded state from '{path}'"),
                    "summary": summarize(sim)
                }),
            }
        }
        ShellCommand::ExportCsv { path } => {
            sim.state()
                .table
                .save_csv_to_path(path)
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: false,
                output: json!({ "message": format!("Exported data table CSV to '{path}'") }),
            }
        }
        ShellCommand::ExportGraphSvg { path } => {
            save_calibration_svg_to_path(&sim.state().table, path)
                .map_err(|e| e.to_string())?;
            ShellRunResult {
                state_changed: false,
                output: json!({ "message": format!("Exported calibration graph SVG to '{path}'") }),
            }
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fill_command() {
        let cmd = parse_shell_line("fill stockBottle").expect("fill command parse");
        assert_eq!(
            cmd,
            ShellCommand::Fill {
                source: "stockBottle".to_string(),
            }
        );
        assert!(cmd.is_state_mutating());
        assert!(cmd.preview().contains("stockBottle"));
    }

    #[test]
    fn parse_dispense_with_volume() {
        let cmd = parse_shell_line("dispense tube_10_0 10").expect("dispense command parse");
        match cmd {
            ShellCommand::Dispense {
                destination,
                volume,
            } => {
                assert_eq!(destination, "tube_10_0");
                assert_eq!(volume, 10.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let err = parse_shell_line("dispense tube_10_0 lots").unwrap_err();
        assert!(err.contains("Invalid volume 'lots'"));
    }

    #[test]
    fn parse_rejects_bad_arity() {
        assert_eq!(
            parse_shell_line("fill").unwrap_err(),
            "Invalid 'fill' usage. Try: help"
        );
        assert_eq!(
            parse_shell_line("measure now").unwrap_err(),
            "Invalid 'measure' usage. Try: help"
        );
        assert!(parse_shell_line("launch").unwrap_err().starts_with("Unknown shell command"));
    }

    #[test]
    fn split_words_handles_quotes() {
        let tokens = split_shell_words("save-state 'my lab.json'").expect("split words");
        assert_eq!(tokens, vec!["save-state".to_string(), "my lab.json".to_string()]);

        let err = split_shell_words("fill 'unterminated").unwrap_err();
        assert!(err.contains("Unterminated"));
    }

    #[test]
    fn execute_state_summary_returns_json() {
        let mut sim = Simulator::new();
        let out = execute_shell_command(&mut sim, &ShellCommand::StateSummary)
            .expect("execute state summary");
        assert!(!out.state_changed);
        assert!(out.output.get("current_step").is_some());
        assert!(out.output.get("table").is_some());
    }

    #[test]
    fn execute_fill_advances_script() {
        let mut sim = Simulator::new();
        let out = execute_shell_command(
            &mut sim,
            &ShellCommand::Fill {
                source: "stockBottle".to_string(),
            },
        )
        .expect("execute fill");
        assert!(out.state_changed);
        assert_eq!(sim.state().current_step, 1);
        assert!(out.output.get("result").is_some());
    }

    #[test]
    fn execute_wrong_action_surfaces_error() {
        let mut sim = Simulator::new();
        let err = execute_shell_command(&mut sim, &ShellCommand::Zero).unwrap_err();
        assert!(err.starts_with("SequenceMismatch:"));
        assert_eq!(sim.state().current_step, 0);
    }

    #[test]
    fn execute_undo_and_reset() {
        let mut sim = Simulator::new();
        execute_shell_command(
            &mut sim,
            &ShellCommand::Fill {
                source: "stockBottle".to_string(),
            },
        )
        .expect("execute fill");

        let out = execute_shell_command(&mut sim, &ShellCommand::Undo).expect("execute undo");
        assert!(out.state_changed);
        assert_eq!(sim.state().current_step, 0);

        execute_shell_command(
            &mut sim,
            &ShellCommand::Fill {
                source: "stockBottle".to_string(),
            },
        )
        .expect("execute fill again");
        let out = execute_shell_command(&mut sim, &ShellCommand::Reset).expect("execute reset");
        assert!(out.state_changed);
        assert_eq!(sim.state().current_step, 0);
        assert!(!sim.can_undo());
    }

    #[test]
    fn execute_save_load_and_exports() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("lab.json");
        let csv_path = dir.path().join("table.csv");
        let svg_path = dir.path().join("graph.svg");

        let mut sim = Simulator::new();
        execute_shell_command(
            &mut sim,
            &ShellCommand::Fill {
                source: "stockBottle".to_string(),
            },
        )
        .expect("execute fill");
        execute_shell_command(
            &mut sim,
            &ShellCommand::SaveState {
                path: state_path.to_string_lossy().to_string(),
            },
        )
        .expect("execute save-state");

        let mut restored = Simulator::new();
        let out = execute_shell_command(
            &mut restored,
            &ShellCommand::LoadState {
                path: state_path.to_string_lossy().to_string(),
            },
        )
        .expect("execute load-state");
        assert!(out.state_changed);
        assert_eq!(restored.state().current_step, 1);

        execute_shell_command(
            &mut sim,
            &ShellCommand::ExportCsv {
                path: csv_path.to_string_lossy().to_string(),
            },
        )
        .expect("execute export-csv");
        assert!(std::fs::read_to_string(&csv_path)
            .unwrap()
            .starts_with("Solution,"));

        execute_shell_command(
            &mut sim,
            &ShellCommand::ExportGraphSvg {
                path: svg_path.to_string_lossy().to_string(),
            },
        )
        .expect("execute export-graph-svg");
        assert!(std::fs::read_to_string(&svg_path).unwrap().contains("<svg"));
    }
}
