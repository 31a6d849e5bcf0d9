use serde::Serialize;
use spectrolab::engine::Simulator;
use spectrolab::shell::{
    execute_shell_command, parse_shell_tokens, shell_help_text, ShellCommand,
};
use std::{env, fs};

const DEFAULT_STATE_PATH: &str = ".spectrolab_state.json";

fn usage() {
    eprintln!(
        "Usage:\n  \
  spectrolab_cli --version\n  \
  spectrolab_cli [--state PATH] COMMAND [ARGS]\n\n  \
  Examples:\n  \
  spectrolab_cli state-summary\n  \
  spectrolab_cli fill stockBottle\n  \
  spectrolab_cli dispense tube_10_0 10\n  \
  spectrolab_cli measure\n  \
  spectrolab_cli export-graph-svg calibration.svg\n\n  \
  Run 'spectrolab_cli help' for the full command list"
    );
}

fn version_text() -> String {
    format!(
        "SpectroLab {}\nVirtual spectrophotometry lab",
        env!("CARGO_PKG_VERSION")
    )
}

/// The session file holds the whole simulator (state, undo history, journal),
/// so commands compose across invocations. A missing file means a fresh run.
fn load_session(path: &str) -> Result<Simulator, String> {
    if std::path::Path::new(path).exists() {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Could not read session file '{path}': {e}"))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Could not parse session JSON '{path}': {e}"))
    } else {
        Ok(Simulator::new())
    }
}

fn save_session(sim: &Simulator, path: &str) -> Result<(), String> {
    let text = serde_json::to_string_pretty(sim)
        .map_err(|e| format!("Could not serialize session state: {e}"))?;
    fs::write(path, text).map_err(|e| format!("Could not write session file '{path}': {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn parse_global_state_arg(args: &[String]) -> (String, usize) {
    if args.len() >= 3 && args[1] == "--state" {
        return (args[2].clone(), 3);
    }
    (DEFAULT_STATE_PATH.to_string(), 1)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", version_text());
        return Ok(());
    }

    let (state_path, cmd_idx) = parse_global_state_arg(&args);
    if args.len() <= cmd_idx {
        usage();
        return Err("Missing command".to_string());
    }

    let command = match parse_shell_tokens(&args[cmd_idx..]) {
        Ok(command) => command,
        Err(e) => {
            usage();
            return Err(e);
        }
    };
    if command == ShellCommand::Help {
        println!("{}", shell_help_text());
        return Ok(());
    }

    let mut sim = load_session(&state_path)?;
    let result = execute_shell_command(&mut sim, &command)?;
    if result.state_changed {
        save_session(&sim, &state_path)?;
    }
    print_json(&result.output)
}
