//! Operator commands read from stdin

/// Commands the operator can type while the engine runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scene(String),
    Reload,
    ListScenes,
    Health,
    Status,
    Help,
    Quit,
}

/// Parse one input line. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let input = line.trim();

    match input {
        "q" | "quit" | "exit" => return Some(Command::Quit),
        "r" | "reload" => return Some(Command::Reload),
        "ls" | "scenes" => return Some(Command::ListScenes),
        "health" => return Some(Command::Health),
        "status" => return Some(Command::Status),
        "?" | "help" => return Some(Command::Help),
        _ => {}
    }

    let name = input.strip_prefix("scene ").or_else(|| input.strip_prefix("s "))?;
    let name = name.trim();
    // Scene names may be quoted
    let name = if name.len() >= 2
        && ((name.starts_with('\'') && name.ends_with('\'')) || (name.starts_with('"') && name.ends_with('"')))
    {
        &name[1..name.len() - 1]
    } else {
        name
    };
    if name.is_empty() {
        return None;
    }
    Some(Command::Scene(name.to_string()))
}

pub const HELP: &str = "\
commands:
  scene <name>   switch scene (alias: s)
  reload         re-read the scene directory (alias: r)
  scenes         list loaded scenes (alias: ls)
  status         current and predicted scene
  health         frame and worker counters
  quit           black out and exit (alias: q)";
