// ABOUTME: Slash command parsing for the REPL.
// ABOUTME: Pure parsing into a closed Command enum; the host decides what each one does.

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Clear,
    /// Show the current model, or switch to the given one.
    Model(Option<String>),
    Models,
    Compact,
    Status,
    Plan,
    Trust,
    /// Allow a tool name or glob pattern for the session.
    Allow(String),
    /// Remove a session allowance; `*` revokes everything.
    Revoke(String),
    Exit,
    Unknown(String),
    MissingArgument { usage: &'static str },
}

/// Name, argument hint, description.
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("help", "", "Show available commands"),
    ("clear", "", "Clear conversation history"),
    ("model", "[id]", "Show or switch the model (e.g. /model gpt-4o)"),
    ("models", "", "List known models by provider"),
    ("compact", "", "Compress conversation history to save context"),
    ("status", "", "Show current session status"),
    ("plan", "", "Toggle plan mode"),
    ("trust", "", "Allow every tool for this session"),
    ("allow", "<tool-or-glob>", "Allow a tool for this session"),
    ("revoke", "<tool>", "Revoke a session allowance (* for all)"),
    ("exit", "", "Exit the application"),
    ("quit", "", "Exit the application"),
];

/// Parse `input` as a slash command. Returns `None` for ordinary chat input.
pub fn parse_command(input: &str) -> Option<Command> {
    let rest = input.trim().strip_prefix('/')?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let arg = (!args.is_empty()).then(|| args.to_string());

    let command = match name {
        "help" => Command::Help,
        "clear" => Command::Clear,
        "model" => Command::Model(arg),
        "models" => Command::Models,
        "compact" => Command::Compact,
        "status" => Command::Status,
        "plan" => Command::Plan,
        "trust" => Command::Trust,
        "allow" => match arg {
            Some(tool) => Command::Allow(tool),
            None => Command::MissingArgument {
                usage: "/allow <tool-or-glob>",
            },
        },
        "revoke" => match arg {
            Some(tool) => Command::Revoke(tool),
            None => Command::MissingArgument {
                usage: "/revoke <tool>",
            },
        },
        "exit" | "quit" => Command::Exit,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

pub fn help_text() -> String {
    let mut lines = vec!["Available commands:".to_string(), String::new()];
    for (name, hint, description) in COMMANDS {
        let usage = if hint.is_empty() {
            format!("/{name}")
        } else {
            format!("/{name} {hint}")
        };
        lines.push(format!("  {usage:<24} {description}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("list the files"), None);
        assert_eq!(parse_command("path/to/file"), None);
    }

    #[test]
    fn parses_commands_with_and_without_arguments() {
        assert_eq!(parse_command("/help"), Some(Command::Help));
        assert_eq!(parse_command("  /model  "), Some(Command::Model(None)));
        assert_eq!(
            parse_command("/model gpt-4o"),
            Some(Command::Model(Some("gpt-4o".into())))
        );
        assert_eq!(
            parse_command("/allow mcp__github__*"),
            Some(Command::Allow("mcp__github__*".into()))
        );
        assert_eq!(parse_command("/quit"), Some(Command::Exit));
    }

    #[test]
    fn missing_and_unknown() {
        assert_eq!(
            parse_command("/revoke"),
            Some(Command::MissingArgument {
                usage: "/revoke <tool>"
            })
        );
        assert_eq!(parse_command("/frobnicate"), Some(Command::Unknown("frobnicate".into())));
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for (name, _, _) in COMMANDS {
            assert!(help.contains(&format!("/{name}")));
        }
    }
}
