//! Chat command table.
//!
//! Commands form a closed set resolved by name; anything else is reported
//! back to the user as unknown by the router.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Bell,
    Node,
    User,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Start,
        Command::Help,
        Command::Status,
        Command::Bell,
        Command::Node,
        Command::User,
    ];

    /// Resolve a command name (no slash, no `@bot` suffix). Case-insensitive.
    pub fn parse(name: &str) -> Option<Command> {
        let name = name.trim().trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Status => "status",
            Command::Bell => "bell",
            Command::Node => "node",
            Command::User => "user",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::Start => "Start the bot and see welcome message",
            Command::Help => "Show this help message",
            Command::Status => "Check the current status of Meshgram and Meshtastic",
            Command::Bell => "Send a bell notification to a Meshtastic node",
            Command::Node => "Get information about a specific node",
            Command::User => "Get information about your Telegram user",
        }
    }

    /// Usage shown in /help.
    pub fn usage(self) -> &'static str {
        match self {
            Command::Bell => "/bell [node_id]",
            Command::Node => "/node [node_id]",
            Command::Start => "/start",
            Command::Help => "/help",
            Command::Status => "/status",
            Command::User => "/user",
        }
    }

    /// Commands that skip the allow-list check.
    pub fn always_allowed(self) -> bool {
        matches!(self, Command::Start | Command::Help | Command::User)
    }
}

pub fn help_text() -> String {
    let mut out = String::from("Available commands:\n\n");
    let lines: Vec<String> = Command::ALL
        .iter()
        .map(|c| format!("{} - {}", c.usage(), c.description()))
        .collect();
    out.push_str(&lines.join("\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!(Command::parse("status"), Some(Command::Status));
        assert_eq!(Command::parse("/BELL"), Some(Command::Bell));
        assert_eq!(Command::parse("node@meshgram_bot"), Some(Command::Node));
        assert_eq!(Command::parse("weather"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn open_commands() {
        let open: Vec<_> = Command::ALL.iter().filter(|c| c.always_allowed()).collect();
        assert_eq!(open, vec![&Command::Start, &Command::Help, &Command::User]);
    }

    #[test]
    fn help_lists_every_command() {
        let text = help_text();
        for c in Command::ALL {
            assert!(text.contains(c.usage()));
        }
    }
}
