//! Command vocabulary recognised in inbound text.

/// Prefixes a command token may start with.
pub const COMMAND_PREFIXES: [char; 2] = ['.', '!'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Capture the quoted (usually view-once) message.
    RevealViewOnce,
}

impl Command {
    pub fn token(&self) -> &'static str {
        match self {
            Command::RevealViewOnce => "vv",
        }
    }

    /// Parse already-extracted message text. Surrounding whitespace and
    /// case are ignored; anything after the token disqualifies the text.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase();
        let token = normalized.strip_prefix(COMMAND_PREFIXES)?;
        match token {
            "vv" => Some(Command::RevealViewOnce),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".{}", self.token())
    }
}
