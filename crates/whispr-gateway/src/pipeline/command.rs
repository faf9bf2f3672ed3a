//! Slash commands, recognised before a message is treated as a reminder.

/// What an inbound message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    /// `/delete <id>`: the argument is the short id shown by `/list`.
    Delete(String),
    /// Anything else is a message to extract a reminder from.
    Forwarded,
}

impl Command {
    /// Commands are matched case-insensitively on the trimmed text.
    pub fn parse(text: &str) -> Self {
        let command = text.trim().to_lowercase();
        match command.as_str() {
            "/help" => Command::Help,
            "/list" => Command::List,
            _ => match command.strip_prefix("/delete ") {
                Some(id) => Command::Delete(id.trim().to_string()),
                None => Command::Forwarded,
            },
        }
    }
}
