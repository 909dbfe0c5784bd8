/// A `/command` parsed out of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Command name as written, without the leading slash or the
    /// `@botname` suffix. Compare with [`ParsedCommand::is`].
    pub name: &'a str,
    /// Everything after the command, with leading whitespace trimmed.
    pub params: &'a str,
}

impl ParsedCommand<'_> {
    /// Check if this is the command `name`, ignoring ASCII case.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Iterate over whitespace-separated parameters.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.params.split_whitespace()
    }
}

/// What [`parse_command`] made of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaybeCommand<'a> {
    /// A command for this bot, either bare or with our `@botname`.
    ForUs(ParsedCommand<'a>),
    /// A well-formed command with some other bot's `@botname`.
    ForOtherBot,
    /// Ordinary text, including things like `/ hi` or `/привет`.
    NotACommand,
}

/// Parse `text` as a bot command, like `/start@My_Bot ref_123`.
#[must_use]
pub fn parse_command<'a>(text: &'a str, bot_username: &str) -> MaybeCommand<'a> {
    let Some(rest) = text.strip_prefix('/') else {
        return MaybeCommand::NotACommand;
    };

    let command_len = rest
        .find(char::is_whitespace)
        .unwrap_or(rest.len());
    let command = &rest[..command_len];

    if command.is_empty() || !command.is_ascii() {
        // Telegram commands must be ASCII.
        // See https://core.telegram.org/bots/api#botcommand
        return MaybeCommand::NotACommand;
    }

    let name = if let Some((name, username)) = command.split_once('@') {
        // Bot names are guaranteed ASCII, so ignore ASCII case specifically.
        if !username.eq_ignore_ascii_case(bot_username) {
            return MaybeCommand::ForOtherBot;
        }
        name
    } else {
        command
    };

    MaybeCommand::ForUs(ParsedCommand {
        name,
        params: rest[command_len..].trim_start(),
    })
}
