//! Console commands for the local room
//!
//! Lines starting with `:` steer the console itself. Everything else,
//! including `/quiet`, `/resume` and `/reset`, is posted to the room where the
//! personas see it.

/// What one line of input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Post the text as the current user
    Say(String),
    /// Post the text as a reply to a persona's message
    Reply { persona: String, text: String },
    /// Switch to another chat id
    SwitchChat(i64),
    /// Post under another name
    Rename(String),
    Help,
    Quit,
    /// Nothing to do (blank line)
    Empty,
    /// A console command we could not make sense of
    Invalid(String),
}

/// Parse a console line
pub fn parse(input: &str) -> ConsoleCommand {
    let input = input.trim();
    if input.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(rest) = input.strip_prefix(':') else {
        return ConsoleCommand::Say(input.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    match command.as_str() {
        "help" | "h" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        "chat" => match args.parse() {
            Ok(id) => ConsoleCommand::SwitchChat(id),
            Err(_) => ConsoleCommand::Invalid(format!("not a chat id: '{}'", args)),
        },
        "as" if !args.is_empty() => ConsoleCommand::Rename(args.to_string()),
        "reply" => {
            let mut reply = args.splitn(2, char::is_whitespace);
            match (reply.next(), reply.next().map(str::trim)) {
                (Some(persona), Some(text)) if !persona.is_empty() && !text.is_empty() => {
                    ConsoleCommand::Reply {
                        persona: persona.to_string(),
                        text: text.to_string(),
                    }
                }
                _ => ConsoleCommand::Invalid("usage: :reply <persona> <text>".to_string()),
            }
        }
        _ => ConsoleCommand::Invalid(format!("unknown command ':{}'", command)),
    }
}

pub fn help_message() -> String {
    r#"Type a message to post it to the room.
Room commands (seen by every persona):
  /quiet               End the running exchange and stop new ones
  /resume              Allow exchanges again
  /reset               Make every persona forget this chat
Console commands:
  :reply <id> <text>   Reply to a persona's message
  :chat <id>           Switch to another chat
  :as <name>           Post under another name
  :help, :h, :?        Show this help message
  :quit, :q            Leave"#
        .to_string()
}
