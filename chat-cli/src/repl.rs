//! REPL 命令解析

use chat_logic::Model;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    /// 普通消息
    Send(String),
    New,
    History,
    Load(String),
    Restore(String),
    Checkpoints,
    Model(Model),
    Status,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
Commands:
  /new              start a new session
  /history          list recent conversations
  /load <file>      load a conversation from /history
  /checkpoints      list checkpoints of this session
  /restore <sha>    restore workspace files to a checkpoint
  /model <name>     default | opus | sonnet
  /status           show session totals
  /quit             exit
Press Ctrl-C while Claude is working to stop it.";

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match (name, arg) {
            ("new", _) => Self::New,
            ("history", _) => Self::History,
            ("checkpoints", _) => Self::Checkpoints,
            ("status", _) => Self::Status,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            ("load", "") | ("restore", "") | ("model", "") => {
                Self::Invalid(format!("/{name} needs an argument"))
            }
            ("load", file) => Self::Load(file.to_string()),
            ("restore", sha) => Self::Restore(sha.to_string()),
            ("model", model) => match model.parse() {
                Ok(model) => Self::Model(model),
                Err(e) => Self::Invalid(e),
            },
            _ => Self::Invalid(format!("unknown command /{name}, try /help")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("  hello there "), ReplCommand::Send("hello there".into()));
        assert_eq!(ReplCommand::parse(""), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("/new"), ReplCommand::New);
        assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Quit);
        assert_eq!(
            ReplCommand::parse("/load 2024-01-01_10-00_hi.json"),
            ReplCommand::Load("2024-01-01_10-00_hi.json".into())
        );
        assert_eq!(ReplCommand::parse("/restore  abc123 "), ReplCommand::Restore("abc123".into()));
        assert_eq!(ReplCommand::parse("/model opus"), ReplCommand::Model(Model::Opus));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(ReplCommand::parse("/load"), ReplCommand::Invalid(_)));
        assert!(matches!(ReplCommand::parse("/model gpt"), ReplCommand::Invalid(_)));
        assert!(matches!(ReplCommand::parse("/frobnicate"), ReplCommand::Invalid(_)));
    }
}
