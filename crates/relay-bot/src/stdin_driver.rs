//! Line-oriented driver: each input line is `<chat_id> <message>`.
//!
//! Lines whose message starts with `/clear`, `/image <path> [caption]` or
//! `/caps` are handled locally; everything else goes to the orchestrator.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use relay_orchestrator::Orchestrator;

#[derive(Debug, PartialEq, Eq)]
enum DriverCommand<'a> {
    Message { chat_id: &'a str, text: &'a str },
    Image { chat_id: &'a str, path: &'a str, caption: &'a str },
    Clear { chat_id: &'a str },
    Capabilities,
}

fn parse_line(line: &str) -> Option<DriverCommand<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (chat_id, text) = match line.split_once(char::is_whitespace) {
        Some((chat_id, text)) => (chat_id, text.trim()),
        None => (line, ""),
    };
    let command = match text.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (text, ""),
    };
    Some(match command {
        ("/clear", _) => DriverCommand::Clear { chat_id },
        ("/caps", _) => DriverCommand::Capabilities,
        ("/image", rest) if !rest.is_empty() => {
            let (path, caption) = match rest.split_once(char::is_whitespace) {
                Some((path, caption)) => (path, caption.trim()),
                None => (rest, ""),
            };
            DriverCommand::Image {
                chat_id,
                path,
                caption,
            }
        }
        _ => DriverCommand::Message { chat_id, text },
    })
}

pub(crate) fn run(orchestrator: &Orchestrator, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line.context("failed to read stdin")?;
        let Some(command) = parse_line(&line) else {
            continue;
        };
        let (chat_id, reply) = match command {
            DriverCommand::Message { chat_id, text } => (chat_id, orchestrator.handle(chat_id, text, None)),
            DriverCommand::Image {
                chat_id,
                path,
                caption,
            } => {
                let reply = match std::fs::read(Path::new(path)) {
                    Ok(bytes) => orchestrator.handle(chat_id, caption, Some(&bytes)),
                    Err(error) => {
                        tracing::warn!(chat_id, path, %error, "failed to read image");
                        format!("could not read image '{path}': {error}")
                    }
                };
                (chat_id, reply)
            }
            DriverCommand::Clear { chat_id } => {
                let reply = if orchestrator.clear_session(chat_id) {
                    "session cleared"
                } else {
                    "no active session"
                };
                (chat_id, reply.to_string())
            }
            DriverCommand::Capabilities => ("*", orchestrator.describe_capabilities()),
        };
        writeln!(output, "[{chat_id}] {reply}").context("failed to write reply")?;
        output.flush().context("failed to flush stdout")?;
    }
    Ok(())
}
