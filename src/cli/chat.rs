//! Line-oriented interactive chat.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::compose::Services;
use crate::cli::render::{drive_submission, EventPrinter};
use crate::cli::status;
use crate::core::driver::{DriverError, ImageAttachment, UserInput};
use crate::core::engine_state::Mode;
use crate::core::message::{FeedbackScore, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Message(String),
    Mode(Mode),
    Health,
    Ingest,
    Image { path: PathBuf, text: String },
    Rate(FeedbackScore),
    Artifact,
    Quit,
    Empty,
}

pub fn parse_line(line: &str) -> Result<ChatCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ChatCommand::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(ChatCommand::Message(line.to_string()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));
    match name {
        "mode" => Mode::try_from(rest).map(ChatCommand::Mode),
        "health" => Ok(ChatCommand::Health),
        "ingest" => Ok(ChatCommand::Ingest),
        "image" => {
            let (path, text) = rest
                .split_once(char::is_whitespace)
                .map(|(path, text)| (path, text.trim()))
                .unwrap_or((rest, ""));
            if path.is_empty() {
                return Err("Usage: /image <path> [message]".to_string());
            }
            Ok(ChatCommand::Image {
                path: PathBuf::from(path),
                text: text.to_string(),
            })
        }
        "up" => Ok(ChatCommand::Rate(FeedbackScore::Positive)),
        "down" => Ok(ChatCommand::Rate(FeedbackScore::Negative)),
        "artifact" => Ok(ChatCommand::Artifact),
        "quit" | "exit" => Ok(ChatCommand::Quit),
        other => Err(format!("Unknown command: /{other}")),
    }
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

pub async fn run_chat(services: Services) -> Result<(), Box<dyn Error>> {
    let Services {
        state,
        router,
        driver,
        mut events,
        ..
    } = services;
    let status = status::attach(&state);
    let mut printer = EventPrinter::stdio();
    let mut last_reply: Option<MessageId> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let input = match parse_line(&line) {
            Ok(ChatCommand::Empty) => None,
            Ok(ChatCommand::Message(text)) => Some(UserInput::text(text)),
            Ok(ChatCommand::Image { path, text }) => {
                match ImageAttachment::from_path(&path).await {
                    Ok(image) => Some(UserInput::text(text).with_image(image)),
                    Err(err) => {
                        eprintln!("❌ Could not read {}: {err}", path.display());
                        None
                    }
                }
            }
            Ok(ChatCommand::Mode(mode)) => {
                if let Some(probe) = router.set_mode(mode) {
                    // Wait so the next status line reflects the probe.
                    let _ = probe.await;
                }
                None
            }
            Ok(ChatCommand::Health) => {
                router.remote().check_health().await;
                None
            }
            Ok(ChatCommand::Ingest) => {
                router.remote().trigger_ingest().await;
                None
            }
            Ok(ChatCommand::Rate(score)) => {
                match last_reply {
                    Some(id) => match driver.submit_feedback(id, score).await {
                        Ok(true) => eprintln!("✅ Feedback recorded"),
                        Ok(false) => eprintln!("⚠️  Feedback unchanged"),
                        Err(err) => eprintln!("❌ {err}"),
                    },
                    None => eprintln!("⚠️  Nothing to rate yet"),
                }
                None
            }
            Ok(ChatCommand::Artifact) => {
                match driver.artifact() {
                    Some(artifact) => println!("{}", artifact.content),
                    None => eprintln!("⚠️  No artifact yet"),
                }
                None
            }
            Ok(ChatCommand::Quit) => break,
            Err(message) => {
                eprintln!("❌ {message}");
                None
            }
        };

        if let Some(input) = input {
            match drive_submission(&driver, &mut events, &mut printer, input).await? {
                Ok(id) => last_reply = Some(id),
                Err(DriverError::EmptyInput) => {}
                Err(err) => eprintln!("❌ Error: {err}"),
            }
        }
        prompt()?;
    }

    driver.cancel();
    status.unsubscribe();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            parse_line("  build a login form "),
            Ok(ChatCommand::Message("build a login form".to_string()))
        );
        assert_eq!(parse_line("   "), Ok(ChatCommand::Empty));
    }

    #[test]
    fn parses_slash_commands() {
        assert_eq!(parse_line("/mode remote"), Ok(ChatCommand::Mode(Mode::Remote)));
        assert_eq!(parse_line("/up"), Ok(ChatCommand::Rate(FeedbackScore::Positive)));
        assert_eq!(
            parse_line("/down"),
            Ok(ChatCommand::Rate(FeedbackScore::Negative))
        );
        assert_eq!(parse_line("/exit"), Ok(ChatCommand::Quit));
        assert_eq!(
            parse_line("/image shots/login.png make this in react"),
            Ok(ChatCommand::Image {
                path: PathBuf::from("shots/login.png"),
                text: "make this in react".to_string(),
            })
        );
        assert_eq!(
            parse_line("/image mock.webp"),
            Ok(ChatCommand::Image {
                path: PathBuf::from("mock.webp"),
                text: String::new(),
            })
        );
    }

    #[test]
    fn rejects_bad_commands() {
        assert_eq!(
            parse_line("/teleport"),
            Err("Unknown command: /teleport".to_string())
        );
        assert!(parse_line("/mode cloud").is_err());
        assert_eq!(
            parse_line("/image"),
            Err("Usage: /image <path> [message]".to_string())
        );
    }
}
