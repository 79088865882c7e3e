//! Terminal rendering of driver events.

use std::io::{self, Write};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::artifact::Artifact;
use crate::core::backend::StreamEnd;
use crate::core::driver::{ChatDriver, DriverError, DriverEvent, UserInput};
use crate::core::message::{ConversationMessage, MessageId, Role};

/// Streams assistant content to `out` and side information to `err`.
pub struct EventPrinter<O: Write, E: Write> {
    out: O,
    err: E,
    printed: Option<(MessageId, String)>,
    announced_thinking: bool,
    latest: Option<ConversationMessage>,
    artifact: Option<Artifact>,
}

impl EventPrinter<io::Stdout, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> EventPrinter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            printed: None,
            announced_thinking: false,
            latest: None,
            artifact: None,
        }
    }

    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }

    pub fn handle(&mut self, event: DriverEvent) -> io::Result<()> {
        match event {
            DriverEvent::MessageUpdated(message) if message.role == Role::Assistant => {
                self.show_message(message)
            }
            DriverEvent::MessageUpdated(_) | DriverEvent::Preview(_) => Ok(()),
            DriverEvent::MessageRemoved(id) => {
                if self.printed.as_ref().is_some_and(|(printed, _)| *printed == id) {
                    self.printed = None;
                }
                Ok(())
            }
            DriverEvent::ArtifactChanged(artifact) => {
                self.artifact = Some(artifact);
                Ok(())
            }
            DriverEvent::StreamFinished { message_id, end } => self.finish(message_id, end),
        }
    }

    fn show_message(&mut self, message: ConversationMessage) -> io::Result<()> {
        if message.is_thinking && !self.announced_thinking {
            writeln!(self.err, "💭 thinking...")?;
            self.announced_thinking = true;
        }

        let previous = match &self.printed {
            Some((id, content)) if *id == message.id => content.as_str(),
            _ => "",
        };
        match message.content.strip_prefix(previous) {
            Some(suffix) => write!(self.out, "{suffix}")?,
            // Replaced rather than extended, e.g. by an inline error.
            None => write!(self.out, "\n{}", message.content)?,
        }
        self.out.flush()?;

        self.printed = Some((message.id, message.content.clone()));
        self.latest = Some(message);
        Ok(())
    }

    fn finish(&mut self, message_id: MessageId, end: StreamEnd) -> io::Result<()> {
        writeln!(self.out)?;
        self.out.flush()?;

        if end == StreamEnd::Cancelled {
            writeln!(self.err, "⏹ cancelled")?;
        }
        if let Some(message) = self.latest.take().filter(|latest| latest.id == message_id) {
            if let Some(thought) = message.thought.as_deref().filter(|t| !t.trim().is_empty()) {
                writeln!(self.err, "💭 {}", thought.trim())?;
            }
            if let Some(trace_id) = &message.trace_id {
                writeln!(self.err, "🔖 trace id: {trace_id}")?;
            }
        }
        if let Some(artifact) = self.artifact.take() {
            writeln!(
                self.err,
                "📦 {} ({}) updated to version {}",
                artifact.title,
                artifact.language,
                artifact.versions.len()
            )?;
        }
        self.printed = None;
        self.announced_thinking = false;
        Ok(())
    }
}

/// Runs one submission while rendering its events as they arrive.
pub async fn drive_submission<O: Write, E: Write>(
    driver: &ChatDriver,
    events: &mut UnboundedReceiver<DriverEvent>,
    printer: &mut EventPrinter<O, E>,
    input: UserInput,
) -> io::Result<Result<MessageId, DriverError>> {
    let submission = driver.submit(input);
    tokio::pin!(submission);

    let result = loop {
        tokio::select! {
            result = &mut submission => break result,
            Some(event) = events.recv() => printer.handle(event)?,
        }
    };
    while let Ok(event) = events.try_recv() {
        printer.handle(event)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::core::artifact::ArtifactVersion;

    fn assistant(id: u64, content: &str) -> ConversationMessage {
        ConversationMessage {
            id: MessageId(id),
            role: Role::Assistant,
            content: content.to_string(),
            images: Vec::new(),
            thought: None,
            is_thinking: false,
            trace_id: None,
            feedback: None,
        }
    }

    fn printer() -> EventPrinter<Vec<u8>, Vec<u8>> {
        EventPrinter::new(Vec::new(), Vec::new())
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).expect("utf8 output")
    }

    #[test]
    fn prints_only_new_content() {
        let mut printer = printer();
        for content in ["", "Hel", "Hello", "Hello there"] {
            printer
                .handle(DriverEvent::MessageUpdated(assistant(2, content)))
                .unwrap();
        }
        printer
            .handle(DriverEvent::StreamFinished {
                message_id: MessageId(2),
                end: StreamEnd::Completed,
            })
            .unwrap();

        let (out, err) = printer.into_parts();
        assert_eq!(text(out), "Hello there\n");
        assert!(err.is_empty());
    }

    #[test]
    fn replaced_content_starts_a_new_line() {
        let mut printer = printer();
        printer
            .handle(DriverEvent::MessageUpdated(assistant(2, "partial")))
            .unwrap();
        printer
            .handle(DriverEvent::MessageUpdated(assistant(2, "Error: refused")))
            .unwrap();

        let (out, _) = printer.into_parts();
        assert_eq!(text(out), "partial\nError: refused");
    }

    #[test]
    fn user_messages_are_not_echoed() {
        let mut printer = printer();
        let mut user = assistant(1, "my question");
        user.role = Role::User;
        printer.handle(DriverEvent::MessageUpdated(user)).unwrap();

        let (out, _) = printer.into_parts();
        assert!(out.is_empty());
    }

    #[test]
    fn finish_reports_thought_trace_and_artifact() {
        let mut printer = printer();
        let mut thinking = assistant(4, "Sure.");
        thinking.is_thinking = true;
        printer
            .handle(DriverEvent::MessageUpdated(thinking.clone()))
            .unwrap();

        let mut done = thinking;
        done.is_thinking = false;
        done.thought = Some(" plan the layout ".to_string());
        done.trace_id = Some("trace-9".to_string());
        printer.handle(DriverEvent::MessageUpdated(done)).unwrap();

        let now = Utc::now();
        printer
            .handle(DriverEvent::ArtifactChanged(Artifact {
                id: "a1".to_string(),
                title: "Generated Code".to_string(),
                content: "<App />".to_string(),
                language: "tsx".to_string(),
                versions: vec![ArtifactVersion {
                    id: "v1".to_string(),
                    content: "<App />".to_string(),
                    timestamp: now,
                }],
            }))
            .unwrap();
        printer
            .handle(DriverEvent::StreamFinished {
                message_id: MessageId(4),
                end: StreamEnd::Cancelled,
            })
            .unwrap();

        let (out, err) = printer.into_parts();
        assert_eq!(text(out), "Sure.\n");
        assert_eq!(
            text(err),
            "💭 thinking...\n⏹ cancelled\n💭 plan the layout\n🔖 trace id: trace-9\n\
             📦 Generated Code (tsx) updated to version 1\n"
        );
    }
}
