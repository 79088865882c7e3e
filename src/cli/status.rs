//! Engine state rendered as status lines on stderr.

use std::sync::Mutex;

use crate::core::engine_state::{EngineState, EngineStateHandle, EngineStatus, Mode, Subscription};

#[derive(Debug, Default)]
pub struct StatusLine {
    last: Option<String>,
}

impl StatusLine {
    /// Returns the line for `state` when it differs from the previous one.
    /// Mood changes alone never produce a line.
    pub fn render(&mut self, state: &EngineState) -> Option<String> {
        let line = format_state(state);
        if self.last.as_deref() == Some(line.as_str()) {
            return None;
        }
        self.last = Some(line.clone());
        Some(line)
    }
}

fn format_state(state: &EngineState) -> String {
    let mode = match (state.mode, state.remote_connected) {
        (Mode::Remote, true) => "remote, connected".to_string(),
        (mode, _) => mode.to_string(),
    };
    match state.status() {
        EngineStatus::Failed => format!(
            "❌ [{mode}] {}: {}",
            state.status_text,
            state.error.as_deref().unwrap_or_default()
        ),
        EngineStatus::Loading => {
            format!("⏳ [{mode}] {} ({:.0}%)", state.status_text, state.progress)
        }
        EngineStatus::Ready | EngineStatus::Idle => format!("• [{mode}] {}", state.status_text),
    }
}

/// Prints state changes to stderr until the subscription is detached.
pub fn attach(state: &EngineStateHandle) -> Subscription {
    let line = Mutex::new(StatusLine::default());
    state.subscribe(move |snapshot| {
        let mut line = line.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rendered) = line.render(snapshot) {
            eprintln!("{rendered}");
        }
    })
}
