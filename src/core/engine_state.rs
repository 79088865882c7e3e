//! Observable inference status shared between adapters and status displays.
//!
//! [`EngineStateHandle`] is cheap to clone; every clone refers to the same
//! state. The composition root creates one handle and passes it to the
//! adapters that mutate it and to whatever renders it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Remote,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Remote => "remote",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Mode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "remote" => Ok(Mode::Remote),
            other => Err(format!("Unknown mode: {other} (expected 'local' or 'remote')")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub is_loading: bool,
    /// Load progress in percent, `0.0..=100.0`.
    pub progress: f64,
    pub status_text: String,
    pub is_ready: bool,
    pub error: Option<String>,
    /// Generation speed indicator, `0.0..=1.0`.
    pub excitement: f64,
    /// Latency/error pressure indicator, `0.0..=1.0`.
    pub stress: f64,
    pub mode: Mode,
    pub remote_connected: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            is_loading: false,
            progress: 0.0,
            status_text: "Idle".to_string(),
            is_ready: false,
            error: None,
            excitement: 0.0,
            stress: 0.0,
            mode: Mode::Local,
            remote_connected: false,
        }
    }
}

/// The single "current" status derived from the loading/ready/error flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Loading,
    Ready,
    Failed,
}

impl EngineState {
    pub fn status(&self) -> EngineStatus {
        if self.is_loading {
            EngineStatus::Loading
        } else if self.error.is_some() {
            EngineStatus::Failed
        } else if self.is_ready {
            EngineStatus::Ready
        } else {
            EngineStatus::Idle
        }
    }

    fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            is_loading,
            progress,
            status_text,
            is_ready,
            error,
            excitement,
            stress,
            mode,
            remote_connected,
        } = update;

        if let Some(value) = is_loading {
            self.is_loading = value;
        }
        if let Some(value) = progress {
            self.progress = value.clamp(0.0, 100.0);
        }
        if let Some(value) = status_text {
            self.status_text = value;
        }
        if let Some(value) = is_ready {
            self.is_ready = value;
        }
        if let Some(value) = error {
            self.error = value;
        }
        if let Some(value) = excitement {
            self.excitement = value.clamp(0.0, 1.0);
        }
        if let Some(value) = stress {
            self.stress = value.clamp(0.0, 1.0);
        }
        if let Some(value) = mode {
            self.mode = value;
        }
        if let Some(value) = remote_connected {
            self.remote_connected = value;
        }
    }
}

/// A partial state; unset fields keep their current value on merge.
///
/// `error` is doubly optional: `Some(None)` clears a previous error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub is_loading: Option<bool>,
    pub progress: Option<f64>,
    pub status_text: Option<String>,
    pub is_ready: Option<bool>,
    pub error: Option<Option<String>>,
    pub excitement: Option<f64>,
    pub stress: Option<f64>,
    pub mode: Option<Mode>,
    pub remote_connected: Option<bool>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loading(mut self, value: bool) -> Self {
        self.is_loading = Some(value);
        self
    }

    pub fn progress(mut self, value: f64) -> Self {
        self.progress = Some(value);
        self
    }

    pub fn status_text(mut self, value: impl Into<String>) -> Self {
        self.status_text = Some(value.into());
        self
    }

    pub fn ready(mut self, value: bool) -> Self {
        self.is_ready = Some(value);
        self
    }

    pub fn error(mut self, value: impl Into<String>) -> Self {
        self.error = Some(Some(value.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn excitement(mut self, value: f64) -> Self {
        self.excitement = Some(value);
        self
    }

    pub fn stress(mut self, value: f64) -> Self {
        self.stress = Some(value);
        self
    }

    pub fn mood(self, excitement: f64, stress: f64) -> Self {
        self.excitement(excitement).stress(stress)
    }

    pub fn mode(mut self, value: Mode) -> Self {
        self.mode = Some(value);
        self
    }

    pub fn remote_connected(mut self, value: bool) -> Self {
        self.remote_connected = Some(value);
        self
    }
}

type Callback = Arc<dyn Fn(&EngineState) + Send + Sync>;

struct Inner {
    state: EngineState,
    subscribers: Vec<(u64, Callback)>,
    next_subscriber_id: u64,
}

#[derive(Clone)]
pub struct EngineStateHandle {
    inner: Arc<Mutex<Inner>>,
}

impl Default for EngineStateHandle {
    fn default() -> Self {
        Self::new(EngineState::default())
    }
}

impl fmt::Debug for EngineStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineStateHandle")
            .field("state", &self.snapshot())
            .finish()
    }
}

impl EngineStateHandle {
    pub fn new(initial: EngineState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: initial,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking subscriber runs outside the lock, so poisoning only
        // happens on a panic inside `apply`; the state is still coherent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> EngineState {
        self.lock().state.clone()
    }

    pub fn status(&self) -> EngineStatus {
        self.lock().state.status()
    }

    /// Registers `callback` and immediately replays the current state to it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EngineState) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let (id, current) = {
            let mut inner = self.lock();
            let id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            inner.subscribers.push((id, Arc::clone(&callback)));
            (id, inner.state.clone())
        };
        callback(&current);
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Merges `update` and broadcasts the resulting full state once.
    pub fn update(&self, update: StateUpdate) {
        let (state, subscribers) = {
            let mut inner = self.lock();
            inner.state.apply(update);
            let subscribers: Vec<Callback> = inner
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            (inner.state.clone(), subscribers)
        };
        for callback in subscribers {
            callback(&state);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Detaches a subscriber registered through [`EngineStateHandle::subscribe`].
pub struct Subscription {
    id: u64,
    inner: std::sync::Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.subscribers.retain(|(id, _)| *id != self.id);
    }
}
