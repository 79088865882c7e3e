//! Selects the active backend from the published mode.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::backend::{GenerateError, GenerationBackend};
use crate::core::engine_state::{EngineStateHandle, Mode, StateUpdate};
use crate::core::local::LocalAdapter;
use crate::core::remote::RemoteAdapter;

#[derive(Clone)]
pub struct InferenceRouter {
    state: EngineStateHandle,
    local: Arc<LocalAdapter>,
    remote: Arc<RemoteAdapter>,
}

impl InferenceRouter {
    pub fn new(
        state: EngineStateHandle,
        local: Arc<LocalAdapter>,
        remote: Arc<RemoteAdapter>,
    ) -> Self {
        Self {
            state,
            local,
            remote,
        }
    }

    pub fn state(&self) -> &EngineStateHandle {
        &self.state
    }

    pub fn local(&self) -> &Arc<LocalAdapter> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<RemoteAdapter> {
        &self.remote
    }

    pub fn mode(&self) -> Mode {
        self.state.snapshot().mode
    }

    /// Publishes `mode` before returning. Switching to remote also starts a
    /// background health probe whose handle is returned.
    pub fn set_mode(&self, mode: Mode) -> Option<JoinHandle<bool>> {
        self.state.update(StateUpdate::new().mode(mode));
        if mode != Mode::Remote {
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available; skipping remote health probe");
            return None;
        };
        let remote = Arc::clone(&self.remote);
        Some(runtime.spawn(async move { remote.check_health().await }))
    }

    pub fn is_ready(&self) -> bool {
        let state = self.state.snapshot();
        self.local.is_ready() || (state.mode == Mode::Remote && state.remote_connected)
    }

    pub fn active(&self) -> Arc<dyn GenerationBackend> {
        match self.mode() {
            Mode::Local => Arc::clone(&self.local) as Arc<dyn GenerationBackend>,
            Mode::Remote => Arc::clone(&self.remote) as Arc<dyn GenerationBackend>,
        }
    }

    /// Loads the local engine when it is the active backend and not loaded.
    pub async fn prepare(&self) -> Result<(), GenerateError> {
        if self.mode() == Mode::Local && !self.local.is_ready() {
            self.local.initialize().await?;
        }
        Ok(())
    }
}
