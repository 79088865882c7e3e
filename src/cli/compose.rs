//! Builds the shared state, adapters and driver for one CLI run.

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::client::BackendClient;
use crate::core::config::Config;
use crate::core::driver::{ChatDriver, DriverEvent, DriverOptions};
use crate::core::engine::OpenAiCompatEngine;
use crate::core::engine_state::EngineStateHandle;
use crate::core::local::LocalAdapter;
use crate::core::remote::RemoteAdapter;
use crate::core::router::InferenceRouter;

pub struct Services {
    pub state: EngineStateHandle,
    pub router: InferenceRouter,
    pub client: BackendClient,
    pub driver: ChatDriver,
    pub events: UnboundedReceiver<DriverEvent>,
}

impl Services {
    /// Wires everything to one engine state handle and applies the
    /// configured mode. Must run inside a tokio runtime so a remote mode can
    /// start its health probe.
    pub fn compose(config: &Config) -> Result<Self, Box<dyn Error>> {
        let http = reqwest::Client::builder().build()?;
        let state = EngineStateHandle::default();

        let engine = OpenAiCompatEngine::new(
            http.clone(),
            config.local_url(),
            config.local_model(),
            config.local.api_key.clone(),
        );
        let local = Arc::new(LocalAdapter::new(Arc::new(engine), state.clone()));
        let remote = Arc::new(RemoteAdapter::new(
            http.clone(),
            state.clone(),
            config.remote_settings(),
        ));
        let router = InferenceRouter::new(state.clone(), local, remote);
        let client = BackendClient::new(http, config.remote_url(), config.studio_url());

        let options = DriverOptions {
            history: config.history(),
            mirror_studio: config.mirror_studio(),
            ..DriverOptions::default()
        };
        let (driver, events) = ChatDriver::new(router.clone(), client.clone(), options);

        // The probe handle is not needed; its result lands in the state.
        let _ = router.set_mode(config.mode());

        Ok(Self {
            state,
            router,
            client,
            driver,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine_state::Mode;

    #[tokio::test]
    async fn compose_publishes_configured_mode() {
        let mut config = Config::default();
        config.mode = Some(Mode::Remote);
        config.remote.base_url = Some("http://127.0.0.1:9".to_string());

        let services = Services::compose(&config).expect("compose");
        assert_eq!(services.router.mode(), Mode::Remote);
        assert_eq!(services.state.snapshot().mode, Mode::Remote);
        assert!(!services.driver.is_streaming());
    }

    #[tokio::test]
    async fn compose_defaults_to_local_mode() {
        let services = Services::compose(&Config::default()).expect("compose");
        assert_eq!(services.router.mode(), Mode::Local);
        assert!(!services.router.is_ready());
    }
}
