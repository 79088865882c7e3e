pub mod api_error;
pub mod artifact;
pub mod backend;
pub mod client;
pub mod config;
pub mod demux;
pub mod driver;
pub mod engine;
pub mod engine_state;
pub mod fence;
pub mod local;
pub mod message;
pub mod mood;
pub mod remote;
pub mod router;
