//! neuralcore is a streaming chat core that drives a conversation against a
//! local inference engine or a remote RAG backend.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the observable engine state, the local and remote
//!   adapters, the stream demultiplexer, artifacts and the chat driver.
//! - [`api`] defines the wire payloads spoken to the backend and to
//!   OpenAI-compatible local servers.
//! - [`cli`] parses arguments, composes the adapters and runs commands.
//! - [`utils`] holds URL, UTF-8 decoding and logging helpers.
//!
//! The binary (`src/main.rs`) routes straight into [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
