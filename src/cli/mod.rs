//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod compose;
pub mod render;
pub mod say;
pub mod service;
pub mod status;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::chat::run_chat;
use crate::cli::compose::Services;
use crate::cli::say::run_say;
use crate::core::config::Config;
use crate::core::engine_state::Mode;
use crate::core::remote::RemoteRoute;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "neuralcore")]
#[command(about = "Streaming chat against a local inference engine or a remote RAG backend")]
#[command(
    long_about = "neuralcore drives a conversation against either an OpenAI-compatible local \
inference server or a remote RAG service. Responses stream to the terminal while trace ids, \
<thinking> segments and fenced code blocks are extracted on the fly; the last code block is \
kept as a versioned artifact and mirrored to the studio watcher.\n\n\
Configuration:\n\
  Use 'neuralcore config' to show settings and 'neuralcore set <key> <value>' to change them.\n\n\
Environment Variables:\n\
  RUST_LOG          Log filter (overrides the log-level setting)\n\n\
Chat commands:\n\
  /mode local|remote  Switch backend\n\
  /health             Probe the remote service\n\
  /ingest             Index documents on the remote service\n\
  /image <path> [text]  Send an image with an optional message\n\
  /up, /down          Rate the last reply\n\
  /artifact           Print the current artifact\n\
  /quit               Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Backend to use for this run (local or remote)
    #[arg(long, global = true, value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Base URL of the remote RAG service
    #[arg(long, global = true, value_name = "URL")]
    pub remote_url: Option<String>,

    /// Route remote chat through the dual-loop endpoint
    #[arg(long, global = true)]
    pub dual_loop: bool,

    /// Write diagnostic logs to the given file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Read and write configuration at this path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send a single prompt and print the reply
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Check whether the remote service is reachable
    Health,
    /// Ask the remote service to index its documents
    Ingest,
    /// Rate a response by its trace id
    Feedback {
        trace_id: String,
        /// 1 for a good reply, 0 for a bad one
        score: u8,
    },
    /// Run the social content agent for a feature description
    Social {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        description: Vec<String>,
    },
    /// Generate code from a screenshot or mockup
    Vision { image: PathBuf },
    /// Show the effective configuration
    Config,
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

fn parse_mode(raw: &str) -> Result<Mode, String> {
    Mode::try_from(raw)
}

impl Args {
    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::default_path)
    }

    /// Folds per-run flags over the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.mode = Some(mode);
        }
        if let Some(url) = &self.remote_url {
            config.remote.base_url = Some(url.clone());
        }
        if self.dual_loop {
            config.remote.route = Some(RemoteRoute::DualLoop);
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(mut args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = args.config_path();
    let mut config = match &config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::default(),
    };

    init_tracing(config.log_level(), args.log.as_deref())?;

    match args.command.take().unwrap_or(Commands::Chat) {
        Commands::Config => {
            config.print_all();
            Ok(())
        }
        Commands::Set { key, value } => {
            if value.is_empty() {
                config.print_all();
                return Ok(());
            }
            let path = config_path.ok_or("No configuration directory available")?;
            match config.set_value(&key, &value.join(" ")) {
                Ok(message) => {
                    config.save_to_path(&path)?;
                    println!("{message}");
                    Ok(())
                }
                Err(err) => {
                    err.print();
                    std::process::exit(1);
                }
            }
        }
        Commands::Unset { key } => {
            let path = config_path.ok_or("No configuration directory available")?;
            match config.unset_value(&key) {
                Ok(message) => {
                    config.save_to_path(&path)?;
                    println!("{message}");
                    Ok(())
                }
                Err(err) => {
                    err.print();
                    std::process::exit(1);
                }
            }
        }
        command => {
            args.apply_overrides(&mut config);
            let services = Services::compose(&config)?;
            match command {
                Commands::Chat => run_chat(services).await,
                Commands::Say { prompt } => run_say(services, prompt).await,
                Commands::Health => service::run_health(&services).await,
                Commands::Ingest => service::run_ingest(&services).await,
                Commands::Feedback { trace_id, score } => {
                    service::run_feedback(&services, &trace_id, score).await
                }
                Commands::Social { description } => {
                    service::run_social(&services, &description.join(" ")).await
                }
                Commands::Vision { image } => service::run_vision(&services, &image).await,
                Commands::Config | Commands::Set { .. } | Commands::Unset { .. } => Ok(()),
            }
        }
    }
}
