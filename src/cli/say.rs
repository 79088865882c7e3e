//! Non-interactive "say" command

use std::error::Error;

use crate::cli::compose::Services;
use crate::cli::render::{drive_submission, EventPrinter};
use crate::cli::status;
use crate::core::driver::UserInput;

pub async fn run_say(services: Services, prompt: Vec<String>) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: neuralcore say <prompt>");
        std::process::exit(1);
    }

    let Services {
        state,
        driver,
        mut events,
        ..
    } = services;
    let status = status::attach(&state);

    let mut printer = EventPrinter::stdio();
    let result = drive_submission(&driver, &mut events, &mut printer, UserInput::text(prompt)).await?;
    status.unsubscribe();

    if let Err(err) = result {
        eprintln!("\n❌ Error: {err}");
        std::process::exit(1);
    }
    Ok(())
}
