//! One-shot commands against the remote service.

use std::error::Error;
use std::io::{self, Write};
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::api::SocialResults;
use crate::cli::compose::Services;
use crate::cli::status;
use crate::core::api_error::format_api_error;
use crate::core::client::ServiceError;
use crate::core::message::FeedbackScore;

fn report_failure(context: &str, err: &ServiceError) -> ! {
    eprintln!("\n❌ {context}: {err}");
    if let ServiceError::Status { body, .. } = err {
        if !body.trim().is_empty() {
            eprintln!("{}", format_api_error(body));
        }
    }
    std::process::exit(1);
}

pub async fn run_health(services: &Services) -> Result<(), Box<dyn Error>> {
    let remote = services.router.remote();
    let url = &remote.settings().base_url;
    if remote.check_health().await {
        println!("✅ Remote service at {url} is reachable");
        Ok(())
    } else {
        eprintln!("❌ Remote service at {url} is not reachable");
        std::process::exit(1);
    }
}

pub async fn run_ingest(services: &Services) -> Result<(), Box<dyn Error>> {
    let status = status::attach(&services.state);
    let chunks = services.router.remote().trigger_ingest().await;
    status.unsubscribe();
    if chunks.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn run_feedback(
    services: &Services,
    trace_id: &str,
    score: u8,
) -> Result<(), Box<dyn Error>> {
    let score = FeedbackScore::try_from(score)?;
    if services.client.send_feedback(trace_id, score).await {
        println!("✅ Recorded feedback {} for {trace_id}", score.as_u8());
        Ok(())
    } else {
        eprintln!("❌ Feedback for {trace_id} was not accepted");
        std::process::exit(1);
    }
}

pub fn format_social(results: &SocialResults) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = &results.text {
        lines.push(text.clone());
    }
    if let Some(voiceover) = &results.voiceover {
        lines.push(format!("🎙  Voiceover: {voiceover}"));
    }
    for image in &results.images {
        lines.push(format!("🖼  Image: {image}"));
    }
    if lines.is_empty() {
        lines.push("(the agent returned no content)".to_string());
    }
    lines
}

pub async fn run_social(services: &Services, description: &str) -> Result<(), Box<dyn Error>> {
    if description.trim().is_empty() {
        eprintln!("Usage: neuralcore social <feature description>");
        std::process::exit(1);
    }
    match services.client.run_social_agent(description).await {
        Ok(results) => {
            for line in format_social(&results) {
                println!("{line}");
            }
            Ok(())
        }
        Err(err) => report_failure("Social agent failed", &err),
    }
}

pub async fn run_vision(services: &Services, image: &Path) -> Result<(), Box<dyn Error>> {
    let cancel = CancellationToken::new();
    let mut stdout = io::stdout();
    let mut write_error = None;
    let mut on_chunk = |chunk: &str| {
        if write_error.is_some() {
            return;
        }
        if let Err(err) = write!(stdout, "{chunk}").and_then(|_| stdout.flush()) {
            write_error = Some(err);
        }
    };

    let result = services
        .client
        .generate_from_image(image, &mut on_chunk, &cancel)
        .await;
    if let Some(err) = write_error {
        return Err(err.into());
    }
    match result {
        Ok(_) => {
            println!();
            Ok(())
        }
        Err(err) => report_failure("Vision generation failed", &err),
    }
}
