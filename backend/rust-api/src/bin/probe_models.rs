use tracing_subscriber::fmt::init;

use quizgen_api::{
    config::Config,
    models::{AttemptOutcome, ModelCandidate},
    services::ai_backend::{attempt, build_backend},
};

const PROBE_PROMPT: &str = "Reply with the single word OK.";

/// Sends one trivial prompt to every configured candidate and reports which answer.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load()?;
    if config.ai.api_key.is_none() {
        anyhow::bail!("AI_API_KEY is not set; nothing to probe");
    }

    let backend = build_backend(&config.ai)?;
    let candidates = ModelCandidate::from_identifiers(config.ai.models.iter().cloned());

    println!(
        "Probing {} candidates via {} ({})",
        candidates.len(),
        backend.name(),
        config.ai.base_url
    );

    let mut working = Vec::new();
    for candidate in &candidates {
        let started = std::time::Instant::now();
        let result = attempt(backend.as_ref(), candidate, PROBE_PROMPT).await;
        let elapsed_ms = started.elapsed().as_millis();

        match result {
            Ok(text) => {
                let preview: String = text.trim().chars().take(40).collect();
                println!(
                    "  [ok]   {:<28} {:>6} ms  {}",
                    candidate.identifier, elapsed_ms, preview
                );
                working.push(candidate.identifier.clone());
            }
            Err(err) => {
                let outcome: AttemptOutcome = err.outcome();
                println!(
                    "  [fail] {:<28} {:>6} ms  {}: {}",
                    candidate.identifier, elapsed_ms, outcome, err
                );
            }
        }
    }

    if working.is_empty() {
        anyhow::bail!("no configured model candidate answered");
    }

    println!("Working candidates: {}", working.join(", "));
    Ok(())
}
