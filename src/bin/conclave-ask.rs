// Conclave Ask - one question, one orchestrated turn

use anyhow::Context;
use clap::Parser;
use conclave::backend::OllamaBackend;
use conclave::config::{Config, Overrides};
use conclave::orchestration::{Orchestrator, TurnOutcome};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclave-ask", version, about = "Ask the agents a single question")]
struct Args {
    #[command(flatten)]
    overrides: Overrides,

    /// Print the chat log as JSON
    #[arg(long)]
    json: bool,

    /// The question
    #[arg(required = true, num_args = 1..)]
    question: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default = if args.overrides.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, _) = Config::load(&args.overrides)?;
    let backend = Arc::new(OllamaBackend::new(&config.ollama.host));

    let models = if config.agents.is_empty() {
        backend.list_models().await.unwrap_or_default()
    } else {
        Vec::new()
    };
    let roster = config
        .roster(&models)
        .with_context(|| format!("Is Ollama running at {}?", config.ollama.host))?;

    let orchestrator = Orchestrator::with_config(config.orchestrator_config(), roster, backend);
    let question = args.question.join(" ");

    let outcome = orchestrator.submit(&question).await?;
    if let TurnOutcome::Completed { decision, replies } = &outcome {
        eprintln!(
            "mode: {}, confidence: {:.2}, replies: {}",
            decision.mode.as_str(),
            decision.confidence,
            replies
        );
    }

    let snapshot = orchestrator.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot.chat_log)?);
        return Ok(());
    }

    for message in &snapshot.chat_log {
        println!("[{}]\n{}\n", message.role, message.content);
    }

    Ok(())
}
