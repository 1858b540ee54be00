// Conclave Chat - interactive multi-agent chat over Ollama

use anyhow::Context;
use clap::Parser;
use conclave::backend::OllamaBackend;
use conclave::config::{CONFIG_FILE, Config, Overrides};
use conclave::orchestration::{
    ChatEvent, Message, Orchestrator, Roster, TurnOutcome, TurnPhase, USER_ROLE,
};
use crossterm::{cursor, queue, style, terminal};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use termimad::{MadSkin, crossterm::style::Color};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclave-chat", version, about = "Chat with a host agent and its specialists")]
struct Args {
    #[command(flatten)]
    overrides: Overrides,

    /// Write a starter conclave.toml to the current directory and exit
    #[arg(long)]
    init: bool,
}

fn create_markdown_skin() -> MadSkin {
    let mut skin = MadSkin::default();

    // Headers
    skin.headers[0].set_fg(Color::Cyan);
    skin.headers[1].set_fg(Color::Blue);
    skin.headers[2].set_fg(Color::Green);

    // Code blocks
    skin.code_block.set_fg(Color::Yellow);
    skin.inline_code.set_fg(Color::Yellow);

    skin.bold.set_fg(Color::White);
    skin.italic.set_fg(Color::Magenta);

    skin
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Transient status line shown while a turn is in flight
#[derive(Default)]
struct Indicator {
    phase: Option<TurnPhase>,
    role: String,
    fragment: String,
}

impl Indicator {
    fn observe(&mut self, event: ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::PhaseChanged(TurnPhase::Idle) => return self.clear(),
            ChatEvent::PhaseChanged(phase) => {
                self.phase = Some(phase);
                self.fragment.clear();
            }
            ChatEvent::Token { role, text } => {
                if role != self.role {
                    self.role = role;
                    self.fragment.clear();
                }
                self.fragment.push_str(&text);
            }
            _ => return Ok(()),
        }
        self.draw()
    }

    fn draw(&self) -> io::Result<()> {
        let Some(phase) = self.phase else {
            return Ok(());
        };

        let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
        let tail: String = self
            .fragment
            .chars()
            .rev()
            .filter(|c| !c.is_control())
            .take(width.saturating_sub(self.role.len() + 20))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let mut out = io::stdout();
        queue!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine),
            style::SetForegroundColor(style::Color::DarkGrey),
            style::Print(format!("⋯ {} {}: {}", phase.as_str(), self.role, tail)),
            style::ResetColor
        )?;
        out.flush()
    }

    fn clear(&mut self) -> io::Result<()> {
        *self = Self::default();
        let mut out = io::stdout();
        queue!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        out.flush()
    }
}

fn print_message(skin: &MadSkin, message: &Message) {
    println!("[{}]", message.role);
    skin.print_text(&message.content);
    println!();
}

fn print_roster(roster: &Roster) {
    println!("\nAgents:");
    for agent in roster.agents() {
        let marker = if agent.is_host() { " (host)" } else { "" };
        println!("  • {}{} → {}", agent.role, marker, agent.model);
    }
    println!();
}

async fn installed_models(backend: &OllamaBackend) -> Vec<String> {
    match backend.list_models().await {
        Ok(models) => models,
        Err(e) => {
            warn!(host = %backend.base_url(), error = %e, "Could not list models");
            Vec::new()
        }
    }
}

async fn write_starter(backend: &OllamaBackend) -> anyhow::Result<()> {
    let path = Path::new(CONFIG_FILE);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    let models = installed_models(backend).await;
    let model = models.first().map(String::as_str).unwrap_or("llama3.2");
    Config::starter(model).to_file(path)?;
    println!("Wrote {} (all agents on {})", path.display(), model);
    Ok(())
}

/// Run one submission while drawing the streaming indicator
async fn run_turn(
    orchestrator: &Orchestrator,
    events: &mut broadcast::Receiver<ChatEvent>,
    input: &str,
) -> anyhow::Result<Option<TurnOutcome>> {
    let mut indicator = Indicator::default();
    let turn = orchestrator.submit(input);
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            event = events.recv() => match event {
                Ok(event) => indicator.observe(event)?,
                // Skipped fragments only cost the indicator some text
                Err(RecvError::Lagged(_) | RecvError::Closed) => {}
            },
        }
    };
    indicator.clear()?;

    match result {
        Ok(outcome) => Ok(Some(outcome)),
        Err(e) => {
            eprintln!("{e}\n");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.overrides.verbose);

    let (config, path) = Config::load(&args.overrides)?;
    let backend = Arc::new(OllamaBackend::new(&config.ollama.host));

    if args.init {
        return write_starter(&backend).await;
    }

    println!("Conclave v{} - Multi-agent Chat\n", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &path {
        println!("Config: {}", path.display());
    }

    let models = if config.agents.is_empty() {
        installed_models(&backend).await
    } else {
        Vec::new()
    };
    let roster = config
        .roster(&models)
        .with_context(|| format!("Is Ollama running at {}?", config.ollama.host))?;

    let orchestrator = Orchestrator::with_config(config.orchestrator_config(), roster, backend.clone());
    if orchestrator.roster().host().is_none() {
        eprintln!("Warning: no agent has the role \"Host\"; chat turns will be refused.\n");
    }
    print_roster(orchestrator.roster());

    let skin = create_markdown_skin();
    let mut events = orchestrator.subscribe();
    let mut shown = 0;

    println!(
        "Commands: /models, /agents, /history, /reset, exit (type \"{}\" to close the conversation)\n",
        orchestrator.config().end_chat_command
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/models" => {
                let models = installed_models(&backend).await;
                if models.is_empty() {
                    println!("\nNo models available.\n");
                } else {
                    println!("\nAvailable models:");
                    for m in models {
                        println!("  • {}", m);
                    }
                    println!();
                }
                continue;
            }
            "/agents" => {
                print_roster(orchestrator.roster());
                continue;
            }
            "/history" => {
                println!();
                for message in &orchestrator.snapshot().chat_log {
                    print_message(&skin, message);
                }
                continue;
            }
            "/reset" => {
                orchestrator.reset();
                shown = 0;
                println!("Conversation cleared.\n");
                continue;
            }
            _ => {}
        }

        let Some(outcome) = run_turn(&orchestrator, &mut events, input).await? else {
            continue;
        };

        // Print everything appended by this turn except the user's own line
        let snapshot = orchestrator.snapshot();
        println!();
        for message in snapshot.chat_log.iter().skip(shown) {
            if message.role != USER_ROLE {
                print_message(&skin, message);
            }
        }
        shown = snapshot.chat_log.len();

        if outcome == TurnOutcome::Terminated {
            println!("Use /reset to start a new conversation, or exit.\n");
        }
    }

    println!("Goodbye!");
    Ok(())
}
