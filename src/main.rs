// ABOUTME: Command-line entry point: run one turn, replay a run log, list backends, answer hooks
// ABOUTME: Initializes logging and config, then prints normalized messages and session events

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use prism::config::{AppConfig, LoggingConfig};
use prism::paths;
use prism::render::{self, Renderer, Terminal};
use prism_agent::backends::claude::{HookAck, HookInput};
use prism_agent::replay::Replayer;
use prism_agent::{AdapterRegistry, BackendConfig, EventType, Session, SessionContext, Subscription};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status for a turn cancelled by Ctrl-C
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "One event stream over Claude Code, OpenCode and Copilot")]
#[command(version)]
struct Cli {
    /// Config file (default: PRISM_CONFIG_PATH, ./prism.toml, then the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt and stream the turn
    Run {
        /// Backend name, overriding the config file
        #[arg(long)]
        backend: Option<String>,
        /// Print reasoning as it arrives
        #[arg(long)]
        thinking: bool,
        prompt: String,
    },
    /// Decode an OpenCode `run --format json` log (`-` reads stdin)
    Replay { file: String },
    /// List registered backend names
    Backends,
    /// Acknowledge a hook invocation: reads hook input on stdin, prints `{"continue":true}`
    Hook,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Run {
            backend,
            thinking,
            prompt,
        } => run(config, backend, thinking, &prompt).await,
        Command::Replay { file } => replay(&file).await,
        Command::Backends => {
            for name in AdapterRegistry::default().available() {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Hook => hook(),
    }
}

/// Stderr fmt layer plus an optional daily-rolling JSON file under the data dir
fn init_logging(logging: &LoggingConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &logging.file {
        Some(prefix) => {
            let dir = paths::log_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().json().with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Print subagent, skill and question events as they are dispatched
fn subscribe_terminal<W>(ctx: &SessionContext, terminal: &Arc<Terminal<W>>) -> Vec<Subscription>
where
    W: Write + Send + 'static,
{
    [
        EventType::SubagentStart,
        EventType::SubagentComplete,
        EventType::SkillInvoked,
        EventType::QuestionAsked,
    ]
    .into_iter()
    .map(|event_type| {
        let terminal = Arc::clone(terminal);
        ctx.on(event_type, move |event| {
            if let Some(line) = render::event_line(event) {
                terminal.line(&line);
            }
        })
    })
    .collect()
}

async fn run(config: AppConfig, backend: Option<String>, thinking: bool, prompt: &str) -> Result<ExitCode> {
    let backend_config = match backend {
        Some(name) if name != config.backend.backend_type() => BackendConfig::new(&name),
        _ => config.backend,
    };

    let registry = AdapterRegistry::default();
    let session = Session::open(&registry, &backend_config).await?;

    let terminal = Arc::new(Terminal::new(std::io::stdout()));
    let renderer = Renderer {
        show_thinking: thinking,
    };
    let _subscriptions = subscribe_terminal(session.context(), &terminal);

    let abort = CancellationToken::new();
    let interrupt = {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, aborting turn");
                abort.cancel();
            }
        })
    };

    let mut failure = None;
    {
        let mut stream = session.stream(prompt, abort);
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    if let Some(fragment) = renderer.message(&message) {
                        terminal.write(&fragment);
                    }
                }
                Err(error) => failure = Some(error),
            }
        }
    }
    interrupt.abort();
    terminal.finish();

    let code = match failure {
        None => ExitCode::SUCCESS,
        Some(error) => {
            terminal.line(&render::stopped_early(&error));
            if error.is_abort() {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::FAILURE
            }
        }
    };

    session.close().await?;
    Ok(code)
}

async fn replay(file: &str) -> Result<ExitCode> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if file == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let handle = tokio::fs::File::open(file)
            .await
            .with_context(|| format!("Failed to open run log {}", file))?;
        Box::new(BufReader::new(handle))
    };

    let ctx = SessionContext::generate();
    let terminal = Arc::new(Terminal::new(std::io::stdout()));
    let renderer = Renderer { show_thinking: true };
    let _subscriptions = subscribe_terminal(&ctx, &terminal);

    let mut replayer = Replayer::new(ctx);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read run log")? {
        for message in replayer.feed_line(&line) {
            if let Some(fragment) = renderer.message(&message) {
                terminal.write(&fragment);
            }
        }
    }
    let outcome = replayer.finish();
    terminal.finish();

    for error in &outcome.errors {
        terminal.line(&format!("[error] {}", error));
    }
    terminal.line(&format!(
        "[replay] {} messages, {} malformed lines, stop reason: {}",
        outcome.messages.len(),
        outcome.malformed,
        outcome.stop_reason.as_deref().unwrap_or("none")
    ));

    Ok(if outcome.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Never blocks the caller: bad input is logged and still acknowledged
fn hook() -> Result<ExitCode> {
    match HookInput::from_reader(std::io::stdin()) {
        Ok(input) => tracing::info!(
            trigger = %input.trigger,
            cwd = %input.cwd,
            fields = input.extra.len(),
            "Hook invoked"
        ),
        Err(e) => tracing::warn!(error = %e, "Unreadable hook input"),
    }
    println!("{}", serde_json::to_string(&HookAck::proceed())?);
    Ok(ExitCode::SUCCESS)
}
