//! SketchPilot - Entry Point
//!
//! Interactive REPL over stdin/stdout. Point it at a sketch with
//! --sketch, pick a board and port, then chat; slash commands switch
//! mode and provider without restarting.

use anyhow::Context;
use parking_lot::Mutex;
use sketchpilot::collaborators::{ArduinoCli, NoTransport, WorkspaceEditor};
use sketchpilot::providers::ChatOptions;
use sketchpilot::{Agent, ChatMode, Config, LearningStore, ProviderRegistry, ToolExecutor};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let sketch = arg_value(&args, "--sketch");
    let board = arg_value(&args, "--board");
    let port = arg_value(&args, "--port");
    let mode = arg_value(&args, "--mode").and_then(|m| ChatMode::from_str(&m));

    if help_mode {
        println!("SketchPilot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: sketchpilot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --sketch PATH   Open a sketch file");
        println!("  --board FQBN    Select a board (e.g. arduino:avr:uno)");
        println!("  --port PORT     Select a serial port (e.g. /dev/ttyACM0)");
        println!("  --mode MODE     Start mode: ask, debug, agent (default: agent)");
        println!("  --help, -h      Show this help");
        println!();
        println!("Environment variables:");
        println!("  OPENAI_API_KEY         Enables the openai provider");
        println!("  ANTHROPIC_API_KEY      Enables the anthropic provider");
        println!("  GEMINI_API_KEY         Enables the gemini provider");
        println!("  SKETCHPILOT_PROVIDER   Preferred provider (default: openai)");
        println!("  SKETCHPILOT_DB_PATH    Learning database path");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    // Keep stdout clean for the conversation; logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("SketchPilot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let providers = ProviderRegistry::from_config(&config);
    if providers.is_empty() {
        anyhow::bail!(
            "no provider API key configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY"
        );
    }
    info!("Providers: {}", providers.names().join(", "));

    let editor = Arc::new(WorkspaceEditor::new());
    if let Some(path) = sketch {
        editor
            .open(&path)
            .with_context(|| format!("failed to open sketch: {path}"))?;
        info!("Opened sketch: {}", path);
    }
    if let Some(board) = board {
        editor.select_board(board);
    }
    if let Some(port) = port {
        editor.select_port(port);
    }

    let store = Arc::new(Mutex::new(LearningStore::open_with_capacity(
        &config.db_path,
        config.execution_log_capacity,
    )?));

    let executor = Arc::new(ToolExecutor::new(
        Arc::new(ArduinoCli::new()),
        Arc::new(NoTransport),
        editor.clone(),
        store.clone(),
        config.serial_buffer_capacity,
    ));

    let mut agent = Agent::new(
        providers,
        executor,
        editor,
        store,
        ChatOptions {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        },
        config.max_iterations,
    );
    if let Some(mode) = mode {
        agent.set_mode(mode);
    }

    run_repl(&mut agent).await
}

async fn run_repl(agent: &mut Agent) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("SketchPilot ready. /help for commands, /quit to exit.");
    loop {
        stdout
            .write_all(format!("[{}] > ", agent.mode().as_str()).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if !handle_command(agent, command)? {
                break;
            }
            continue;
        }

        let outcome = agent.process_query(input).await;
        for result in &outcome.tool_results {
            println!(
                "  [{}] {} ({} ms)",
                if result.success { "ok" } else { "err" },
                result.tool,
                result.execution_time_ms
            );
        }
        println!("{}", outcome.response);
    }

    Ok(())
}

/// Handle a slash command; returns false to exit the REPL
fn handle_command(agent: &mut Agent, command: &str) -> anyhow::Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit") | Some("exit") => return Ok(false),
        Some("help") => {
            println!("Commands:");
            println!("  /mode <ask|debug|agent>  Switch conversation mode");
            println!("  /provider <name>         Prefer a provider");
            println!("  /clear                   Drop conversation history");
            println!("  /stats                   Learning store statistics");
            println!("  /quit                    Exit");
        }
        Some("mode") => match parts.next().and_then(ChatMode::from_str) {
            Some(mode) => {
                agent.set_mode(mode);
                println!("Mode: {}", mode.as_str());
            }
            None => println!("Usage: /mode <ask|debug|agent>"),
        },
        Some("provider") => match parts.next() {
            Some(name) => {
                agent.prefer_provider(name);
                println!("Provider order: {}", agent.provider_names().join(", "));
            }
            None => println!("Providers: {}", agent.provider_names().join(", ")),
        },
        Some("clear") => {
            agent.clear_conversation();
            println!("Conversation cleared.");
        }
        Some("stats") => {
            let stats = agent.memory_stats()?;
            println!(
                "Errors: {}  Fixes: {}  Executions: {}  Success rate: {:.0}%",
                stats.error_count,
                stats.fix_count,
                stats.execution_count,
                stats.success_rate * 100.0
            );
        }
        _ => println!("Unknown command: /{command} (try /help)"),
    }
    Ok(true)
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
