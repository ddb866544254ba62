//! Terminal facade over the RLM execution engine.
//!
//! No vendor sits behind the LLM/interpreter adapters here — `run` and
//! `chat` always play back a `--mock` script through
//! [`rlm_core::MockLlmAdapter`]/[`rlm_core::MockInterpreterAdapter`]. A real
//! embedder wires its own adapters directly against `rlm-core`; this binary
//! exists to drive the engine from a terminal for development and demos.

mod config;
mod mock_script;
mod session;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rlm_core::{EngineSupervisor, RunOpts, SessionOpts};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use mock_script::MockScript;
use session::RunRecord;

#[derive(Parser)]
#[command(name = "rlm")]
#[command(version, about = "Run queries against the recursive LLM execution engine", long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a `.rlm` directory (default: search upward from the current directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one query to completion and print the final answer.
    Run {
        /// The query text.
        query: String,
        /// Path to a file whose contents become the `context` binding.
        #[arg(long)]
        context: Option<PathBuf>,
        /// Path to a JSON mock script driving the LLM and interpreter.
        #[arg(long)]
        mock_script: PathBuf,
    },
    /// Start an interactive keep-alive session, reading queries from stdin.
    Chat {
        /// Path to a JSON mock script driving the LLM and interpreter.
        #[arg(long)]
        mock_script: PathBuf,
    },
    /// Write a default `.rlm/config.toml` in the current directory.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Init { force } => run_init(force),
        Command::Run { query, context, mock_script } => {
            run_once(&cli.config, &query, context.as_deref(), &mock_script).await
        }
        Command::Chat { mock_script } => run_chat(&mock_script).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

fn run_init(force: bool) -> Result<()> {
    let rlm_dir = std::env::current_dir()?.join(config::RLM_DIR);
    std::fs::create_dir_all(&rlm_dir)?;
    let config_path = rlm_dir.join(config::CONFIG_FILE);
    if config_path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    let default_config = Config::default();
    let toml_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&config_path, toml_str)?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn load_config(explicit: &Option<PathBuf>) -> Result<(Config, PathBuf)> {
    if let Some(rlm_dir) = explicit {
        let config_path = rlm_dir.join(config::CONFIG_FILE);
        let config = Config::from_file(&config_path)?;
        return Ok((config, rlm_dir.clone()));
    }
    match Config::find_and_load()? {
        Some((config, rlm_dir)) => Ok((config, rlm_dir)),
        None => Ok((Config::default(), std::env::current_dir()?.join(config::RLM_DIR))),
    }
}

async fn run_once(
    explicit_config: &Option<PathBuf>,
    query: &str,
    context_path: Option<&std::path::Path>,
    mock_script_path: &std::path::Path,
) -> Result<()> {
    let (config, rlm_dir) = load_config(explicit_config)?;
    let engine_config = config.to_engine_config();

    let script = MockScript::load(mock_script_path)?;
    let (llm, interp) = script.build_adapters();

    let templates = rlm_core::SystemPromptTemplates::defaults();
    let engine = EngineSupervisor::start(engine_config, llm, interp, templates);

    let context = match context_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context file: {}", path.display()))?,
        None => String::new(),
    };

    let started_at = chrono::Utc::now();
    let outcome = engine
        .run(&context, query, RunOpts::default())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let record = RunRecord::from_outcome(query, &outcome, started_at);
    if let Ok(path) = record.write(&rlm_dir) {
        tracing::debug!(path = %path.display(), "wrote run record");
    }

    println!("{}", serde_json::to_string_pretty(&outcome.answer)?);
    engine.shutdown();
    Ok(())
}

async fn run_chat(mock_script_path: &std::path::Path) -> Result<()> {
    let config = Config::default();
    let llm_timeout = std::time::Duration::from_secs(config.budget.llm_timeout_secs);
    let engine_config = config.to_engine_config();

    let script = MockScript::load(mock_script_path)?;
    let (llm, interp) = script.build_adapters();

    let templates = rlm_core::SystemPromptTemplates::defaults();
    let engine = EngineSupervisor::start(engine_config, llm, interp, templates);

    let session = engine
        .start_session(SessionOpts::default())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("session started: {session}");

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }
        match engine.send_message(&session, text, llm_timeout).await {
            Ok(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
            Err(err) => eprintln!("error: {err}"),
        }
    }

    engine.shutdown();
    Ok(())
}
