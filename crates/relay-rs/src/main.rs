//! Command-line front end for relay-rs.
//!
//! Sends one prompt through the tool-calling harness and prints the answer.
//! Reads the API key from `DEEPSEEK_API_KEY` (or the config file).
//!
//! # Examples
//!
//! ```sh
//! relay --user "What is sqrt(2) * 10, and what day is it?"
//! echo "Weather in Oslo?" | relay --stdin --stream
//! relay --list-tools
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::Parser;
use relay_rs::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Ask a model a question, letting it call tools along the way.
#[derive(Parser)]
#[command(name = "relay", version)]
struct Cli {
    /// The user prompt.
    #[arg(long, short)]
    user: Option<String>,

    /// Read the user prompt from standard input.
    #[arg(long, conflicts_with = "user")]
    stdin: bool,

    /// Optional system prompt.
    #[arg(long, short)]
    system: Option<String>,

    /// Model to use instead of the configured one.
    #[arg(long, short)]
    model: Option<String>,

    /// JSON config file. Environment variables override it.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Completion-and-tools turns before a final answer is forced.
    #[arg(long)]
    max_turns: Option<u32>,

    /// Tool calls executed per turn.
    #[arg(long)]
    max_tools: Option<usize>,

    /// Plain completion without tools.
    #[arg(long)]
    no_tools: bool,

    /// Enable only these built-in tools (repeatable).
    #[arg(long = "tool", value_name = "NAME")]
    tools: Vec<String>,

    /// Print the reply as it streams in.
    #[arg(long)]
    stream: bool,

    /// List the enabled tools and exit.
    #[arg(long)]
    list_tools: bool,

    /// Print executed tool calls to stderr after the answer.
    #[arg(long)]
    show_usage: bool,

    /// Debug logging for relay-rs (RUST_LOG takes precedence).
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "relay_rs=debug,relay=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.client.model = model;
    }
    if let Some(max_turns) = cli.max_turns {
        config.harness.max_turns = max_turns;
    }
    if let Some(max_tools) = cli.max_tools {
        config.harness.max_tools_to_use = max_tools;
    }
    if cli.stream {
        config.harness.streaming = true;
    }
    if !cli.tools.is_empty() {
        config.tools.enabled = Some(cli.tools);
    }

    let registry = ToolRegistry::with_defaults(&config.tools);

    if cli.list_tools {
        for def in registry.schemas() {
            println!("{:<15} {}", def.name, def.description);
        }
        return Ok(());
    }

    let prompt = match (cli.user, cli.stdin) {
        (Some(prompt), _) => prompt,
        (None, true) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        (None, false) => return Err("no prompt given; pass --user or --stdin".into()),
    };
    if prompt.trim().is_empty() {
        return Err("the prompt is empty".into());
    }

    let client = ChatClient::new(&config.client)?;

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = cli.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt.trim()));

    let streaming = config.harness.streaming;
    let printer = FnEventHandler::new(|event| {
        if let HarnessEvent::TextDelta(delta) = event {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
    });
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with_if(streaming, printer);

    let options = RunOptions::new().with_tool_choice(if cli.no_tools {
        ToolChoice::None
    } else {
        ToolChoice::Auto
    });

    let outcome = Harness::new(&client, &registry, config.build_harness_config())
        .with_event_handler(&handler)
        .run(&messages, options)
        .await?;

    if streaming {
        println!();
    } else {
        println!("{}", outcome.text);
    }

    if cli.show_usage {
        eprintln!(
            "{} completion(s), {} tool call(s)",
            outcome.completion_calls,
            outcome.tool_usage.len()
        );
        eprintln!("{}", serde_json::to_string_pretty(&outcome.tool_usage)?);
        for stats in registry.stats().iter().filter(|s| s.cache_misses + s.cache_hits > 0) {
            eprintln!(
                "  {}: {} cache hit(s), {} miss(es)",
                stats.name, stats.cache_hits, stats.cache_misses
            );
        }
    }

    Ok(())
}
