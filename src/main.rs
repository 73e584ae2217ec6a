// ABOUTME: Entry point for lclaw — a terminal coding agent with gated tools and MCP servers.
// ABOUTME: Parses CLI args, sets up logging and config, and launches the app.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use localclaw::app::{App, AppOptions};
use localclaw::config::Config;
use localclaw::session::SessionStore;

#[derive(Debug, Parser)]
#[command(name = "lclaw", version, about = "Terminal AI coding agent")]
struct Cli {
    /// Model to use for this session (overrides the config default).
    #[arg(short, long)]
    model: Option<String>,

    /// Resume a saved session by id.
    #[arg(short, long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// List recent saved sessions and exit.
    #[arg(long)]
    list_sessions: bool,

    /// Allow every tool without prompting.
    #[arg(long)]
    trust: bool,

    /// Skip connecting to MCP servers.
    #[arg(long)]
    no_mcp: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    if cli.list_sessions {
        let sessions = SessionStore::default().list_recent(20)?;
        if sessions.is_empty() {
            println!("No saved sessions.");
        }
        for s in sessions {
            println!(
                "{}  {}  {:>4} messages  {}",
                s.id,
                s.updated_at.format("%Y-%m-%d %H:%M"),
                s.message_count,
                s.model
            );
        }
        return Ok(());
    }

    let options = AppOptions {
        model: cli.model,
        resume: cli.resume,
        trust: cli.trust,
        no_mcp: cli.no_mcp,
    };
    App::new(config, options).run().await
}
