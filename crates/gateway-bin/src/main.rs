//! Logpose gateway: multi-tenant terminal sessions over WebSocket, plus a
//! file/search/git surface, all scoped to per-user git worktrees.

mod app;
mod http;
mod ws;

use clap::Parser;
use gateway_config::Config;

/// Logpose gateway command-line interface.
#[derive(Parser)]
#[command(name = "logpose-gateway")]
#[command(about = "Interactive terminal gateway with per-user worktree isolation")]
#[command(version)]
struct Cli {
    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration errors are fatal; the process refuses to start.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    gateway_config::init_logging(level, config.environment.is_production());

    app::run_gateway(config).await
}
