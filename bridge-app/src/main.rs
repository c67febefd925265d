//! groupbridge binary: bridges group-chat mentions to an automation webhook
//! and delivers the automation's replies back to the chat.

mod config;
mod error;
mod gateway;
mod link;
mod pairing;
mod reply;
mod routes;
mod server;
#[cfg(test)]
mod test_support;
mod timer;
mod tracker;
mod typing;
mod webhook;

use clap::{Parser, Subcommand, ValueEnum};
use std::any::Any;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const DEFAULT_LOG_FILTER: &str =
    "info,groupbridge=debug,bridge_app=debug,bridge_transport=debug,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "groupbridge", version, about = "Group chat to automation webhook bridge")]
struct Cli {
    /// Config file (defaults to ~/.groupbridge/config.toml).
    #[arg(long, global = true, env = "GROUPBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log line format.
    #[arg(
        long,
        global = true,
        env = "GROUPBRIDGE_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Json
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the bridge server (default).
    Serve,
    /// Validate config and log the effective settings.
    Doctor,
    /// One-shot send to a chat through the configured transport.
    Send {
        chat_id: String,
        message: String,
        /// Attach a single reply button with this label.
        #[arg(long)]
        button: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before parsing, so `.env` can supply GROUPBRIDGE_* flags.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    install_panic_hook();
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(cli.config).await,
        Command::Doctor => server::doctor(cli.config).await,
        Command::Send {
            chat_id,
            message,
            button,
        } => server::send_one_shot(cli.config, &chat_id, &message, button.as_deref()).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);
    match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }

    tracing::info!(
        log_format = ?format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
}

/// Route panics through tracing so JSON log collectors see them, then run the default hook.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = panic_message(info.payload());
        match info.location() {
            Some(at) => tracing::error!(
                file = at.file(),
                line = at.line(),
                panic_message = message,
                "groupbridge panicked"
            ),
            None => tracing::error!(panic_message = message, "groupbridge panicked"),
        }
        previous(info);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
