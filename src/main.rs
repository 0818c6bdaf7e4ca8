//! beatrix-rpc - command-line client for the Beatrix WebSocket RPC endpoint.
//!
//! Connects through the reconnecting supervisor, issues a single call, and
//! prints every produced value as one line of JSON on stdout.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beatrix_rpc::api::{PromptMessage, ServerWebsocketApi};
use beatrix_rpc::config::{ClientConfig, ENV_WS_URL};
use beatrix_rpc::rpc::{with_timeout, CallStream, RpcError, TypedCall};
use beatrix_rpc::transport::{spawn_supervisor, WsConnector};

#[derive(Parser, Debug)]
#[command(name = "beatrix-rpc")]
#[command(about = "Call methods on a Beatrix server over WebSocket RPC", long_about = None)]
struct Cli {
    /// Server base URL (overrides BEATRIX_WS_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Give up if connecting or the call takes longer than this
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Invoke a method by its dotted path
    Call {
        /// Method path, e.g. `automations.list`
        method: String,

        /// Positional arguments, each parsed as JSON
        args: Vec<String>,
    },

    /// Run a prompt and stream the conversation
    Prompt {
        text: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        driver: Option<String>,

        /// Continue an earlier conversation
        #[arg(long)]
        conversation: Option<i64>,
    },
}

fn load_config(url: Option<String>) -> Result<ClientConfig> {
    let config = match url {
        Some(url) => ClientConfig::from_lookup(|var| {
            if var == ENV_WS_URL {
                Some(url.clone())
            } else {
                std::env::var(var).ok()
            }
        }),
        None => ClientConfig::from_env(),
    };
    config.context("Invalid client configuration")
}

fn parse_args(raw: &[String]) -> Result<Vec<Value>> {
    raw.iter()
        .map(|arg| {
            serde_json::from_str(arg)
                .with_context(|| format!("Argument is not valid JSON: {}", arg))
        })
        .collect()
}

async fn print_values(mut call: CallStream) -> Result<()> {
    while let Some(value) = call.next().await {
        println!("{}", value?);
    }
    Ok(())
}

async fn print_messages(mut call: TypedCall<PromptMessage>) -> Result<()> {
    while let Some(message) = call.next().await {
        println!("{}", serde_json::to_string(&message?)?);
    }
    Ok(())
}

async fn within<F>(timeout: Duration, future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| RpcError::Timeout(timeout.as_millis() as u64))?
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "beatrix_rpc=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout_secs);
    let config = load_config(cli.url)?;
    let connector = WsConnector::from_config(&config).context("Invalid server URL")?;
    tracing::info!("beatrix-rpc v{} using {}", env!("CARGO_PKG_VERSION"), connector.url());

    let (mut coordinator, supervisor) = spawn_supervisor(connector, config.retry_delay);
    let client = with_timeout(timeout, coordinator.wait_connected())
        .await
        .context("Could not connect to server")?;

    let result = match cli.command {
        Commands::Call { method, args } => {
            let call = client.proxy().path(&method).call(parse_args(&args)?);
            within(timeout, print_values(call))
                .await
                .with_context(|| format!("Call to {} failed", method))
        }
        Commands::Prompt {
            text,
            model,
            driver,
            conversation,
        } => {
            let call = client.handle_prompt_request(
                &text,
                model.as_deref(),
                driver.as_deref(),
                conversation,
            );
            within(timeout, print_messages(call))
                .await
                .context("Prompt request failed")
        }
    };

    supervisor.abort();
    result
}
