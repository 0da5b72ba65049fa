use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay chat messages to a completion backend and deliver the answers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the relay: connect channels, answer messages, serve the health endpoint.
    Run {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port for health and webhook (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send one prompt to the completion backend and print the chunks that would be delivered.
    Ask {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Prompt text
        prompt: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run_relay(config, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, prompt }) => {
            if let Err(e) = run_ask(config, &prompt).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(relay::config::default_config_path);
    let dir = relay::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_relay(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting relay with config {} on {}:{}",
        path.display(),
        config.gateway.bind,
        config.gateway.port
    );
    relay::gateway::run_gateway(config).await
}

async fn run_ask(config_path: Option<PathBuf>, prompt: &str) -> anyhow::Result<()> {
    use relay::completion::{CompletionClient, CompletionResult};

    let (config, _) = relay::config::load_config(config_path)?;
    let client = CompletionClient::from_config(&config)?;
    client.ensure_initialized().await?;
    let settings = relay::pipeline::PipelineSettings::from_config(&config);
    match client.generate(prompt, settings.deadline).await {
        CompletionResult::Success(text) => {
            let chunks = relay::pipeline::plan_chunks(
                &text,
                settings.chunk_threshold,
                settings.max_chunk_len,
            );
            for chunk in chunks {
                println!("--- chunk {} ({} chars)", chunk.sequence_index, chunk.text.chars().count());
                println!("{}", chunk.text);
            }
            Ok(())
        }
        CompletionResult::TimedOut => anyhow::bail!("no response within {:?}", settings.deadline),
        CompletionResult::Failed(cause) => {
            anyhow::bail!("completion failed ({}): {}", cause.category, cause.message)
        }
    }
}
