use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crediflex_gateway::context::supplier;
use crediflex_gateway::{Config, Daemon, RequestCoordinator, TurnRequest, TurnStatus};

/// CrediFlex - conversational gateway for the supplier dashboard
#[derive(Parser)]
#[command(name = "crediflex", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "CREDIFLEX_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Chat with the assistant from the terminal
    Chat {
        /// Resume an existing thread
        #[arg(short, long)]
        thread: Option<String>,
        /// JSON file with supplier data to use as business context
        #[arg(short, long)]
        context: Option<PathBuf>,
        /// Role reported to the assistant
        #[arg(short, long, default_value = supplier::DEFAULT_USER_ROLE)]
        role: String,
    },
    /// Print the resolved configuration (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,crediflex_gateway=info",
        1 => "info,crediflex_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let daemon = Daemon::new(config)?;
            daemon.run().await?;
        }
        Command::Chat {
            thread,
            context,
            role,
        } => {
            let business_context = match context {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)?;
                    let value: serde_json::Value = serde_json::from_str(&raw)?;
                    supplier::render_business_context(Some(&role), Some(&value))
                }
                None => supplier::render_business_context(Some(&role), None),
            };
            let daemon = Daemon::new(config)?;
            chat(daemon.coordinator(), thread, business_context).await?;
        }
        Command::Config => {
            println!("{config}");
        }
    }

    Ok(())
}

/// Interactive terminal conversation through the same coordinator the API uses
async fn chat(
    coordinator: &RequestCoordinator,
    mut thread: Option<String>,
    business_context: Option<String>,
) -> anyhow::Result<()> {
    println!("CrediFlex chat ({}). /new starts a new thread, /exit quits.", coordinator.model_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/new" => {
                thread = None;
                println!("(new thread)");
                continue;
            }
            _ => {}
        }

        let request = TurnRequest {
            query: line.to_string(),
            thread_id: thread.clone(),
            business_context: business_context.clone(),
        };
        let outcome = coordinator.handle_turn(request).await?;

        let id = outcome.thread_id.to_string();
        if thread.as_deref().is_some_and(|previous| previous != id) {
            println!("(previous thread expired, continuing in {id})");
        }
        thread = Some(id);

        println!("\n{}\n", outcome.response);
        if let TurnStatus::Degraded(reason) = &outcome.status {
            eprintln!("[degraded: {reason}]");
        }
    }

    if let Some(id) = thread {
        println!("thread: {id}");
    }
    Ok(())
}
