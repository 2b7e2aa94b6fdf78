mod client;
mod commands;

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use server::{ServerConfig, ServerError};

use crate::client::{Client, Endpoint, Role, SessionEnd};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[error("websocket error: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("username `{0}` is already in use; pick another")]
    UsernameTaken(String),
    #[error("the manager declined your request to join")]
    Denied,
    #[error("server refused {syscall}: {message}")]
    Refused { syscall: String, message: String },
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "whiteboard", about = "Shared whiteboard host and client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a whiteboard server and join it as the manager.
    Host(EndpointArgs),
    /// Join a running whiteboard.
    Join(EndpointArgs),
}

#[derive(Args, Debug)]
struct EndpointArgs {
    address: String,
    port: u16,
    username: String,
}

impl From<EndpointArgs> for Endpoint {
    fn from(args: EndpointArgs) -> Self {
        Self { address: args.address, port: args.port, username: args.username }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Command::Host(_) => "info",
        Command::Join(_) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Host(args) => run_host(args.into()).await,
        Command::Join(args) => run_join(args.into()).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_host(endpoint: Endpoint) -> Result<ExitCode, CliError> {
    let config = ServerConfig::from_env(endpoint.port, endpoint.username.clone());
    let mut running = server::serve(config).await?;
    let role = Role::Manager { approvals: running.approvals(), prompts: running.take_join_prompts() };

    // Connect through the requested address but to the port actually bound.
    let target = Endpoint { port: running.local_addr().port(), ..endpoint };
    println!("hosting whiteboard on {} as {}", running.local_addr(), target.username);

    let session = async {
        let mut client = Client::connect(&target, role).await?;
        client.join().await?;
        client.run_stdin().await
    };
    let end = session.await;

    let report = running.shutdown().await?;
    println!(
        "whiteboard closed: {} notified, {} drained, {} cancelled",
        report.notified, report.drained, report.cancelled
    );
    end.map(|_| ExitCode::SUCCESS)
}

async fn run_join(endpoint: Endpoint) -> Result<ExitCode, CliError> {
    let mut client = Client::connect(&endpoint, Role::Member).await?;
    client.join().await?;
    println!("connected to {}:{}; waiting for the manager to let you in", endpoint.address, endpoint.port);

    match client.run_stdin().await? {
        SessionEnd::Disconnected => {
            eprintln!("connection to the whiteboard was lost");
            Ok(ExitCode::FAILURE)
        }
        SessionEnd::Quit | SessionEnd::ServerQuit | SessionEnd::Kicked => Ok(ExitCode::SUCCESS),
    }
}
