//! CLI command implementations
//!
//! Each command builds its configuration from flags, starts a tokio runtime
//! and runs until Ctrl-C or a fatal error.

use tokio::runtime::Runtime;
use tracing::info;

use crate::client::{ClientError, ClientSession};
use crate::directory::DirectoryService;
use crate::observability::{init_logging, Event, LogFormat};
use crate::server::ServerNode;

use super::args::{ClientArgs, Command, DirectoryArgs, ServerArgs};
use super::errors::{CliError, CliResult};
use super::io::{stdin_lines, write_line, write_notice};

/// Parse arguments, set up logging and run the selected command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let format = cli
        .log_format
        .parse::<LogFormat>()
        .map_err(|e| CliError::config_error(e.message()))?;
    init_logging(&cli.log_level, format)?;
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Directory(args) => directory(&args),
        Command::Server(args) => server(&args),
        Command::Client(args) => client(&args),
    }
}

fn runtime() -> CliResult<Runtime> {
    Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

/// Run the directory until Ctrl-C.
pub fn directory(args: &DirectoryArgs) -> CliResult<()> {
    let config = args.to_config();
    runtime()?.block_on(async {
        let service = DirectoryService::bind(config).await?;
        tokio::select! {
            result = service.run() => result?,
            _ = tokio::signal::ctrl_c() => {
                info!(event = %Event::ShutdownComplete, "directory stopped");
            }
        }
        Ok::<(), CliError>(())
    })
}

/// Run a server node until Ctrl-C or a fatal condition.
pub fn server(args: &ServerArgs) -> CliResult<()> {
    let config = args.to_config();
    runtime()?.block_on(async {
        let node = ServerNode::bind(config).await?;
        node.run().await?;
        Ok::<(), CliError>(())
    })
}

/// Interactive client: forward stdin lines, print replies.
///
/// Interruptions and refused re-authentication are reported and the loop
/// goes on; anything permanent ends the session.
pub fn client(args: &ClientArgs) -> CliResult<()> {
    let config = args.to_config();
    runtime()?.block_on(async {
        let mut session = ClientSession::connect(config).await?;
        write_notice(&format!("connected to primary {}", session.endpoint()))?;

        let mut lines = stdin_lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let result = session.request(line).await;
            for notification in session.take_notifications() {
                write_line(&notification)?;
            }
            match result {
                Ok(reply) => write_line(&reply)?,
                Err(ClientError::Interrupted) => write_notice(&format!(
                    "connection lost, now on {}; request not sent, resubmit it",
                    session.endpoint()
                ))?,
                Err(ClientError::ReauthenticationFailed) => {
                    write_notice("reconnected, but the stored login was refused; log in again")?
                }
                Err(e) if e.is_permanent() => return Err(e.into()),
                Err(e) => write_notice(&e.to_string())?,
            }
        }
        Ok::<(), CliError>(())
    })
}
