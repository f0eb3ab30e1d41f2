//! Line I/O for the interactive client
//!
//! - Input: one request per stdin line
//! - Output: replies and notifications on stdout, one per line
//! - Session notices (reconnects, interruptions) on stderr

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use super::errors::CliResult;

/// Request lines from stdin
pub fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Write a reply or notification line to stdout
pub fn write_line(line: &str) -> CliResult<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}

/// Write a session notice to stderr
pub fn write_notice(message: &str) -> CliResult<()> {
    let mut stderr = io::stderr();
    writeln!(stderr, "# {}", message)?;
    stderr.flush()?;
    Ok(())
}
