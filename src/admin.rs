//! Operator console.
//!
//! Reads commands from the terminal on a dedicated OS thread. A line
//! containing only `q` (any case, trailing whitespace ignored) stops the
//! server.

use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watch `input` line by line until a quit command, EOF, or a read error.
///
/// Returns `true` if this call cancelled `shutdown`.
pub fn watch_lines<R: BufRead>(input: R, shutdown: &CancellationToken) -> bool {
    for line in input.lines() {
        if shutdown.is_cancelled() {
            return false;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read operator input");
                return false;
            }
        };

        if is_quit(&line) {
            info!("Quit requested from terminal");
            shutdown.cancel();
            return true;
        }

        if !line.trim().is_empty() {
            debug!(input = %line.trim(), "Ignoring operator input");
        }
    }
    false
}

fn is_quit(line: &str) -> bool {
    line.trim_end().eq_ignore_ascii_case("q")
}

/// Spawn the stdin watcher thread.
///
/// The thread blocks on stdin, so it is never joined; the process exits
/// once the server has stopped.
pub fn spawn_terminal_watcher(shutdown: CancellationToken) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("operator-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            watch_lines(stdin.lock(), &shutdown);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_quit_cancels() {
        let token = CancellationToken::new();
        assert!(watch_lines(Cursor::new("hello\nQ \r\nignored\n"), &token));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_other_input_ignored() {
        let token = CancellationToken::new();
        assert!(!watch_lines(Cursor::new("quit\nqq\n q\n\nstatus\n"), &token));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_stops_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!watch_lines(Cursor::new("anything\nq\n"), &token));
    }

    #[test]
    fn test_quit_without_newline() {
        let token = CancellationToken::new();
        assert!(watch_lines(Cursor::new("q"), &token));
    }
}
