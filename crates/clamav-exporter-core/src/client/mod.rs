//! clamd control-protocol client.
//!
//! clamd answers one command per connection: the client writes a fixed
//! request token and reads until the daemon closes the socket.
//!
//! ```text
//!   Collector ──► Dialer::dial(Command) ──► Vec<u8> (empty on failure)
//!                    │
//!          ┌─────────┴─────────┐
//!          │                   │
//!   ┌──────▼──────┐     ┌──────▼──────┐
//!   │ ClamdClient │     │  MockClamd  │
//!   │ (tcp/unix)  │     │ (Testing)   │
//!   └─────────────┘     └─────────────┘
//! ```

pub mod mock;
mod socket;
mod target;

use std::fmt;
use std::io;

use tracing::warn;

pub use mock::MockClamd;
pub use socket::ClamdClient;
pub use target::{Network, Target, TargetParseError};

/// Commands the exporter sends to clamd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness probe, answered with `PONG`.
    Ping,
    /// Thread, queue and memory statistics.
    Stats,
    /// Engine and signature database versions.
    Version,
}

impl Command {
    /// All commands in the order a collection pass issues them.
    pub const ALL: [Command; 3] = [Command::Ping, Command::Stats, Command::Version];

    /// Wire token, using clamd's newline-delimited (`n` prefix) form.
    pub fn token(self) -> &'static [u8] {
        match self {
            Command::Ping => b"nPING\n",
            Command::Stats => b"nSTATS\n",
            Command::Version => b"nVERSION\n",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Ping => "PING",
            Command::Stats => "STATS",
            Command::Version => "VERSION",
        };
        f.write_str(name)
    }
}

/// Error type for a single clamd exchange.
#[derive(Debug)]
pub enum DialError {
    /// Could not open a connection to the daemon.
    Connect { target: String, source: io::Error },
    /// Connection opened but the command could not be sent.
    Write { target: String, source: io::Error },
    /// Reading the reply failed for a reason other than the deadline.
    Read { target: String, source: io::Error },
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialError::Connect { target, source } => {
                write!(f, "clamd: connect to {} failed: {}", target, source)
            }
            DialError::Write { target, source } => {
                write!(f, "clamd: write to {} failed: {}", target, source)
            }
            DialError::Read { target, source } => {
                write!(f, "clamd: read from {} failed: {}", target, source)
            }
        }
    }
}

impl std::error::Error for DialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DialError::Connect { source, .. }
            | DialError::Write { source, .. }
            | DialError::Read { source, .. } => Some(source),
        }
    }
}

/// Abstraction over one clamd request/response exchange.
///
/// Lets the collector run against a live daemon or a canned mock.
pub trait Dialer: Send + Sync {
    /// Sends `command` on a fresh connection and returns the full reply.
    fn try_dial(&self, command: Command) -> Result<Vec<u8>, DialError>;

    /// Like [`Dialer::try_dial`], but a failed exchange is logged and
    /// reported as an empty reply, which every parser treats as "no data".
    fn dial(&self, command: Command) -> Vec<u8> {
        match self.try_dial(command) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = %command, error = %e, "clamd exchange failed");
                Vec::new()
            }
        }
    }
}
