//! In-memory clamd for testing collectors without a running daemon.
//!
//! `MockClamd` answers each command with a canned reply or a canned
//! transport failure, and records the order in which commands were sent.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use super::{Command, DialError, Dialer};

/// STATS reply captured from a busy clamd 0.102 (glibc without mallinfo).
pub const TYPICAL_STATS: &str = "POOLS: 1

STATE: VALID PRIMARY
THREADS: live 10  idle 2 max 10 idle-timeout 30
QUEUE: 0 items
\tINSTREAM 1.249366 instream(10.42.174.58@41938)
\tIDLE -0.021568
\tIDLE 0.022133
\tINSTREAM 11.672077 instream(10.42.174.58@35486)
\tINSTREAM 6.629173 instream(10.42.174.58@38126)
\tINSTREAM 6.627400 instream(10.42.174.58@38128)
\tINSTREAM 1.606307 instream(10.42.174.58@41684)
\tSTATS 0.000276
\tIDLE 0.013437
\tINSTREAM 0.010599 instream(10.42.74.224@39776)

MEMSTATS: heap N/A mmap N/A used N/A free N/A releasable N/A pools 1 pools_used 1143.596M pools_total 1143.632M
END
";

/// VERSION reply matching [`TYPICAL_STATS`].
pub const TYPICAL_VERSION: &str = "ClamAV 0.102.4/26168/Mon Jun  1 12:57:45 2020\n";

/// Canned clamd for tests.
#[derive(Debug, Default)]
pub struct MockClamd {
    replies: HashMap<Command, Result<Vec<u8>, io::ErrorKind>>,
    calls: Mutex<Vec<Command>>,
}

impl MockClamd {
    /// Creates a mock that refuses every command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reply for `command`.
    pub fn with_reply(mut self, command: Command, reply: impl Into<Vec<u8>>) -> Self {
        self.replies.insert(command, Ok(reply.into()));
        self
    }

    /// Makes `command` fail at connect time with `kind`.
    pub fn with_failure(mut self, command: Command, kind: io::ErrorKind) -> Self {
        self.replies.insert(command, Err(kind));
        self
    }

    /// Healthy daemon answering all three commands.
    pub fn typical_daemon() -> Self {
        Self::new()
            .with_reply(Command::Ping, "PONG\n")
            .with_reply(Command::Stats, TYPICAL_STATS)
            .with_reply(Command::Version, TYPICAL_VERSION)
    }

    /// Daemon that is down: every connection is refused.
    pub fn unreachable() -> Self {
        Command::ALL.iter().fold(Self::new(), |mock, &cmd| {
            mock.with_failure(cmd, io::ErrorKind::ConnectionRefused)
        })
    }

    /// Commands received so far, in order.
    pub fn calls(&self) -> Vec<Command> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl Dialer for MockClamd {
    fn try_dial(&self, command: Command) -> Result<Vec<u8>, DialError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command);
        }
        match self.replies.get(&command) {
            Some(Ok(reply)) => Ok(reply.clone()),
            Some(Err(kind)) => Err(DialError::Connect {
                target: "mock".to_string(),
                source: io::Error::from(*kind),
            }),
            None => Err(DialError::Connect {
                target: "mock".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}
