//! Socket-backed dialer for a live clamd.

use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{Command, DialError, Dialer, Target};

/// Stream types whose blocking operations can be bounded.
trait TimedStream: Read + Write {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

impl TimedStream for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }
}

#[cfg(unix)]
impl TimedStream for UnixStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        UnixStream::set_write_timeout(self, dur)
    }
}

/// Dials clamd over TCP or a Unix domain socket.
///
/// Every call opens a new connection; nothing is pooled or cached, so a
/// single client can be shared by concurrent scrapes.
#[derive(Debug, Clone)]
pub struct ClamdClient {
    target: Target,
    timeout: Duration,
}

impl ClamdClient {
    /// Deadline for name resolution, connect and the whole exchange.
    ///
    /// A Unix socket connect is not bounded: it is local and fails fast
    /// when nothing listens on the path.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(target: Target) -> Self {
        Self {
            target,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-exchange deadline. A zero duration falls back to the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            Self::DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn connect_error(&self, source: io::Error) -> DialError {
        DialError::Connect {
            target: self.target.to_string(),
            source,
        }
    }
}

impl Dialer for ClamdClient {
    fn try_dial(&self, command: Command) -> Result<Vec<u8>, DialError> {
        let deadline = Instant::now() + self.timeout;
        let target = self.target.to_string();

        match &self.target {
            Target::Tcp { host, port } => {
                let mut stream =
                    connect_tcp(host, *port, deadline).map_err(|e| self.connect_error(e))?;
                exchange(&mut stream, command, deadline, &target)
            }
            #[cfg(unix)]
            Target::Unix(path) => {
                let mut stream = UnixStream::connect(path).map_err(|e| self.connect_error(e))?;
                exchange(&mut stream, command, deadline, &target)
            }
            #[cfg(not(unix))]
            Target::Unix(_) => Err(self.connect_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            ))),
        }
    }
}

/// Connects to the first reachable resolved address before `deadline`.
fn connect_tcp(host: &str, port: u16, deadline: Instant) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in resolve(host, port, deadline)? {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!(%addr, error = %e, "address not reachable");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no address for {} reachable before deadline", host),
        )
    }))
}

/// Resolves `host`, giving up at `deadline`.
///
/// IP literals skip the lookup. Names are resolved on a helper thread since
/// the system resolver cannot be interrupted; a lookup that outlives the
/// deadline finishes in the background and its result is dropped.
fn resolve(host: &str, port: u16, deadline: Instant) -> io::Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(resolve_timeout(host));
    }

    let (tx, rx) = mpsc::channel();
    let name = host.to_string();
    thread::Builder::new()
        .name("clamd-resolve".to_string())
        .spawn(move || {
            let result = (name.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            // Receiver is gone when the deadline already passed.
            let _ = tx.send(result);
        })?;

    match rx.recv_timeout(remaining) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(resolve_timeout(host)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::other(format!(
            "resolver for {} exited without a result",
            host
        ))),
    }
}

fn resolve_timeout(host: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("resolving {} did not finish before deadline", host),
    )
}

/// Writes the command token and reads until EOF or `deadline`.
///
/// Hitting the deadline is not an error: whatever arrived so far is returned
/// and left to the parsers.
fn exchange<S: TimedStream>(
    stream: &mut S,
    command: Command,
    deadline: Instant,
    target: &str,
) -> Result<Vec<u8>, DialError> {
    let write_err = |source: io::Error| DialError::Write {
        target: target.to_string(),
        source,
    };
    let read_err = |source: io::Error| DialError::Read {
        target: target.to_string(),
        source,
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(write_err(io::Error::from(io::ErrorKind::TimedOut)));
    }
    stream
        .set_write_timeout(Some(remaining))
        .map_err(write_err)?;
    stream.write_all(command.token()).map_err(write_err)?;
    stream.flush().map_err(write_err)?;

    let mut reply = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(command = %command, clamd = target, bytes = reply.len(), "reply deadline reached");
            break;
        }
        stream.set_read_timeout(Some(remaining)).map_err(read_err)?;
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                debug!(command = %command, clamd = target, bytes = reply.len(), "reply deadline reached");
                break;
            }
            Err(e) => return Err(read_err(e)),
        }
    }

    trace!(command = %command, clamd = target, bytes = reply.len(), "clamd reply received");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    /// Accepts one connection, records the request line, answers with `reply`.
    fn serve_once(reply: &'static [u8], linger: Duration) -> (u16, mpsc::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = Vec::new();
            reader.read_until(b'\n', &mut request).unwrap();
            tx.send(request).unwrap();
            let mut stream = stream;
            stream.write_all(reply).unwrap();
            thread::sleep(linger);
        });
        (port, rx)
    }

    fn tcp_client(port: u16) -> ClamdClient {
        ClamdClient::new(Target::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        })
    }

    #[test]
    fn test_tcp_exchange_reads_until_close() {
        let (port, rx) = serve_once(b"ClamAV 0.102.4/26168/Mon Jun  1 12:00:00 2020\n", Duration::ZERO);
        let reply = tcp_client(port).try_dial(Command::Version).unwrap();
        assert_eq!(rx.recv().unwrap(), b"nVERSION\n");
        assert_eq!(reply, b"ClamAV 0.102.4/26168/Mon Jun  1 12:00:00 2020\n");
    }

    #[test]
    fn test_connection_refused_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = tcp_client(port).with_timeout(Duration::from_millis(500));
        match client.try_dial(Command::Ping) {
            Err(DialError::Connect { target, .. }) => {
                assert_eq!(target, format!("tcp://127.0.0.1:{}", port));
            }
            other => panic!("expected connect error, got {:?}", other),
        }
        assert!(client.dial(Command::Ping).is_empty());
    }

    #[test]
    fn test_deadline_keeps_partial_reply() {
        let (port, _rx) = serve_once(b"PONG", Duration::from_secs(3));
        let client = tcp_client(port).with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let reply = client.try_dial(Command::Ping).unwrap();
        assert_eq!(reply, b"PONG");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_resolve_ip_literal_skips_lookup() {
        // Even a spent deadline resolves a literal.
        let addrs = resolve("127.0.0.1", 3310, Instant::now()).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:3310".parse::<SocketAddr>().unwrap()]);
        let addrs = resolve("::1", 3310, Instant::now()).unwrap();
        assert_eq!(addrs, vec!["[::1]:3310".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_name_bounded_by_deadline() {
        let err = resolve("clamd.invalid", 3310, Instant::now()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_resolve_localhost() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let addrs = resolve("localhost", 3310, deadline).unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 3310 && a.ip().is_loopback()));
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let client = tcp_client(3310).with_timeout(Duration::ZERO);
        assert_eq!(client.timeout(), ClamdClient::DEFAULT_TIMEOUT);
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_exchange() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamd.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = Vec::new();
            reader.read_until(b'\n', &mut request).unwrap();
            let mut stream = stream;
            stream.write_all(b"PONG\n").unwrap();
            request
        });

        let client = ClamdClient::new(Target::Unix(path));
        let reply = client.try_dial(Command::Ping).unwrap();
        assert_eq!(reply, b"PONG\n");
        assert_eq!(handle.join().unwrap(), b"nPING\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_unix_socket_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClamdClient::new(Target::Unix(dir.path().join("absent.sock")));
        assert!(matches!(
            client.try_dial(Command::Stats),
            Err(DialError::Connect { .. })
        ));
    }
}
