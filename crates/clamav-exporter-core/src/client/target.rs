//! Daemon address resolution from startup configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Socket family used to reach clamd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(TargetParseError::UnknownNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => f.write_str("tcp"),
            Network::Unix => f.write_str("unix"),
        }
    }
}

/// Error type for invalid daemon address configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetParseError {
    /// `--network` is neither `tcp` nor `unix`.
    UnknownNetwork(String),
    /// Host or socket path is empty.
    EmptyAddress,
    /// TCP port 0 cannot be dialed.
    InvalidPort,
}

impl fmt::Display for TargetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetParseError::UnknownNetwork(n) => {
                write!(f, "unknown network '{}' (expected tcp or unix)", n)
            }
            TargetParseError::EmptyAddress => write!(f, "clamd address is empty"),
            TargetParseError::InvalidPort => write!(f, "clamd port must be non-zero"),
        }
    }
}

impl std::error::Error for TargetParseError {}

/// Where clamd listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Target {
    /// Builds a target from the exporter's address flags.
    ///
    /// For `Network::Unix` the address is the socket path and `port` is ignored.
    pub fn new(network: Network, address: &str, port: u16) -> Result<Self, TargetParseError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TargetParseError::EmptyAddress);
        }
        match network {
            Network::Tcp => {
                if port == 0 {
                    return Err(TargetParseError::InvalidPort);
                }
                // Bracketed IPv6 literals are accepted as typed.
                let host = address
                    .strip_prefix('[')
                    .and_then(|h| h.strip_suffix(']'))
                    .unwrap_or(address);
                Ok(Target::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            Network::Unix => Ok(Target::Unix(PathBuf::from(address))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{}]:{}", host, port)
            }
            Target::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Target::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_from_str() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!(" UNIX ".parse::<Network>().unwrap(), Network::Unix);
        assert_eq!(
            "udp".parse::<Network>(),
            Err(TargetParseError::UnknownNetwork("udp".to_string()))
        );
    }

    #[test]
    fn test_tcp_target() {
        let t = Target::new(Network::Tcp, "clamd.local", 3310).unwrap();
        assert_eq!(
            t,
            Target::Tcp {
                host: "clamd.local".to_string(),
                port: 3310
            }
        );
        assert_eq!(t.to_string(), "tcp://clamd.local:3310");
    }

    #[test]
    fn test_tcp_target_ipv6_brackets() {
        let t = Target::new(Network::Tcp, "[::1]", 3310).unwrap();
        assert_eq!(
            t,
            Target::Tcp {
                host: "::1".to_string(),
                port: 3310
            }
        );
        assert_eq!(t.to_string(), "tcp://[::1]:3310");
    }

    #[test]
    fn test_unix_target_ignores_port() {
        let t = Target::new(Network::Unix, "/run/clamav/clamd.ctl", 0).unwrap();
        assert_eq!(t, Target::Unix(PathBuf::from("/run/clamav/clamd.ctl")));
        assert_eq!(t.to_string(), "unix:///run/clamav/clamd.ctl");
    }

    #[test]
    fn test_invalid_targets() {
        assert_eq!(
            Target::new(Network::Tcp, "  ", 3310),
            Err(TargetParseError::EmptyAddress)
        );
        assert_eq!(
            Target::new(Network::Tcp, "localhost", 0),
            Err(TargetParseError::InvalidPort)
        );
    }
}
