//! clamav-exporter - Prometheus exporter for ClamAV's clamd.
//!
//! Every scrape of the metrics path runs one PING / STATS / VERSION pass
//! against clamd and exposes whatever the daemon reported.

mod handlers;
mod state;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use prometheus::Registry;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use clamav_exporter_core::client::{ClamdClient, Network, Target};
use clamav_exporter_core::exporter::ClamavExporter;

use state::WebState;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "clamav-exporter",
    about = "Prometheus exporter for ClamAV clamd",
    version = clamav_exporter_core::VERSION
)]
struct Args {
    /// clamd host, or the socket path with --network unix.
    #[arg(long, default_value = "localhost", env = "CLAMAV_EXPORTER_CLAMAV_ADDRESS")]
    clamav_address: String,

    /// clamd TCP port (ignored with --network unix).
    #[arg(long, default_value_t = 3310, env = "CLAMAV_EXPORTER_CLAMAV_PORT")]
    clamav_port: u16,

    /// Socket family used to reach clamd: tcp or unix.
    #[arg(long, default_value = "tcp", env = "CLAMAV_EXPORTER_NETWORK")]
    network: Network,

    /// Deadline in seconds for each clamd exchange (connect + reply).
    #[arg(long, default_value_t = 5, env = "CLAMAV_EXPORTER_TIMEOUT")]
    timeout: u64,

    /// Listen address of the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:9810", env = "CLAMAV_EXPORTER_LISTEN")]
    listen: SocketAddr,

    /// Path under which metrics are exposed.
    #[arg(
        long,
        default_value = "/metrics",
        env = "CLAMAV_EXPORTER_METRICS_PATH",
        value_parser = parse_metrics_path
    )]
    metrics_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Metrics path must be absolute, literal and must not shadow the fixed routes.
fn parse_metrics_path(s: &str) -> Result<String, String> {
    let s = s.trim();
    if !s.starts_with('/') {
        return Err(format!("metrics path '{}' must start with '/'", s));
    }
    if s == "/" || s == "/health" {
        return Err(format!("metrics path '{}' is reserved", s));
    }
    // axum treats these as route parameters or wildcards.
    if s.contains(['{', '}'])
        || s.split('/').any(|seg| seg.starts_with(':') || seg.starts_with('*'))
    {
        return Err(format!(
            "metrics path '{}' must not contain route parameters or wildcards",
            s
        ));
    }
    Ok(s.to_string())
}

/// Initializes the tracing subscriber. Default level is INFO; -q shows errors only.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("clamav_exporter={}", level).parse().unwrap())
        .add_directive(format!("clamav_exporter_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    if let Err(e) = runtime.block_on(async_main(args)) {
        error!(error = %e, "clamav-exporter failed");
        process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let target = Target::new(args.network, &args.clamav_address, args.clamav_port)?;
    let client = ClamdClient::new(target).with_timeout(Duration::from_secs(args.timeout));

    info!(
        version = clamav_exporter_core::VERSION,
        clamd = %client.target(),
        timeout_s = client.timeout().as_secs(),
        "clamav-exporter starting"
    );

    let registry = Registry::new();
    registry.register(Box::new(ClamavExporter::new(client)?))?;
    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    let state = Arc::new(WebState {
        registry,
        metrics_path: args.metrics_path.clone(),
    });
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, metrics_path = %args.metrics_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("clamav-exporter stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metrics_path() {
        assert_eq!(parse_metrics_path("/metrics").unwrap(), "/metrics");
        assert_eq!(parse_metrics_path(" /clamav/metrics ").unwrap(), "/clamav/metrics");
        assert!(parse_metrics_path("metrics").is_err());
        assert!(parse_metrics_path("/").is_err());
        assert!(parse_metrics_path("/health").is_err());

        for bad in ["/:scrape", "/clamav/*rest", "/{scrape}", "/metrics{", "/a}/b"] {
            assert!(parse_metrics_path(bad).is_err(), "accepted {}", bad);
        }
        assert_eq!(parse_metrics_path("/a:b").unwrap(), "/a:b");
    }

    #[test]
    fn test_accepted_metrics_paths_build_router() {
        for path in ["/metrics", "/clamav/metrics", "/a:b", "/metrics.txt"] {
            let metrics_path = parse_metrics_path(path).unwrap();
            let state = Arc::new(WebState {
                registry: Registry::new(),
                metrics_path,
            });
            let _router = handlers::router(state);
        }
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["clamav-exporter"]).unwrap();
        assert_eq!(args.clamav_address, "localhost");
        assert_eq!(args.clamav_port, 3310);
        assert_eq!(args.network, Network::Tcp);
        assert_eq!(args.timeout, 5);
        assert_eq!(args.listen, "0.0.0.0:9810".parse::<SocketAddr>().unwrap());
        assert_eq!(args.metrics_path, "/metrics");
    }

    #[test]
    fn test_args_unix_socket() {
        let args = Args::try_parse_from([
            "clamav-exporter",
            "--network",
            "unix",
            "--clamav-address",
            "/run/clamav/clamd.ctl",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.network, Network::Unix);
        assert_eq!(args.verbose, 2);
        let target = Target::new(args.network, &args.clamav_address, args.clamav_port).unwrap();
        assert_eq!(target.to_string(), "unix:///run/clamav/clamd.ctl");
    }

    #[test]
    fn test_args_reject_unknown_network() {
        assert!(Args::try_parse_from(["clamav-exporter", "--network", "udp"]).is_err());
    }
}
