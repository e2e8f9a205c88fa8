//! Parsers for clamd replies.
//!
//! These are pure functions over the raw reply bytes. clamd's STATS output is
//! free-form text whose sections may be missing, reordered or interleaved with
//! per-thread job lines, so every field group is searched for independently
//! anywhere in the reply. A group that does not match leaves its fields `None`;
//! nothing here returns an error.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Exact reply to `PING`.
pub const PONG: &[u8] = b"PONG\n";

/// Placeholder clamd prints for memory counters it cannot read.
const PLACEHOLDER: &str = "N/A";

// Every number must be followed by whitespace, otherwise a reply cut short
// mid-number (`max 1` of `max 10`) would yield a wrong value.
static THREADS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"THREADS: live ([0-9]+) +idle ([0-9]+) max ([0-9]+)\s")
        .expect("THREADS pattern is valid")
});

static QUEUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"QUEUE: ([0-9]+) items").expect("QUEUE pattern is valid"));

// Memory counters are either the placeholder or a number. clamd prints them in
// megabytes with an `M` suffix; the suffix is stripped and the number kept as is.
static MEMSTATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    let v = r"(N/A|[0-9]+(?:\.[0-9]+)?)M?";
    let skip = r"(?:N/A|[0-9]+(?:\.[0-9]+)?)M?";
    let mb = r"([0-9]+(?:\.[0-9]+)?)M";
    Regex::new(&format!(
        "MEMSTATS: heap {v} mmap {v} used {v} free {skip} releasable {skip} \
         pools [0-9]+ pools_used {mb} pools_total {mb}"
    ))
    .expect("MEMSTATS pattern is valid")
});

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ClamAV ([0-9][0-9.]*)/([0-9][0-9.]*)[/\s]").expect("VERSION pattern is valid")
});

/// Parsed STATS reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub threads_live: Option<u64>,
    pub threads_idle: Option<u64>,
    pub threads_max: Option<u64>,
    pub queue_length: Option<u64>,
    pub mem_heap: Option<f64>,
    pub mem_mmap: Option<f64>,
    pub mem_used: Option<f64>,
    /// Megabytes, `M` suffix stripped.
    pub pools_used: Option<f64>,
    /// Megabytes, `M` suffix stripped.
    pub pools_total: Option<f64>,
}

impl StatsSnapshot {
    /// Number of fields that carry a value.
    pub fn present_fields(&self) -> usize {
        [
            self.threads_live.is_some(),
            self.threads_idle.is_some(),
            self.threads_max.is_some(),
            self.queue_length.is_some(),
            self.mem_heap.is_some(),
            self.mem_mmap.is_some(),
            self.mem_used.is_some(),
            self.pools_used.is_some(),
            self.pools_total.is_some(),
        ]
        .into_iter()
        .filter(|&present| present)
        .count()
    }
}

/// Parsed VERSION reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Engine version, e.g. `0.102.4`.
    pub engine: String,
    /// Signature database version, e.g. `26168`.
    pub database: String,
}

/// Returns true iff the reply is exactly `PONG\n`.
pub fn parse_liveness(raw: &[u8]) -> bool {
    raw == PONG
}

/// Parses a STATS reply.
pub fn parse_stats(raw: &[u8]) -> StatsSnapshot {
    let text = String::from_utf8_lossy(raw);
    let mut stats = StatsSnapshot::default();

    if let Some(caps) = THREADS_RE.captures(&text) {
        stats.threads_live = parse_number("threads_live", &caps[1]);
        stats.threads_idle = parse_number("threads_idle", &caps[2]);
        stats.threads_max = parse_number("threads_max", &caps[3]);
    }

    if let Some(caps) = QUEUE_RE.captures(&text) {
        stats.queue_length = parse_number("queue_length", &caps[1]);
    }

    if let Some(caps) = MEMSTATS_RE.captures(&text) {
        stats.mem_heap = parse_memory("mem_heap", &caps[1]);
        stats.mem_mmap = parse_memory("mem_mmap", &caps[2]);
        stats.mem_used = parse_memory("mem_used", &caps[3]);
        stats.pools_used = parse_number("pools_used", &caps[4]);
        stats.pools_total = parse_number("pools_total", &caps[5]);
    }

    stats
}

/// Parses a VERSION reply; `None` when the reply has no `ClamAV x/y` part.
pub fn parse_version(raw: &[u8]) -> Option<VersionInfo> {
    let text = String::from_utf8_lossy(raw);
    let caps = VERSION_RE.captures(&text)?;
    Some(VersionInfo {
        engine: caps[1].to_string(),
        database: caps[2].to_string(),
    })
}

/// Memory counter: absent for the placeholder, otherwise a number.
fn parse_memory(field: &str, raw: &str) -> Option<f64> {
    if raw == PLACEHOLDER {
        return None;
    }
    parse_number(field, raw)
}

/// Converts one captured token. A failure drops only this field.
fn parse_number<T>(field: &str, raw: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(field, value = raw, error = %e, "unparseable clamd stats value");
            None
        }
    }
}
