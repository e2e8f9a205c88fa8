//! One collection pass against clamd.
//!
//! A pass issues `PING`, `STATS` and `VERSION` strictly in that order, each on
//! its own connection, parses every reply and maps the fields that are present
//! onto the fixed metric schema. A failed or unparseable step contributes no
//! observations and the pass moves on; there are no retries and no state is
//! carried from one pass to the next.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::client::{Command, Dialer};
use crate::parser::{self, StatsSnapshot, VersionInfo};

/// Metrics exported for a clamd instance. All are gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Up,
    ThreadsLive,
    ThreadsIdle,
    ThreadsMax,
    QueueLength,
    MemHeap,
    MemMmap,
    MemUsed,
    PoolsUsedMb,
    PoolsTotalMb,
    BuildInfo,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Up,
        Metric::ThreadsLive,
        Metric::ThreadsIdle,
        Metric::ThreadsMax,
        Metric::QueueLength,
        Metric::MemHeap,
        Metric::MemMmap,
        Metric::MemUsed,
        Metric::PoolsUsedMb,
        Metric::PoolsTotalMb,
        Metric::BuildInfo,
    ];

    /// Fully qualified metric name.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Up => "clamav_up",
            Metric::ThreadsLive => "clamav_threads_live",
            Metric::ThreadsIdle => "clamav_threads_idle",
            Metric::ThreadsMax => "clamav_threads_max",
            Metric::QueueLength => "clamav_queue_length",
            Metric::MemHeap => "clamav_mem_heap",
            Metric::MemMmap => "clamav_mem_mmap",
            Metric::MemUsed => "clamav_mem_used",
            Metric::PoolsUsedMb => "clamav_pools_used_mb",
            Metric::PoolsTotalMb => "clamav_pools_total_mb",
            Metric::BuildInfo => "clamav_build_info",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Metric::Up => "Whether clamd answered PING (absent when it did not)",
            Metric::ThreadsLive => "Live clamd threads",
            Metric::ThreadsIdle => "Idle clamd threads",
            Metric::ThreadsMax => "Maximum clamd threads",
            Metric::QueueLength => "Items queued for scanning",
            Metric::MemHeap => "clamd heap memory usage in MB",
            Metric::MemMmap => "clamd mmap memory usage in MB",
            Metric::MemUsed => "clamd used memory in MB",
            Metric::PoolsUsedMb => "clamd memory pool usage in MB",
            Metric::PoolsTotalMb => "clamd total memory pool size in MB",
            Metric::BuildInfo => "ClamAV engine and signature database versions",
        }
    }

    /// Variable label names; only `BuildInfo` has any.
    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            Metric::BuildInfo => &["clamav_version", "database_version"],
            _ => &[],
        }
    }
}

/// A single value for one metric, produced by a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: Metric,
    pub value: f64,
    /// Values for `metric.label_names()`, in the same order.
    pub labels: Vec<String>,
}

impl Observation {
    pub fn gauge(metric: Metric, value: f64) -> Self {
        Self {
            metric,
            value,
            labels: Vec::new(),
        }
    }
}

/// Time spent in each step of a pass.
#[derive(Debug, Clone, Default)]
pub struct PassTiming {
    pub total: Duration,
    pub liveness: Duration,
    pub stats: Duration,
    pub version: Duration,
}

/// Result of one pass, handed to the metrics sink as a whole.
#[derive(Debug, Clone, Default)]
pub struct CollectionPass {
    pub observations: Vec<Observation>,
    pub timing: PassTiming,
}

impl CollectionPass {
    /// Whether clamd answered the liveness probe during this pass.
    pub fn is_up(&self) -> bool {
        self.observations.iter().any(|o| o.metric == Metric::Up)
    }

    pub fn get(&self, metric: Metric) -> Option<&Observation> {
        self.observations.iter().find(|o| o.metric == metric)
    }
}

/// Drives the three clamd exchanges of a pass.
#[derive(Debug)]
pub struct Collector<D: Dialer> {
    dialer: D,
}

impl<D: Dialer> Collector<D> {
    pub fn new(dialer: D) -> Self {
        Self { dialer }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Runs PING, STATS and VERSION in order and returns every observation.
    pub fn collect_pass(&self) -> CollectionPass {
        let start = Instant::now();
        let mut timing = PassTiming::default();
        let mut observations = Vec::with_capacity(Metric::ALL.len());

        let t = Instant::now();
        let alive = parser::parse_liveness(&self.dialer.dial(Command::Ping));
        observations.extend(liveness_observation(alive));
        timing.liveness = t.elapsed();

        let t = Instant::now();
        let raw = self.dialer.dial(Command::Stats);
        debug!(reply = %String::from_utf8_lossy(&raw), "clamd STATS reply");
        let stats = parser::parse_stats(&raw);
        observations.extend(stats_observations(&stats));
        timing.stats = t.elapsed();

        let t = Instant::now();
        let version = parser::parse_version(&self.dialer.dial(Command::Version));
        observations.extend(version.as_ref().map(version_observation));
        timing.version = t.elapsed();

        timing.total = start.elapsed();
        debug!(
            up = alive,
            stats_fields = stats.present_fields(),
            version = version.is_some(),
            observations = observations.len(),
            elapsed_ms = timing.total.as_millis() as u64,
            "collection pass finished"
        );

        CollectionPass {
            observations,
            timing,
        }
    }
}

/// `up = 1` when alive; nothing otherwise.
pub fn liveness_observation(alive: bool) -> Option<Observation> {
    alive.then(|| Observation::gauge(Metric::Up, 1.0))
}

/// One gauge per present STATS field.
pub fn stats_observations(stats: &StatsSnapshot) -> Vec<Observation> {
    let counts = [
        (Metric::ThreadsLive, stats.threads_live),
        (Metric::ThreadsIdle, stats.threads_idle),
        (Metric::ThreadsMax, stats.threads_max),
        (Metric::QueueLength, stats.queue_length),
    ];
    let amounts = [
        (Metric::MemHeap, stats.mem_heap),
        (Metric::MemMmap, stats.mem_mmap),
        (Metric::MemUsed, stats.mem_used),
        (Metric::PoolsUsedMb, stats.pools_used),
        (Metric::PoolsTotalMb, stats.pools_total),
    ];

    counts
        .into_iter()
        .filter_map(|(metric, value)| value.map(|v| Observation::gauge(metric, v as f64)))
        .chain(
            amounts
                .into_iter()
                .filter_map(|(metric, value)| value.map(|v| Observation::gauge(metric, v))),
        )
        .collect()
}

/// `build_info = 1` labelled with both versions.
pub fn version_observation(version: &VersionInfo) -> Observation {
    Observation {
        metric: Metric::BuildInfo,
        value: 1.0,
        labels: vec![version.engine.clone(), version.database.clone()],
    }
}
