//! Prometheus adapter for the collection pass.
//!
//! Descriptors are built once when the exporter is constructed; every
//! `collect()` call (one per scrape) runs a fresh pass and turns its
//! observations into metric families. Metrics that a pass did not observe
//! are simply missing from that scrape.

use std::collections::HashMap;

use prometheus::core::{Collector as MetricCollector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts};
use tracing::warn;

use crate::client::Dialer;
use crate::collector::{Collector, Metric, Observation};

/// Exposes clamd metrics through the `prometheus` crate's collector interface.
pub struct ClamavExporter<D: Dialer> {
    collector: Collector<D>,
    descs: Vec<Desc>,
}

impl<D: Dialer> ClamavExporter<D> {
    pub fn new(dialer: D) -> prometheus::Result<Self> {
        let descs = Metric::ALL
            .iter()
            .map(|m| {
                Desc::new(
                    m.name().to_string(),
                    m.help().to_string(),
                    m.label_names().iter().map(|l| l.to_string()).collect(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            collector: Collector::new(dialer),
            descs,
        })
    }

    pub fn collector(&self) -> &Collector<D> {
        &self.collector
    }
}

impl<D: Dialer> MetricCollector for ClamavExporter<D> {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let pass = self.collector.collect_pass();
        pass.observations
            .iter()
            .flat_map(|obs| match to_families(obs) {
                Ok(families) => families,
                Err(e) => {
                    warn!(metric = obs.metric.name(), error = %e, "dropping observation");
                    Vec::new()
                }
            })
            .collect()
    }
}

/// Builds a throwaway gauge holding just this observation.
fn to_families(obs: &Observation) -> prometheus::Result<Vec<MetricFamily>> {
    let opts = Opts::new(obs.metric.name(), obs.metric.help());
    if obs.labels.is_empty() {
        let gauge = Gauge::with_opts(opts)?;
        gauge.set(obs.value);
        Ok(gauge.collect())
    } else {
        let gauges = GaugeVec::new(opts, obs.metric.label_names())?;
        let values: Vec<&str> = obs.labels.iter().map(String::as_str).collect();
        gauges.get_metric_with_label_values(&values)?.set(obs.value);
        Ok(gauges.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Command, MockClamd};
    use prometheus::{Encoder, Registry, TextEncoder};

    fn render(registry: &Registry) -> String {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buf)
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_describes_every_metric() {
        let exporter = ClamavExporter::new(MockClamd::new()).unwrap();
        let names: Vec<&str> = exporter
            .desc()
            .iter()
            .map(|d| d.fq_name.as_str())
            .collect();
        let expected: Vec<&str> = Metric::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names, expected);

        let build_info = exporter
            .desc()
            .into_iter()
            .find(|d| d.fq_name == "clamav_build_info")
            .unwrap();
        assert_eq!(
            build_info.variable_labels,
            vec!["clamav_version", "database_version"]
        );
    }

    #[test]
    fn test_registry_exposes_typical_daemon() {
        let registry = Registry::new();
        registry
            .register(Box::new(
                ClamavExporter::new(MockClamd::typical_daemon()).unwrap(),
            ))
            .unwrap();

        let text = render(&registry);
        assert!(text.contains("clamav_up 1\n"));
        assert!(text.contains("clamav_threads_live 10\n"));
        assert!(text.contains("clamav_threads_idle 2\n"));
        assert!(text.contains("clamav_threads_max 10\n"));
        assert!(text.contains("clamav_queue_length 0\n"));
        assert!(text.contains("clamav_pools_used_mb 1143.596\n"));
        assert!(text.contains("clamav_pools_total_mb 1143.632\n"));
        assert!(text.contains(
            "clamav_build_info{clamav_version=\"0.102.4\",database_version=\"26168\"} 1\n"
        ));
        assert!(!text.contains("clamav_mem_heap"));
        assert!(text.contains("# TYPE clamav_up gauge"));
    }

    #[test]
    fn test_daemon_down_scrape_is_empty_not_error() {
        let registry = Registry::new();
        registry
            .register(Box::new(ClamavExporter::new(MockClamd::unreachable()).unwrap()))
            .unwrap();
        assert!(registry.gather().is_empty());
        assert_eq!(render(&registry), "");
    }

    #[test]
    fn test_each_collect_runs_a_fresh_pass() {
        let exporter = ClamavExporter::new(MockClamd::typical_daemon()).unwrap();
        exporter.collect();
        exporter.collect();
        assert_eq!(exporter.collector().dialer().calls().len(), 2 * Command::ALL.len());
    }

    #[test]
    fn test_mismatched_label_count_is_dropped() {
        let obs = Observation {
            metric: Metric::BuildInfo,
            value: 1.0,
            labels: vec!["0.102.4".to_string()],
        };
        assert!(to_families(&obs).is_err());
    }
}
