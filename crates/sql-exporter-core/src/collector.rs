//! Prometheus `Collector` over a query's cached samples.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::{MetricFamily, MetricType};

use crate::query::Query;

/// Exposes the samples of every connection of one query as a gauge family.
///
/// Register it only after discovery: before that the query has no
/// descriptor and the collector describes nothing.
pub struct QueryCollector {
    query: Arc<Query>,
}

impl QueryCollector {
    pub fn new(query: Arc<Query>) -> Self {
        Self { query }
    }
}

impl Collector for QueryCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.query
            .descriptor()
            .map(|d| d.prom_desc())
            .into_iter()
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Some(desc) = self.query.descriptor() else {
            return Vec::new();
        };

        let metrics: Vec<_> = self
            .query
            .snapshot()
            .iter()
            .flat_map(|(_, samples)| samples.iter().map(|s| s.to_metric()))
            .collect();
        if metrics.is_empty() {
            return Vec::new();
        }

        let mut family = MetricFamily::default();
        family.set_name(desc.name().to_string());
        family.set_help(desc.help().to_string());
        family.set_field_type(MetricType::GAUGE);
        family.set_metric(metrics.into());
        vec![family]
    }
}
