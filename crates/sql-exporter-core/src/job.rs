//! Job scheduler.
//!
//! Every tick a job:
//! 1. opens connections that are not connected yet (failures are retried
//!    on the next tick);
//! 2. discovers descriptors of queries that have none, and registers a
//!    `QueryCollector` for each newly discovered query;
//! 3. scrapes all exported queries, one thread per connection.
//!
//! A query whose collector the registry rejects is never scraped again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use prometheus::Registry;
use tracing::{debug, error, info, warn};

use crate::collector::QueryCollector;
use crate::config::JobConfig;
use crate::connection::{Connection, Connector};
use crate::error::ConfigError;
use crate::query::Query;

/// Granularity of the shutdown check while waiting for the next tick.
const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub connected: usize,
    pub discovered: usize,
    pub scrapes_ok: usize,
    pub scrapes_failed: usize,
}

/// Export state of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// No descriptor yet.
    Pending,
    /// Collector registered, scraped every tick.
    Exported,
    /// Registry refused the collector.
    Rejected,
}

pub struct Job {
    name: String,
    interval: Duration,
    connector: Arc<dyn Connector>,
    connections: Vec<Connection>,
    queries: Vec<Arc<Query>>,
    states: Vec<QueryState>,
    registry: Registry,
}

impl Job {
    /// Builds a job from its configuration. Does not connect.
    pub fn from_config(
        config: &JobConfig,
        connector: Arc<dyn Connector>,
        registry: Registry,
    ) -> Result<Self, ConfigError> {
        let connections = config
            .connections
            .iter()
            .map(|conn_str| {
                connector
                    .identify(conn_str)
                    .map(|info| Connection::new(conn_str.clone(), info))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let queries: Vec<Arc<Query>> = config
            .queries
            .iter()
            .map(|q| {
                Arc::new(Query::new(
                    q.name.clone(),
                    q.query.clone(),
                    q.help.clone(),
                    q.labels.clone(),
                ))
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            interval: config.interval,
            connector,
            connections,
            states: vec![QueryState::Pending; queries.len()],
            queries,
            registry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queries(&self) -> &[Arc<Query>] {
        &self.queries
    }

    /// Export state of each query, in configuration order.
    pub fn query_states(&self) -> &[QueryState] {
        &self.states
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Runs one connect → discover → scrape cycle.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for conn in &mut self.connections {
            let was_connected = conn.is_connected();
            match conn.ensure_connected(self.connector.as_ref()) {
                Ok(()) => {
                    if !was_connected {
                        info!(job = %self.name, target = %conn.info(), "connected");
                    }
                    report.connected += 1;
                }
                Err(e) => {
                    warn!(job = %self.name, target = %conn.info(), error = %e,
                        "failed to connect");
                }
            }
        }

        report.discovered = self.discover_pending();

        let ready: Vec<Arc<Query>> = self
            .queries
            .iter()
            .zip(&self.states)
            .filter(|(_, state)| **state == QueryState::Exported)
            .map(|(q, _)| Arc::clone(q))
            .collect();
        if ready.is_empty() {
            return report;
        }

        let job = self.name.as_str();
        let ready = &ready;
        std::thread::scope(|s| {
            let handles: Vec<_> = self
                .connections
                .iter_mut()
                .filter(|c| c.is_connected())
                .map(|conn| s.spawn(move || scrape_connection(job, conn, ready)))
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok((ok, failed)) => {
                        report.scrapes_ok += ok;
                        report.scrapes_failed += failed;
                    }
                    Err(_) => {
                        error!(job = %job, "scrape thread panicked");
                    }
                }
            }
        });

        report
    }

    /// Runs ticks every `interval` until `running` is cleared.
    pub fn run(mut self, running: &AtomicBool) {
        info!(
            job = %self.name,
            interval = %humantime::format_duration(self.interval),
            connections = self.connections.len(),
            queries = self.queries.len(),
            "job started"
        );

        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            let report = self.tick();
            let elapsed = started.elapsed();

            debug!(
                job = %self.name,
                duration_ms = elapsed.as_millis() as u64,
                connected = report.connected,
                discovered = report.discovered,
                scrapes_ok = report.scrapes_ok,
                scrapes_failed = report.scrapes_failed,
                "tick completed"
            );
            if elapsed > self.interval {
                warn!(
                    job = %self.name,
                    duration_ms = elapsed.as_millis() as u64,
                    interval_ms = self.interval.as_millis() as u64,
                    "tick exceeded interval"
                );
            }

            let mut remaining = self.interval.saturating_sub(elapsed);
            while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
                let step = remaining.min(SLEEP_STEP);
                std::thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
        }

        info!(job = %self.name, "job stopped");
    }

    /// Discovers pending queries, trying connections in order, and registers
    /// their collectors. Returns the number of newly exported queries.
    fn discover_pending(&mut self) -> usize {
        let mut discovered = 0;

        for (query, state) in self.queries.iter().zip(self.states.iter_mut()) {
            if *state != QueryState::Pending {
                continue;
            }
            for conn in self.connections.iter_mut().filter(|c| c.is_connected()) {
                match query.discover(conn, &self.name) {
                    Ok(desc) => {
                        info!(job = %self.name, query = %query.name(), metric = %desc.name(),
                            labels = desc.label_names().len(), "query discovered");
                        let collector = QueryCollector::new(Arc::clone(query));
                        match self.registry.register(Box::new(collector)) {
                            Ok(()) => {
                                *state = QueryState::Exported;
                                discovered += 1;
                            }
                            Err(e) => {
                                error!(job = %self.name, query = %query.name(),
                                    metric = %desc.name(), error = %e,
                                    "failed to register collector, query disabled");
                                *state = QueryState::Rejected;
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(job = %self.name, query = %query.name(), target = %conn.info(),
                            error = %e, "discovery failed");
                    }
                }
            }
        }

        discovered
    }
}

/// Runs every query on one connection. Returns (succeeded, failed).
fn scrape_connection(job: &str, conn: &mut Connection, queries: &[Arc<Query>]) -> (usize, usize) {
    let mut ok = 0;
    let mut failed = 0;
    for query in queries {
        match query.run(conn) {
            Ok(summary) => {
                debug!(job = %job, query = %query.name(), target = %conn.info(),
                    rows = summary.rows, samples = summary.samples,
                    skipped_columns = summary.skipped_columns, "scrape completed");
                ok += 1;
            }
            Err(e) => {
                warn!(job = %job, query = %query.name(), target = %conn.info(), error = %e,
                    "scrape failed");
                failed += 1;
            }
        }
    }
    (ok, failed)
}
