//! YAML configuration: jobs, their connections and queries.
//!
//! ```yaml
//! jobs:
//!   - name: pg_activity
//!     interval: 1m
//!     connections:
//!       - "postgres://exporter@db1:5432/app"
//!     queries:
//!       - name: sessions
//!         help: "Sessions by state"
//!         labels:
//!           env: prod
//!         query: |
//!           SELECT state, count(*) AS metric_sessions
//!           FROM pg_stat_activity GROUP BY state
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::desc::{help_or_default, metric_name};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub jobs: Vec<JobConfig>,
}

/// A group of connections scraped with the same queries on one interval.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    /// Scrape interval, e.g. `30s`, `5m`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// Connection strings (libpq URL or key/value form).
    pub connections: Vec<String>,
    pub queries: Vec<QueryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    pub name: String,
    #[serde(default)]
    pub help: String,
    /// Static labels added to every sample of this query.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub query: String,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

impl Config {
    /// Reads, parses and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates a configuration document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigLoadError> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural constraints and metric name collisions.
    ///
    /// Query names must map to distinct metric names within a job. The same
    /// metric name may appear in several jobs only with identical help text,
    /// since all of them are exposed from one registry.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let invalid = |msg: String| Err(ConfigLoadError::Invalid(msg));

        if self.jobs.is_empty() {
            return invalid("no jobs defined".to_string());
        }

        let mut job_names = HashSet::new();
        // metric name -> (job, help) of its first definition
        let mut metrics: HashMap<String, (&str, &str)> = HashMap::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return invalid("job name must not be empty".to_string());
            }
            if !job_names.insert(job.name.as_str()) {
                return invalid(format!("duplicate job name '{}'", job.name));
            }
            if job.interval.is_zero() {
                return invalid(format!("job '{}': interval must be positive", job.name));
            }
            if job.connections.is_empty() {
                return invalid(format!("job '{}': no connections defined", job.name));
            }
            if job.queries.is_empty() {
                return invalid(format!("job '{}': no queries defined", job.name));
            }

            let mut query_names = HashSet::new();
            let mut job_metrics = HashSet::new();
            for query in &job.queries {
                if query.name.trim().is_empty() {
                    return invalid(format!("job '{}': query name must not be empty", job.name));
                }
                if !query_names.insert(query.name.as_str()) {
                    return invalid(format!(
                        "job '{}': duplicate query name '{}'",
                        job.name, query.name
                    ));
                }
                if query.query.trim().is_empty() {
                    return invalid(format!(
                        "job '{}': query '{}' is empty",
                        job.name, query.name
                    ));
                }

                let metric = metric_name(&query.name);
                if !job_metrics.insert(metric.clone()) {
                    return invalid(format!(
                        "job '{}': query '{}' maps to metric '{}' which is already defined",
                        job.name, query.name, metric
                    ));
                }
                let help = help_or_default(&query.help);
                match metrics.get(&metric) {
                    Some((other_job, other_help)) if *other_help != help => {
                        return invalid(format!(
                            "job '{}': metric '{}' has different help than in job '{}'",
                            job.name, metric, other_job
                        ));
                    }
                    Some(_) => {}
                    None => {
                        metrics.insert(metric, (job.name.as_str(), help));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
jobs:
  - name: pg_activity
    interval: 1m
    connections:
      - "postgres://exporter@db1:5432/app"
      - "host=db2 user=exporter dbname=app"
    queries:
      - name: sessions
        help: "Sessions by state"
        labels:
          env: prod
          team: core
        query: |
          SELECT state, count(*) AS metric_sessions
          FROM pg_stat_activity GROUP BY state
      - name: db_size
        query: SELECT datname, pg_database_size(datname) AS metric_bytes FROM pg_database
"#;

    #[test]
    fn parses_example() {
        let config = Config::from_yaml(EXAMPLE).unwrap();
        let job = &config.jobs[0];
        assert_eq!(job.name, "pg_activity");
        assert_eq!(job.interval, Duration::from_secs(60));
        assert_eq!(job.connections.len(), 2);

        let sessions = &job.queries[0];
        assert_eq!(sessions.help, "Sessions by state");
        assert_eq!(
            sessions.labels.keys().collect::<Vec<_>>(),
            ["env", "team"]
        );
        assert!(sessions.query.contains("metric_sessions"));

        let db_size = &job.queries[1];
        assert!(db_size.help.is_empty());
        assert!(db_size.labels.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = EXAMPLE.replace("interval: 1m", "interval: 1m\n    timeout: 5s");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigLoadError::Parse(_))));
    }

    #[test]
    fn rejects_bad_interval() {
        let yaml = EXAMPLE.replace("interval: 1m", "interval: soon");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigLoadError::Parse(_))));

        let yaml = EXAMPLE.replace("interval: 1m", "interval: 0s");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigLoadError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_query_names() {
        let yaml = EXAMPLE.replace("name: db_size", "name: sessions");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate query name 'sessions'"));
    }

    #[test]
    fn rejects_colliding_metric_names() {
        let yaml = EXAMPLE.replace("name: db_size", "name: db-size");
        assert!(Config::from_yaml(&yaml).is_ok());

        let yaml = EXAMPLE.replace("name: db_size", "name: sessions!");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("maps to metric 'sql_sessions'"));
    }

    #[test]
    fn same_metric_in_two_jobs_needs_same_help() {
        let second = |help: &str| {
            format!(
                "{}  - name: pg_other\n    interval: 30s\n    connections: [\"host=db3\"]\n    \
                 queries:\n      - name: sessions\n        help: \"{}\"\n        query: SELECT 1\n",
                EXAMPLE, help
            )
        };

        assert!(Config::from_yaml(&second("Sessions by state")).is_ok());

        let err = Config::from_yaml(&second("Other sessions")).unwrap_err();
        assert!(err.to_string().contains("different help than in job 'pg_activity'"));
    }

    #[test]
    fn rejects_empty_jobs() {
        assert!(matches!(
            Config::from_yaml("jobs: []"),
            Err(ConfigLoadError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.jobs.len(), 1);

        let missing = Config::from_file("/nonexistent/sql-exporter.yml");
        assert!(matches!(missing, Err(ConfigLoadError::Io { .. })));
    }
}
