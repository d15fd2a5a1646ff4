//! Metric descriptors.
//!
//! A `MetricDesc` is built once per query from the columns of the first
//! discovered row. Its label-name order never changes afterwards: samples
//! carry label values positionally, so every sample must follow it exactly.

use std::collections::HashMap;

use prometheus::core::Desc;

use crate::error::ConfigError;

/// Prefix prepended to every query name to form the metric name.
pub const METRIC_NAME_PREFIX: &str = "sql_";

/// Columns whose name starts with this prefix carry sample values.
pub const VALUE_COLUMN_PREFIX: &str = "metric_";

/// Const label carrying the job name.
pub const JOB_LABEL: &str = "sql_job";

/// Labels filled from the connection identity and the value column name,
/// in the order they follow the static labels.
pub const IDENTITY_LABELS: [&str; 5] = ["driver", "host", "database", "user", "col"];

const DEFAULT_HELP: &str = "Result of an SQL query";

/// Returns true if `column` holds a sample value rather than a label.
pub fn is_value_column(column: &str) -> bool {
    column.starts_with(VALUE_COLUMN_PREFIX)
}

/// Help text used for the metric: `help`, or a default when it is blank.
pub fn help_or_default(help: &str) -> &str {
    if help.trim().is_empty() {
        DEFAULT_HELP
    } else {
        help
    }
}

/// Builds the metric name for a query: `sql_` + name, stripped to `[a-zA-Z0-9_]`.
pub fn metric_name(query_name: &str) -> String {
    format!("{}{}", METRIC_NAME_PREFIX, query_name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Immutable shape of all samples produced by one query.
#[derive(Debug)]
pub struct MetricDesc {
    name: String,
    help: String,
    label_names: Vec<String>,
    static_label_count: usize,
    job: String,
    desc: Desc,
}

impl MetricDesc {
    /// Builds a descriptor.
    ///
    /// Label names are `static_labels ++ IDENTITY_LABELS ++ label_columns`.
    /// `label_columns` must already be in the order rows will be read in.
    /// Fails if the resulting names are not valid Prometheus names or collide.
    pub fn new(
        query_name: &str,
        help: &str,
        static_labels: &[String],
        label_columns: &[String],
        job: &str,
    ) -> Result<Self, ConfigError> {
        let name = metric_name(query_name);
        let help = help_or_default(help).to_string();

        let label_names: Vec<String> = static_labels
            .iter()
            .cloned()
            .chain(IDENTITY_LABELS.iter().map(|l| l.to_string()))
            .chain(label_columns.iter().cloned())
            .collect();

        let mut const_labels = HashMap::new();
        const_labels.insert(JOB_LABEL.to_string(), job.to_string());

        let desc = Desc::new(name.clone(), help.clone(), label_names.clone(), const_labels)
            .map_err(|e| ConfigError::InvalidDescriptor(format!("{}: {}", name, e)))?;

        Ok(Self {
            name,
            help,
            label_names,
            static_label_count: static_labels.len(),
            job: job.to_string(),
            desc,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    /// All variable label names in positional order.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Static label names (the leading part of `label_names`).
    pub fn static_labels(&self) -> &[String] {
        &self.label_names[..self.static_label_count]
    }

    /// Discovered label columns (the trailing part of `label_names`).
    pub fn label_columns(&self) -> &[String] {
        &self.label_names[self.static_label_count + IDENTITY_LABELS.len()..]
    }

    /// Job name carried in the `sql_job` const label.
    pub fn job(&self) -> &str {
        &self.job
    }

    /// The validated Prometheus descriptor.
    pub fn prom_desc(&self) -> &Desc {
        &self.desc
    }
}
