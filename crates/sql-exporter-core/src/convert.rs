//! Row → sample conversion.
//!
//! Every value column of a row becomes one `Sample`. Label values are laid
//! out in exactly the descriptor's label-name order:
//!
//! ```text
//! static labels │ driver host database user │ col │ label columns...
//! (query config)│ (connection identity)     │ (value column name)
//! ```
//!
//! Failures are folded, not propagated: a bad column is recorded in
//! `RowConversion::skipped` and the remaining columns are still converted.

use std::sync::Arc;

use prometheus::proto::{Gauge, LabelPair, Metric};

use crate::connection::ConnectionInfo;
use crate::desc::{MetricDesc, VALUE_COLUMN_PREFIX, is_value_column};
use crate::error::{ColumnError, RowError};
use crate::value::{Row, SqlValue};

/// One immutable, fully-labeled measurement.
#[derive(Debug, Clone)]
pub struct Sample {
    desc: Arc<MetricDesc>,
    value: f64,
    label_values: Vec<String>,
}

impl Sample {
    /// Creates a sample, checking the label values against the descriptor.
    pub fn new(
        desc: Arc<MetricDesc>,
        value: f64,
        label_values: Vec<String>,
    ) -> Result<Self, ColumnError> {
        let expected = desc.label_names().len();
        if label_values.len() != expected {
            return Err(ColumnError::LabelCardinality {
                expected,
                got: label_values.len(),
            });
        }
        Ok(Self {
            desc,
            value,
            label_values,
        })
    }

    pub fn desc(&self) -> &Arc<MetricDesc> {
        &self.desc
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Looks up a label value by label name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .label_names()
            .iter()
            .position(|n| n == name)
            .map(|i| self.label_values[i].as_str())
    }

    /// Renders the sample as a Prometheus gauge metric.
    ///
    /// Label pairs include the `sql_job` const label and are sorted by name.
    pub fn to_metric(&self) -> Metric {
        let mut pairs: Vec<LabelPair> = self
            .desc
            .prom_desc()
            .const_label_pairs
            .iter()
            .cloned()
            .collect();
        pairs.extend(
            self.desc
                .label_names()
                .iter()
                .zip(&self.label_values)
                .map(|(name, value)| {
                    let mut pair = LabelPair::default();
                    pair.set_name(name.clone());
                    pair.set_value(value.clone());
                    pair
                }),
        );
        pairs.sort_by(|a, b| a.get_name().cmp(b.get_name()));

        let mut gauge = Gauge::default();
        gauge.set_value(self.value);

        let mut metric = Metric::default();
        metric.set_label(pairs.into());
        metric.set_gauge(gauge);
        metric
    }
}

/// Outcome of converting one row.
#[derive(Debug, Default)]
pub struct RowConversion {
    /// One sample per successfully converted value column.
    pub samples: Vec<Sample>,
    /// Value columns that were skipped.
    pub skipped: Vec<ColumnError>,
    /// Non-value columns of the row that the descriptor does not know about.
    pub unmapped: Vec<String>,
}

/// Converts one row into samples.
///
/// `static_values` must line up with `desc.static_labels()`. Label columns
/// missing from the row get an empty label value; row columns missing from
/// the descriptor are reported in `unmapped` and otherwise ignored.
pub fn convert_row(
    desc: &Arc<MetricDesc>,
    static_values: &[String],
    conn: &ConnectionInfo,
    row: &Row,
) -> Result<RowConversion, RowError> {
    let value_columns: Vec<&String> = row.keys().filter(|c| is_value_column(c)).collect();
    if value_columns.is_empty() {
        return Err(RowError::NoValueColumns {
            prefix: VALUE_COLUMN_PREFIX,
        });
    }

    let mut conversion = RowConversion {
        unmapped: row
            .keys()
            .filter(|c| !is_value_column(c) && !desc.label_columns().contains(*c))
            .cloned()
            .collect(),
        ..Default::default()
    };

    for column in value_columns {
        match convert_column(desc, static_values, conn, row, column) {
            Ok(sample) => conversion.samples.push(sample),
            Err(e) => conversion.skipped.push(e),
        }
    }

    Ok(conversion)
}

fn convert_column(
    desc: &Arc<MetricDesc>,
    static_values: &[String],
    conn: &ConnectionInfo,
    row: &Row,
    column: &str,
) -> Result<Sample, ColumnError> {
    let value = coerce_value(column, &row[column])?;

    let mut labels = Vec::with_capacity(desc.label_names().len());
    labels.extend(static_values.iter().cloned());
    labels.push(conn.driver.clone());
    labels.push(conn.host.clone());
    labels.push(conn.database.clone());
    labels.push(conn.user.clone());
    labels.push(column.to_string());
    for label in desc.label_columns() {
        let lv = match row.get(label) {
            Some(v) => coerce_label(label, v)?,
            None => String::new(),
        };
        labels.push(lv);
    }

    Sample::new(Arc::clone(desc), value, labels)
}

/// Coerces a value column to `f64`.
pub fn coerce_value(column: &str, value: &SqlValue) -> Result<f64, ColumnError> {
    let parsed = match value {
        SqlValue::Int(v) => Some(*v as f64),
        SqlValue::UInt(v) => Some(*v as f64),
        SqlValue::Float(v) => Some(*v),
        SqlValue::Bytes(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
        SqlValue::Text(s) => s.parse().ok(),
        SqlValue::Null | SqlValue::Unsupported(_) => None,
    };
    parsed.ok_or_else(|| ColumnError::TypeCoercion {
        column: column.to_string(),
        type_name: value.type_name().to_string(),
        value: value.to_string(),
    })
}

/// Coerces a label column to its label value.
pub fn coerce_label(column: &str, value: &SqlValue) -> Result<String, ColumnError> {
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        SqlValue::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
        other => Err(ColumnError::LabelType {
            column: column.to_string(),
            type_name: other.type_name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionInfo {
        ConnectionInfo::new("postgres", "db1", "app", "exporter")
    }

    fn desc(static_labels: &[&str], label_columns: &[&str]) -> Arc<MetricDesc> {
        let s: Vec<String> = static_labels.iter().map(|s| s.to_string()).collect();
        let c: Vec<String> = label_columns.iter().map(|s| s.to_string()).collect();
        Arc::new(MetricDesc::new("q", "help", &s, &c, "job").unwrap())
    }

    fn row(cols: Vec<(&str, SqlValue)>) -> Row {
        cols.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn one_sample_per_value_column() {
        let d = desc(&[], &["env"]);
        let r = row(vec![
            ("metric_x", SqlValue::Float(3.5)),
            ("metric_y", SqlValue::from("7")),
            ("env", SqlValue::from("prod")),
        ]);

        let out = convert_row(&d, &[], &conn(), &r).unwrap();
        assert!(out.skipped.is_empty());
        assert_eq!(out.samples.len(), 2);

        let x = &out.samples[0];
        let y = &out.samples[1];
        assert_eq!(x.value(), 3.5);
        assert_eq!(y.value(), 7.0);
        assert_eq!(x.label("col"), Some("metric_x"));
        assert_eq!(y.label("col"), Some("metric_y"));
        for s in &out.samples {
            assert_eq!(s.label("env"), Some("prod"));
            assert_eq!(s.label("driver"), Some("postgres"));
            assert_eq!(s.label("host"), Some("db1"));
            assert_eq!(s.label("database"), Some("app"));
            assert_eq!(s.label("user"), Some("exporter"));
        }
    }

    #[test]
    fn label_values_follow_descriptor_order() {
        let d = desc(&["region"], &["a_state", "datname"]);
        let r = row(vec![
            ("datname", SqlValue::from("app")),
            ("a_state", SqlValue::from(b"idle".to_vec())),
            ("metric_n", SqlValue::Int(4)),
        ]);

        let out = convert_row(&d, &["eu".to_string()], &conn(), &r).unwrap();
        let sample = &out.samples[0];
        assert_eq!(sample.label_values().len(), d.label_names().len());
        assert_eq!(
            sample.label_values(),
            ["eu", "postgres", "db1", "app", "exporter", "metric_n", "idle", "app"]
        );
    }

    #[test]
    fn non_numeric_value_skips_only_that_column() {
        let d = desc(&[], &[]);
        let r = row(vec![
            ("metric_x", SqlValue::from("abc")),
            ("metric_y", SqlValue::UInt(2)),
        ]);

        let out = convert_row(&d, &[], &conn(), &r).unwrap();
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].label("col"), Some("metric_y"));
        assert_eq!(
            out.skipped,
            vec![ColumnError::TypeCoercion {
                column: "metric_x".into(),
                type_name: "text".into(),
                value: "abc".into(),
            }]
        );
    }

    #[test]
    fn row_without_value_columns_fails() {
        let d = desc(&[], &["env"]);
        let r = row(vec![("env", SqlValue::from("prod"))]);
        let err = convert_row(&d, &[], &conn(), &r).unwrap_err();
        assert!(matches!(err, RowError::NoValueColumns { .. }));
    }

    #[test]
    fn non_text_label_fails_the_column() {
        let d = desc(&[], &["shard"]);
        let r = row(vec![("metric_x", SqlValue::Int(1)), ("shard", SqlValue::Int(3))]);

        let out = convert_row(&d, &[], &conn(), &r).unwrap();
        assert!(out.samples.is_empty());
        assert!(matches!(
            &out.skipped[0],
            ColumnError::LabelType { column, type_name } if column == "shard" && type_name == "int"
        ));
    }

    #[test]
    fn null_label_skips_every_sample_of_the_row() {
        let d = desc(&[], &["state"]);
        let r = row(vec![
            ("metric_a", SqlValue::Int(1)),
            ("metric_b", SqlValue::Int(2)),
            ("state", SqlValue::Null),
        ]);

        let out = convert_row(&d, &[], &conn(), &r).unwrap();
        assert!(out.samples.is_empty());
        assert_eq!(out.skipped.len(), 2);
        assert!(out.skipped.iter().all(|e| matches!(
            e,
            ColumnError::LabelType { column, type_name } if column == "state" && type_name == "null"
        )));
    }

    #[test]
    fn missing_and_unknown_label_columns() {
        let d = desc(&[], &["env"]);
        let r = row(vec![("metric_x", SqlValue::Int(1)), ("extra", SqlValue::from("z"))]);

        let out = convert_row(&d, &[], &conn(), &r).unwrap();
        assert_eq!(out.samples[0].label("env"), Some(""));
        assert_eq!(out.samples[0].label_values().len(), d.label_names().len());
        assert_eq!(out.unmapped, vec!["extra".to_string()]);
    }

    #[test]
    fn coerces_bytes_and_rejects_null() {
        assert_eq!(coerce_value("m", &SqlValue::from(b"1e3".to_vec())).unwrap(), 1000.0);
        assert_eq!(coerce_value("m", &SqlValue::Int(-3)).unwrap(), -3.0);
        assert!(coerce_value("m", &SqlValue::Null).is_err());
        assert!(coerce_value("m", &SqlValue::Bytes(vec![0xff, 0xfe])).is_err());
        assert!(coerce_value("m", &SqlValue::Unsupported("bool".into())).is_err());
    }

    #[test]
    fn sample_rejects_wrong_cardinality() {
        let d = desc(&[], &["env"]);
        let err = Sample::new(d, 1.0, vec!["only".into()]).unwrap_err();
        assert_eq!(err, ColumnError::LabelCardinality { expected: 6, got: 1 });
    }

    #[test]
    fn metric_carries_sorted_labels_and_job() {
        let d = desc(&[], &["env"]);
        let r = row(vec![("metric_x", SqlValue::Float(2.0)), ("env", SqlValue::from("prod"))]);
        let out = convert_row(&d, &[], &conn(), &r).unwrap();

        let metric = out.samples[0].to_metric();
        let names: Vec<&str> = metric.get_label().iter().map(|p| p.get_name()).collect();
        assert_eq!(
            names,
            ["col", "database", "driver", "env", "host", "sql_job", "user"]
        );
        assert_eq!(metric.get_gauge().get_value(), 2.0);
    }
}
