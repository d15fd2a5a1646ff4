//! Error types for discovery, scraping and conversion.
//!
//! Errors are scoped to the smallest unit that failed: a column
//! (`ColumnError`), a row (`RowError`, `DecodeError`) or a whole operation
//! (`QueryError`). Only `QueryError` ever leaves `Query::run`.

use thiserror::Error;

/// Misconfiguration that makes a single operation impossible.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("metrics descriptor is missing, run discovery first")]
    MissingDescriptor,
    #[error("db connection not initialized")]
    NotConnected,
    #[error("invalid metric descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("invalid connection string: {0}")]
    InvalidConnection(String),
}

/// The data source rejected or failed the query.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("query execution failed: {message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single row could not be decoded.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("failed to decode column '{column}': {message}")]
pub struct DecodeError {
    pub column: String,
    pub message: String,
}

/// A single column could not be turned into a sample value or a label value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column '{column}' must be type float, is '{type_name}' (val: {value})")]
    TypeCoercion {
        column: String,
        type_name: String,
        value: String,
    },
    #[error("column '{column}' must be type text (string), is '{type_name}'")]
    LabelType { column: String, type_name: String },
    #[error("inconsistent label cardinality: expected {expected} label values, got {got}")]
    LabelCardinality { expected: usize, got: usize },
}

/// A whole row contributed nothing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RowError {
    #[error("zero values found: no column starts with '{prefix}'")]
    NoValueColumns { prefix: &'static str },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failure of a discovery or scrape operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("zero rows returned, cannot discover columns")]
    EmptyResult,
    #[error("zero rows returned")]
    ZeroRows,
}
