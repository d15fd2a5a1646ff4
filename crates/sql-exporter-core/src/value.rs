//! Dynamically-typed column values.
//!
//! Row sources decode every column into a `SqlValue`. The converter then
//! dispatches on the tag: numeric tags and text become sample values, text
//! and bytes become label values, everything else is reported as an error.

use std::collections::BTreeMap;
use std::fmt;

/// One decoded result row, keyed by column name.
///
/// A `BTreeMap` pins iteration to sorted column-name order, so discovery and
/// conversion agree on column order regardless of what the driver reports.
pub type Row = BTreeMap<String, SqlValue>;

/// A single column value as returned by a row source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Any signed integer width.
    Int(i64),
    /// Any unsigned integer width.
    UInt(u64),
    /// Any floating-point width.
    Float(f64),
    /// Raw bytes, usually UTF-8 text from drivers that return untyped data.
    Bytes(Vec<u8>),
    Text(String),
    /// SQL NULL.
    Null,
    /// A value the source could not represent; carries the source type name.
    Unsupported(String),
}

impl SqlValue {
    /// Runtime type name used in coercion error messages.
    pub fn type_name(&self) -> &str {
        match self {
            SqlValue::Int(_) => "int",
            SqlValue::UInt(_) => "uint",
            SqlValue::Float(_) => "float",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Text(_) => "text",
            SqlValue::Null => "null",
            SqlValue::Unsupported(ty) => ty,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::UInt(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Unsupported(ty) => write!(f, "<{}>", ty),
        }
    }
}

macro_rules! impl_from {
    ($variant:ident as $target:ty: $($src:ty),+) => {
        $(
            impl From<$src> for SqlValue {
                fn from(v: $src) -> Self {
                    SqlValue::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

impl_from!(Int as i64: i8, i16, i32, i64);
impl_from!(UInt as u64: u8, u16, u32, u64);
impl_from!(Float as f64: f32, f64);

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widens_integer_and_float_sources() {
        assert_eq!(SqlValue::from(7i16), SqlValue::Int(7));
        assert_eq!(SqlValue::from(7u32), SqlValue::UInt(7));
        assert_eq!(SqlValue::from(1.5f32), SqlValue::Float(1.5));
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
    }

    #[test]
    fn display_shows_raw_value() {
        assert_eq!(SqlValue::from(b"12.5".to_vec()).to_string(), "12.5");
        assert_eq!(SqlValue::Unsupported("timestamptz".into()).to_string(), "<timestamptz>");
        assert_eq!(SqlValue::Unsupported("bool".into()).type_name(), "bool");
    }

    #[test]
    fn rows_iterate_in_column_name_order() {
        let row: Row = [("zeta", 1i64), ("alpha", 2), ("mid", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), SqlValue::from(v)))
            .collect();
        let names: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }
}
