//! Normalized column type descriptors
//!
//! Expected schemas come from migration definitions and actual schemas from
//! catalog introspection, and the two sides spell the same type differently
//! (`int4` vs `integer`, `character varying(20)` vs `varchar(20)`). Both go
//! through [`ColumnType::new`] so the diff compares one vocabulary.
//!
//! # Type Mapping
//!
//! - "int" / "int4" / "serial" → `integer`
//! - "int8" / "bigserial" → `bigint`
//! - "int2" / "smallserial" → `smallint`
//! - "character varying" → `varchar`, "character" / "bpchar" → `char`
//! - "bool" → `boolean`
//! - "float8" / "double" → `double precision`, "float4" / "float" → `real`
//! - "decimal" → `numeric`
//! - "timestamp without time zone" / "datetime" → `timestamp`
//! - "timestamp with time zone" → `timestamptz`
//! - "blob" / "binary" → `bytea`
//!
//! Framework field names (`CharField`, `AutoField`, ...) map to the column type
//! the framework creates for them. Length/precision parameters and array
//! suffixes are preserved; unknown types pass through lowercased.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A column type in the normalized vocabulary
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ColumnType(String);

impl ColumnType {
    /// Normalize a raw type spelling
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The type without length/precision parameters or array suffix
    #[must_use]
    pub fn base(&self) -> &str {
        let end = self
            .0
            .find(|c: char| c == '(' || c == '[')
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ColumnType {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for ColumnType {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<ColumnType> for String {
    fn from(column_type: ColumnType) -> Self {
        column_type.0
    }
}

fn normalize(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if collapsed.is_empty() {
        return "unknown".to_string();
    }

    let (mut rest, array) = match collapsed.strip_suffix("[]") {
        Some(stripped) => (stripped.trim_end().to_string(), true),
        None => (collapsed, false),
    };

    // "timestamp(6) with time zone" → base "timestamp with time zone", params "6"
    let mut params = None;
    if let (Some(open), Some(close)) = (rest.find('('), rest.rfind(')')) {
        if open < close {
            let inner: String = rest[open + 1..close]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let outer = format!("{} {}", rest[..open].trim_end(), rest[close + 1..].trim_start());
            rest = outer.trim().to_string();
            if !inner.is_empty() {
                params = Some(inner);
            }
        }
    }

    let base = canonical_base(&rest);
    let mut normalized = if base.is_empty() {
        "unknown".to_string()
    } else {
        base.to_string()
    };
    if let Some(params) = params {
        normalized.push('(');
        normalized.push_str(&params);
        normalized.push(')');
    }
    if array {
        normalized.push_str("[]");
    }
    normalized
}

fn canonical_base(base: &str) -> &str {
    match base {
        "int" | "int4" | "integer" | "serial" | "serial4" | "autofield" | "integerfield"
        | "foreignkey" | "onetoonefield" | "positiveintegerfield" => "integer",
        "int8" | "bigint" | "bigserial" | "serial8" | "bigautofield" | "bigintegerfield"
        | "positivebigintegerfield" => "bigint",
        "int2" | "smallint" | "smallserial" | "serial2" | "smallautofield"
        | "smallintegerfield" | "positivesmallintegerfield" => "smallint",
        "character varying" | "varchar" | "charfield" | "emailfield" | "urlfield"
        | "slugfield" => "varchar",
        "character" | "char" | "bpchar" => "char",
        "text" | "textfield" => "text",
        "bool" | "boolean" | "booleanfield" => "boolean",
        "float8" | "double" | "double precision" | "floatfield" => "double precision",
        "float4" | "float" | "real" => "real",
        "decimal" | "numeric" | "decimalfield" => "numeric",
        "timestamp" | "timestamp without time zone" | "datetime" | "datetimefield" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "time" | "time without time zone" | "timefield" => "time",
        "timetz" | "time with time zone" => "timetz",
        "date" | "datefield" => "date",
        "uuid" | "uuidfield" => "uuid",
        "json" => "json",
        "jsonb" | "jsonfield" => "jsonb",
        "bytea" | "blob" | "binary" | "binaryfield" => "bytea",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_normalize_to_one_spelling() {
        assert_eq!(ColumnType::new("INT4"), ColumnType::new("integer"));
        assert_eq!(ColumnType::new("serial"), ColumnType::new("Integer"));
        assert_eq!(ColumnType::new("bool"), ColumnType::new("BOOLEAN"));
        assert_eq!(ColumnType::new("float8").as_str(), "double precision");
        assert_eq!(ColumnType::new("CharField").as_str(), "varchar");
    }

    #[test]
    fn test_parameters_are_preserved_and_compacted() {
        assert_eq!(
            ColumnType::new("character varying(255)").as_str(),
            "varchar(255)"
        );
        assert_eq!(ColumnType::new("NUMERIC( 10, 2 )").as_str(), "numeric(10,2)");
        assert_ne!(ColumnType::new("varchar(20)"), ColumnType::new("varchar(255)"));
    }

    #[test]
    fn test_timezone_suffix_after_precision() {
        assert_eq!(
            ColumnType::new("timestamp(6) with time zone").as_str(),
            "timestamptz(6)"
        );
        assert_eq!(
            ColumnType::new("timestamp without time zone").as_str(),
            "timestamp"
        );
    }

    #[test]
    fn test_array_suffix_and_base() {
        let t = ColumnType::new("int4[]");
        assert_eq!(t.as_str(), "integer[]");
        assert_eq!(t.base(), "integer");
        assert_eq!(ColumnType::new("varchar(10)").base(), "varchar");
    }

    #[test]
    fn test_unknown_types_pass_through_lowercased() {
        assert_eq!(ColumnType::new("  Geometry ").as_str(), "geometry");
        assert_eq!(ColumnType::new("").as_str(), "unknown");
    }
}
