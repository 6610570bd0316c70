//! Normalization of SQL type names to a small tag enumeration.

use serde::{Deserialize, Serialize};

/// Category of a column type, normalized from the SQL type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Integer,
    Numeric,
    Boolean,
    /// Character types: text, varchar, char and friends.
    Text,
    Bytes,
    /// Dates, times, timestamps and intervals.
    Temporal,
    Json,
    Array,
    Uuid,
    Network,
    Range,
    Other,
}

impl TypeTag {
    /// Map a PostgreSQL type name (as written in DDL or reported by
    /// `information_schema`) to its tag. Length/precision arguments and
    /// case are ignored; array types are recognized by the `[]` suffix or
    /// the catalog's leading underscore.
    pub fn from_sql_type(sql_type: &str) -> Self {
        let name = sql_type.trim().to_ascii_lowercase();
        if name.ends_with("[]") || name.starts_with('_') || name == "array" {
            return TypeTag::Array;
        }
        // Strip a parenthesized argument list: varchar(255), numeric(10, 2).
        let base = match name.find('(') {
            Some(open) => name[..open].trim_end(),
            None => name.as_str(),
        };
        match base {
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "serial"
            | "smallserial" | "bigserial" => TypeTag::Integer,
            "numeric" | "decimal" | "real" | "double precision" | "float4" | "float8"
            | "money" => TypeTag::Numeric,
            "boolean" | "bool" => TypeTag::Boolean,
            "text" | "varchar" | "character varying" | "character" | "char" | "bpchar"
            | "citext" | "name" => TypeTag::Text,
            "bytea" => TypeTag::Bytes,
            "date" | "interval" => TypeTag::Temporal,
            "json" | "jsonb" => TypeTag::Json,
            "uuid" => TypeTag::Uuid,
            "inet" | "cidr" | "macaddr" | "macaddr8" => TypeTag::Network,
            _ if base.starts_with("timestamp") || base.starts_with("time") => TypeTag::Temporal,
            _ if base.ends_with("range") && !base.is_empty() => TypeTag::Range,
            _ => TypeTag::Other,
        }
    }

    /// Integer or numeric.
    pub fn is_numeric(self) -> bool {
        matches!(self, TypeTag::Integer | TypeTag::Numeric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types() {
        for name in ["int", "INTEGER", "bigint", "serial", "int8", "smallint"] {
            assert_eq!(TypeTag::from_sql_type(name), TypeTag::Integer, "{name}");
        }
    }

    #[test]
    fn test_text_types_with_arguments() {
        assert_eq!(TypeTag::from_sql_type("varchar(255)"), TypeTag::Text);
        assert_eq!(TypeTag::from_sql_type("character varying(64)"), TypeTag::Text);
        assert_eq!(TypeTag::from_sql_type("CHAR(1)"), TypeTag::Text);
    }

    #[test]
    fn test_temporal_types() {
        for name in [
            "timestamp",
            "timestamp with time zone",
            "timestamptz",
            "date",
            "time",
            "interval",
        ] {
            assert_eq!(TypeTag::from_sql_type(name), TypeTag::Temporal, "{name}");
        }
    }

    #[test]
    fn test_arrays_and_ranges() {
        assert_eq!(TypeTag::from_sql_type("integer[]"), TypeTag::Array);
        assert_eq!(TypeTag::from_sql_type("_int4"), TypeTag::Array);
        assert_eq!(TypeTag::from_sql_type("int4range"), TypeTag::Range);
        assert_eq!(TypeTag::from_sql_type("tstzrange"), TypeTag::Range);
    }

    #[test]
    fn test_misc_types() {
        assert_eq!(TypeTag::from_sql_type("numeric(10,2)"), TypeTag::Numeric);
        assert_eq!(TypeTag::from_sql_type("jsonb"), TypeTag::Json);
        assert_eq!(TypeTag::from_sql_type("uuid"), TypeTag::Uuid);
        assert_eq!(TypeTag::from_sql_type("inet"), TypeTag::Network);
        assert_eq!(TypeTag::from_sql_type("bytea"), TypeTag::Bytes);
        assert_eq!(TypeTag::from_sql_type("geometry"), TypeTag::Other);
    }
}
