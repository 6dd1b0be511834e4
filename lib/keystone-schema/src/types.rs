use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared column type. The set is closed: anything else fails to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    String,
    Uuid,
    Date,
    Datetime,
    Timestamp,
    Integer,
    BigInteger,
    Decimal,
    Float,
    Boolean,
    Json,
    Jsonb,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Integer => "integer",
            ColumnType::BigInteger => "bigInteger",
            ColumnType::Decimal => "decimal",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp
        )
    }

    pub fn is_json(self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::BigInteger)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::BigInteger | ColumnType::Decimal | ColumnType::Float
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime category of a record value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

const BOOLEAN_TYPES: &[ColumnType] = &[ColumnType::Boolean, ColumnType::Json, ColumnType::Jsonb];

const NUMBER_TYPES: &[ColumnType] = &[
    ColumnType::Integer,
    ColumnType::BigInteger,
    ColumnType::Decimal,
    ColumnType::Float,
    ColumnType::Json,
    ColumnType::Jsonb,
];

// decimals may arrive as strings to keep their precision
const STRING_TYPES: &[ColumnType] = &[
    ColumnType::String,
    ColumnType::Uuid,
    ColumnType::Date,
    ColumnType::Datetime,
    ColumnType::Timestamp,
    ColumnType::Decimal,
    ColumnType::Json,
    ColumnType::Jsonb,
];

const STRUCTURED_TYPES: &[ColumnType] = &[ColumnType::Json, ColumnType::Jsonb];

impl ValueCategory {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueCategory::Null,
            Value::Bool(_) => ValueCategory::Boolean,
            Value::Number(_) => ValueCategory::Number,
            Value::String(_) => ValueCategory::String,
            Value::Array(_) => ValueCategory::Array,
            Value::Object(_) => ValueCategory::Object,
        }
    }

    /// Column types a value of this category may be stored in.
    ///
    /// `Null` maps to nothing here; callers let null through before asking.
    pub fn allowed_types(self) -> &'static [ColumnType] {
        match self {
            ValueCategory::Null => &[],
            ValueCategory::Boolean => BOOLEAN_TYPES,
            ValueCategory::Number => NUMBER_TYPES,
            ValueCategory::String => STRING_TYPES,
            ValueCategory::Array | ValueCategory::Object => STRUCTURED_TYPES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueCategory::Null => "null",
            ValueCategory::Boolean => "boolean",
            ValueCategory::Number => "number",
            ValueCategory::String => "string",
            ValueCategory::Array => "array",
            ValueCategory::Object => "object",
        }
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `value` may be stored in a column of `column_type`. Null always may.
pub fn accepts(column_type: ColumnType, value: &Value) -> bool {
    let category = ValueCategory::of(value);
    category == ValueCategory::Null || category.allowed_types().contains(&column_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_type_names_round_trip() {
        let parsed: ColumnType = serde_json::from_value(json!("bigInteger")).unwrap();
        assert_eq!(parsed, ColumnType::BigInteger);
        assert_eq!(parsed.to_string(), "bigInteger");
        let parsed: ColumnType = serde_json::from_value(json!("jsonb")).unwrap();
        assert_eq!(parsed, ColumnType::Jsonb);
    }

    #[test]
    fn test_unknown_column_type_rejected() {
        assert!(serde_json::from_value::<ColumnType>(json!("varchar")).is_err());
        assert!(serde_json::from_value::<ColumnType>(json!("increments")).is_err());
    }

    #[test]
    fn test_accepts() {
        assert!(accepts(ColumnType::Integer, &json!(3)));
        assert!(accepts(ColumnType::Integer, &Value::Null));
        assert!(!accepts(ColumnType::Integer, &json!("3")));
        assert!(accepts(ColumnType::Uuid, &json!("1b4e28ba-2fa1-11d2-883f-0016d3cca427")));
        assert!(!accepts(ColumnType::Boolean, &json!(1)));
        assert!(accepts(ColumnType::Jsonb, &json!({"a": [1, 2]})));
        assert!(!accepts(ColumnType::String, &json!(["a"])));
        assert!(accepts(ColumnType::Decimal, &json!("12.50")));
    }
}
