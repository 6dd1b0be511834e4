use keystone_schema::ColumnType;
use serde_json::Value;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Column reference through the `t` alias every statement uses.
pub(crate) fn column_ref(name: &str) -> String {
    format!("t.{}", quote_ident(name))
}

/// Server-side cast applied to a bound text parameter.
///
/// Values travel as text and are converted by PostgreSQL, so one bind type
/// serves every column type.
pub fn cast_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::String => "text",
        ColumnType::Uuid => "uuid",
        ColumnType::Date => "date",
        ColumnType::Datetime | ColumnType::Timestamp => "timestamptz",
        ColumnType::Integer => "integer",
        ColumnType::BigInteger => "bigint",
        ColumnType::Decimal => "numeric",
        ColumnType::Float => "double precision",
        ColumnType::Boolean => "boolean",
        ColumnType::Json => "json",
        ColumnType::Jsonb => "jsonb",
    }
}

/// Text form of a formatted record value. Null stays null.
pub fn bind_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Escape LIKE metacharacters so `needle` matches literally.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("tbl_User"), "\"tbl_User\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(column_ref("order"), "t.\"order\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_bind_text() {
        assert_eq!(bind_text(&Value::Null), None);
        assert_eq!(bind_text(&json!("x")), Some("x".to_string()));
        assert_eq!(bind_text(&json!(12.5)), Some("12.5".to_string()));
        assert_eq!(bind_text(&json!(false)), Some("false".to_string()));
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
