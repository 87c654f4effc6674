use super::{Comma, Flavor, Params, ToSql};

use quarry_core::stmt::Value;

/// Renders a value inline as a SQL literal.
impl ToSql for &Value {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match self {
            Value::Bool(value) => {
                let text = match (f.serializer.capability.native_bool, value) {
                    (true, true) => "TRUE",
                    (true, false) => "FALSE",
                    (false, true) => "1",
                    (false, false) => "0",
                };
                fmt!(f, text);
            }
            Value::I32(value) => fmt!(f, i64::from(*value)),
            Value::I64(value) => fmt!(f, *value),
            Value::F64(value) => f.dst.push_str(&format!("{value:?}")),
            Value::String(value) => string_literal(value, f),
            Value::Uuid(value) => string_literal(&value.to_string(), f),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                match f.flavor() {
                    Flavor::Sqlite | Flavor::Mysql => fmt!(f, "X'" hex.as_str() "'"),
                    Flavor::SqlServer => fmt!(f, "0x" hex.as_str()),
                    Flavor::Postgresql => fmt!(f, "'\\x" hex.as_str() "'"),
                }
            }
            Value::List(values) => fmt!(f, "(" Comma(values) ")"),
            Value::Record(record) => fmt!(f, "(" Comma(&record.fields) ")"),
            Value::Null => fmt!(f, "NULL"),
        }
    }
}

fn string_literal<P: Params>(value: &str, f: &mut super::Formatter<'_, P>) {
    if f.serializer.is_sqlserver() {
        f.dst.push('N');
    }
    f.dst.push('\'');
    for c in value.chars() {
        if c == '\'' {
            f.dst.push('\'');
        }
        f.dst.push(c);
    }
    f.dst.push('\'');
}
