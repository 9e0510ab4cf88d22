use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use searchsync_core::predicate::{json_path, Predicate};

/// Translate `predicate` into a SQL boolean over the `data` JSON column.
///
/// Every fragment evaluates to `0` or `1`, never `NULL`, so `NOT` behaves the
/// same as the in-memory [`Predicate::matches`].
pub fn where_clause(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    match predicate {
        Predicate::All => "1".to_string(),
        Predicate::Equals { path, value: Value::Null } => {
            params.push(SqlValue::Text(json_path(path)));
            "json_extract(data, ?) IS NULL".to_string()
        }
        Predicate::Equals { path, value } => {
            let actual = scalar_at(path, params);
            params.push(to_sql(value));
            format!("IFNULL({actual} = ?, 0)")
        }
        Predicate::In { values, .. } if values.is_empty() => "0".to_string(),
        Predicate::In { path, values } => {
            let mut sql = format!("IFNULL({} IN (", scalar_at(path, params));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push('?');
                params.push(to_sql(value));
            }
            sql.push_str("), 0)");
            sql
        }
        Predicate::Not(inner) => format!("NOT ({})", where_clause(inner, params)),
        Predicate::And(items) => join(items, " AND ", "1", params),
        Predicate::Or(items) => join(items, " OR ", "0", params),
    }
}

/// The value at `path`, or `NULL` when it holds an array or object.
/// `json_extract` would return those as JSON text, which a string value could equal.
fn scalar_at(path: &str, params: &mut Vec<SqlValue>) -> &'static str {
    params.push(SqlValue::Text(json_path(path)));
    params.push(SqlValue::Text(json_path(path)));
    "(CASE WHEN json_type(data, ?) IN ('array', 'object') THEN NULL ELSE json_extract(data, ?) END)"
}

fn join(items: &[Predicate], op: &str, empty: &str, params: &mut Vec<SqlValue>) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = items.iter().map(|p| format!("({})", where_clause(p, params))).collect();
    parts.join(op)
}

/// JSON scalar to a bind value; booleans become `1`/`0` like `json_extract` returns them.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
