use serde_json::Value;

/// Characters that make spreadsheet software treat a cell as a formula (or
/// split it into one when the sheet is exported and re-imported).
const FORMULA_TRIGGERS: [char; 7] = ['=', '+', '-', '@', '\t', '\r', '\n'];

/// Neutralize formula injection by prefixing a single quote to any value
/// that starts with a trigger character. Everything else passes through.
pub fn sanitize_cell(value: &str) -> String {
    match value.chars().next() {
        Some(first) if FORMULA_TRIGGERS.contains(&first) => format!("'{}", value),
        _ => value.to_string(),
    }
}

/// Sanitize a cell destined for the sheet. Only strings are touched; numbers
/// and booleans are written as typed values.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_cell(&s)),
        other => other,
    }
}

pub fn sanitize_row(row: Vec<Value>) -> Vec<Value> {
    row.into_iter().map(sanitize_value).collect()
}
