//! Turns whatever envelope a list endpoint returns into rows plus a total.

use serde_json::Value;

/// Row sources in order of preference; the first one holding an array wins.
const ROW_SOURCES: [&str; 2] = ["data", "items"];

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPage<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

impl<T> Default for NormalizedPage<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
        }
    }
}

/// Never fails: bodies of unexpected shape produce an empty page.
pub fn normalize<T>(mut body: Value, row_transform: impl Fn(Value) -> T) -> NormalizedPage<T> {
    let reported_total = meta_total(&body);
    let rows = take_rows(&mut body);
    let total_count = reported_total.unwrap_or(rows.len() as u64);

    NormalizedPage {
        items: rows.into_iter().map(row_transform).collect(),
        total_count,
    }
}

fn take_rows(body: &mut Value) -> Vec<Value> {
    let Some(object) = body.as_object_mut() else {
        return Vec::new();
    };
    for key in ROW_SOURCES {
        if let Some(Value::Array(rows)) = object.get_mut(key) {
            return std::mem::take(rows);
        }
    }
    Vec::new()
}

fn meta_total(body: &Value) -> Option<u64> {
    match body.pointer("/meta/total")? {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|total| *total >= 0.0 && total.fract() == 0.0)
                .map(|total| total as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
