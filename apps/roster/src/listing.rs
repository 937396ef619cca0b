use anyhow::{anyhow, Result};
use serde_json::Value;
use shared::{
    domain::{AttendanceRow, DepartmentRow, EmployeeRow},
    protocol::{FilterMap, FilterValue},
};

/// `key=value`; the value is read as JSON when it parses, otherwise kept as text.
pub fn parse_filter(raw: &str) -> Result<(String, FilterValue)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("filter '{raw}' is not in key=value form"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("filter '{raw}' has an empty key"));
    }
    let value = serde_json::from_str::<Value>(value.trim())
        .unwrap_or_else(|_| Value::String(value.trim().to_string()));
    Ok((key.to_string(), FilterValue::from(value)))
}

pub fn parse_filters(raw: &[String]) -> Result<FilterMap> {
    raw.iter().map(|entry| parse_filter(entry)).collect()
}

pub fn employee_line(row: &EmployeeRow) -> String {
    format!(
        "{:<28} {:<16} {}",
        row.display_name(),
        row.department_name,
        row.address
    )
}

pub fn department_line(row: &DepartmentRow) -> String {
    format!(
        "{:<24} in by {:<8} out by {}",
        row.name,
        or_dash(&row.max_clock_in_time),
        or_dash(&row.max_clock_out_time)
    )
}

pub fn attendance_line(row: &AttendanceRow) -> String {
    let date = row
        .date_attendance
        .map(|date| date.to_string())
        .unwrap_or_else(|| "-".into());
    let clock = row
        .clock
        .map(|clock| clock.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{date} {clock} {:<10} {:<20} {:<10} {}",
        row.employee_id,
        row.employee_name,
        or_dash(&row.attendance_type),
        or_dash(&row.status)
    )
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
