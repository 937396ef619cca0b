use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(EmployeeKey);
id_newtype!(DepartmentKey);
id_newtype!(AttendanceKey);

/// The signed-in employee as reported by the session endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: EmployeeKey,
    #[serde(rename = "employeeID")]
    pub employee_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRow {
    pub id: EmployeeKey,
    pub employee_id: String,
    pub department_id: DepartmentKey,
    pub department_name: String,
    pub name: String,
    pub address: String,
}

impl EmployeeRow {
    pub fn from_raw(raw: Value) -> Self {
        Self {
            id: EmployeeKey(text(&raw, "id")),
            employee_id: text(&raw, "employeeID"),
            department_id: DepartmentKey(text(&raw, "departementID")),
            department_name: text(&raw, "departementName"),
            name: text(&raw, "name"),
            address: text(&raw, "address"),
        }
    }

    pub fn display_name(&self) -> String {
        if self.employee_id.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.employee_id, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentRow {
    pub id: DepartmentKey,
    pub name: String,
    /// `HH:MM:SS` wall-clock limit, empty when the service sent none.
    pub max_clock_in_time: String,
    pub max_clock_out_time: String,
}

impl DepartmentRow {
    pub fn from_raw(raw: Value) -> Self {
        Self {
            id: DepartmentKey(text(&raw, "id")),
            name: text(&raw, "departementName"),
            max_clock_in_time: clock_time(&raw, "maxClockInTime"),
            max_clock_out_time: clock_time(&raw, "maxClockOutTime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRow {
    pub id: AttendanceKey,
    pub employee_id: String,
    pub employee_name: String,
    pub department_name: String,
    pub clock: Option<DateTime<Utc>>,
    pub max_clock: String,
    pub date_attendance: Option<NaiveDate>,
    pub description: String,
    pub status: String,
    pub attendance_type: String,
}

impl AttendanceRow {
    pub fn from_raw(raw: Value) -> Self {
        Self {
            id: AttendanceKey(text(&raw, "id")),
            employee_id: text(&raw, "employeeID"),
            employee_name: text(&raw, "employeeName"),
            department_name: text(&raw, "departementName"),
            clock: timestamp(&raw, "clock"),
            max_clock: text(&raw, "maxClock"),
            date_attendance: timestamp(&raw, "dateAttendance").map(|value| value.date_naive()),
            description: text(&raw, "description"),
            status: text(&raw, "status"),
            attendance_type: text(&raw, "attendanceType"),
        }
    }
}

fn text(raw: &Value, key: &str) -> String {
    match raw.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn timestamp(raw: &Value, key: &str) -> Option<DateTime<Utc>> {
    let value = raw.get(key)?.as_str()?;
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn clock_time(raw: &Value, key: &str) -> String {
    match timestamp(raw, key) {
        Some(value) => value.format("%H:%M:%S").to_string(),
        None => text(raw, key),
    }
}
