use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EMPLOYEE_LIST_PATH: &str = "/api/employee/GetData";
pub const DEPARTMENT_LIST_PATH: &str = "/api/departement/GetData";
pub const ATTENDANCE_LIST_PATH: &str = "/api/attendance/GetData";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const ME_PATH: &str = "/api/auth/me";

/// Filters keyed by name, as held by the presentation layer before resolution.
pub type FilterMap = BTreeMap<String, FilterValue>;

/// Body of every list query sent to the data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub page: u32,
    pub per_page: u32,
    pub sort_by: Vec<String>,
    pub filter: BTreeMap<String, Value>,
}

/// A sort specification as selection widgets hand it over: one key or many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    Key(String),
    Keys(Vec<String>),
}

impl SortSpec {
    /// Sort keys as an ordered sequence; a single key becomes a one-element sequence.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Key(key) => vec![key.clone()],
            Self::Keys(keys) => keys.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Key(_) => false,
            Self::Keys(keys) => keys.is_empty(),
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::Keys(Vec::new())
    }
}

impl From<&str> for SortSpec {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<String> for SortSpec {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<Vec<String>> for SortSpec {
    fn from(value: Vec<String>) -> Self {
        Self::Keys(value)
    }
}

impl From<Vec<&str>> for SortSpec {
    fn from(value: Vec<&str>) -> Self {
        Self::Keys(value.into_iter().map(str::to_string).collect())
    }
}

/// Option produced by a selection widget: the machine value plus its display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledOption {
    pub value: Value,
    #[serde(default)]
    pub label: String,
}

impl LabeledOption {
    pub fn new(value: impl Into<Value>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Labeled(LabeledOption),
    Raw(Value),
}

impl FilterValue {
    /// The value transmitted to the server. Labeled options are unwrapped, and so
    /// is any raw object carrying a `value` key; everything else passes through.
    pub fn resolve(&self) -> Value {
        self.clone().into_resolved()
    }

    pub fn into_resolved(self) -> Value {
        match self {
            Self::Labeled(option) => option.value,
            Self::Raw(Value::Object(mut object)) if object.contains_key("value") => {
                object.remove("value").unwrap_or(Value::Null)
            }
            Self::Raw(value) => value,
        }
    }
}

impl From<LabeledOption> for FilterValue {
    fn from(value: LabeledOption) -> Self {
        Self::Labeled(value)
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Raw(Value::String(value.to_string()))
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Raw(Value::String(value))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Raw(Value::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Raw(Value::Bool(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "employeeID")]
    pub employee_id: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
