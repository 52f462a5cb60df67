//! Per module configuration ("sequence") with typed defaults.
use serde_json::{Map, Value};

/// keys recognized in a module sequence
pub mod tags {
    pub const CONNECT: &str = "CONNECT";
    pub const ACTION: &str = "ACTION";
    pub const RULE: &str = "RULE";
    pub const TEMPLATE: &str = "TEMPLATE";
    pub const CALL: &str = "CALL";
    pub const PIPE: &str = "PIPE";
    pub const TARGET: &str = "TARGET";
    pub const SQL: &str = "SQL";
    pub const CONDITION: &str = "CONDITION";
    pub const BATCHSIZE: &str = "BATCHSIZE";
    pub const BUFFERSIZE: &str = "BUFFERSIZE";
    pub const FETCHSIZE: &str = "FETCHSIZE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const DEBUG: &str = "DEBUG";
    pub const FLUSH: &str = "FLUSH";
    pub const RESULT: &str = "RESULT";
    pub const AFTER: &str = "AFTER";
    pub const BYPASS: &str = "BYPASS";
    pub const COMMIT: &str = "COMMIT";
    pub const ROLLBACK: &str = "ROLLBACK";
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequences(Map<String, Value>);

impl From<Map<String, Value>> for Sequences {
    fn from(map: Map<String, Value>) -> Self {
        Sequences(map)
    }
}

impl Sequences {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// strings as they are, numbers and booleans in their text form
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => default,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
