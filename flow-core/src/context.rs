use crate::deps::log;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// well known context keys
pub mod keys {
    pub const CHANNEL_ID: &str = "CHANNEL_ID";
    pub const CHANNEL_CONTEXT: &str = "CHANNEL_CONTEXT";
    pub const REQUEST_PARAMS: &str = "REQUEST_PARAMS";
    pub const REQUEST_BODY: &str = "REQUEST_BODY";
    pub const HTTP_REQUEST_METHOD: &str = "HTTP_REQUEST_METHOD";
    pub const ITEM: &str = "ITEM";
    pub const SEQUENCE: &str = "SEQUENCE";
    pub const CONNECT_INFO: &str = "CONNECT_INFO";
    pub const FLOW_START_TIME: &str = "FLOW_START_TIME";
    pub const MODULE_START_TIME: &str = "MODULE_START_TIME";
    pub const LATEST_RESULT: &str = "LATEST_RESULT";
    pub const LATEST_MSG: &str = "LATEST_MSG";
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^\s{}]+\}").expect("placeholder regex"))
}

/// String form of a json value the way it is substituted into text.  `null`
/// has no string form.
pub fn stringify(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A tree of values addressed by dotted paths, e.g. `CHANNEL_CONTEXT.REQUEST_PARAMS.entry`.
/// Child contexts are shared so a module context can see the channel context
/// without copying it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    map: Map<String, Value>,
    children: HashMap<String, Arc<Context>>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Context {
            map,
            children: HashMap::new(),
        }
    }

    pub fn add<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.map.insert(key.into(), value.into());
    }

    pub fn add_child<K: Into<String>>(&mut self, key: K, child: Arc<Context>) {
        self.children.insert(key.into(), child);
    }

    pub fn child(&self, key: &str) -> Option<&Arc<Context>> {
        self.children.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn map(&self) -> &Map<String, Value> {
        &self.map
    }

    /// A key containing dots is first tried verbatim, then walked through
    /// child contexts, objects and arrays.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.map.get(path) {
            return Some(v);
        }
        let (head, rest) = path.split_once('.')?;
        if let Some(child) = self.children.get(head) {
            return child.get(rest);
        }
        let mut current = self.map.get(head)?;
        for part in rest.split('.') {
            current = match current {
                Value::Object(m) => m.get(part)?,
                Value::Array(list) => list.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).and_then(stringify)
    }

    pub fn get_string_or(&self, path: &str, default: &str) -> String {
        self.get_string(path).unwrap_or_else(|| default.to_string())
    }

    /// Replaces every `{dotted.path}` with its value.  Nested expressions like
    /// `{SEQUENCE.{INOUT}}` are not supported; unknown keys stay as they are.
    pub fn evaluate(&self, text: &str) -> String {
        if !text.contains('{') {
            return text.to_string();
        }
        placeholder()
            .replace_all(text, |caps: &Captures| {
                let found = &caps[0];
                let key = &found[1..found.len() - 1];
                match self.get_string(key) {
                    Some(v) => v,
                    None => {
                        log::error!("{} is wrong expression.", found);
                        found.to_string()
                    }
                }
            })
            .into_owned()
    }

    /// flattens the children into a single json object
    pub fn to_value(&self) -> Value {
        let mut map = self.map.clone();
        for (k, child) in self.children.iter() {
            map.insert(k.clone(), child.to_value());
        }
        Value::Object(map)
    }
}
