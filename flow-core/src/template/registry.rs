use super::render::DocumentTemplate;
use crate::deps::log;
use crate::error::{FlowError, FlowResult};
use crate::meta::{read_data, MetaSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const DEFAULT_TEMPLATE_TABLE: &str = "FG_TEMPLATE";

/// template text shipped with the crate, by name
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "JSON" => Some(include_str!("builtin/JSON.template")),
        "CSV" => Some(include_str!("builtin/CSV.template")),
        _ => None,
    }
}

/// built in template used when a connector has no named template
pub fn builtin_for_connector(connector_type: &str) -> &'static str {
    match connector_type {
        "CSV" => "CSV",
        // FILE, FTP and SFTP
        _ => "JSON",
    }
}

/// Compiled templates keyed by name.  Named templates come from the template
/// table (field `TEMPLATE`), unnamed ones from the built in set.
pub struct TemplateRegistry {
    meta: Option<Arc<dyn MetaSource>>,
    table: String,
    cache: Mutex<HashMap<String, Arc<DocumentTemplate>>>,
}

impl TemplateRegistry {
    pub fn new(meta: Option<Arc<dyn MetaSource>>, table: &str) -> Self {
        TemplateRegistry {
            meta,
            table: table.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<DocumentTemplate>> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(key).cloned()
    }

    pub async fn get(&self, name: Option<&str>, builtin_name: &str) -> FlowResult<Arc<DocumentTemplate>> {
        let name = name.unwrap_or("");
        // unnamed templates are cached under their built in name
        let key = if name.is_empty() {
            format!("builtin:{}", builtin_name)
        } else {
            name.to_string()
        };
        if let Some(t) = self.cached(&key) {
            return Ok(t);
        }

        let template = if name.is_empty() {
            let text = builtin(builtin_name).ok_or_else(|| {
                FlowError::not_exist(builtin_name, "Built-in template not found")
            })?;
            DocumentTemplate::parse(text)?
        } else {
            let meta = self
                .meta
                .as_ref()
                .ok_or_else(|| FlowError::config("no metadata source for named templates"))?;
            let data = read_data(meta.as_ref(), &self.table, name).await?;
            let text = data
                .get("TEMPLATE")
                .and_then(|t| t.as_str())
                .ok_or_else(|| FlowError::not_exist(name, "Template has no TEMPLATE field"))?;
            DocumentTemplate::parse(text)?
        };
        log::debug!("Compiled template {}", key);

        let template = Arc::new(template);
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        Ok(cache.entry(key).or_insert(template).clone())
    }

    /// drops a cached template so the next `get` reloads it
    pub fn evict(&self, name: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.remove(name);
    }
}
