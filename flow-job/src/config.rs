use flow_core::deps::serde::{self, Deserialize, Serialize};
use flow_core::deps::{tokio, toml};
use flow_core::error::{FlowError, FlowResult};
use flow_core::template::registry::DEFAULT_TEMPLATE_TABLE;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "serde", default)]
pub struct MetaConfig {
    pub flow_table: String,
    pub datasource_table: String,
    pub template_table: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        MetaConfig {
            flow_table: "FG_FLOW".to_string(),
            datasource_table: "FG_DATASOURCE".to_string(),
            template_table: DEFAULT_TEMPLATE_TABLE.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "serde", default)]
pub struct ChannelConfig {
    /// dispatch targets to the worker pool instead of running them in order
    pub concurrency: bool,
    pub workers: usize,
    /// pending jobs per worker
    pub queue_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            concurrency: false,
            workers: 4,
            queue_size: 16,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "serde", default)]
pub struct FileConfig {
    /// root of every FILE and CSV connector
    pub home: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            home: ".".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(crate = "serde", default)]
pub struct FlowConfig {
    pub meta: MetaConfig,
    pub channel: ChannelConfig,
    pub file: FileConfig,
}

impl FlowConfig {
    pub fn from_toml_str(text: &str) -> FlowResult<Self> {
        toml::from_str(text).map_err(|e| FlowError::config(format!("invalid configuration: {}", e)))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> FlowResult<Self> {
        let path = path.as_ref();
        if false == path.exists() {
            return Err(FlowError::not_exist(path.display(), "Configuration file not found"));
        }
        let text = tokio::fs::read_to_string(path).await?;
        FlowConfig::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let config = FlowConfig::from_toml_str(
            r#"
            [channel]
            concurrency = true

            [file]
            home = "/tmp/flows"
            "#,
        )
        .expect("config");
        assert!(config.channel.concurrency);
        assert_eq!(config.channel.workers, 4);
        assert_eq!(config.file.home, "/tmp/flows");
        assert_eq!(config.meta, MetaConfig::default());
    }

    #[test]
    fn bad_values_are_config_errors() {
        let r = FlowConfig::from_toml_str("[channel]\nworkers = \"many\"");
        assert!(matches!(r, Err(FlowError::Config(_))));
    }
}
