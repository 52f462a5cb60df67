//! Lookup of flow, datasource and template definitions.  Every record is an
//! object whose `DATA` field holds the definition.
use crate::deps::log;
use crate::error::{FlowError, FlowResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const DATA: &str = "DATA";

#[async_trait]
pub trait MetaSource: Send + Sync {
    async fn read(&self, table: &str, key: &str) -> FlowResult<Option<Value>>;
}

/// the `DATA` object of a record
pub fn data_of(record: &Value) -> Option<&Map<String, Value>> {
    record.get(DATA).and_then(|d| d.as_object())
}

/// Reads a record and returns its `DATA`, failing when either is missing.
pub async fn read_data(meta: &dyn MetaSource, table: &str, key: &str) -> FlowResult<Map<String, Value>> {
    let record = meta
        .read(table, key)
        .await?
        .ok_or_else(|| FlowError::not_exist(format!("{}/{}", table, key), "No such record"))?;
    data_of(&record)
        .cloned()
        .ok_or_else(|| FlowError::not_exist(format!("{}/{}", table, key), "Record has no DATA"))
}

#[derive(Clone, Default)]
pub struct MemoryMetaSource {
    tables: Arc<Mutex<HashMap<String, HashMap<String, Value>>>>,
}

impl MemoryMetaSource {
    pub fn new() -> Self {
        MemoryMetaSource::default()
    }

    /// stores `data` wrapped in a record
    pub fn insert<T: Into<String>, K: Into<String>>(&self, table: T, key: K, data: Value) {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        tables
            .entry(table.into())
            .or_insert_with(HashMap::new)
            .insert(key.into(), json!({ DATA: data }));
    }
}

#[async_trait]
impl MetaSource for MemoryMetaSource {
    async fn read(&self, table: &str, key: &str) -> FlowResult<Option<Value>> {
        let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }
}

/// Records stored as `home/<table>/<key>.json`
pub struct FsMetaSource {
    pub home: String,
}

impl FsMetaSource {
    pub fn new<H: Into<String>>(home: H) -> Self {
        FsMetaSource { home: home.into() }
    }

    pub async fn write(&self, table: &str, key: &str, record: &Value) -> FlowResult<()> {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;
        let folder = Path::new(&self.home).join(table);
        tokio::fs::create_dir_all(&folder).await?;
        let full_path = folder.join(format!("{}.json", key));
        log::info!("Writing to file {:?}", &full_path);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&full_path)
            .await?;
        let content = serde_json::to_vec_pretty(record)?;
        match file.write_all(&content).await {
            Ok(()) => Ok(()),
            Err(err) => Err(FlowError::FatalIO(err.to_string())),
        }
    }
}

#[async_trait]
impl MetaSource for FsMetaSource {
    async fn read(&self, table: &str, key: &str) -> FlowResult<Option<Value>> {
        let p = Path::new(&self.home).join(table).join(format!("{}.json", key));
        if false == p.exists() {
            log::debug!("{:?} does not exist", p);
            return Ok(None);
        }
        let contents = tokio::fs::read(&p).await?;
        let record: Value = serde_json::from_slice(&contents)?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn fs_records_round_trip() {
        let home = std::env::temp_dir().join(format!("flow-meta-{}", uuid::Uuid::new_v4()));
        let meta = FsMetaSource::new(home.display().to_string());
        let record = json!({ DATA: { "CONNECTOR": "MOCK", "BATCHSIZE": 10 } });
        meta.write("FG_DATASOURCE", "DB1", &record).await.expect("write");

        assert_eq!(meta.read("FG_DATASOURCE", "DB1").await.expect("read"), Some(record));
        let data = read_data(&meta, "FG_DATASOURCE", "DB1").await.expect("data");
        assert_eq!(data.get("CONNECTOR"), Some(&json!("MOCK")));

        assert_eq!(meta.read("FG_DATASOURCE", "NOPE").await.expect("read"), None);
        assert!(matches!(
            read_data(&meta, "FG_DATASOURCE", "NOPE").await,
            Err(FlowError::NotExist { .. })
        ));
        let _ = std::fs::remove_dir_all(home);
    }
}
