//! The contract every data store is reached through, plus the built in
//! connectors.  Wire protocols (jdbc, ftp, sftp) live behind [sql::SqlDriver]
//! or a registered builder.
use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::handler::ProgressReporter;
use crate::rule::{FunctionProcessor, MappingRule};
use crate::sequence::Sequences;
use crate::template::DocumentTemplate;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod factory;
pub mod file;
pub mod function;
pub mod mock;
pub mod sql;

pub use factory::ConnectorFactory;

pub const JDBC: &str = "JDBC";
pub const FILE: &str = "FILE";
pub const CSV: &str = "CSV";
pub const FTP: &str = "FTP";
pub const SFTP: &str = "SFTP";
pub const MOCK: &str = "MOCK";

/// keys of a datasource definition
pub mod tags {
    pub const CONNECTOR: &str = "CONNECTOR";
    pub const URL: &str = "URL";
    pub const USER: &str = "USER";
    pub const PASSWORD: &str = "PASSWORD";
    pub const DBTYPE: &str = "DBTYPE";
    pub const NAME: &str = "NAME";
}

/// Everything a connector needs from the module that opened it.
#[derive(Clone)]
pub struct ConnectSession {
    pub module_name: String,
    pub connect_info: Map<String, Value>,
    pub sequences: Sequences,
    /// module context: `SEQUENCE`, `CONNECT_INFO` and the `CHANNEL_CONTEXT` child
    pub context: Arc<Context>,
    pub progress: ProgressReporter,
}

impl ConnectSession {
    pub fn info(&self, key: &str) -> Option<&str> {
        self.connect_info.get(key).and_then(|v| v.as_str())
    }

    /// `SEQUENCE.TARGET` with context expressions evaluated
    pub fn target(&self) -> FlowResult<String> {
        let target = self
            .sequences
            .get_str(crate::sequence::tags::TARGET)
            .ok_or_else(|| FlowError::config(format!("module {} has no TARGET", self.module_name)))?;
        Ok(self.context.evaluate(&target))
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn connector_type(&self) -> &str;

    /// templates render output of every connector except the database one
    fn set_template(&mut self, _template: Arc<DocumentTemplate>) {}

    fn function_processor(&self, db_type: &str) -> Option<Arc<dyn FunctionProcessor>>;

    async fn connect(&mut self, session: ConnectSession) -> FlowResult<()>;

    /// fails when the target resource does not exist
    async fn check(&mut self) -> FlowResult<()>;

    async fn count(&mut self) -> FlowResult<u64>;

    async fn before_read(&mut self, rule: &mut MappingRule) -> FlowResult<()>;

    async fn read(&mut self, rule: &mut MappingRule) -> FlowResult<Vec<Value>>;

    async fn read_partially(&mut self, rule: &mut MappingRule) -> FlowResult<Vec<Value>> {
        let mut buffer = Vec::new();
        self.read_buffer(rule, &mut buffer, DEFAULT_PARTIAL_READ).await?;
        Ok(buffer)
    }

    /// appends at most `limit` rows and returns how many were added
    async fn read_buffer(&mut self, rule: &mut MappingRule, buffer: &mut Vec<Value>, limit: usize) -> FlowResult<usize>;

    async fn after_read(&mut self) -> FlowResult<()>;

    async fn before_create(&mut self, rule: &mut MappingRule) -> FlowResult<()>;

    /// failures are [FlowError::Create] with the 1 based failing item offset
    async fn create(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64>;

    /// an empty slice flushes whatever is still pending
    async fn create_partially(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64>;

    async fn create_binary(&mut self, _data: &Bytes) -> FlowResult<u64> {
        Err(FlowError::Unsupported(format!(
            "{} does not accept binary data",
            self.connector_type()
        )))
    }

    async fn after_create(&mut self, rule: &mut MappingRule) -> FlowResult<()>;

    async fn update(&mut self, _rule: &mut MappingRule, _data: &Value) -> FlowResult<u64> {
        Err(FlowError::Unsupported(format!("{} update", self.connector_type())))
    }

    async fn delete(&mut self) -> FlowResult<u64>;

    async fn commit(&mut self) -> FlowResult<()>;

    async fn rollback(&mut self) -> FlowResult<()>;

    async fn close(&mut self) -> FlowResult<()>;

    fn sent(&self) -> u64;

    fn error_position(&self) -> Option<u64>;
}

pub const DEFAULT_PARTIAL_READ: usize = 3000;
