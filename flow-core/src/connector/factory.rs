use super::file::FileConnector;
use super::mock::{MockConnector, MockTables};
use super::sql::{SqlConnector, SqlDriver};
use super::{tags, Connector, CSV, FILE, JDBC, MOCK};
use crate::error::{FlowError, FlowResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

pub type ConnectorBuilder = Arc<dyn Fn() -> Box<dyn Connector> + Send + Sync>;

/// Builds connectors by the `CONNECTOR` field of a datasource.  `FILE`, `CSV`
/// and `MOCK` are always available; `JDBC`, `FTP` and `SFTP` need a registered
/// builder.
pub struct ConnectorFactory {
    builders: RwLock<HashMap<String, ConnectorBuilder>>,
    mock_tables: MockTables,
}

impl ConnectorFactory {
    pub fn new<P: Into<PathBuf>>(file_home: P) -> Self {
        let home = file_home.into();
        let factory = ConnectorFactory {
            builders: RwLock::new(HashMap::new()),
            mock_tables: MockTables::default(),
        };
        let file_home = home.clone();
        factory.register(FILE, Arc::new(move || Box::new(FileConnector::new(file_home.clone())) as Box<dyn Connector>));
        factory.register(CSV, Arc::new(move || Box::new(FileConnector::csv(home.clone())) as Box<dyn Connector>));
        let tables = factory.mock_tables.clone();
        factory.register(MOCK, Arc::new(move || Box::new(MockConnector::new(tables.clone())) as Box<dyn Connector>));
        factory
    }

    /// replaces the builder of the same type
    pub fn register(&self, connector_type: &str, builder: ConnectorBuilder) {
        let mut builders = self.builders.write().unwrap_or_else(|p| p.into_inner());
        builders.insert(connector_type.to_ascii_uppercase(), builder);
    }

    pub fn register_sql_driver(&self, driver: Arc<dyn SqlDriver>) {
        self.register(
            JDBC,
            Arc::new(move || Box::new(SqlConnector::new(driver.clone())) as Box<dyn Connector>),
        );
    }

    /// store behind every `MOCK` connector
    pub fn mock_tables(&self) -> MockTables {
        self.mock_tables.clone()
    }

    pub fn create(&self, connect_info: &Map<String, Value>) -> FlowResult<Box<dyn Connector>> {
        let kind = connect_info
            .get(tags::CONNECTOR)
            .and_then(|c| c.as_str())
            .ok_or_else(|| FlowError::config("datasource has no CONNECTOR"))?
            .to_ascii_uppercase();
        let builders = self.builders.read().unwrap_or_else(|p| p.into_inner());
        match builders.get(&kind) {
            Some(build) => Ok(build()),
            None => Err(FlowError::Unsupported(format!("{} connector is not registered", kind))),
        }
    }
}
