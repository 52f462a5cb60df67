use crate::config::FlowConfig;
use flow_core::connector::ConnectorFactory;
use flow_core::handler::{HandlerManager, LogHandler};
use flow_core::meta::MetaSource;
use flow_core::template::TemplateRegistry;
use std::sync::Arc;

/// Everything shared by the flows of one runtime.
pub struct FlowEnv {
    pub config: FlowConfig,
    pub meta: Arc<dyn MetaSource>,
    pub connectors: ConnectorFactory,
    pub templates: TemplateRegistry,
    pub handlers: Arc<HandlerManager>,
}

impl FlowEnv {
    /// starts with the logging handler registered as `log`
    pub fn new(config: FlowConfig, meta: Arc<dyn MetaSource>) -> Self {
        let handlers = Arc::new(HandlerManager::new());
        handlers.add("log", Arc::new(LogHandler::new()));
        FlowEnv {
            connectors: ConnectorFactory::new(&config.file.home),
            templates: TemplateRegistry::new(Some(meta.clone()), &config.meta.template_table),
            meta,
            handlers,
            config,
        }
    }
}
