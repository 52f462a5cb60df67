//! One step of a flow: a connector, a mapping rule and the module's sequence,
//! driven through `process_before`, `process` (or the partial pair used by a
//! pipe-join) and `process_after`.
use crate::env::FlowEnv;
use flow_core::carrier::Chunk;
use flow_core::connector::{tags, ConnectSession, Connector, JDBC};
use flow_core::context::{keys, Context};
use flow_core::deps::{chrono, log, uuid};
use flow_core::error::{FlowError, FlowResult};
use flow_core::handler::{HandlerTarget, ModuleStatus, ProgressReporter, Step};
use flow_core::meta::read_data;
use flow_core::rule::MappingRule;
use flow_core::sequence::{tags as seq, Sequences};
use flow_core::stream::{FlowStream, Payload, END_OF_STREAM};
use flow_core::template::registry::builtin_for_connector;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod actions {
    pub const CHECK: &str = "CHECK";
    pub const COUNT: &str = "COUNT";
    pub const READ: &str = "READ";
    pub const CREATE: &str = "CREATE";
    pub const DELETE: &str = "DELETE";
}

pub const SUCCESS: &str = "success";
pub const FAIL: &str = "fail";

/// value of `RESULT` that hands a read to the next module
pub const BYPASS: &str = "BYPASS";

/// What a module borrows from the flow running it.
pub struct ModuleScope<'a> {
    pub env: &'a FlowEnv,
    pub flow_id: &'a str,
    pub context: &'a Context,
    /// `RULE` section of the flow definition
    pub rules: &'a Map<String, Value>,
}

pub struct Module {
    id: String,
    name: String,
    sequences: Sequences,
    action: String,
    connector: Option<Box<dyn Connector>>,
    connect_info: Map<String, Value>,
    rule: MappingRule,
    context: Arc<Context>,
    progress: Arc<AtomicU64>,
    batch_size: usize,
    buffer_size: usize,
    result: Option<String>,
    message: String,
}

impl Module {
    pub fn new<N: Into<String>>(name: N, sequences: Sequences) -> Self {
        let action = sequences.get_str_or(seq::ACTION, "").to_ascii_uppercase();
        Module {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            action,
            batch_size: sequences.get_int_or(seq::BATCHSIZE, 1).max(1) as usize,
            buffer_size: sequences.get_int_or(seq::BUFFERSIZE, 1).max(1) as usize,
            sequences,
            connector: None,
            connect_info: Map::new(),
            rule: MappingRule::new(),
            context: Arc::new(Context::new()),
            progress: Arc::new(AtomicU64::new(0)),
            result: None,
            message: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn sequences(&self) -> &Sequences {
        &self.sequences
    }

    pub fn rule_mut(&mut self) -> &mut MappingRule {
        &mut self.rule
    }

    /// module context built by `process_before`
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn pipe(&self) -> Option<String> {
        self.sequences.get_str(seq::PIPE).filter(|p| !p.is_empty())
    }

    pub fn is_bypass(&self) -> bool {
        self.sequences
            .get_str(seq::RESULT)
            .map(|r| r.eq_ignore_ascii_case(BYPASS))
            .unwrap_or(false)
    }

    fn debug(&self) -> bool {
        self.sequences.get_bool_or(seq::DEBUG, false)
    }

    pub fn status(&self, flow_id: &str) -> ModuleStatus {
        ModuleStatus {
            flow_id: flow_id.to_string(),
            module_id: self.id.clone(),
            name: self.name.clone(),
            progress: self.progress(),
            result: self.result.clone(),
            message: self.message.clone(),
        }
    }

    fn record<T>(&mut self, outcome: FlowResult<T>) -> FlowResult<T> {
        if let Err(e) = &outcome {
            log::error!("module {} failed: {}", self.name, e);
            self.result = Some(FAIL.to_string());
            self.message = e.to_string();
        }
        outcome
    }

    /// Binds the connector and runs the setup of the module's action.  A dry
    /// run stops before connecting.
    pub async fn process_before(&mut self, scope: &ModuleScope<'_>, dry_run: bool) -> FlowResult<()> {
        self.result = None;
        self.message.clear();
        self.connector = None;
        self.progress.store(0, Ordering::SeqCst);
        let outcome = self.before(scope, dry_run).await;
        if false == dry_run {
            let status = self.status(scope.flow_id);
            scope
                .env
                .handlers
                .handle(Step::ModuleIn, &self.context, HandlerTarget::Module(&status));
        }
        self.record(outcome)
    }

    async fn resolve_connect_info(&self, scope: &ModuleScope<'_>) -> FlowResult<Option<Map<String, Value>>> {
        match self.sequences.get(seq::CONNECT) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(inline)) => Ok(Some(inline.clone())),
            Some(Value::String(name)) => {
                let table = &scope.env.config.meta.datasource_table;
                Ok(Some(read_data(scope.env.meta.as_ref(), table, name).await?))
            }
            Some(other) => Err(FlowError::config(format!(
                "CONNECT of {} must be a datasource name or object, found {}",
                self.name, other
            ))),
        }
    }

    fn resolve_rule(&self, scope: &ModuleScope<'_>) -> FlowResult<MappingRule> {
        let name = match self.sequences.get_str(seq::RULE) {
            Some(name) => name,
            None => return Ok(MappingRule::new()),
        };
        match scope.rules.get(&name) {
            Some(Value::Object(rules)) => MappingRule::from_map(rules),
            _ => Err(FlowError::not_exist(&name, format!("rule of module {} not found", self.name))),
        }
    }

    async fn before(&mut self, scope: &ModuleScope<'_>, dry_run: bool) -> FlowResult<()> {
        let info = match self.resolve_connect_info(scope).await? {
            Some(info) => info,
            None => {
                log::info!("module {} has no CONNECT and is skipped", self.name);
                self.context = Arc::new(scope.context.clone());
                return Ok(());
            }
        };

        let mut context = scope.context.clone();
        context.add(keys::SEQUENCE, self.sequences.to_value());
        context.add(keys::CONNECT_INFO, Value::Object(info.clone()));
        context.add(keys::MODULE_START_TIME, chrono::Local::now().to_rfc3339());
        self.context = Arc::new(context);
        self.connect_info = info;

        let mut rule = self.resolve_rule(scope)?;
        let mut connector = scope.env.connectors.create(&self.connect_info)?;
        let kind = connector.connector_type().to_string();
        if kind != JDBC {
            let template_name = self.sequences.get_str(seq::TEMPLATE);
            let template = scope
                .env
                .templates
                .get(template_name.as_deref(), builtin_for_connector(&kind))
                .await?;
            connector.set_template(template);
        }
        let db_type = self
            .connect_info
            .get(tags::DBTYPE)
            .and_then(|d| d.as_str())
            .unwrap_or("oracle")
            .to_string();
        rule.set_function_processor(connector.function_processor(&db_type));
        self.rule = rule;
        if self.debug() {
            log::info!("module {} rule {:?}", self.name, self.rule);
        }

        if dry_run {
            self.connector = Some(connector);
            return Ok(());
        }

        let status = self.status(scope.flow_id);
        let session = ConnectSession {
            module_name: self.name.clone(),
            connect_info: self.connect_info.clone(),
            sequences: self.sequences.clone(),
            context: self.context.clone(),
            progress: ProgressReporter::new(
                scope.env.handlers.clone(),
                self.context.clone(),
                status,
                self.progress.clone(),
            ),
        };
        connector.connect(session).await?;
        self.connector = Some(connector);

        let rule = &mut self.rule;
        let connector = match self.connector.as_mut() {
            Some(c) => c,
            None => return Ok(()),
        };
        match self.action.as_str() {
            actions::CHECK => connector.check().await?,
            actions::COUNT => {
                let count = connector.count().await?;
                self.message = count.to_string();
            }
            actions::READ => connector.before_read(rule).await?,
            actions::CREATE => connector.before_create(rule).await?,
            actions::DELETE => {
                let removed = connector.delete().await?;
                connector.commit().await?;
                self.message = removed.to_string();
                self.result = Some(SUCCESS.to_string());
            }
            other => {
                return Err(FlowError::config(format!(
                    "unknown ACTION {:?} in module {}",
                    other, self.name
                )))
            }
        }
        Ok(())
    }

    /// Runs the whole action.  A READ returns what it read; a CREATE drains
    /// `input` in batches of `BATCHSIZE`.
    pub async fn process(&mut self, input: Option<&mut Box<dyn FlowStream>>) -> FlowResult<Option<Vec<Value>>> {
        if self.connector.is_none() {
            return Ok(None);
        }
        let outcome = match self.action.as_str() {
            actions::READ => self.read_all().await.map(Some),
            actions::CREATE => match input {
                Some(stream) => self.create_from(stream).await.map(|_| None),
                None => Err(FlowError::config(format!("module {} has no input to create from", self.name))),
            },
            _ => Ok(None),
        };
        self.record(outcome)
    }

    async fn read_all(&mut self) -> FlowResult<Vec<Value>> {
        let rule = &mut self.rule;
        let connector = match self.connector.as_mut() {
            Some(c) => c,
            None => return Ok(vec![]),
        };
        let rows = connector.read(rule).await?;
        connector.after_read().await?;
        Ok(rows)
    }

    async fn create_from(&mut self, stream: &mut Box<dyn FlowStream>) -> FlowResult<()> {
        let batch_size = self.batch_size;
        let rule = &mut self.rule;
        let connector = match self.connector.as_mut() {
            Some(c) => c,
            None => return Ok(()),
        };
        // an earlier module may have drained the same input
        stream.reset();
        let mut payload = stream.subscribe();
        let outcome = create_batches(stream, &mut payload, connector, rule, batch_size).await;
        stream.unsubscribe(payload);
        outcome?;
        connector.after_create(rule).await
    }

    /// Source side of a pipe-join reads up to `BUFFERSIZE` rows into
    /// `buffer`; sink side writes the buffer.
    pub async fn process_partially(&mut self, buffer: &mut Vec<Value>) -> FlowResult<usize> {
        let buffer_size = self.buffer_size;
        let action = self.action.clone();
        let rule = &mut self.rule;
        let outcome = match self.connector.as_mut() {
            None => Ok(0),
            Some(connector) => match action.as_str() {
                actions::READ => connector.read_buffer(rule, buffer, buffer_size).await,
                actions::CREATE => connector.create_partially(buffer, rule).await.map(|n| n as usize),
                other => Err(FlowError::Unsupported(format!("{} cannot be joined", other))),
            },
        };
        self.record(outcome)
    }

    /// sends whatever the sink of a pipe-join still holds
    pub async fn flush_partially(&mut self) -> FlowResult<()> {
        let rule = &mut self.rule;
        let outcome = match (self.action.as_str(), self.connector.as_mut()) {
            (actions::CREATE, Some(connector)) => {
                match connector.create_partially(&[], rule).await {
                    Ok(_) => connector.after_create(rule).await,
                    Err(e) => Err(e),
                }
            }
            (actions::READ, Some(connector)) => connector.after_read().await,
            _ => Ok(()),
        };
        self.record(outcome)
    }

    /// Finishes the module whatever happened before: a CREATE commits (or
    /// follows `AFTER`) when the hop succeeded and rolls back otherwise, and
    /// the connector is always closed.  Returns the declared successor.
    pub async fn process_after(&mut self, scope: &ModuleScope<'_>, succeeded: bool) -> FlowResult<Option<String>> {
        let mut outcome = Ok(());
        if let Some(mut connector) = self.connector.take() {
            let failed = false == succeeded || self.result.as_deref() == Some(FAIL);
            if self.action == actions::CREATE {
                if failed {
                    if let Err(e) = connector.rollback().await {
                        log::error!("rollback of {} failed: {}", self.name, e);
                    }
                } else {
                    let after = self.sequences.get_str_or(seq::AFTER, seq::COMMIT);
                    outcome = if after.eq_ignore_ascii_case(seq::ROLLBACK) {
                        connector.rollback().await
                    } else {
                        connector.commit().await
                    };
                }
            }
            if let Err(e) = connector.close().await {
                log::error!("closing {} failed: {}", self.name, e);
            }
            if self.action == actions::CREATE || self.action == actions::READ {
                if self.message.is_empty() {
                    self.message = connector.sent().max(self.progress()).to_string();
                }
            }
        }
        outcome = self.record(outcome);
        if self.result.is_none() {
            self.result = Some(if succeeded { SUCCESS } else { FAIL }.to_string());
        }

        let status = self.status(scope.flow_id);
        scope
            .env
            .handlers
            .handle(Step::ModuleOut, &self.context, HandlerTarget::Module(&status));
        outcome.map(|_| self.sequences.get_str(seq::CALL).filter(|c| !c.is_empty()))
    }

    /// Closes a connector opened by a dry run without touching the store.
    pub(crate) fn discard(&mut self) {
        self.connector = None;
    }
}

/// Writes everything `payload` receives, `batch_size` rows per call.
async fn create_batches(
    stream: &mut Box<dyn FlowStream>,
    payload: &mut Payload,
    connector: &mut Box<dyn Connector>,
    rule: &mut MappingRule,
    batch_size: usize,
) -> FlowResult<()> {
    let mut rows: Vec<Value> = Vec::with_capacity(batch_size);
    loop {
        let n = stream.next(payload)?;
        if n == END_OF_STREAM {
            break;
        }
        match payload.data() {
            Some(Chunk::Bytes(bytes)) => {
                let bytes = bytes.clone();
                connector.create_binary(&bytes).await?;
            }
            Some(Chunk::Items(items)) => {
                rows.extend(items.iter().cloned());
                while rows.len() >= batch_size {
                    let rest = rows.split_off(batch_size);
                    connector.create(&rows, rule).await?;
                    rows = rest;
                }
            }
            None => {}
        }
    }
    if !rows.is_empty() {
        connector.create(&rows, rule).await?;
    }
    Ok(())
}
