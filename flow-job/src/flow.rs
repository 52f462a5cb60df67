use crate::env::FlowEnv;
use crate::module::{actions, Module, ModuleScope, FAIL, SUCCESS};
use flow_core::carrier::{ContainerCarrier, ListCarrier, DEFAULT_DATA_TAG};
use flow_core::connector::sql::{bind_params, build_insert_sql};
use flow_core::context::{keys, Context};
use flow_core::deps::{chrono, log, uuid};
use flow_core::error::{FlowError, FlowResult};
use flow_core::handler::{FlowStatus, HandlerTarget, Step};
use flow_core::meta::{read_data, MetaSource};
use flow_core::sequence::{tags as seq, Sequences};
use flow_core::stream::{FanOutStream, FlowStream};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// keys of a flow definition
pub mod tags {
    pub const ENTRY: &str = "ENTRY";
    pub const MODULE: &str = "MODULE";
    pub const RULE: &str = "RULE";
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowDefinition {
    /// a module name, or module names keyed by request method
    pub entry: Value,
    pub modules: Map<String, Value>,
    pub rules: Map<String, Value>,
}

impl FlowDefinition {
    pub fn from_value(v: &Value) -> FlowResult<Self> {
        let section = |key: &str| -> FlowResult<Map<String, Value>> {
            match v.get(key) {
                None | Some(Value::Null) => Ok(Map::new()),
                Some(Value::Object(m)) => Ok(m.clone()),
                Some(other) => Err(FlowError::config(format!("{} must be an object, found {}", key, other))),
            }
        };
        Ok(FlowDefinition {
            entry: v.get(tags::ENTRY).cloned().unwrap_or(Value::Null),
            modules: section(tags::MODULE)?,
            rules: section(tags::RULE)?,
        })
    }

    pub async fn load(meta: &dyn MetaSource, table: &str, flow_id: &str) -> FlowResult<Self> {
        let data = read_data(meta, table, flow_id).await?;
        FlowDefinition::from_value(&Value::Object(data))
    }

    pub fn entry(&self, method: Option<&str>) -> Option<String> {
        match &self.entry {
            Value::String(name) => Some(name.clone()),
            Value::Object(by_method) => {
                let method = method.unwrap_or("POST").to_ascii_uppercase();
                by_method
                    .get(&method)
                    .or_else(|| by_method.get(&method.to_ascii_lowercase()))
                    .and_then(|e| e.as_str())
                    .map(|e| e.to_string())
            }
            _ => None,
        }
    }
}

/// Position in the module chain, as indexes into the flow's module table.
#[derive(Debug, Clone, Copy, Default)]
struct Pointer {
    previous: Option<usize>,
    current: Option<usize>,
    next: Option<usize>,
}

/// One execution of a flow definition for one target.
pub struct Flow {
    id: String,
    target_id: String,
    env: Arc<FlowEnv>,
    context: Context,
    definition: FlowDefinition,
    modules: Vec<Module>,
    index: HashMap<String, usize>,
    pointer: Pointer,
    input: Option<Box<dyn FlowStream>>,
    output: Option<Value>,
    status: FlowStatus,
}

fn pair_mut<T>(list: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (left, right) = list.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = list.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// Streams the source's partial reads into the sink's partial writes.
/// Returns the number of rows handed to the sink.
async fn pipe_join(source: &mut Module, sink: &mut Module) -> FlowResult<u64> {
    let mut buffer = Vec::new();
    let mut moved = 0u64;
    loop {
        buffer.clear();
        let n = source.process_partially(&mut buffer).await?;
        if n == 0 {
            break;
        }
        // a flushing source counts rows without keeping them
        if buffer.is_empty() {
            continue;
        }
        sink.process_partially(&mut buffer).await?;
        moved += buffer.len() as u64;
    }
    source.flush_partially().await?;
    sink.flush_partially().await?;
    log::debug!("{} rows piped from {} to {}", moved, source.name(), sink.name());
    Ok(moved)
}

/// Replaces each `?` with its bound value as SQL text.
pub fn inline_params(sql: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut params = params.iter();
    for (i, part) in sql.split('?').enumerate() {
        if i > 0 {
            match params.next() {
                Some(Value::String(s)) => out.push_str(&format!("'{}'", s.replace('\'', "''"))),
                Some(Value::Null) => out.push_str("NULL"),
                Some(other) => out.push_str(&other.to_string()),
                None => out.push('?'),
            }
        }
        out.push_str(part);
    }
    out
}

impl Flow {
    pub fn new<T: Into<String>>(
        env: Arc<FlowEnv>,
        target_id: T,
        definition: FlowDefinition,
        channel: Arc<Context>,
    ) -> FlowResult<Self> {
        let mut modules = Vec::with_capacity(definition.modules.len());
        let mut index = HashMap::new();
        for (name, sequence) in definition.modules.iter() {
            let sequence = match sequence {
                Value::Object(m) => Sequences::from(m.clone()),
                other => {
                    return Err(FlowError::config(format!(
                        "module {} must be an object, found {}",
                        name, other
                    )))
                }
            };
            index.insert(name.clone(), modules.len());
            modules.push(Module::new(name.clone(), sequence));
        }

        let mut context = channel.as_ref().clone();
        context.add(keys::FLOW_START_TIME, chrono::Local::now().to_rfc3339());
        context.add_child(keys::CHANNEL_CONTEXT, channel.clone());

        let input: Option<Box<dyn FlowStream>> = match context.get(keys::ITEM) {
            Some(Value::Array(items)) => Some(Box::new(FanOutStream::new(Box::new(
                ContainerCarrier::from_items(items.clone(), None),
            )))),
            _ => None,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let target_id = target_id.into();
        Ok(Flow {
            status: FlowStatus {
                flow_id: id.clone(),
                target_id: target_id.clone(),
                ..Default::default()
            },
            id,
            target_id,
            env,
            context,
            definition,
            modules,
            index,
            pointer: Pointer::default(),
            input,
            output: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn status(&self) -> &FlowStatus {
        &self.status
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.index.get(name).map(|i| &self.modules[*i])
    }

    /// replaces the stream CREATE modules read from
    pub fn set_input(&mut self, input: Box<dyn FlowStream>) {
        self.input = Some(input);
    }

    /// rows of the last READ that was not handed on
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn previous(&self) -> Option<&str> {
        self.pointer.previous.map(|i| self.modules[i].name())
    }

    fn set_next(&mut self, name: &str) -> FlowResult<()> {
        match self.index.get(name) {
            Some(i) => {
                self.pointer.next = Some(*i);
                Ok(())
            }
            None => Err(FlowError::not_exist(name, format!("module not found in flow {}", self.target_id))),
        }
    }

    fn advance(&mut self) -> Option<usize> {
        let next = self.pointer.next.take()?;
        self.pointer.previous = self.pointer.current;
        self.pointer.current = Some(next);
        Some(next)
    }

    fn resolve_entry(&self, entry: Option<&str>) -> FlowResult<String> {
        if let Some(e) = entry.filter(|e| !e.is_empty()) {
            return Ok(e.to_string());
        }
        let method = self.context.get_string(keys::HTTP_REQUEST_METHOD);
        self.definition
            .entry(method.as_deref())
            .ok_or_else(|| FlowError::config(format!("flow {} has no ENTRY", self.target_id)))
    }

    /// Runs the module chain from `entry`, or the definition's entry when none is given.
    pub async fn process(&mut self, entry: Option<&str>) -> FlowResult<()> {
        self.env
            .handlers
            .handle(Step::FlowIn, &self.context, HandlerTarget::Flow(&self.status));
        let outcome = self.run(entry).await;
        match &outcome {
            Ok(_) => {
                self.status.result = Some(SUCCESS.to_string());
                self.status.message.clear();
            }
            Err(e) => {
                self.status.result = Some(FAIL.to_string());
                self.status.message = e.to_string();
            }
        }
        self.env
            .handlers
            .handle(Step::FlowOut, &self.context, HandlerTarget::Flow(&self.status));
        outcome
    }

    async fn run(&mut self, entry: Option<&str>) -> FlowResult<()> {
        let entry = self.resolve_entry(entry)?;
        self.set_next(&entry)?;
        while let Some(current) = self.advance() {
            self.hop(current).await?;
        }
        Ok(())
    }

    async fn hop(&mut self, current: usize) -> FlowResult<()> {
        let scope = ModuleScope {
            env: &self.env,
            flow_id: &self.id,
            context: &self.context,
            rules: &self.definition.rules,
        };
        let mut opened = vec![current];
        let mut outcome = self.modules[current].process_before(&scope, false).await;

        if outcome.is_ok() {
            match self.modules[current].pipe() {
                Some(pipe) => match self.index.get(&pipe).copied() {
                    Some(sink) if sink != current => {
                        opened.push(sink);
                        outcome = self.modules[sink].process_before(&scope, false).await;
                        if outcome.is_ok() {
                            let (source, sink) = pair_mut(&mut self.modules, current, sink);
                            outcome = pipe_join(source, sink).await.map(|_| ());
                        }
                    }
                    _ => {
                        outcome = Err(FlowError::config(format!(
                            "PIPE target {} of {} not found",
                            pipe,
                            self.modules[current].name()
                        )))
                    }
                },
                None => match self.modules[current].process(self.input.as_mut()).await {
                    Ok(Some(rows)) => {
                        let module = &self.modules[current];
                        if module.is_bypass() {
                            let buffer_size = module.sequences().get_int_or(seq::BUFFERSIZE, 1).max(1) as usize;
                            self.input = Some(Box::new(FanOutStream::new(Box::new(ListCarrier::new(
                                rows,
                                None,
                                buffer_size,
                            )))));
                        } else {
                            self.output = Some(json!({ DEFAULT_DATA_TAG: rows }));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => outcome = Err(e),
                },
            }
        }

        // the sink's CALL, when present, decides where the flow goes next
        let mut successor = None;
        for m in opened {
            match self.modules[m].process_after(&scope, outcome.is_ok()).await {
                Ok(Some(call)) => successor = Some(call),
                Ok(None) => {}
                Err(e) => {
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }
        outcome?;
        if let Some(next) = successor {
            self.set_next(&next)?;
        }
        Ok(())
    }

    /// Runs only `process_before` along the chain without connecting, and
    /// returns the statement every CREATE module would issue for the first
    /// row of `ITEM`, parameters inlined.
    pub async fn dry_run(&mut self, entry: Option<&str>) -> FlowResult<Vec<String>> {
        let entry = self.resolve_entry(entry)?;
        self.set_next(&entry)?;
        let first = self
            .context
            .get(keys::ITEM)
            .and_then(|items| items.as_array())
            .and_then(|items| items.first())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut queries = Vec::new();
        while let Some(current) = self.advance() {
            let mut chain = vec![current];
            if let Some(sink) = self.modules[current].pipe().and_then(|p| self.index.get(&p).copied()) {
                if sink != current {
                    chain.push(sink);
                }
            }
            let mut successor = None;
            for m in chain {
                let scope = ModuleScope {
                    env: &self.env,
                    flow_id: &self.id,
                    context: &self.context,
                    rules: &self.definition.rules,
                };
                let module = &mut self.modules[m];
                module.process_before(&scope, true).await?;
                if module.action() == actions::CREATE {
                    let target = module
                        .sequences()
                        .get_str(seq::TARGET)
                        .ok_or_else(|| FlowError::config(format!("module {} has no TARGET", module.name())))?;
                    let context = module.context().clone();
                    let table = context.evaluate(&target);
                    let rule = module.rule_mut();
                    let sql = build_insert_sql(&table, rule, &first);
                    let params = bind_params(rule.params(), &context, &first);
                    let query = inline_params(&sql, &params);
                    log::debug!("{} would run {}", module.name(), query);
                    queries.push(query);
                }
                module.discard();
                if let Some(call) = module.sequences().get_str(seq::CALL).filter(|c| !c.is_empty()) {
                    successor = Some(call);
                }
            }
            if let Some(next) = successor {
                self.set_next(&next)?;
            }
        }
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_by_method() {
        let def = FlowDefinition::from_value(&json!({
            "ENTRY": { "POST": "WRITE", "GET": "READ" },
            "MODULE": {}
        }))
        .expect("definition");
        assert_eq!(def.entry(Some("get")).as_deref(), Some("READ"));
        assert_eq!(def.entry(None).as_deref(), Some("WRITE"));
        assert_eq!(def.entry(Some("DELETE")), None);
    }

    #[test]
    fn params_are_inlined_in_order() {
        let sql = "INSERT INTO T (A, B, C) VALUES (?, now(), ?)";
        assert_eq!(
            inline_params(sql, &[json!("it's"), json!(3)]),
            "INSERT INTO T (A, B, C) VALUES ('it''s', now(), 3)"
        );
        assert_eq!(inline_params("?, ?", &[Value::Null]), "NULL, ?");
    }

    #[test]
    fn pair_mut_either_order() {
        let mut v = vec![1, 2, 3];
        {
            let (a, b) = pair_mut(&mut v, 2, 0);
            std::mem::swap(a, b);
        }
        assert_eq!(v, vec![3, 2, 1]);
    }
}
