use crate::dispatcher::TargetDispatcher;
use crate::env::FlowEnv;
use crate::flow::{Flow, FlowDefinition};
use crate::module::{FAIL, SUCCESS};
use flow_core::context::{keys, Context};
use flow_core::deps::{log, uuid};
use flow_core::error::FlowResult;
use flow_core::handler::{HandlerTarget, Step};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

fn reply(result: &str, reason: &str) -> Value {
    json!({ "result": result, "reason": reason })
}

/// One flow run for one target.
pub struct ChannelJob {
    env: Arc<FlowEnv>,
    target_id: String,
    context: Arc<Context>,
    definition: Option<FlowDefinition>,
    entry: Option<String>,
}

impl ChannelJob {
    pub fn new<T: Into<String>>(env: Arc<FlowEnv>, target_id: T, context: Arc<Context>) -> Self {
        ChannelJob {
            env,
            target_id: target_id.into(),
            context,
            definition: None,
            entry: None,
        }
    }

    /// runs this definition instead of loading it from the flow table
    pub fn with_definition(mut self, definition: FlowDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_entry<E: Into<String>>(mut self, entry: E) -> Self {
        self.entry = Some(entry.into());
        self
    }

    async fn execute(self) -> FlowResult<Option<Value>> {
        let definition = match self.definition {
            Some(d) => d,
            None => {
                let table = &self.env.config.meta.flow_table;
                FlowDefinition::load(self.env.meta.as_ref(), table, &self.target_id).await?
            }
        };
        let mut flow = Flow::new(self.env.clone(), self.target_id.clone(), definition, self.context.clone())?;
        flow.process(self.entry.as_deref()).await?;
        Ok(flow.output().cloned())
    }

    /// `{"result":"success","reason":""}`, the rows of a final READ, or
    /// `{"result":"fail","reason":...}`
    pub async fn run(self) -> Value {
        let target_id = self.target_id.clone();
        match self.execute().await {
            Ok(Some(output)) => output,
            Ok(None) => reply(SUCCESS, ""),
            Err(e) => {
                log::error!("target {} failed: {}", target_id, e);
                reply(FAIL, &e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestResult {
    pub result: String,
    pub message: String,
}

/// Runs a channel request against its targets, one after another or through
/// the worker pool when `channel.concurrency` is set.
pub struct ChannelAgent {
    env: Arc<FlowEnv>,
    dispatcher: Option<TargetDispatcher>,
    latest: Mutex<LatestResult>,
}

impl ChannelAgent {
    pub fn new(env: Arc<FlowEnv>) -> Self {
        let dispatcher = if env.config.channel.concurrency {
            Some(TargetDispatcher::start(
                env.config.channel.workers,
                env.config.channel.queue_size,
            ))
        } else {
            None
        };
        ChannelAgent {
            env,
            dispatcher,
            latest: Mutex::new(LatestResult::default()),
        }
    }

    pub fn latest(&self) -> LatestResult {
        self.latest.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Runs every target with a fresh channel id; returns the replies keyed by target.
    pub async fn process(&self, targets: &[String], mut context: Context) -> FlowResult<Value> {
        let channel_id = uuid::Uuid::new_v4().to_string();
        context.add(keys::CHANNEL_ID, channel_id.clone());
        let context = Arc::new(context);
        self.env
            .handlers
            .handle(Step::ChannelIn, &context, HandlerTarget::Channel(&channel_id));

        let mut replies = Map::new();
        match &self.dispatcher {
            Some(dispatcher) => {
                let mut pending = Vec::with_capacity(targets.len());
                for target in targets {
                    let job = ChannelJob::new(self.env.clone(), target.clone(), context.clone());
                    let rx = dispatcher.submit(target, Box::pin(job.run())).await?;
                    pending.push((target, rx));
                }
                for (target, rx) in pending {
                    let value = match rx.await {
                        Ok(v) => v,
                        Err(e) => reply(FAIL, &format!("worker dropped the job: {}", e)),
                    };
                    replies.insert(target.clone(), value);
                }
            }
            None => {
                for target in targets {
                    let job = ChannelJob::new(self.env.clone(), target.clone(), context.clone());
                    replies.insert(target.clone(), job.run().await);
                }
            }
        }

        let failures: Vec<String> = replies
            .iter()
            .filter(|(_, v)| v.get("result").and_then(|r| r.as_str()) == Some(FAIL))
            .map(|(t, v)| format!("{}: {}", t, v.get("reason").and_then(|r| r.as_str()).unwrap_or_default()))
            .collect();
        {
            let mut latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
            *latest = LatestResult {
                result: if failures.is_empty() { SUCCESS } else { FAIL }.to_string(),
                message: failures.join("\n"),
            };
        }

        self.env
            .handlers
            .handle(Step::ChannelOut, &context, HandlerTarget::Channel(&channel_id));
        Ok(Value::Object(replies))
    }

    pub async fn shutdown(self) -> FlowResult<()> {
        if let Some(dispatcher) = self.dispatcher {
            let done = dispatcher.shutdown().await?;
            log::info!("channel workers stopped after {} jobs", done);
        }
        Ok(())
    }
}
