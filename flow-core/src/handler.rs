//! Extension points notified while channels, flows and modules run.
use crate::context::Context;
use crate::deps::log;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Step {
    ChannelIn,
    ChannelOut,
    FlowIn,
    FlowOut,
    ModuleIn,
    ModuleOut,
    ModuleProgress,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowStatus {
    pub flow_id: String,
    pub target_id: String,
    pub result: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleStatus {
    pub flow_id: String,
    pub module_id: String,
    pub name: String,
    pub progress: u64,
    pub result: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub enum HandlerTarget<'a> {
    Channel(&'a str),
    Flow(&'a FlowStatus),
    Module(&'a ModuleStatus),
}

pub trait FlowHandler: Send + Sync {
    fn handle(&self, step: Step, context: &Context, target: HandlerTarget<'_>);
}

/// Named handlers, called in the order they were added.
#[derive(Default)]
pub struct HandlerManager {
    handlers: RwLock<Vec<(String, Arc<dyn FlowHandler>)>>,
}

impl HandlerManager {
    pub fn new() -> Self {
        HandlerManager::default()
    }

    /// replaces a handler registered under the same name
    pub fn add<N: Into<String>>(&self, name: N, handler: Arc<dyn FlowHandler>) {
        let name = name.into();
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        match handlers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = handler,
            None => handlers.push((name, handler)),
        }
    }

    pub fn remove(&self, name: &str) {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers.retain(|(n, _)| n != name);
    }

    pub fn handle(&self, step: Step, context: &Context, target: HandlerTarget<'_>) {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        for (_, handler) in handlers.iter() {
            handler.handle(step, context, target);
        }
    }
}

/// Lets a connector publish how many rows it has moved.
#[derive(Clone)]
pub struct ProgressReporter {
    handlers: Arc<HandlerManager>,
    context: Arc<Context>,
    status: ModuleStatus,
    progress: Arc<AtomicU64>,
}

impl ProgressReporter {
    pub fn new(
        handlers: Arc<HandlerManager>,
        context: Arc<Context>,
        status: ModuleStatus,
        progress: Arc<AtomicU64>,
    ) -> Self {
        ProgressReporter {
            handlers,
            context,
            status,
            progress,
        }
    }

    /// a reporter nobody listens to
    pub fn detached() -> Self {
        ProgressReporter::new(
            Arc::new(HandlerManager::new()),
            Arc::new(Context::new()),
            ModuleStatus::default(),
            Arc::new(AtomicU64::new(0)),
        )
    }

    pub fn report(&self, progress: u64) {
        self.progress.store(progress, Ordering::SeqCst);
        let mut status = self.status.clone();
        status.progress = progress;
        self.handlers
            .handle(Step::ModuleProgress, &self.context, HandlerTarget::Module(&status));
    }

    pub fn current(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }
}

/// Logs start, end and elapsed time of flows and modules.
#[derive(Default)]
pub struct LogHandler {
    started: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LogHandler {
    pub fn new() -> Self {
        LogHandler::default()
    }

    fn start(&self, id: &str) {
        let mut started = self.started.lock().unwrap_or_else(|p| p.into_inner());
        started.insert(id.to_string(), Utc::now());
    }

    fn elapsed(&self, id: &str) -> i64 {
        let mut started = self.started.lock().unwrap_or_else(|p| p.into_inner());
        started
            .remove(id)
            .map(|s| (Utc::now() - s).num_milliseconds())
            .unwrap_or(0)
    }
}

impl FlowHandler for LogHandler {
    fn handle(&self, step: Step, _context: &Context, target: HandlerTarget<'_>) {
        match (step, target) {
            (Step::ChannelIn, HandlerTarget::Channel(id)) => {
                self.start(id);
                log::info!("[{}] channel start", id);
            }
            (Step::ChannelOut, HandlerTarget::Channel(id)) => {
                log::info!("[{}] channel end, elapsed {}ms", id, self.elapsed(id));
            }
            (Step::FlowIn, HandlerTarget::Flow(f)) => {
                self.start(&f.flow_id);
                log::info!("[{}] flow start for target {}", f.flow_id, f.target_id);
            }
            (Step::FlowOut, HandlerTarget::Flow(f)) => {
                log::info!(
                    "[{}] flow end {:?} {}, elapsed {}ms",
                    f.flow_id,
                    f.result,
                    f.message,
                    self.elapsed(&f.flow_id)
                );
            }
            (Step::ModuleIn, HandlerTarget::Module(m)) => {
                self.start(&m.module_id);
                log::info!("[{}] module {} start", m.flow_id, m.name);
            }
            (Step::ModuleOut, HandlerTarget::Module(m)) => {
                log::info!(
                    "[{}] module {} end {:?} {} progress {}, elapsed {}ms",
                    m.flow_id,
                    m.name,
                    m.result,
                    m.message,
                    m.progress,
                    self.elapsed(&m.module_id)
                );
            }
            (Step::ModuleProgress, HandlerTarget::Module(m)) => {
                log::debug!("[{}] module {} progress {}", m.flow_id, m.name, m.progress);
            }
            _ => {}
        }
    }
}
