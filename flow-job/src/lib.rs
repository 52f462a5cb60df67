/// Channel requests: one flow per target, optionally through the worker pool
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod env;
/// Walks a flow's module chain, including pipe-joins and dry runs
pub mod flow;
pub mod module;
pub mod preamble {
    pub use crate::channel::{ChannelAgent, ChannelJob, LatestResult};
    pub use crate::config::FlowConfig;
    pub use crate::env::FlowEnv;
    pub use crate::flow::{Flow, FlowDefinition};
    pub use crate::module::{Module, ModuleScope};
}
