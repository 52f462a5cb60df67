/// Multi-subscriber chunk sources
pub mod carrier;
/// Store access through the [connector::Connector] contract
pub mod connector;
pub mod context;
pub mod error;
pub mod handler;
pub mod meta;
/// Column mapping rules
pub mod rule;
pub mod sequence;
/// Lock-step fan-out of a carrier to independent readers
pub mod stream;
/// The header/body/footer template language
pub mod template;
pub mod preamble {
    pub use crate::carrier::{Carrier, Chunk};
    pub use crate::connector::{ConnectSession, Connector, ConnectorFactory};
    pub use crate::context::Context;
    pub use crate::error::*;
    pub use crate::handler::{FlowHandler, HandlerManager, HandlerTarget, Step};
    pub use crate::meta::MetaSource;
    pub use crate::rule::MappingRule;
    pub use crate::sequence::Sequences;
    pub use crate::stream::{FlowStream, Payload, END_OF_STREAM};
}
/// deps which are re-exported (and used in the core)
pub mod deps {
    pub use anyhow;
    pub use async_trait::async_trait;
    pub use bytes;
    pub use chrono;
    pub use futures_core;
    pub use log;
    pub use serde;
    pub use serde_json;
    pub use thiserror;
    pub use tokio;
    pub use toml;
    pub use uuid;
}
