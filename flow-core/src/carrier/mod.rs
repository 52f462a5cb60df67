//! Pull based data sources.  A carrier produces one chunk per `forward()`;
//! the chunk is shared by reference so a stream can hand it to many subscribers.
use crate::error::FlowResult;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;

pub mod bytes_carrier;
pub mod container;
pub mod document;
pub mod list;
pub mod tokens;

pub use bytes_carrier::ByteCarrier;
pub use container::ContainerCarrier;
pub use document::DocumentCarrier;
pub use list::ListCarrier;

pub const DEFAULT_HEADER_TAG: &str = "HEADER";
pub const DEFAULT_DATA_TAG: &str = "ITEMS";

#[derive(Debug, Clone)]
pub enum Chunk {
    Items(Arc<Vec<Value>>),
    Bytes(Bytes),
}

impl Chunk {
    pub fn empty() -> Self {
        Chunk::Items(Arc::new(Vec::new()))
    }

    /// number of rows, or bytes for a binary chunk
    pub fn len(&self) -> usize {
        match self {
            Chunk::Items(items) => items.len(),
            Chunk::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Chunk::Items(items) => Some(items.as_slice()),
            Chunk::Bytes(_) => None,
        }
    }

    /// true when both chunks point at the same forwarded buffer
    pub fn same_as(&self, other: &Chunk) -> bool {
        match (self, other) {
            (Chunk::Items(a), Chunk::Items(b)) => Arc::ptr_eq(a, b),
            (Chunk::Bytes(a), Chunk::Bytes(b)) => a.as_ptr() == b.as_ptr() && a.len() == b.len(),
            _ => false,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Chunk::Items(items) => Value::Array(items.as_ref().clone()),
            Chunk::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// `forward()` returns how many items (or bytes) the new chunk holds.  An
/// exhausted carrier returns 0 and reports `is_finished()` until `reset()`.
pub trait Carrier: Send {
    fn forward(&mut self) -> FlowResult<usize>;

    /// the chunk produced by the last forward
    fn buffer(&self) -> Option<Chunk>;

    fn header(&self) -> Option<&Value>;

    fn total_size(&self) -> usize;

    fn remain_size(&self) -> usize;

    fn is_finished(&self) -> bool;

    fn reset(&mut self);

    fn close(&mut self) {}

    fn snapshot(&self) -> Value {
        json!({
            DEFAULT_HEADER_TAG: self.header().cloned().unwrap_or(Value::Null),
            DEFAULT_DATA_TAG: self.buffer().map(|c| c.to_value()).unwrap_or_else(|| json!([])),
        })
    }
}
