//! Fan-out of one carrier to many readers.  Every subscriber sees every chunk
//! exactly once and the carrier is forwarded at most once per round.
use crate::carrier::Chunk;
use crate::error::FlowResult;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod blocking;
pub mod fan_out;
pub mod single;

pub use blocking::BlockingStream;
pub use fan_out::FanOutStream;
pub use single::SingleStream;

/// returned by `next` when no more data will arrive
pub const END_OF_STREAM: i64 = -1;

static STREAM_IDS: AtomicU64 = AtomicU64::new(1);

pub(crate) fn new_stream_id() -> u64 {
    STREAM_IDS.fetch_add(1, Ordering::Relaxed)
}

/// A subscriber's cursor.  It only references the last chunk it was handed.
#[derive(Debug)]
pub struct Payload {
    stream_id: u64,
    id: usize,
    data: Option<Chunk>,
    size: i64,
}

impl Payload {
    pub(crate) fn new(stream_id: u64, id: usize) -> Self {
        Payload {
            stream_id,
            id,
            data: None,
            size: 0,
        }
    }

    pub(crate) fn set(&mut self, data: Option<Chunk>, size: i64) {
        self.data = data;
        self.size = size;
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn data(&self) -> Option<&Chunk> {
        self.data.as_ref()
    }

    pub fn items(&self) -> &[Value] {
        self.data.as_ref().and_then(|c| c.items()).unwrap_or(&[])
    }

    pub fn size(&self) -> i64 {
        self.size
    }
}

pub trait FlowStream: Send {
    fn subscribe(&mut self) -> Payload;

    fn unsubscribe(&mut self, payload: Payload);

    /// Hands the next chunk to `payload` and returns its size, or [END_OF_STREAM].
    fn next(&mut self, payload: &mut Payload) -> FlowResult<i64>;

    fn header(&self) -> Option<Value>;

    fn size(&self) -> usize;

    fn remains(&self) -> usize;

    fn reset(&mut self);

    fn close(&mut self);

    /// json view of the header and the current chunk
    fn snapshot(&self) -> Value;
}
