use super::*;
use crate::carrier::Carrier;
use crate::error::FlowError;
use bytes::BytesMut;
use std::sync::Arc;

/// For exactly one reader: the carrier is drained when the stream is built and
/// the whole content is handed out once per payload.
pub struct SingleStream {
    id: u64,
    carrier: Box<dyn Carrier>,
    chunk: Chunk,
}

impl SingleStream {
    pub fn new(mut carrier: Box<dyn Carrier>) -> FlowResult<Self> {
        let mut items: Vec<serde_json::Value> = Vec::new();
        let mut bytes: Option<BytesMut> = None;
        while !carrier.is_finished() {
            let n = carrier.forward()?;
            if n == 0 {
                break;
            }
            match carrier.buffer() {
                Some(Chunk::Items(chunk)) => items.extend(chunk.iter().cloned()),
                Some(Chunk::Bytes(b)) => bytes.get_or_insert_with(BytesMut::new).extend_from_slice(&b),
                None => {}
            }
        }
        let chunk = match bytes {
            Some(b) => Chunk::Bytes(b.freeze()),
            None => Chunk::Items(Arc::new(items)),
        };
        Ok(SingleStream {
            id: new_stream_id(),
            carrier,
            chunk,
        })
    }
}

impl FlowStream for SingleStream {
    fn subscribe(&mut self) -> Payload {
        Payload::new(self.id, 0)
    }

    fn unsubscribe(&mut self, _payload: Payload) {}

    fn next(&mut self, payload: &mut Payload) -> FlowResult<i64> {
        if payload.stream_id != self.id {
            return Err(FlowError::StreamMismatch);
        }
        if payload.data.is_some() || payload.size == END_OF_STREAM {
            payload.set(None, END_OF_STREAM);
            return Ok(END_OF_STREAM);
        }
        let size = self.chunk.len() as i64;
        payload.set(Some(self.chunk.clone()), size);
        Ok(size)
    }

    fn header(&self) -> Option<Value> {
        self.carrier.header().cloned()
    }

    fn size(&self) -> usize {
        self.chunk.len()
    }

    fn remains(&self) -> usize {
        0
    }

    fn reset(&mut self) {}

    fn close(&mut self) {
        self.carrier.close();
    }

    fn snapshot(&self) -> Value {
        serde_json::json!({
            crate::carrier::DEFAULT_HEADER_TAG: self.header().unwrap_or(Value::Null),
            crate::carrier::DEFAULT_DATA_TAG: self.chunk.to_value(),
        })
    }
}
