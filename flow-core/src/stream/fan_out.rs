use super::*;
use crate::carrier::Carrier;
use crate::error::FlowError;

/// Single threaded fan-out.  Subscribers must drive `next` from cooperating
/// loops; the carrier is forwarded once all current subscribers took the
/// previous chunk.
pub struct FanOutStream {
    id: u64,
    carrier: Box<dyn Carrier>,
    subscribers: usize,
    next_subscriber: usize,
    done_count: usize,
    current: Option<Chunk>,
    current_size: i64,
}

impl FanOutStream {
    pub fn new(carrier: Box<dyn Carrier>) -> Self {
        FanOutStream {
            id: new_stream_id(),
            carrier,
            subscribers: 0,
            next_subscriber: 0,
            // the first call always forwards
            done_count: usize::MAX,
            current: None,
            current_size: 0,
        }
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
    }
}

impl FlowStream for FanOutStream {
    fn subscribe(&mut self) -> Payload {
        let payload = Payload::new(self.id, self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers += 1;
        payload
    }

    fn unsubscribe(&mut self, payload: Payload) {
        if payload.stream_id == self.id && self.subscribers > 0 {
            self.subscribers -= 1;
        }
    }

    fn next(&mut self, payload: &mut Payload) -> FlowResult<i64> {
        if payload.stream_id != self.id {
            return Err(FlowError::StreamMismatch);
        }
        if self.carrier.is_finished() {
            payload.set(None, END_OF_STREAM);
            return Ok(END_OF_STREAM);
        }
        if self.done_count >= self.subscribers {
            let n = self.carrier.forward()?;
            if n == 0 && self.carrier.is_finished() {
                payload.set(None, END_OF_STREAM);
                return Ok(END_OF_STREAM);
            }
            self.current = self.carrier.buffer();
            self.current_size = n as i64;
            self.done_count = 0;
        }
        payload.set(self.current.clone(), self.current_size);
        self.done_count += 1;
        Ok(self.current_size)
    }

    fn header(&self) -> Option<Value> {
        self.carrier.header().cloned()
    }

    fn size(&self) -> usize {
        self.carrier.total_size()
    }

    fn remains(&self) -> usize {
        self.carrier.remain_size()
    }

    fn reset(&mut self) {
        self.carrier.reset();
        self.done_count = usize::MAX;
        self.current = None;
        self.current_size = 0;
    }

    fn close(&mut self) {
        self.carrier.close();
    }

    fn snapshot(&self) -> Value {
        self.carrier.snapshot()
    }
}
