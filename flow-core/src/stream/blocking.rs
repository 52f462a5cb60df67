use super::*;
use crate::carrier::Carrier;
use crate::error::FlowError;
use std::sync::{Condvar, Mutex, MutexGuard};

struct Slot {
    pending: Option<(Option<Chunk>, i64)>,
}

struct State {
    carrier: Box<dyn Carrier>,
    /// `None` for unsubscribed ids
    slots: Vec<Option<Slot>>,
}

impl State {
    fn all_empty(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .all(|slot| slot.pending.is_none())
    }
}

/// Fan-out for subscribers running on their own threads.  Each subscriber has a
/// single slot; whoever finds every slot empty forwards the carrier and fills
/// all of them, everyone else blocks until their own slot is filled.
///
/// `next` blocks the calling thread, inside tokio use `spawn_blocking`.
pub struct BlockingStream {
    id: u64,
    state: Mutex<State>,
    filled: Condvar,
}

impl BlockingStream {
    pub fn new(carrier: Box<dyn Carrier>) -> Self {
        BlockingStream {
            id: new_stream_id(),
            state: Mutex::new(State {
                carrier,
                slots: Vec::new(),
            }),
            filled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Payload {
        let mut state = self.lock();
        state.slots.push(Some(Slot { pending: None }));
        Payload::new(self.id, state.slots.len() - 1)
    }

    pub fn unsubscribe(&self, payload: Payload) {
        if payload.stream_id != self.id {
            return;
        }
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(payload.id) {
            *slot = None;
        }
        drop(state);
        self.filled.notify_all();
    }

    pub fn next(&self, payload: &mut Payload) -> FlowResult<i64> {
        if payload.stream_id != self.id {
            return Err(FlowError::StreamMismatch);
        }
        let mut state = self.lock();
        loop {
            let taken = match state.slots.get_mut(payload.id) {
                Some(Some(slot)) => slot.pending.take(),
                _ => return Err(FlowError::StreamMismatch),
            };
            if let Some((chunk, size)) = taken {
                drop(state);
                // a subscriber waiting for everyone to catch up may forward now
                self.filled.notify_all();
                payload.set(chunk, size);
                return Ok(size);
            }
            if state.carrier.is_finished() {
                payload.set(None, END_OF_STREAM);
                return Ok(END_OF_STREAM);
            }
            if state.all_empty() {
                let n = state.carrier.forward()?;
                let delivery = if n == 0 && state.carrier.is_finished() {
                    (None, END_OF_STREAM)
                } else {
                    (state.carrier.buffer(), n as i64)
                };
                for slot in state.slots.iter_mut().flatten() {
                    slot.pending = Some(delivery.clone());
                }
                self.filled.notify_all();
                continue;
            }
            state = self
                .filled
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn header(&self) -> Option<Value> {
        self.lock().carrier.header().cloned()
    }

    pub fn size(&self) -> usize {
        self.lock().carrier.total_size()
    }

    pub fn remains(&self) -> usize {
        self.lock().carrier.remain_size()
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.carrier.reset();
        for slot in state.slots.iter_mut().flatten() {
            slot.pending = None;
        }
    }

    pub fn close(&self) {
        self.lock().carrier.close();
    }

    pub fn snapshot(&self) -> Value {
        self.lock().carrier.snapshot()
    }
}

impl FlowStream for BlockingStream {
    fn subscribe(&mut self) -> Payload {
        BlockingStream::subscribe(self)
    }

    fn unsubscribe(&mut self, payload: Payload) {
        BlockingStream::unsubscribe(self, payload)
    }

    fn next(&mut self, payload: &mut Payload) -> FlowResult<i64> {
        BlockingStream::next(self, payload)
    }

    fn header(&self) -> Option<Value> {
        BlockingStream::header(self)
    }

    fn size(&self) -> usize {
        BlockingStream::size(self)
    }

    fn remains(&self) -> usize {
        BlockingStream::remains(self)
    }

    fn reset(&mut self) {
        BlockingStream::reset(self)
    }

    fn close(&mut self) {
        BlockingStream::close(self)
    }

    fn snapshot(&self) -> Value {
        BlockingStream::snapshot(self)
    }
}
