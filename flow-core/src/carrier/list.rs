use super::*;

/// Hands out a materialized list `buffer_size` items at a time.
pub struct ListCarrier {
    header: Option<Value>,
    items: Vec<Value>,
    buffer_size: usize,
    position: usize,
    current: Option<Arc<Vec<Value>>>,
    finished: bool,
}

impl ListCarrier {
    pub fn new(items: Vec<Value>, header: Option<Value>, buffer_size: usize) -> Self {
        ListCarrier {
            header,
            items,
            buffer_size: buffer_size.max(1),
            position: 0,
            current: None,
            finished: false,
        }
    }
}

impl Carrier for ListCarrier {
    fn forward(&mut self) -> FlowResult<usize> {
        if self.position >= self.items.len() {
            self.finished = true;
            self.current = Some(Arc::new(Vec::new()));
            return Ok(0);
        }
        let end = (self.position + self.buffer_size).min(self.items.len());
        let chunk = self.items[self.position..end].to_vec();
        self.position = end;
        let n = chunk.len();
        self.current = Some(Arc::new(chunk));
        Ok(n)
    }

    fn buffer(&self) -> Option<Chunk> {
        self.current.as_ref().map(|c| Chunk::Items(c.clone()))
    }

    fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    fn total_size(&self) -> usize {
        self.items.len()
    }

    fn remain_size(&self) -> usize {
        self.items.len() - self.position
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn reset(&mut self) {
        self.position = 0;
        self.current = None;
        self.finished = false;
    }
}
