use super::*;
use std::io::Read;

pub const DEFAULT_BYTE_BUFFER: usize = 8192;

/// Pulls fixed size byte buffers.  The carrier finishes on the first empty read,
/// so the last partial buffer is still handed out to every subscriber.
pub struct ByteCarrier {
    reader: Box<dyn Read + Send>,
    buffer_size: usize,
    total: Option<usize>,
    consumed: usize,
    current: Option<Bytes>,
    finished: bool,
}

impl ByteCarrier {
    pub fn new(reader: Box<dyn Read + Send>, total: Option<usize>) -> Self {
        ByteCarrier::with_buffer_size(reader, total, DEFAULT_BYTE_BUFFER)
    }

    pub fn with_buffer_size(reader: Box<dyn Read + Send>, total: Option<usize>, buffer_size: usize) -> Self {
        ByteCarrier {
            reader,
            buffer_size: buffer_size.max(1),
            total,
            consumed: 0,
            current: None,
            finished: false,
        }
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl Carrier for ByteCarrier {
    fn forward(&mut self) -> FlowResult<usize> {
        if self.finished {
            return Ok(0);
        }
        let mut buf = vec![0u8; self.buffer_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        if filled == 0 {
            self.finished = true;
        }
        self.consumed += filled;
        self.current = Some(Bytes::from(buf));
        Ok(filled)
    }

    fn buffer(&self) -> Option<Chunk> {
        self.current.as_ref().map(|b| Chunk::Bytes(b.clone()))
    }

    fn header(&self) -> Option<&Value> {
        None
    }

    fn total_size(&self) -> usize {
        self.total.unwrap_or(self.consumed)
    }

    fn remain_size(&self) -> usize {
        self.total.map(|t| t.saturating_sub(self.consumed)).unwrap_or(0)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    /// the reader cannot be rewound, only the flags are cleared
    fn reset(&mut self) {
        self.finished = false;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_fixed_buffers() {
        let data: Vec<u8> = (0..20u8).collect();
        let mut c = ByteCarrier::with_buffer_size(Box::new(std::io::Cursor::new(data)), Some(20), 8);
        assert_eq!(c.forward().expect("1"), 8);
        assert_eq!(c.remain_size(), 12);
        assert_eq!(c.forward().expect("2"), 8);
        assert_eq!(c.forward().expect("3"), 4);
        assert!(!c.is_finished());
        assert_eq!(c.forward().expect("4"), 0);
        assert!(c.is_finished());
        assert_eq!(c.consumed(), 20);
    }
}
