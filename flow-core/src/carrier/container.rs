use super::*;
use crate::error::FlowError;

/// Wraps an already parsed document.  The whole data list is one chunk; the
/// call after the one that handed it out reports the end.
pub struct ContainerCarrier {
    header: Option<Value>,
    items: Arc<Vec<Value>>,
    forwarded: bool,
    finished: bool,
}

impl ContainerCarrier {
    /// `doc` is either a bare array or an object holding `data_tag` (and optionally `header_tag`)
    pub fn new(doc: Value, header_tag: Option<&str>, data_tag: &str) -> FlowResult<Self> {
        match doc {
            Value::Array(items) => Ok(ContainerCarrier::from_items(items, None)),
            Value::Object(mut map) => {
                let header = header_tag.and_then(|tag| map.remove(tag));
                let items = match map.remove(data_tag) {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(Value::Object(_)) => {
                        return Err(FlowError::document("Data cannot be an object."))
                    }
                    Some(other) => vec![other],
                };
                Ok(ContainerCarrier::from_items(items, header))
            }
            other => Ok(ContainerCarrier::from_items(vec![other], None)),
        }
    }

    pub fn from_items(items: Vec<Value>, header: Option<Value>) -> Self {
        ContainerCarrier {
            header,
            items: Arc::new(items),
            forwarded: false,
            finished: false,
        }
    }
}

impl Carrier for ContainerCarrier {
    fn forward(&mut self) -> FlowResult<usize> {
        if self.finished {
            return Ok(0);
        }
        if self.forwarded || self.items.is_empty() {
            self.finished = true;
            return Ok(0);
        }
        self.forwarded = true;
        Ok(self.items.len())
    }

    fn buffer(&self) -> Option<Chunk> {
        if self.forwarded {
            Some(Chunk::Items(self.items.clone()))
        } else {
            None
        }
    }

    fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    fn total_size(&self) -> usize {
        self.items.len()
    }

    fn remain_size(&self) -> usize {
        if self.forwarded {
            0
        } else {
            self.items.len()
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn reset(&mut self) {
        self.forwarded = false;
        self.finished = false;
    }

    fn snapshot(&self) -> Value {
        json!({
            DEFAULT_HEADER_TAG: self.header.clone().unwrap_or(Value::Null),
            DEFAULT_DATA_TAG: self.items.as_ref().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_everything_once() {
        let doc = json!({"HEADER": {"BATCH": 1}, "ITEMS": [{"A": "x"}, {"A": "y"}, {"A": "z"}]});
        let mut c = ContainerCarrier::new(doc, Some("HEADER"), "ITEMS").expect("container");
        assert_eq!(c.header(), Some(&json!({"BATCH": 1})));
        let mut sum = 0;
        let mut finishing = 0;
        for _ in 0..4 {
            let was = c.is_finished();
            sum += c.forward().expect("forward");
            if !was && c.is_finished() {
                finishing += 1;
            }
        }
        assert_eq!(sum, 3);
        assert_eq!(finishing, 1);
        c.reset();
        assert_eq!(c.forward().expect("forward"), 3);
    }

    #[test]
    fn data_must_be_a_list() {
        let doc = json!({"ITEMS": {"A": 1}});
        assert!(ContainerCarrier::new(doc, None, "ITEMS").is_err());
    }
}
