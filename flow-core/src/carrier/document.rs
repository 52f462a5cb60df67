use super::tokens::{Token, TokenReader};
use super::*;
use crate::deps::log;
use crate::error::FlowError;
use serde_json::Map;
use std::io::BufRead;

pub const DEFAULT_DOCUMENT_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Start,
    /// inside the top level object, looking for the header or the data field
    Section,
    Data,
    Done,
}

/// Node of the builder stack.  `key` is the field name waiting for the next value.
enum Builder {
    Object(Map<String, Value>, Option<String>),
    Array(Vec<Value>),
}

impl Builder {
    fn attach(&mut self, value: Value) -> FlowResult<()> {
        match self {
            Builder::Object(map, key) => match key.take() {
                Some(k) => {
                    map.insert(k, value);
                    Ok(())
                }
                None => Err(FlowError::document("value without a field name")),
            },
            Builder::Array(list) => {
                list.push(value);
                Ok(())
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            Builder::Object(map, _) => Value::Object(map),
            Builder::Array(list) => Value::Array(list),
        }
    }
}

/// Streams the items of `{ ...header..., "<data_tag>": [item, ...] }` or of a bare
/// top level array without loading the document.  Fields that are neither the
/// header nor the data are skipped without being built.
pub struct DocumentCarrier {
    tokens: TokenReader<Box<dyn BufRead + Send + Sync>>,
    header_tag: Option<String>,
    data_tag: String,
    buffer_size: usize,
    status: Status,
    header: Option<Value>,
    current: Option<Arc<Vec<Value>>>,
    forwarded: usize,
    finished: bool,
}

impl DocumentCarrier {
    /// Reads up to the start of the data list so a leading header is available right away.
    pub fn new(
        reader: Box<dyn BufRead + Send + Sync>,
        header_tag: Option<&str>,
        data_tag: &str,
        buffer_size: usize,
    ) -> FlowResult<Self> {
        let mut carrier = DocumentCarrier {
            tokens: TokenReader::new(reader),
            header_tag: header_tag.map(|s| s.to_string()),
            data_tag: data_tag.to_string(),
            buffer_size: buffer_size.max(1),
            status: Status::Start,
            header: None,
            current: None,
            forwarded: 0,
            finished: false,
        };
        while carrier.status == Status::Start || carrier.status == Status::Section {
            carrier.advance_section()?;
        }
        Ok(carrier)
    }

    fn next(&mut self) -> FlowResult<Token> {
        match self.tokens.next_token()? {
            Some(t) => Ok(t),
            None => Err(FlowError::document("unexpected end of document")),
        }
    }

    /// One step of the header/data state machine outside of the data list.
    fn advance_section(&mut self) -> FlowResult<()> {
        match self.status {
            Status::Start => match self.tokens.next_token()? {
                Some(Token::StartObject) => self.status = Status::Section,
                Some(Token::StartArray) => self.status = Status::Data,
                None => self.status = Status::Done,
                Some(other) => {
                    return Err(FlowError::document(format!(
                        "document must be an object or an array, found {:?}",
                        other
                    )))
                }
            },
            Status::Section => match self.next()? {
                Token::FieldName(name) if name == self.data_tag => match self.next()? {
                    Token::StartArray => self.status = Status::Data,
                    Token::StartObject => return Err(FlowError::document("Data cannot be an object.")),
                    Token::Scalar(Value::Null) => log::warn!("{} is null", self.data_tag),
                    other => {
                        return Err(FlowError::document(format!(
                            "Data must be an array, found {:?}",
                            other
                        )))
                    }
                },
                Token::FieldName(name) => {
                    let wanted = match &self.header_tag {
                        Some(tag) => *tag == name,
                        None => true,
                    };
                    if !wanted {
                        self.skip_value()?;
                    } else if self.header_tag.is_some() {
                        let value = match self.next()? {
                            Token::StartArray => return Err(FlowError::document("Header cannot be an array.")),
                            Token::Scalar(v) => v,
                            first => self.build(first)?,
                        };
                        self.header = Some(value);
                    } else {
                        let first = self.next()?;
                        let value = match first {
                            Token::Scalar(v) => v,
                            first => self.build(first)?,
                        };
                        match self.header.get_or_insert_with(|| Value::Object(Map::new())) {
                            Value::Object(map) => {
                                map.insert(name, value);
                            }
                            _ => {}
                        }
                    }
                }
                Token::EndObject => self.status = Status::Done,
                other => return Err(FlowError::document(format!("unexpected token {:?}", other))),
            },
            Status::Data | Status::Done => {}
        }
        Ok(())
    }

    /// skips the value following a field name without materializing it
    fn skip_value(&mut self) -> FlowResult<()> {
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Token::StartObject | Token::StartArray => depth += 1,
                Token::EndObject | Token::EndArray => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| FlowError::document("closing bracket without a value to skip"))?;
                }
                _ => {}
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    /// Builds a nested value from its opening token with an explicit stack of
    /// in-progress containers addressed by depth.
    fn build(&mut self, first: Token) -> FlowResult<Value> {
        let mut stack: Vec<Builder> = Vec::with_capacity(8);
        match first {
            Token::StartObject => stack.push(Builder::Object(Map::new(), None)),
            Token::StartArray => stack.push(Builder::Array(Vec::new())),
            Token::Scalar(v) => return Ok(v),
            other => return Err(FlowError::document(format!("unexpected token {:?}", other))),
        }
        loop {
            let value = match self.next()? {
                Token::StartObject => {
                    stack.push(Builder::Object(Map::new(), None));
                    continue;
                }
                Token::StartArray => {
                    stack.push(Builder::Array(Vec::new()));
                    continue;
                }
                Token::FieldName(name) => {
                    if let Some(Builder::Object(_, key)) = stack.last_mut() {
                        *key = Some(name);
                    }
                    continue;
                }
                Token::Scalar(v) => v,
                Token::EndObject | Token::EndArray => {
                    let done = match stack.pop() {
                        Some(b) => b.into_value(),
                        None => return Err(FlowError::document("unbalanced document")),
                    };
                    if stack.is_empty() {
                        return Ok(done);
                    }
                    done
                }
            };
            match stack.last_mut() {
                Some(parent) => parent.attach(value)?,
                None => return Err(FlowError::document("unbalanced document")),
            }
        }
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded
    }
}

impl Carrier for DocumentCarrier {
    fn forward(&mut self) -> FlowResult<usize> {
        if self.finished {
            return Ok(0);
        }
        let mut items = Vec::with_capacity(self.buffer_size);
        while items.len() < self.buffer_size {
            match self.next_item()? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        if items.is_empty() {
            self.finished = true;
        }
        let n = items.len();
        self.forwarded += n;
        self.current = Some(Arc::new(items));
        Ok(n)
    }

    fn buffer(&self) -> Option<Chunk> {
        self.current.as_ref().map(|c| Chunk::Items(c.clone()))
    }

    fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    /// the document length is unknown, so this is what has been read so far
    fn total_size(&self) -> usize {
        self.forwarded
    }

    fn remain_size(&self) -> usize {
        if self.finished {
            0
        } else {
            self.current.as_ref().map(|c| c.len()).unwrap_or(0)
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    /// the token source cannot be rewound; clearing the flag makes the next
    /// forward observe the end of input again
    fn reset(&mut self) {
        self.finished = false;
    }
}

impl DocumentCarrier {
    /// Next data item, `None` once the document is exhausted.  Does not touch
    /// the forwarded buffer.
    pub fn next_item(&mut self) -> FlowResult<Option<Value>> {
        loop {
            match self.status {
                Status::Done => return Ok(None),
                Status::Data => match self.next_data()? {
                    Some(item) => return Ok(Some(item)),
                    None => {
                        // trailing header fields may follow the data
                        self.status = if self.tokens.depth() > 0 {
                            Status::Section
                        } else {
                            Status::Done
                        };
                    }
                },
                _ => self.advance_section()?,
            }
        }
    }

    fn next_data(&mut self) -> FlowResult<Option<Value>> {
        match self.next()? {
            Token::EndArray => Ok(None),
            Token::Scalar(v) => Ok(Some(v)),
            first => self.build(first).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(text: &'static str, header: Option<&str>, size: usize) -> DocumentCarrier {
        DocumentCarrier::new(Box::new(text.as_bytes()), header, "ITEMS", size).expect("carrier")
    }

    fn drain(c: &mut DocumentCarrier) -> Vec<Value> {
        let mut out = vec![];
        loop {
            let n = c.forward().expect("forward");
            if n == 0 {
                break;
            }
            out.extend(c.buffer().expect("buffer").items().expect("items").to_vec());
        }
        out
    }

    #[test]
    fn header_tag_and_skipped_fields() {
        let mut c = carrier(
            r#"{"SKIP": {"deep": [1, {"x": 2}]}, "HEADER": {"BATCH": 1}, "ITEMS": [{"A": "x"}, {"A": [1, {"B": null}]}, 3]}"#,
            Some("HEADER"),
            2,
        );
        assert_eq!(c.header(), Some(&json!({"BATCH": 1})));
        assert_eq!(c.forward().expect("first"), 2);
        assert_eq!(c.forward().expect("second"), 1);
        assert_eq!(c.forward().expect("third"), 0);
        assert!(c.is_finished());
        assert_eq!(c.total_size(), 3);
    }

    #[test]
    fn without_header_tag_every_other_field_is_header() {
        let mut c = carrier(r#"{"ID": 7, "ITEMS": [{"A": 1}], "TAIL": {"Z": true}}"#, None, 10);
        let items = drain(&mut c);
        assert_eq!(items, vec![json!({"A": 1})]);
        assert_eq!(c.header(), Some(&json!({"ID": 7, "TAIL": {"Z": true}})));
    }

    #[test]
    fn bare_array() {
        let mut c = carrier(r#"[{"A": {"B": [[1], [2, 3]]}}, {"A": 2}]"#, None, 100);
        let items = drain(&mut c);
        assert_eq!(items, vec![json!({"A": {"B": [[1], [2, 3]]}}), json!({"A": 2})]);
    }

    #[test]
    fn shape_errors() {
        let r = DocumentCarrier::new(Box::new(r#"{"ITEMS": {"A": 1}}"#.as_bytes()), None, "ITEMS", 1);
        assert!(matches!(r, Err(FlowError::Document { .. })));
        let r = DocumentCarrier::new(Box::new(r#"{"HEADER": [1], "ITEMS": []}"#.as_bytes()), Some("HEADER"), "ITEMS", 1);
        assert!(matches!(r, Err(FlowError::Document { message }) if message == "Header cannot be an array."));
    }

    #[test]
    fn skipping_a_closing_bracket_is_an_error() {
        let mut c = carrier("[]", None, 1);
        assert!(matches!(c.skip_value(), Err(FlowError::Document { .. })));
    }
}
