use crate::error::{FlowError, FlowResult};
use serde_json::{Number, Value};
use std::io::BufRead;

/// Tokens of a json document.  Scalars are already materialized, containers
/// are reported as start/end pairs so callers decide whether to build or skip them.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName(String),
    Scalar(Value),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Expect {
    /// container was just opened
    First,
    Key,
    Colon,
    Value,
    /// a value was read, expecting `,` or the closing bracket
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Object(Expect),
    Array(Expect),
}

/// Pull tokenizer over any buffered reader.  Only the nesting of open
/// containers is kept in memory.
pub struct TokenReader<R: BufRead> {
    reader: R,
    frames: Vec<Frame>,
    line: usize,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R) -> Self {
        TokenReader {
            reader,
            frames: Vec::new(),
            line: 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn line(&self) -> usize {
        self.line
    }

    fn error<T>(&self, message: &str) -> FlowResult<T> {
        Err(FlowError::document(format!("{} (line {})", message, self.line)))
    }

    fn peek(&mut self) -> FlowResult<Option<u8>> {
        let buf = self.reader.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) -> FlowResult<Option<u8>> {
        let b = self.peek()?;
        if let Some(c) = b {
            if c == b'\n' {
                self.line += 1;
            }
            self.reader.consume(1);
        }
        Ok(b)
    }

    fn skip_whitespace(&mut self) -> FlowResult<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                    self.bump()?;
                }
                other => return Ok(other),
            }
        }
    }

    fn set_top(&mut self, expect: Expect) {
        if let Some(top) = self.frames.last_mut() {
            *top = match top {
                Frame::Object(_) => Frame::Object(expect),
                Frame::Array(_) => Frame::Array(expect),
            };
        }
    }

    /// `None` once the top level value is complete and the input is exhausted
    pub fn next_token(&mut self) -> FlowResult<Option<Token>> {
        loop {
            let b = match self.skip_whitespace()? {
                Some(b) => b,
                None => {
                    if self.frames.is_empty() {
                        return Ok(None);
                    }
                    return self.error("unexpected end of document");
                }
            };
            match self.frames.last().copied() {
                Some(Frame::Object(expect)) => match (expect, b) {
                    (Expect::First, b'}') | (Expect::Separator, b'}') => {
                        self.bump()?;
                        self.frames.pop();
                        return Ok(Some(Token::EndObject));
                    }
                    (Expect::First, b'"') | (Expect::Key, b'"') => {
                        self.bump()?;
                        let name = self.read_string()?;
                        self.set_top(Expect::Colon);
                        return Ok(Some(Token::FieldName(name)));
                    }
                    (Expect::Colon, b':') => {
                        self.bump()?;
                        self.set_top(Expect::Value);
                    }
                    (Expect::Separator, b',') => {
                        self.bump()?;
                        self.set_top(Expect::Key);
                    }
                    (Expect::Value, _) => return self.read_value(b).map(Some),
                    _ => return self.error(&format!("unexpected character '{}'", b as char)),
                },
                Some(Frame::Array(expect)) => match (expect, b) {
                    (Expect::First, b']') | (Expect::Separator, b']') => {
                        self.bump()?;
                        self.frames.pop();
                        return Ok(Some(Token::EndArray));
                    }
                    (Expect::Separator, b',') => {
                        self.bump()?;
                        self.set_top(Expect::Value);
                    }
                    (Expect::First, _) | (Expect::Value, _) => {
                        return self.read_value(b).map(Some)
                    }
                    _ => return self.error(&format!("unexpected character '{}'", b as char)),
                },
                None => return self.read_value(b).map(Some),
            }
        }
    }

    fn read_value(&mut self, b: u8) -> FlowResult<Token> {
        // the enclosing container is complete once this value is
        self.set_top(Expect::Separator);
        match b {
            b'{' => {
                self.bump()?;
                self.frames.push(Frame::Object(Expect::First));
                Ok(Token::StartObject)
            }
            b'[' => {
                self.bump()?;
                self.frames.push(Frame::Array(Expect::First));
                Ok(Token::StartArray)
            }
            b'"' => {
                self.bump()?;
                Ok(Token::Scalar(Value::String(self.read_string()?)))
            }
            b't' | b'f' | b'n' => {
                let word = self.read_while(|c| c.is_ascii_alphabetic())?;
                match word.as_str() {
                    "true" => Ok(Token::Scalar(Value::Bool(true))),
                    "false" => Ok(Token::Scalar(Value::Bool(false))),
                    "null" => Ok(Token::Scalar(Value::Null)),
                    _ => self.error(&format!("unknown literal '{}'", word)),
                }
            }
            b'-' | b'0'..=b'9' => {
                let text = self.read_while(|c| {
                    c.is_ascii_digit() || c == b'-' || c == b'+' || c == b'.' || c == b'e' || c == b'E'
                })?;
                match serde_json::from_str::<Number>(&text) {
                    Ok(n) => Ok(Token::Scalar(Value::Number(n))),
                    Err(_) => self.error(&format!("invalid number '{}'", text)),
                }
            }
            _ => self.error(&format!("unexpected character '{}'", b as char)),
        }
    }

    fn read_while<F: Fn(u8) -> bool>(&mut self, f: F) -> FlowResult<String> {
        let mut out = Vec::new();
        while let Some(c) = self.peek()? {
            if !f(c) {
                break;
            }
            out.push(c);
            self.bump()?;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn read_hex4(&mut self) -> FlowResult<u32> {
        let mut code = 0u32;
        for _ in 0..4 {
            let c = match self.bump()? {
                Some(c) => c,
                None => return self.error("unexpected end in unicode escape"),
            };
            let digit = match (c as char).to_digit(16) {
                Some(d) => d,
                None => return self.error("invalid unicode escape"),
            };
            code = code * 16 + digit;
        }
        Ok(code)
    }

    /// opening quote is already consumed
    fn read_string(&mut self) -> FlowResult<String> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            let c = match self.bump()? {
                Some(c) => c,
                None => return self.error("unterminated string"),
            };
            match c {
                b'"' => break,
                b'\\' => {
                    let e = match self.bump()? {
                        Some(e) => e,
                        None => return self.error("unterminated escape"),
                    };
                    let ch = match e {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'/' => '/',
                        b'b' => '\u{8}',
                        b'f' => '\u{c}',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'u' => {
                            let mut code = self.read_hex4()?;
                            if (0xD800..0xDC00).contains(&code) {
                                if self.bump()? != Some(b'\\') || self.bump()? != Some(b'u') {
                                    return self.error("lone surrogate in string");
                                }
                                let low = self.read_hex4()?;
                                code = 0x10000 + ((code - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
                            }
                            match char::from_u32(code) {
                                Some(ch) => ch,
                                None => return self.error("invalid unicode escape"),
                            }
                        }
                        _ => return self.error(&format!("invalid escape '\\{}'", e as char)),
                    };
                    let mut tmp = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
                }
                _ => out.push(c),
            }
        }
        String::from_utf8(out).or_else(|_| self.error("string is not valid utf8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all(text: &str) -> Vec<Token> {
        let mut reader = TokenReader::new(text.as_bytes());
        let mut out = vec![];
        while let Some(t) = reader.next_token().expect("token") {
            out.push(t);
        }
        out
    }

    #[test]
    fn tokenizes_nested() {
        let toks = all(r#"{"a": [1, "two\n", {"b": null}], "c": true}"#);
        assert_eq!(
            toks,
            vec![
                Token::StartObject,
                Token::FieldName("a".into()),
                Token::StartArray,
                Token::Scalar(json!(1)),
                Token::Scalar(json!("two\n")),
                Token::StartObject,
                Token::FieldName("b".into()),
                Token::Scalar(Value::Null),
                Token::EndObject,
                Token::EndArray,
                Token::FieldName("c".into()),
                Token::Scalar(json!(true)),
                Token::EndObject,
            ]
        );
    }

    #[test]
    fn unicode_and_numbers() {
        let toks = all(r#"["é😀", -1.5e2, 18446744073709551615]"#);
        assert_eq!(toks[1], Token::Scalar(json!("é😀")));
        assert_eq!(toks[2], Token::Scalar(json!(-150.0)));
        assert_eq!(toks[3], Token::Scalar(json!(18446744073709551615u64)));
    }

    #[test]
    fn rejects_garbage() {
        let mut reader = TokenReader::new(r#"{"a" 1}"#.as_bytes());
        assert_eq!(reader.next_token().expect("start"), Some(Token::StartObject));
        assert_eq!(reader.next_token().expect("key"), Some(Token::FieldName("a".into())));
        assert!(reader.next_token().is_err());

        let mut reader = TokenReader::new(r#"[1,"#.as_bytes());
        reader.next_token().expect("start");
        reader.next_token().expect("1");
        assert!(reader.next_token().is_err());
    }
}
