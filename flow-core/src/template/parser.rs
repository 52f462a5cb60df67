use super::node::{Container, ContainerKind, TemplateNode};
use crate::deps::log;
use crate::error::{FlowError, FlowResult};
use std::collections::{HashMap, VecDeque};

type Lines = VecDeque<(usize, String)>;

enum Closed {
    End(usize),
    /// an `#else` ended the if block and was pushed back for the caller
    Else,
    Eof,
}

/// Parses the line oriented template language into a tree rooted at a
/// [ContainerKind::Root].
pub fn parse<S: AsRef<str>>(raw: &[S]) -> FlowResult<Container> {
    let mut lines = preprocess(raw);
    let (children, closed) = parse_children(&mut lines, false)?;
    match closed {
        Closed::End(line) => Err(FlowError::Parse {
            line,
            message: "#end without an opening tag".to_string(),
        }),
        _ => Ok(Container::new(ContainerKind::Root, children)),
    }
}

/// Joins lines ending with a backslash with the following line.  Every line
/// keeps the 1 based number of its first source line.
pub fn preprocess<S: AsRef<str>>(raw: &[S]) -> Lines {
    let mut out = VecDeque::new();
    let mut buffer = String::new();
    let mut start = 0;
    let mut joining = false;
    for (i, line) in raw.iter().enumerate() {
        let line = line.as_ref();
        if !joining {
            start = i + 1;
        }
        if line.trim_end().ends_with('\\') {
            let cut = line.rfind('\\').unwrap_or(line.len());
            buffer.push_str(&line[..cut]);
            joining = true;
        } else {
            buffer.push_str(line);
            out.push_back((start, std::mem::take(&mut buffer)));
            joining = false;
        }
    }
    if joining {
        out.push_back((start, buffer));
    }
    out
}

/// Splits tag text on whitespace honouring single and double quotes.
/// `\n \r \t \b` become control characters, `\\ \" \'` the character
/// itself, any other escaped character keeps its backslash.
pub fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\\' {
            i += 1;
            if let Some(&next) = chars.get(i) {
                match next {
                    'n' => token.push('\n'),
                    'r' => token.push('\r'),
                    't' => token.push('\t'),
                    'b' => token.push('\u{8}'),
                    '\\' | '"' | '\'' => token.push(next),
                    other => {
                        token.push('\\');
                        token.push(other);
                    }
                }
            }
            i += 1;
            continue;
        }
        match quote {
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                ' ' | '\t' | '\n' | '\r' => {
                    if !token.is_empty() {
                        out.push(std::mem::take(&mut token));
                    }
                }
                _ => token.push(ch),
            },
            Some(q) => {
                if ch == q {
                    out.push(std::mem::take(&mut token));
                    quote = None;
                } else {
                    token.push(ch);
                }
            }
        }
        i += 1;
    }
    if !token.is_empty() {
        out.push(token);
    }
    out
}

fn text_node(buffer: &mut Vec<String>, children: &mut Vec<TemplateNode>) {
    if !buffer.is_empty() {
        children.push(TemplateNode::Text(buffer.join("\n")));
        buffer.clear();
    }
}

/// `in_if` is set for the direct body of an `#if`: an `#else` there closes
/// the block and is handed back so the caller parses it as the sibling.
fn parse_children(lines: &mut Lines, in_if: bool) -> FlowResult<(Vec<TemplateNode>, Closed)> {
    let mut children = Vec::new();
    let mut text: Vec<String> = Vec::new();
    let mut after_if = false;

    while let Some((line_no, current)) = lines.pop_front() {
        let trimmed = current.trim();
        let inner = match trimmed.strip_prefix('#') {
            Some(inner) => inner,
            None => {
                text.push(current);
                continue;
            }
        };
        if inner.trim_start().starts_with('#') {
            // ## is a literal #
            text.push(inner.to_string());
            continue;
        }
        if inner.starts_with("else") && in_if && !after_if {
            lines.push_front((line_no, "#else".to_string()));
            text_node(&mut text, &mut children);
            return Ok((children, Closed::Else));
        }
        if inner.trim() == "end" {
            text_node(&mut text, &mut children);
            return Ok((children, Closed::End(line_no)));
        }

        text_node(&mut text, &mut children);
        if inner.trim() == "br" {
            children.push(TemplateNode::LineBreak);
            after_if = false;
            continue;
        }
        let (node, is_if) = parse_tag(inner, line_no, lines)?;
        children.push(TemplateNode::Container(node));
        after_if = is_if;
    }
    text_node(&mut text, &mut children);
    Ok((children, Closed::Eof))
}

fn parse_tag(tag: &str, line_no: usize, lines: &mut Lines) -> FlowResult<(Container, bool)> {
    let tag = tag.trim();
    let mut tokens = tokenize(tag).into_iter();
    let name = tokens.next().unwrap_or_default();

    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    for t in tokens {
        let parts: Vec<&str> = t.split('=').collect();
        if parts.len() != 2 {
            log::warn!("Invalid Tag Parameter Format : {} ### {} (line {})", tag, t, line_no);
            continue;
        }
        attributes
            .entry(parts[0].to_string())
            .or_insert_with(Vec::new)
            .push(parts[1].to_string());
    }

    let kind = match ContainerKind::from_tag(&name) {
        Some(kind) => kind,
        None => {
            log::warn!("Unknown tag #{} at line {}", name, line_no);
            ContainerKind::Root
        }
    };
    let is_if = kind == ContainerKind::If;
    let (children, closed) = parse_children(lines, is_if)?;
    if let Closed::Eof = closed {
        return Err(FlowError::Parse {
            line: line_no,
            message: format!("#{} is not closed", name),
        });
    }
    Ok((
        Container {
            kind,
            attributes,
            children,
        },
        is_if,
    ))
}
