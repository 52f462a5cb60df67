use super::node::{Container, ContainerKind, TemplateNode};
use super::parser;
use crate::context::Context;
use crate::deps::log;
use crate::error::FlowResult;
use crate::rule::{MappingRule, RowView, RuleType};
use regex::Regex;
use serde_json::Value;

pub const LINE_BREAK: &str = "\r\n";

/// A compiled template.  Header and footer render once, the body is rendered
/// per call with a running row index so output can be streamed in pieces.
#[derive(Debug, Clone)]
pub struct DocumentTemplate {
    root: Container,
}

/// A line feed in a delimiter, unescaped or still written as `\n`, becomes
/// a line break; carriage returns are dropped.
fn normalize_delimiter(delimiter: String) -> String {
    delimiter
        .replace("\\r", "")
        .replace('\r', "")
        .replace("\\n", "\n")
        .replace('\n', LINE_BREAK)
}

impl DocumentTemplate {
    pub fn parse(text: &str) -> FlowResult<Self> {
        let lines: Vec<&str> = text.lines().collect();
        DocumentTemplate::from_lines(&lines)
    }

    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> FlowResult<Self> {
        Ok(DocumentTemplate {
            root: parser::parse(lines)?,
        })
    }

    pub fn root(&self) -> &Container {
        &self.root
    }

    pub fn make_header(&self, context: &Context, rule: &mut MappingRule, items: Option<&[Value]>) -> String {
        self.make_once(ContainerKind::Header, context, rule, items)
    }

    pub fn make_footer(&self, context: &Context, rule: &mut MappingRule, items: Option<&[Value]>) -> String {
        self.make_once(ContainerKind::Footer, context, rule, items)
    }

    /// `index` is the number of rows already rendered by earlier calls
    pub fn make_body(
        &self,
        context: &Context,
        rule: &mut MappingRule,
        items: Option<&[Value]>,
        index: u64,
    ) -> String {
        match self.root.section(ContainerKind::Body) {
            Some(body) => Renderer { context, rule }.node(body, items, RowView::Absent, index),
            None => String::new(),
        }
    }

    fn make_once(
        &self,
        kind: ContainerKind,
        context: &Context,
        rule: &mut MappingRule,
        items: Option<&[Value]>,
    ) -> String {
        let section = match self.root.section(kind) {
            Some(section) => section,
            None => return String::new(),
        };
        // columns outside of a row see the first row, e.g. for column names
        let first = items
            .and_then(|list| list.first())
            .map(RowView::of)
            .unwrap_or(RowView::Absent);
        Renderer { context, rule }.node(section, items, first, 0)
    }
}

struct Renderer<'a> {
    context: &'a Context,
    rule: &'a mut MappingRule,
}

impl<'a> Renderer<'a> {
    fn node(&mut self, node: &Container, items: Option<&[Value]>, row: RowView<'_>, index: u64) -> String {
        let mut out = String::new();
        // shared by every if/else among these children
        let mut is_true = false;
        for child in node.children.iter() {
            match child {
                TemplateNode::Text(text) => out.push_str(&self.context.evaluate(text)),
                TemplateNode::LineBreak => out.push_str(LINE_BREAK),
                TemplateNode::Container(c) => match c.kind {
                    ContainerKind::Row => out.push_str(&self.row(c, items, index)),
                    ContainerKind::Column => out.push_str(&self.column(c, row)),
                    ContainerKind::If => {
                        let mut condition = c.attribute("condition");
                        if condition.is_empty() {
                            condition = "false";
                        }
                        if self.context.evaluate(condition).eq_ignore_ascii_case("true") {
                            is_true = true;
                            out.push_str(&self.node(c, items, row, index));
                        } else {
                            is_true = false;
                        }
                    }
                    ContainerKind::Else => {
                        if !is_true {
                            out.push_str(&self.node(c, items, row, index));
                        }
                    }
                    // sections are not rendered inline
                    ContainerKind::Root | ContainerKind::Header | ContainerKind::Body | ContainerKind::Footer => {}
                },
            }
        }
        out
    }

    fn row(&mut self, row: &Container, items: Option<&[Value]>, index: u64) -> String {
        let delimiter = normalize_delimiter(self.context.evaluate(row.attribute("delimiter")));
        let items = match items {
            Some(items) => items,
            None => return self.node(row, None, RowView::Absent, 0),
        };
        let mut out = String::new();
        let mut idx = index;
        for item in items.iter() {
            if idx > 0 {
                out.push_str(&delimiter);
            }
            out.push_str(&self.node(row, Some(items), RowView::of(item), idx));
            idx += 1;
        }
        out
    }

    /// Text children repeat once per rule item; nested tags are not allowed here.
    fn column(&mut self, column: &Container, row: RowView<'_>) -> String {
        let delimiter = normalize_delimiter(self.context.evaluate(column.attribute("delimiter")));
        let ignore_type = column.attribute("ignoreType") == "true";
        let rule_items = self.rule.items();
        let mut out = String::new();
        for child in column.children.iter() {
            let text = match child {
                TemplateNode::Text(text) => text,
                _ => continue,
            };
            for (i, item) in rule_items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&delimiter);
                }
                let mut result = text.clone();
                if text.contains("$SOURCE$") {
                    result = match self.rule.apply(item, row) {
                        Some(source) => {
                            let mut source = conditional_attributes(column, self.context, source);
                            if !ignore_type && item.target_type != RuleType::Number {
                                source = format!("\"{}\"", source);
                            }
                            result.replace("$SOURCE$", &source)
                        }
                        None => String::new(),
                    };
                }
                result = result.replace("?SOURCE?", &item.source_name);
                result = result.replace("?TARGET?", &item.target_name);
                out.push_str(&result);
            }
        }
        out
    }
}

/// Applies the `if=`/`then=` attribute pairs of a column in order, each one
/// working on the output of the previous.
fn conditional_attributes(column: &Container, context: &Context, value: String) -> String {
    let mut current = value;
    let mut j = 0;
    loop {
        let condition = column.attribute_at("if", j);
        if condition.is_empty() {
            break;
        }
        let then = column.attribute_at("then", j);
        j += 1;

        let condition = context.evaluate(condition);
        let mut found: Vec<String> = Vec::new();
        if let Some(pattern) = condition.strip_prefix("regx:") {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => {
                    log::error!("Invalid column condition {}: {}", pattern, e);
                    continue;
                }
            };
            for m in re.find_iter(&current) {
                let s = m.as_str().to_string();
                if !s.is_empty() && !found.contains(&s) {
                    found.push(s);
                }
            }
            if found.is_empty() {
                continue;
            }
        } else if !condition.eq_ignore_ascii_case("true") {
            continue;
        }

        if then.is_empty() {
            continue;
        }
        if let Some(params) = then.strip_prefix("replace:") {
            let mut params = params.split(' ');
            let from = params.next().unwrap_or_default().replace('$', &current);
            let to = params.next().unwrap_or_default().replace('$', &current);
            if from == "#" {
                for f in found.iter() {
                    current = current.replace(f.as_str(), &to.replace('#', f));
                }
            } else if !from.is_empty() {
                current = current.replace(&from, &to);
            }
        } else if let Some(target) = then.strip_prefix("escape:") {
            let target = target.replace('$', &current);
            if target == "#" {
                for f in found.iter() {
                    let escaped = match f.as_str() {
                        "\n" => "\\n".to_string(),
                        "\r" => "\\r".to_string(),
                        "\t" => "\\t".to_string(),
                        "\u{8}" => "\\b".to_string(),
                        other => format!("\\{}", other),
                    };
                    current = current.replace(f.as_str(), &escaped);
                }
            } else if !target.is_empty() {
                current = current.replace(&target, &format!("\\{}", target));
            }
        } else {
            current = then.replace('$', &current);
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiters_break_lines_the_same_way() {
        assert_eq!(normalize_delimiter("\n".to_string()), "\r\n");
        assert_eq!(normalize_delimiter("\r\n".to_string()), "\r\n");
        assert_eq!(normalize_delimiter("\\r\\n".to_string()), "\r\n");
        assert_eq!(normalize_delimiter(";\\n".to_string()), ";\r\n");
        assert_eq!(normalize_delimiter(",".to_string()), ",");
    }
}
