use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Root,
    Header,
    Body,
    Footer,
    Row,
    Column,
    If,
    Else,
}

impl ContainerKind {
    /// unknown tag names become a plain [ContainerKind::Root]
    pub fn from_tag(name: &str) -> Option<Self> {
        match name {
            "root" => Some(ContainerKind::Root),
            "header" => Some(ContainerKind::Header),
            "body" => Some(ContainerKind::Body),
            "footer" => Some(ContainerKind::Footer),
            "row" => Some(ContainerKind::Row),
            "column" => Some(ContainerKind::Column),
            "if" => Some(ContainerKind::If),
            "else" => Some(ContainerKind::Else),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub kind: ContainerKind,
    /// repeated keys keep every value in order, e.g. several `if=`/`then=` pairs
    pub attributes: HashMap<String, Vec<String>>,
    pub children: Vec<TemplateNode>,
}

impl Container {
    pub fn new(kind: ContainerKind, children: Vec<TemplateNode>) -> Self {
        Container {
            kind,
            attributes: HashMap::new(),
            children,
        }
    }

    pub fn attribute(&self, key: &str) -> &str {
        self.attribute_at(key, 0)
    }

    /// empty when missing
    pub fn attribute_at(&self, key: &str, index: usize) -> &str {
        self.attributes
            .get(key)
            .and_then(|values| values.get(index))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    /// first direct child of the given kind
    pub fn section(&self, kind: ContainerKind) -> Option<&Container> {
        self.children.iter().find_map(|child| match child {
            TemplateNode::Container(c) if c.kind == kind => Some(c),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    Text(String),
    LineBreak,
    Container(Container),
}
