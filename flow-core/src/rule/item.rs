use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleType {
    Any,
    String,
    Number,
    Date,
}

impl Default for RuleType {
    fn default() -> Self {
        RuleType::Any
    }
}

impl FromStr for RuleType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(RuleType::Any),
            "STRING" => Ok(RuleType::String),
            "NUMBER" => Ok(RuleType::Number),
            "DATE" => Ok(RuleType::Date),
            other => Err(FlowError::Rule(format!("unknown column type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// `{path}` evaluated against the context, bound as a parameter
    System,
    /// bare column name
    Reference,
    /// `+text` with optional `$COLUMN$` placeholders
    Literal,
    /// `>NAME` resolved by the connector's function processor
    Function,
    /// `#n` index into a positional row
    Order,
}

/// One `target : source` column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRuleItem {
    pub source_name: String,
    pub source_type: RuleType,
    pub source_type_sub: String,
    pub target_name: String,
    pub target_type: RuleType,
    pub target_type_sub: String,
    pub action: RuleAction,
}

/// `name[:TYPE[:SUB]]`.  The suffix is only taken when the second part is a
/// known type, so literals and date formats may contain colons.
fn split_typed(text: &str) -> (String, RuleType, String) {
    let mut parts = text.splitn(3, ':');
    let name = parts.next().unwrap_or_default().trim();
    if let Some(kind) = parts.next() {
        if let Ok(kind) = kind.trim().parse::<RuleType>() {
            let sub = parts.next().unwrap_or_default();
            return (name.to_string(), kind, sub.to_string());
        }
    }
    (text.to_string(), RuleType::Any, String::new())
}

impl MappingRuleItem {
    pub fn parse(target: &str, source: &str) -> FlowResult<Self> {
        let (source_name, source_type, source_type_sub) = split_typed(source.trim());
        let (mut target_name, target_type, target_type_sub) = split_typed(target.trim());

        let (action, mut source_name) = match source_name.chars().next() {
            // kept verbatim, the braces are needed to evaluate it later
            Some('{') => (RuleAction::System, source_name),
            Some('>') => (RuleAction::Function, source_name[1..].to_string()),
            Some('+') => (RuleAction::Literal, source_name[1..].to_string()),
            Some('#') => {
                let index = &source_name[1..];
                if index.parse::<usize>().is_err() {
                    return Err(FlowError::Rule(format!("{} is not a column index", source_name)));
                }
                (RuleAction::Order, index.to_string())
            }
            Some(_) => (RuleAction::Reference, source_name),
            None => {
                return Err(FlowError::Rule(format!("source of {} is empty", target)));
            }
        };

        if source_name == "=" {
            source_name = target_name.clone();
        }
        if target_name == "=" {
            target_name = source_name.clone();
        }
        if target_name.is_empty() {
            return Err(FlowError::Rule(format!("target of {} is empty", source)));
        }

        Ok(MappingRuleItem {
            source_name,
            source_type,
            source_type_sub,
            target_name,
            target_type,
            target_type_sub,
            action,
        })
    }

    /// index of an order action
    pub fn order_index(&self) -> Option<usize> {
        match self.action {
            RuleAction::Order => self.source_name.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_select_the_action() {
        let i = MappingRuleItem::parse("OUT", "IN").expect("reference");
        assert_eq!((i.action, i.source_name.as_str()), (RuleAction::Reference, "IN"));

        let i = MappingRuleItem::parse("OUT", "{CHANNEL_CONTEXT.ID}").expect("system");
        assert_eq!((i.action, i.source_name.as_str()), (RuleAction::System, "{CHANNEL_CONTEXT.ID}"));

        let i = MappingRuleItem::parse("OUT", ">TARGET_DATE").expect("function");
        assert_eq!((i.action, i.source_name.as_str()), (RuleAction::Function, "TARGET_DATE"));

        let i = MappingRuleItem::parse("OUT", "#2").expect("order");
        assert_eq!(i.order_index(), Some(2));

        assert!(MappingRuleItem::parse("OUT", "#x").is_err());
        assert!(MappingRuleItem::parse("OUT", "  ").is_err());
    }

    #[test]
    fn typed_sides_and_same_name() {
        let i = MappingRuleItem::parse("COL_DATE:DATE:yyyyMMdd", "+nvl($CODE$,$CODE$,$SQ$)").expect("literal");
        assert_eq!(i.action, RuleAction::Literal);
        assert_eq!(i.source_name, "nvl($CODE$,$CODE$,$SQ$)");
        assert_eq!(i.target_name, "COL_DATE");
        assert_eq!(i.target_type, RuleType::Date);
        assert_eq!(i.target_type_sub, "yyyyMMdd");

        let i = MappingRuleItem::parse(" = ", "CREATED:DATE:yyyy-MM-dd HH:mm:ss").expect("same");
        assert_eq!(i.target_name, "CREATED");
        assert_eq!(i.source_type, RuleType::Date);
        assert_eq!(i.source_type_sub, "yyyy-MM-dd HH:mm:ss");

        let i = MappingRuleItem::parse("AMOUNT:NUMBER", "=").expect("same");
        assert_eq!(i.source_name, "AMOUNT");
        assert_eq!(i.target_type, RuleType::Number);
    }

    #[test]
    fn typed_names_are_trimmed() {
        let i = MappingRuleItem::parse("AMOUNT :NUMBER", "PRICE : DATE :yyyyMMdd").expect("typed");
        assert_eq!(i.target_name, "AMOUNT");
        assert_eq!(i.target_type, RuleType::Number);
        assert_eq!(i.source_name, "PRICE");
        assert_eq!(i.source_type, RuleType::Date);
        assert_eq!(i.source_type_sub, "yyyyMMdd");
    }
}
