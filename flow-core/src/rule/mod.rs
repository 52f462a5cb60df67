//! Column mapping rules.  A rule is an ordered list of `target : source`
//! items; applying it to a row yields the column text and, as a side effect,
//! the ordered parameter names used to bind a prepared statement.
use crate::context::stringify;
use crate::deps::log;
use crate::error::{FlowError, FlowResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

pub mod date;
pub mod item;

pub use item::{MappingRuleItem, RuleAction, RuleType};

/// value that keeps a statement parameter dynamic
pub const PARAM_MARK: &str = "?";

/// Shape of a row handed to [MappingRule::apply].
#[derive(Debug, Clone, Copy)]
pub enum RowView<'a> {
    Named(&'a Map<String, Value>),
    Positional(&'a [Value]),
    Absent,
}

impl<'a> RowView<'a> {
    pub fn of(v: &'a Value) -> Self {
        match v {
            Value::Object(map) => RowView::Named(map),
            Value::Array(list) => RowView::Positional(list),
            _ => RowView::Absent,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        match self {
            RowView::Named(map) => map.get(name),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<&'a Value> {
        match self {
            RowView::Positional(list) => list.get(index),
            RowView::Named(map) => map.values().nth(index),
            RowView::Absent => None,
        }
    }
}

/// Pseudo functions referenced by `>NAME` items, keyed by connector type.
pub trait FunctionProcessor: Send + Sync {
    /// `Some("?")` means the value has to be resolved when the statement is bound
    fn process(&self, item: &MappingRuleItem) -> Option<String>;
}

/// names understood by the built in function processors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFunction {
    TargetDate,
    Date,
    Seq,
}

impl RuleFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TARGET_DATE" => Some(RuleFunction::TargetDate),
            "DATE" => Some(RuleFunction::Date),
            "SEQ" => Some(RuleFunction::Seq),
            _ => None,
        }
    }
}

fn column_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$.+?\$").expect("column placeholder regex"))
}

/// Names of the `$COLUMN$` placeholders in a literal, in order of appearance.
pub fn literal_columns(text: &str) -> Vec<String> {
    column_placeholder()
        .find_iter(text)
        .map(|m| {
            let s = m.as_str();
            s[1..s.len() - 1].to_string()
        })
        .collect()
}

enum Coerced {
    Text(String),
    Millis(i64),
    Date(chrono::NaiveDateTime),
}

#[derive(Clone, Default)]
pub struct MappingRule {
    items: Arc<Vec<MappingRuleItem>>,
    function_processor: Option<Arc<dyn FunctionProcessor>>,
    params: Vec<String>,
}

impl std::fmt::Debug for MappingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingRule")
            .field("items", &self.items)
            .field("params", &self.params)
            .finish()
    }
}

impl MappingRule {
    pub fn new() -> Self {
        MappingRule::default()
    }

    pub fn from_map(rules: &Map<String, Value>) -> FlowResult<Self> {
        let mut rule = MappingRule::new();
        rule.add_rule(rules)?;
        Ok(rule)
    }

    /// keys are targets, values are sources
    pub fn add_rule(&mut self, rules: &Map<String, Value>) -> FlowResult<()> {
        let items = Arc::make_mut(&mut self.items);
        for (target, source) in rules.iter() {
            let source = match source {
                Value::String(s) => s.as_str(),
                other => {
                    return Err(FlowError::Rule(format!(
                        "source of {} must be a string, found {}",
                        target, other
                    )))
                }
            };
            items.push(MappingRuleItem::parse(target, source)?);
        }
        Ok(())
    }

    pub fn add_item(&mut self, item: MappingRuleItem) {
        Arc::make_mut(&mut self.items).push(item);
    }

    /// shared handle, cheap to hold while calling [MappingRule::apply]
    pub fn items(&self) -> Arc<Vec<MappingRuleItem>> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_function_processor(&mut self, processor: Option<Arc<dyn FunctionProcessor>>) {
        self.function_processor = processor;
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Resolves one item against a row.  `None` when the row has no value for it.
    pub fn apply(&mut self, item: &MappingRuleItem, row: RowView<'_>) -> Option<String> {
        let value = match item.action {
            RuleAction::System => {
                self.params.push(item.source_name.clone());
                Some(PARAM_MARK.to_string())
            }
            RuleAction::Reference => {
                self.params.push(item.source_name.clone());
                row.get(&item.source_name).and_then(stringify)
            }
            RuleAction::Literal => {
                let mut text = item.source_name.clone();
                for column in literal_columns(&item.source_name) {
                    let data = row.get(&column).and_then(stringify).unwrap_or_default();
                    text = text.replace(&format!("${}$", column), &data);
                    self.params.push(column);
                }
                Some(text)
            }
            RuleAction::Function => {
                let value = self
                    .function_processor
                    .as_ref()
                    .and_then(|p| p.process(item));
                if value.as_deref() == Some(PARAM_MARK) {
                    self.params.push(format!(">{}", item.source_name));
                }
                value
            }
            RuleAction::Order => {
                self.params.push(format!("#{}", item.source_name));
                item.order_index().and_then(|i| row.at(i)).and_then(stringify)
            }
        }?;

        let raw = match item.action {
            RuleAction::Reference => row.get(&item.source_name),
            RuleAction::Order => item.order_index().and_then(|i| row.at(i)),
            _ => None,
        };
        let mut coerced = match raw {
            Some(Value::Number(n)) if n.is_i64() => Coerced::Millis(n.as_i64().unwrap_or_default()),
            _ => Coerced::Text(value),
        };

        if item.source_type == RuleType::Date {
            if let Coerced::Text(text) = &coerced {
                match date::parse(text, &item.source_type_sub) {
                    Ok(d) => coerced = Coerced::Date(d),
                    Err(e) => log::info!("{}", e),
                }
            }
        }

        if item.target_type == RuleType::Date {
            let formatted = match &coerced {
                Coerced::Date(d) => Some(date::format(d, &item.target_type_sub)),
                Coerced::Millis(ms) => date::from_millis(*ms).map(|d| date::format(&d, &item.target_type_sub)),
                // statement templates keep their `?`
                Coerced::Text(text) => {
                    log::info!("Cannot format given Object as a Date: {}", text);
                    None
                }
            };
            if let Some(text) = formatted {
                return Some(text);
            }
        }

        Some(match coerced {
            Coerced::Text(text) => text,
            Coerced::Millis(ms) => ms.to_string(),
            Coerced::Date(d) => d.format(date::NORMALIZED_DATE).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(v: Value) -> MappingRule {
        MappingRule::from_map(v.as_object().expect("object")).expect("rule")
    }

    #[test]
    fn reference_pushes_its_name() {
        let mut r = rule(json!({"OUT": "IN"}));
        let items = r.items();
        let row = json!({"IN": "v1"});
        assert_eq!(r.apply(&items[0], RowView::of(&row)), Some("v1".to_string()));
        assert_eq!(r.params(), &["IN".to_string()]);
    }

    #[test]
    fn literal_placeholders_and_missing_columns() {
        let mut r = rule(json!({"COL": "+nvl($CODE$,$CODE$,$SQ$)"}));
        let items = r.items();
        let row = json!({"CODE": "A1"});
        assert_eq!(r.apply(&items[0], RowView::of(&row)), Some("nvl(A1,A1,)".to_string()));
        assert_eq!(r.params(), &["CODE", "CODE", "SQ"]);
    }

    #[test]
    fn missing_reference_is_absent() {
        let mut r = rule(json!({"OUT": "NOPE"}));
        let items = r.items();
        let row = json!({"IN": 1});
        assert_eq!(r.apply(&items[0], RowView::of(&row)), None);
    }

    #[test]
    fn order_reads_positional_rows() {
        let mut r = rule(json!({"A": "#1", "B": "#0"}));
        let items = r.items();
        let row = json!(["zero", "one"]);
        let out: Vec<_> = items.iter().map(|i| r.apply(i, RowView::of(&row))).collect();
        assert_eq!(out, vec![Some("one".to_string()), Some("zero".to_string())]);
        assert_eq!(r.params(), &["#1", "#0"]);
    }

    #[test]
    fn date_coercion_keeps_value_on_failure() {
        let mut r = rule(json!({
            "D1:DATE:yyyy/MM/dd": "IN:DATE:yyyyMMdd",
            "D2": "IN:DATE:yyyyMMdd",
            "D3:DATE:yyyy": "BAD:DATE:yyyyMMdd",
            "D4:DATE:yyyy-MM-dd": "MS",
        }));
        let items = r.items();
        let row = json!({"IN": "20240131", "BAD": "not a date", "MS": 0});
        let out: Vec<_> = items.iter().map(|i| r.apply(i, RowView::of(&row))).collect();
        assert_eq!(
            out,
            vec![
                Some("2024/01/31".to_string()),
                Some("2024-01-31".to_string()),
                Some("not a date".to_string()),
                Some("1970-01-01".to_string()),
            ]
        );
    }

    struct Now;
    impl FunctionProcessor for Now {
        fn process(&self, item: &MappingRuleItem) -> Option<String> {
            match RuleFunction::from_name(&item.source_name) {
                Some(RuleFunction::TargetDate) => Some("now()".into()),
                _ => Some(PARAM_MARK.into()),
            }
        }
    }

    #[test]
    fn functions_stay_dynamic_when_unresolved() {
        let mut r = rule(json!({"A": ">TARGET_DATE", "B": ">SEQ", "C": "{CHANNEL_CONTEXT.ID}"}));
        r.set_function_processor(Some(Arc::new(Now)));
        let items = r.items();
        let out: Vec<_> = items.iter().map(|i| r.apply(i, RowView::Absent)).collect();
        assert_eq!(out, vec![Some("now()".to_string()), Some("?".to_string()), Some("?".to_string())]);
        assert_eq!(r.params(), &[">SEQ", "{CHANNEL_CONTEXT.ID}"]);
    }
}
