use crate::deps::log;
use crate::rule::{FunctionProcessor, MappingRuleItem, RuleFunction, PARAM_MARK};
use chrono::Local;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// process wide sequence used by `>SEQ`
pub fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::SeqCst) + 1
}

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Database specific SQL for pseudo functions.  Anything it cannot express is
/// left as a statement parameter.
pub struct SqlFunctionProcessor {
    pub current_date: &'static str,
}

impl FunctionProcessor for SqlFunctionProcessor {
    fn process(&self, item: &MappingRuleItem) -> Option<String> {
        match RuleFunction::from_name(&item.source_name) {
            Some(RuleFunction::TargetDate) => Some(self.current_date.to_string()),
            _ => Some(PARAM_MARK.to_string()),
        }
    }
}

/// unknown database types behave like oracle
pub fn sql_function_processor(db_type: &str) -> Arc<dyn FunctionProcessor> {
    let current_date = match db_type.to_ascii_uppercase().as_str() {
        "MYSQL" | "MARIADB" | "POSTGRESQL" | "GREENPLUM" => "now()",
        "MSSQL" => "getDate()",
        "DB2" => "CURRENT TIMESTAMP",
        // ORACLE, TIBERO
        _ => "sysdate",
    };
    Arc::new(SqlFunctionProcessor { current_date })
}

/// Resolves functions directly for text output.
pub struct TextFunctionProcessor;

impl FunctionProcessor for TextFunctionProcessor {
    fn process(&self, item: &MappingRuleItem) -> Option<String> {
        match RuleFunction::from_name(&item.source_name) {
            Some(RuleFunction::TargetDate) | Some(RuleFunction::Date) => {
                Some(Local::now().format("%Y-%m-%d").to_string())
            }
            Some(RuleFunction::Seq) => Some(next_sequence().to_string()),
            None => {
                log::warn!("Unknown function {}", item.source_name);
                None
            }
        }
    }
}

/// Value of a `>NAME` statement parameter at bind time.
pub fn bind_function(name: &str) -> Value {
    match RuleFunction::from_name(name) {
        Some(RuleFunction::TargetDate) | Some(RuleFunction::Date) => Value::String(now()),
        Some(RuleFunction::Seq) => Value::from(next_sequence()),
        None => {
            log::warn!("Unknown function {}", name);
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_date_per_database() {
        let item = MappingRuleItem::parse("D", ">TARGET_DATE").expect("item");
        let seq = MappingRuleItem::parse("S", ">SEQ").expect("item");
        assert_eq!(sql_function_processor("mysql").process(&item).as_deref(), Some("now()"));
        assert_eq!(sql_function_processor("MSSQL").process(&item).as_deref(), Some("getDate()"));
        assert_eq!(sql_function_processor("db2").process(&item).as_deref(), Some("CURRENT TIMESTAMP"));
        assert_eq!(sql_function_processor("whatever").process(&item).as_deref(), Some("sysdate"));
        assert_eq!(sql_function_processor("oracle").process(&seq).as_deref(), Some("?"));
    }

    #[test]
    fn sequence_increases() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }
}
