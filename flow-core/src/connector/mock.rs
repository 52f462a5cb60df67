use super::function::TextFunctionProcessor;
use super::{ConnectSession, Connector, MOCK};
use crate::error::{FlowError, FlowResult};
use crate::rule::{FunctionProcessor, MappingRule, RowView};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// tables shared by every connector a factory builds
pub type MockTables = Arc<Mutex<HashMap<String, Vec<Value>>>>;

/// datasource key naming the 1 based row a create fails on
pub const FAIL_AT: &str = "FAIL_AT";

/// In memory store.  Created rows are mapped through the rule into objects
/// keyed by target name and become visible on commit.
pub struct MockConnector {
    tables: MockTables,
    connect: Option<ConnectSession>,
    table: String,
    cursor: VecDeque<Value>,
    pending: Vec<Value>,
    fail_at: Option<u64>,
    sent: u64,
    retrieved: u64,
    error_position: Option<u64>,
}

impl MockConnector {
    pub fn new(tables: MockTables) -> Self {
        MockConnector {
            tables,
            connect: None,
            table: String::new(),
            cursor: VecDeque::new(),
            pending: vec![],
            fail_at: None,
            sent: 0,
            retrieved: 0,
            error_position: None,
        }
    }

    fn with_tables<T, F: FnOnce(&mut HashMap<String, Vec<Value>>) -> T>(&self, f: F) -> T {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut tables)
    }

    fn report(&self, n: u64) {
        if let Some(c) = &self.connect {
            c.progress.report(n);
        }
    }
}

/// a row as the target sees it
pub fn map_row(rule: &mut MappingRule, row: &Value) -> Value {
    if rule.is_empty() {
        return row.clone();
    }
    let items = rule.items();
    let mut mapped = Map::new();
    for item in items.iter() {
        let value = rule
            .apply(item, RowView::of(row))
            .map(Value::String)
            .unwrap_or(Value::Null);
        mapped.insert(item.target_name.clone(), value);
    }
    Value::Object(mapped)
}

#[async_trait]
impl Connector for MockConnector {
    fn connector_type(&self) -> &str {
        MOCK
    }

    fn function_processor(&self, _db_type: &str) -> Option<Arc<dyn FunctionProcessor>> {
        Some(Arc::new(TextFunctionProcessor))
    }

    async fn connect(&mut self, session: ConnectSession) -> FlowResult<()> {
        self.table = session.target()?;
        self.fail_at = session.connect_info.get(FAIL_AT).and_then(|v| v.as_u64());
        self.connect = Some(session);
        Ok(())
    }

    async fn check(&mut self) -> FlowResult<()> {
        let table = self.table.clone();
        match self.with_tables(|t| t.contains_key(&table)) {
            true => Ok(()),
            false => Err(FlowError::not_exist(&table, format!("{} is not exist.", table))),
        }
    }

    async fn count(&mut self) -> FlowResult<u64> {
        let table = self.table.clone();
        let count = self.with_tables(|t| t.get(&table).map(|r| r.len()).unwrap_or(0)) as u64;
        self.report(count);
        Ok(count)
    }

    async fn before_read(&mut self, _rule: &mut MappingRule) -> FlowResult<()> {
        let table = self.table.clone();
        let rows = self
            .with_tables(|t| t.get(&table).cloned())
            .ok_or_else(|| FlowError::not_exist(&table, format!("{} is not exist.", table)))?;
        self.cursor = rows.into();
        self.retrieved = 0;
        Ok(())
    }

    async fn read(&mut self, rule: &mut MappingRule) -> FlowResult<Vec<Value>> {
        let mut all = Vec::new();
        self.read_buffer(rule, &mut all, usize::MAX).await?;
        Ok(all)
    }

    async fn read_buffer(&mut self, _rule: &mut MappingRule, buffer: &mut Vec<Value>, limit: usize) -> FlowResult<usize> {
        let n = limit.min(self.cursor.len());
        buffer.extend(self.cursor.drain(..n));
        self.retrieved += n as u64;
        self.report(self.retrieved);
        Ok(n)
    }

    async fn after_read(&mut self) -> FlowResult<()> {
        self.cursor.clear();
        Ok(())
    }

    async fn before_create(&mut self, _rule: &mut MappingRule) -> FlowResult<()> {
        self.pending.clear();
        self.sent = 0;
        self.error_position = None;
        Ok(())
    }

    async fn create(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64> {
        for row in items {
            let position = self.sent + 1;
            if self.fail_at == Some(position) {
                self.error_position = Some(position);
                return Err(FlowError::Create {
                    position,
                    message: format!("rejected row {}", row),
                });
            }
            self.pending.push(map_row(rule, row));
            self.sent = position;
        }
        self.report(self.sent);
        Ok(items.len() as u64)
    }

    async fn create_partially(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64> {
        self.create(items, rule).await
    }

    async fn after_create(&mut self, _rule: &mut MappingRule) -> FlowResult<()> {
        Ok(())
    }

    async fn delete(&mut self) -> FlowResult<u64> {
        let table = self.table.clone();
        let removed = self.with_tables(|t| t.get_mut(&table).map(|r| r.drain(..).count()).unwrap_or(0));
        Ok(removed as u64)
    }

    async fn commit(&mut self) -> FlowResult<()> {
        let table = self.table.clone();
        let rows = std::mem::take(&mut self.pending);
        self.with_tables(|t| t.entry(table).or_insert_with(Vec::new).extend(rows));
        Ok(())
    }

    async fn rollback(&mut self) -> FlowResult<()> {
        self.pending.clear();
        self.sent = 0;
        self.report(0);
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.cursor.clear();
        Ok(())
    }

    fn sent(&self) -> u64 {
        self.sent
    }

    fn error_position(&self) -> Option<u64> {
        self.error_position
    }
}
