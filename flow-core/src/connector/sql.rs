//! Relational connector.  Statements are generated from the mapping rule and
//! handed to an [SqlSession]; the wire protocol is whatever [SqlDriver] opens.
use super::function::{bind_function, sql_function_processor};
use super::{tags, ConnectSession, Connector, JDBC};
use crate::context::Context;
use crate::deps::log;
use crate::error::{FlowError, FlowResult};
use crate::rule::{literal_columns, FunctionProcessor, MappingRule, RowView, RuleAction, PARAM_MARK};
use crate::sequence::tags as seq;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A batch that stopped part way.  `applied` rows of it went through.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub applied: u64,
    pub message: String,
}

#[async_trait]
pub trait SqlSession: Send + Sync {
    async fn table_exists(&mut self, table: &str) -> FlowResult<bool>;

    /// runs a query and keeps its cursor open for [SqlSession::fetch]
    async fn query(&mut self, sql: &str, params: &[Value], fetch_size: usize) -> FlowResult<()>;

    /// rows of the open cursor keyed by column label, empty when exhausted
    async fn fetch(&mut self, limit: usize) -> FlowResult<Vec<Value>>;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> FlowResult<u64>;

    async fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>], timeout: u64) -> Result<u64, BatchFailure>;

    async fn commit(&mut self) -> FlowResult<()>;

    async fn rollback(&mut self) -> FlowResult<()>;

    async fn close(&mut self) -> FlowResult<()>;
}

#[async_trait]
pub trait SqlDriver: Send + Sync {
    async fn open(&self, connect_info: &Map<String, Value>) -> FlowResult<Box<dyn SqlSession>>;
}

/// Builds `INSERT INTO table (targets) VALUES (values)` from a row shaped like
/// `row` in which every column is a parameter.  The rule's params afterwards
/// hold the bind order of the statement.
pub fn build_insert_sql(table: &str, rule: &mut MappingRule, row: &Value) -> String {
    let mock = match row {
        Value::Object(map) => Value::Object(
            map.keys()
                .map(|k| (k.clone(), Value::String(PARAM_MARK.to_string())))
                .collect(),
        ),
        Value::Array(list) => Value::Array(vec![Value::String(PARAM_MARK.to_string()); list.len()]),
        _ => Value::Null,
    };
    rule.clear_params();
    let items = rule.items();
    let mut columns = Vec::with_capacity(items.len());
    let mut values = Vec::with_capacity(items.len());
    for item in items.iter() {
        columns.push(item.target_name.clone());
        values.push(
            rule.apply(item, RowView::of(&mock))
                .unwrap_or_else(|| PARAM_MARK.to_string()),
        );
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        values.join(", ")
    )
}

fn with_condition(mut sql: String, condition: Option<&str>) -> String {
    if let Some(c) = condition.map(str::trim).filter(|c| !c.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(c);
    }
    sql
}

/// Columns referenced by the rule, in first-seen order, or `*` when there are none.
pub fn build_select_sql(table: &str, rule: &MappingRule, condition: Option<&str>) -> String {
    let mut columns: Vec<String> = Vec::new();
    let mut add = |c: String| {
        if !columns.contains(&c) {
            columns.push(c);
        }
    };
    for item in rule.items().iter() {
        match item.action {
            RuleAction::Reference => add(item.source_name.clone()),
            RuleAction::Literal => literal_columns(&item.source_name).into_iter().for_each(&mut add),
            _ => {}
        }
    }
    let columns = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };
    with_condition(format!("SELECT {} FROM {}", columns, table), condition)
}

pub fn build_count_sql(table: &str, condition: Option<&str>) -> String {
    with_condition(format!("SELECT COUNT(*) AS COUNT FROM {}", table), condition)
}

/// Values for the statement parameters of one row.
///
/// `>NAME` resolves a function, `{KEY}` reads the context, `#n` a tuple
/// position and anything else a column of the row.
pub fn bind_params(params: &[String], context: &Context, row: &Value) -> Vec<Value> {
    let view = RowView::of(row);
    params
        .iter()
        .map(|key| {
            if let Some(name) = key.strip_prefix('>') {
                bind_function(name)
            } else if key.len() >= 2 && key.starts_with('{') && key.ends_with('}') {
                context.get(&key[1..key.len() - 1]).cloned().unwrap_or(Value::Null)
            } else if let Some(index) = key.strip_prefix('#').and_then(|i| i.parse::<usize>().ok()) {
                view.at(index).cloned().unwrap_or(Value::Null)
            } else {
                view.get(key).cloned().unwrap_or(Value::Null)
            }
        })
        .collect()
}

fn not_connected() -> FlowError {
    FlowError::connector("database session is not open", "connect was not called")
}

pub struct SqlConnector {
    driver: Arc<dyn SqlDriver>,
    session: Option<Box<dyn SqlSession>>,
    connect: Option<ConnectSession>,
    query: Option<String>,
    params: Vec<String>,
    pending: Vec<Vec<Value>>,
    batch_size: usize,
    timeout: u64,
    fetch_size: usize,
    flush_only: bool,
    sent: u64,
    retrieved: u64,
    error_position: Option<u64>,
}

impl SqlConnector {
    pub fn new(driver: Arc<dyn SqlDriver>) -> Self {
        SqlConnector {
            driver,
            session: None,
            connect: None,
            query: None,
            params: vec![],
            pending: vec![],
            batch_size: 1,
            timeout: 0,
            fetch_size: 0,
            flush_only: false,
            sent: 0,
            retrieved: 0,
            error_position: None,
        }
    }

    /// the insert statement once the first rows have been seen
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn connect_session(&self) -> FlowResult<&ConnectSession> {
        self.connect.as_ref().ok_or_else(not_connected)
    }

    fn condition(&self) -> Option<String> {
        let connect = self.connect.as_ref()?;
        let condition = connect.sequences.get_str(seq::CONDITION)?;
        Some(connect.context.evaluate(&condition))
    }

    fn prepare(&mut self, first: &Value, rule: &mut MappingRule) -> FlowResult<()> {
        if self.query.is_some() {
            return Ok(());
        }
        let table = self.connect_session()?.target()?;
        let sql = build_insert_sql(&table, rule, first);
        log::debug!("{}", sql);
        self.params = rule.params().to_vec();
        self.query = Some(sql);
        Ok(())
    }

    fn bind_rows(&self, items: &[Value]) -> FlowResult<Vec<Vec<Value>>> {
        let context = &self.connect_session()?.context;
        Ok(items
            .iter()
            .map(|row| bind_params(&self.params, context, row))
            .collect())
    }

    async fn execute_pending(&mut self, rows: Vec<Vec<Value>>) -> FlowResult<()> {
        let query = self.query.clone().unwrap_or_default();
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        match session.execute_batch(&query, &rows, self.timeout).await {
            Ok(_) => {
                self.sent += rows.len() as u64;
                if let Some(c) = &self.connect {
                    c.progress.report(self.sent);
                }
                Ok(())
            }
            Err(failure) => {
                let position = self.sent + failure.applied + 1;
                self.error_position = Some(position);
                Err(FlowError::Create {
                    position,
                    message: failure.message,
                })
            }
        }
    }
}

#[async_trait]
impl Connector for SqlConnector {
    fn connector_type(&self) -> &str {
        JDBC
    }

    fn function_processor(&self, db_type: &str) -> Option<Arc<dyn FunctionProcessor>> {
        Some(sql_function_processor(db_type))
    }

    async fn connect(&mut self, session: ConnectSession) -> FlowResult<()> {
        let opened = self.driver.open(&session.connect_info).await?;
        log::debug!(
            "{} connected to {}",
            session.module_name,
            session.info(tags::URL).unwrap_or_default()
        );
        self.batch_size = session.sequences.get_int_or(seq::BATCHSIZE, 1).max(1) as usize;
        self.timeout = session.sequences.get_int_or(seq::TIMEOUT, 0).max(0) as u64;
        self.fetch_size = session.sequences.get_int_or(seq::FETCHSIZE, 0).max(0) as usize;
        self.flush_only = session.sequences.get_bool_or(seq::FLUSH, false);
        self.session = Some(opened);
        self.connect = Some(session);
        Ok(())
    }

    async fn check(&mut self) -> FlowResult<()> {
        let table = self.connect_session()?.target()?;
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        if false == session.table_exists(&table).await? {
            return Err(FlowError::not_exist(&table, format!("{} is not exist.", table)));
        }
        Ok(())
    }

    async fn count(&mut self) -> FlowResult<u64> {
        let connect = self.connect_session()?;
        let sql = match connect.sequences.get_str(seq::SQL) {
            Some(sql) => connect.context.evaluate(&sql),
            None => build_count_sql(&connect.target()?, self.condition().as_deref()),
        };
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        session.query(&sql, &[], 1).await?;
        let rows = session.fetch(1).await?;
        let count = rows
            .first()
            .and_then(|r| r.get("COUNT").or_else(|| r.as_object().and_then(|m| m.values().next())))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0);
        if let Some(c) = &self.connect {
            c.progress.report(count);
        }
        Ok(count)
    }

    async fn before_read(&mut self, rule: &mut MappingRule) -> FlowResult<()> {
        let connect = self.connect_session()?;
        let sql = match connect.sequences.get_str(seq::SQL) {
            Some(sql) => connect.context.evaluate(&sql),
            None => build_select_sql(&connect.target()?, rule, self.condition().as_deref()),
        };
        log::debug!("{}", sql);
        self.retrieved = 0;
        let fetch_size = self.fetch_size;
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        session.query(&sql, &[], fetch_size).await
    }

    async fn read(&mut self, rule: &mut MappingRule) -> FlowResult<Vec<Value>> {
        let mut all = Vec::new();
        while self.read_buffer(rule, &mut all, usize::MAX).await? > 0 {}
        Ok(all)
    }

    async fn read_buffer(&mut self, _rule: &mut MappingRule, buffer: &mut Vec<Value>, limit: usize) -> FlowResult<usize> {
        let chunk = if self.fetch_size > 0 { self.fetch_size.min(limit) } else { limit };
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        let rows = session.fetch(chunk).await?;
        let n = rows.len();
        self.retrieved += n as u64;
        if false == self.flush_only {
            buffer.extend(rows);
        }
        if let Some(c) = &self.connect {
            c.progress.report(self.retrieved);
        }
        Ok(n)
    }

    async fn after_read(&mut self) -> FlowResult<()> {
        Ok(())
    }

    async fn before_create(&mut self, _rule: &mut MappingRule) -> FlowResult<()> {
        self.query = None;
        self.pending.clear();
        self.sent = 0;
        self.error_position = None;
        Ok(())
    }

    async fn create(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64> {
        let first = match items.first() {
            Some(f) => f,
            None => return Ok(0),
        };
        self.prepare(first, rule)?;
        let before = self.sent;
        let mut rows = self.bind_rows(items)?;
        while !rows.is_empty() {
            let rest = rows.split_off(self.batch_size.min(rows.len()));
            self.execute_pending(rows).await?;
            rows = rest;
        }
        Ok(self.sent - before)
    }

    async fn create_partially(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64> {
        let before = self.sent;
        match items.first() {
            None => {
                if !self.pending.is_empty() {
                    let rows = std::mem::take(&mut self.pending);
                    self.execute_pending(rows).await?;
                }
            }
            Some(first) => {
                self.prepare(first, rule)?;
                let rows = self.bind_rows(items)?;
                self.pending.extend(rows);
                while self.pending.len() >= self.batch_size {
                    let rest = self.pending.split_off(self.batch_size);
                    let rows = std::mem::replace(&mut self.pending, rest);
                    self.execute_pending(rows).await?;
                }
            }
        }
        Ok(self.sent - before)
    }

    async fn after_create(&mut self, _rule: &mut MappingRule) -> FlowResult<()> {
        Ok(())
    }

    async fn delete(&mut self) -> FlowResult<u64> {
        let table = self.connect_session()?.target()?;
        let sql = with_condition(format!("DELETE FROM {}", table), self.condition().as_deref());
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        session.execute(&sql, &[]).await
    }

    async fn commit(&mut self) -> FlowResult<()> {
        match self.session.as_mut() {
            Some(s) => s.commit().await,
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> FlowResult<()> {
        self.pending.clear();
        self.sent = 0;
        if let Some(c) = &self.connect {
            c.progress.report(0);
        }
        match self.session.as_mut() {
            Some(s) => s.rollback().await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> FlowResult<()> {
        match self.session.take() {
            Some(mut s) => s.close().await,
            None => Ok(()),
        }
    }

    fn sent(&self) -> u64 {
        self.sent
    }

    fn error_position(&self) -> Option<u64> {
        self.error_position
    }
}

/// What a [RecordingDriver] session has seen.
#[derive(Debug, Default)]
pub struct Recorded {
    pub tables: HashMap<String, Vec<Value>>,
    /// every statement with its bound rows
    pub statements: Vec<(String, Vec<Vec<Value>>)>,
    /// rows of uncommitted batches
    pub pending: Vec<Vec<Value>>,
    pub committed: Vec<Vec<Value>>,
    pub commits: usize,
    pub rollbacks: usize,
    pub closed: usize,
    /// a batch row holding this value fails
    pub fail_value: Option<Value>,
}

/// Driver that records statements instead of running them.  Queries return the
/// rows stored under the table named after `FROM`.
#[derive(Clone, Default)]
pub struct RecordingDriver {
    pub state: Arc<Mutex<Recorded>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        RecordingDriver::default()
    }

    pub fn insert_table<T: Into<String>>(&self, table: T, rows: Vec<Value>) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.tables.insert(table.into(), rows);
    }

    pub fn fail_on(&self, value: Value) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.fail_value = Some(value);
    }
}

#[async_trait]
impl SqlDriver for RecordingDriver {
    async fn open(&self, _connect_info: &Map<String, Value>) -> FlowResult<Box<dyn SqlSession>> {
        Ok(Box::new(RecordingSession {
            state: self.state.clone(),
            cursor: std::collections::VecDeque::new(),
        }))
    }
}

struct RecordingSession {
    state: Arc<Mutex<Recorded>>,
    cursor: std::collections::VecDeque<Value>,
}

impl RecordingSession {
    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn table_of(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    words.find(|w| w.eq_ignore_ascii_case("FROM"))?;
    words.next().map(|t| t.to_string())
}

#[async_trait]
impl SqlSession for RecordingSession {
    async fn table_exists(&mut self, table: &str) -> FlowResult<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn query(&mut self, sql: &str, params: &[Value], _fetch_size: usize) -> FlowResult<()> {
        let mut state = self.lock();
        state.statements.push((sql.to_string(), vec![params.to_vec()]));
        let rows = table_of(sql)
            .and_then(|t| state.tables.get(&t).cloned())
            .ok_or_else(|| FlowError::connector("query failed", format!("no table in {}", sql)))?;
        drop(state);
        self.cursor = if sql.to_ascii_uppercase().starts_with("SELECT COUNT(*)") {
            vec![serde_json::json!({ "COUNT": rows.len() })].into()
        } else {
            rows.into()
        };
        Ok(())
    }

    async fn fetch(&mut self, limit: usize) -> FlowResult<Vec<Value>> {
        let n = limit.min(self.cursor.len());
        Ok(self.cursor.drain(..n).collect())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> FlowResult<u64> {
        let mut state = self.lock();
        state.statements.push((sql.to_string(), vec![params.to_vec()]));
        let removed = match table_of(sql).and_then(|t| state.tables.get_mut(&t)) {
            Some(rows) if sql.trim_start().to_ascii_uppercase().starts_with("DELETE") => {
                let n = rows.len() as u64;
                rows.clear();
                n
            }
            _ => 0,
        };
        Ok(removed)
    }

    async fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>], _timeout: u64) -> Result<u64, BatchFailure> {
        let mut state = self.lock();
        state.statements.push((sql.to_string(), rows.to_vec()));
        for (i, row) in rows.iter().enumerate() {
            if state.fail_value.as_ref().map(|f| row.contains(f)).unwrap_or(false) {
                return Err(BatchFailure {
                    applied: i as u64,
                    message: format!("rejected row {:?}", row),
                });
            }
            state.pending.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> FlowResult<()> {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> FlowResult<()> {
        let mut state = self.lock();
        state.pending.clear();
        state.rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.lock().closed += 1;
        Ok(())
    }
}
