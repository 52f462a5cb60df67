use super::function::TextFunctionProcessor;
use super::{tags, ConnectSession, Connector, CSV, FILE};
use crate::carrier::{DocumentCarrier, DEFAULT_DATA_TAG};
use crate::deps::log;
use crate::error::{FlowError, FlowResult};
use crate::rule::{FunctionProcessor, MappingRule};
use crate::template::DocumentTemplate;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

enum Source {
    Document(DocumentCarrier),
    Csv(csv::Reader<std::fs::File>, csv::StringRecord),
}

impl Source {
    /// Opens on the blocking pool; the csv and document readers are synchronous.
    async fn open(kind: &'static str, path: PathBuf) -> FlowResult<Self> {
        tokio::task::spawn_blocking(move || Source::open_blocking(kind, &path)).await?
    }

    fn open_blocking(kind: &str, path: &PathBuf) -> FlowResult<Self> {
        if kind == CSV {
            let mut reader = csv::Reader::from_path(path).map_err(FlowError::document)?;
            let headers = reader.headers().map_err(FlowError::document)?.clone();
            return Ok(Source::Csv(reader, headers));
        }
        let file = std::fs::File::open(path)
            .map_err(|e| FlowError::not_exist(path.display(), e))?;
        let carrier = DocumentCarrier::new(Box::new(BufReader::new(file)), None, DEFAULT_DATA_TAG, 1)?;
        Ok(Source::Document(carrier))
    }

    /// Reads up to `limit` rows on the blocking pool and hands the source back.
    async fn fill(self, limit: usize) -> FlowResult<(Self, Vec<Value>)> {
        tokio::task::spawn_blocking(move || -> FlowResult<(Source, Vec<Value>)> {
            let mut source = self;
            let mut rows = Vec::new();
            while rows.len() < limit {
                match source.next()? {
                    Some(row) => rows.push(row),
                    None => break,
                }
            }
            Ok((source, rows))
        })
        .await?
    }

    fn next(&mut self) -> FlowResult<Option<Value>> {
        match self {
            Source::Document(carrier) => carrier.next_item(),
            Source::Csv(reader, headers) => {
                let mut record = csv::StringRecord::new();
                if false == reader.read_record(&mut record).map_err(FlowError::document)? {
                    return Ok(None);
                }
                let row: Map<String, Value> = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
                    .collect();
                Ok(Some(Value::Object(row)))
            }
        }
    }
}

/// Local files.  Output is rendered through the bound template; input is a
/// JSON document (`FILE`) or a headed CSV file (`CSV`).
pub struct FileConnector {
    kind: &'static str,
    home: PathBuf,
    connect: Option<ConnectSession>,
    path: Option<PathBuf>,
    template: Option<Arc<DocumentTemplate>>,
    writer: Option<BufWriter<fs::File>>,
    source: Option<Source>,
    sent: u64,
    retrieved: u64,
}

impl FileConnector {
    pub fn new<P: Into<PathBuf>>(home: P) -> Self {
        FileConnector::with_kind(home, FILE)
    }

    pub fn csv<P: Into<PathBuf>>(home: P) -> Self {
        FileConnector::with_kind(home, CSV)
    }

    fn with_kind<P: Into<PathBuf>>(home: P, kind: &'static str) -> Self {
        FileConnector {
            kind,
            home: home.into(),
            connect: None,
            path: None,
            template: None,
            writer: None,
            source: None,
            sent: 0,
            retrieved: 0,
        }
    }

    /// the resolved file once connected
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn resolved(&self) -> FlowResult<&PathBuf> {
        self.path
            .as_ref()
            .ok_or_else(|| FlowError::connector("file is not resolved", "connect was not called"))
    }

    fn parts(&mut self) -> FlowResult<(&ConnectSession, &DocumentTemplate, &mut BufWriter<fs::File>)> {
        let connect = self
            .connect
            .as_ref()
            .ok_or_else(|| FlowError::connector("file is not resolved", "connect was not called"))?;
        let template = self
            .template
            .as_deref()
            .ok_or_else(|| FlowError::config("no template bound to the file connector"))?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FlowError::connector("file is not open for writing", "before_create was not called"))?;
        Ok((connect, template, writer))
    }

    async fn write(&mut self, text: &str) -> FlowResult<()> {
        let (_, _, writer) = self.parts()?;
        writer.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn connector_type(&self) -> &str {
        self.kind
    }

    fn set_template(&mut self, template: Arc<DocumentTemplate>) {
        self.template = Some(template);
    }

    fn function_processor(&self, _db_type: &str) -> Option<Arc<dyn FunctionProcessor>> {
        Some(Arc::new(TextFunctionProcessor))
    }

    async fn connect(&mut self, session: ConnectSession) -> FlowResult<()> {
        let mut path = self.home.clone();
        if let Some(url) = session.info(tags::URL).filter(|u| !u.is_empty()) {
            path.push(url);
        }
        path.push(session.target()?);
        log::debug!("{} uses {}", session.module_name, path.display());
        self.path = Some(path);
        self.connect = Some(session);
        Ok(())
    }

    async fn check(&mut self) -> FlowResult<()> {
        let path = self.resolved()?;
        if fs::metadata(path).await.is_err() {
            return Err(FlowError::not_exist(path.display(), format!("{} is not exist.", path.display())));
        }
        Ok(())
    }

    async fn count(&mut self) -> FlowResult<u64> {
        let path = self.resolved()?.clone();
        let kind = self.kind;
        let count = tokio::task::spawn_blocking(move || -> FlowResult<u64> {
            let mut source = Source::open_blocking(kind, &path)?;
            let mut count = 0u64;
            while source.next()?.is_some() {
                count += 1;
            }
            Ok(count)
        })
        .await??;
        if let Some(c) = &self.connect {
            c.progress.report(count);
        }
        Ok(count)
    }

    async fn before_read(&mut self, _rule: &mut MappingRule) -> FlowResult<()> {
        self.source = None;
        self.retrieved = 0;
        let path = self.resolved()?.clone();
        self.source = Some(Source::open(self.kind, path).await?);
        Ok(())
    }

    async fn read(&mut self, rule: &mut MappingRule) -> FlowResult<Vec<Value>> {
        let mut all = Vec::new();
        self.read_buffer(rule, &mut all, usize::MAX).await?;
        Ok(all)
    }

    async fn read_buffer(&mut self, _rule: &mut MappingRule, buffer: &mut Vec<Value>, limit: usize) -> FlowResult<usize> {
        let source = match self.source.take() {
            Some(source) => source,
            None => Source::open(self.kind, self.resolved()?.clone()).await?,
        };
        let (source, rows) = source.fill(limit).await?;
        self.source = Some(source);
        let n = rows.len();
        buffer.extend(rows);
        self.retrieved += n as u64;
        if let Some(c) = &self.connect {
            c.progress.report(self.retrieved);
        }
        Ok(n)
    }

    async fn after_read(&mut self) -> FlowResult<()> {
        self.source = None;
        Ok(())
    }

    async fn before_create(&mut self, rule: &mut MappingRule) -> FlowResult<()> {
        let path = self.resolved()?.clone();
        if let Some(parent) = path.parent() {
            if false == parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        self.writer = Some(BufWriter::new(fs::File::create(&path).await?));
        self.sent = 0;
        let (connect, template, _) = self.parts()?;
        let header = template.make_header(&connect.context, rule, None);
        self.write(&header).await
    }

    async fn create(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64> {
        let sent = self.sent;
        let (connect, template, _) = self.parts()?;
        let body = template.make_body(&connect.context, rule, Some(items), sent);
        self.write(&body).await?;
        self.sent += items.len() as u64;
        if let Some(c) = &self.connect {
            c.progress.report(self.sent);
        }
        Ok(items.len() as u64)
    }

    async fn create_partially(&mut self, items: &[Value], rule: &mut MappingRule) -> FlowResult<u64> {
        if items.is_empty() {
            let (_, _, writer) = self.parts()?;
            writer.flush().await?;
            return Ok(0);
        }
        self.create(items, rule).await
    }

    async fn create_binary(&mut self, data: &Bytes) -> FlowResult<u64> {
        let (_, _, writer) = self.parts()?;
        writer.write_all(data).await?;
        self.sent += data.len() as u64;
        Ok(data.len() as u64)
    }

    async fn after_create(&mut self, rule: &mut MappingRule) -> FlowResult<()> {
        let (connect, template, _) = self.parts()?;
        let footer = template.make_footer(&connect.context, rule, None);
        self.write(&footer).await?;
        let (_, _, writer) = self.parts()?;
        writer.flush().await?;
        Ok(())
    }

    async fn delete(&mut self) -> FlowResult<u64> {
        let path = self.resolved()?;
        match fs::remove_file(path).await {
            Ok(_) => Ok(1),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&mut self) -> FlowResult<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> FlowResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.source = None;
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }

    fn sent(&self) -> u64 {
        self.sent
    }

    fn error_position(&self) -> Option<u64> {
        None
    }
}
