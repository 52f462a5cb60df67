use flow_core::connector::sql::{RecordingDriver, SqlConnector};
use flow_core::connector::*;
use flow_core::handler::ProgressReporter;
use flow_core::preamble::*;
use flow_core::template::{registry, DocumentTemplate};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn object(v: Value) -> Map<String, Value> {
    v.as_object().cloned().expect("object")
}

fn session(info: Value, sequences: Value) -> ConnectSession {
    let mut context = Context::new();
    context.add("CHANNEL_ID", "ch-1");
    ConnectSession {
        module_name: "TEST".to_string(),
        connect_info: object(info),
        sequences: Sequences::from(object(sequences)),
        context: Arc::new(context),
        progress: ProgressReporter::detached(),
    }
}

fn rule(v: Value) -> MappingRule {
    MappingRule::from_map(v.as_object().expect("object")).expect("rule")
}

fn init_log() {
    use simple_logger::SimpleLogger;
    let _ = SimpleLogger::new().with_level(log::LevelFilter::Info).init();
}

fn scratch_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("flow-core-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn file_round_trip_through_the_json_template() {
    init_log();
    let home = scratch_dir();
    let factory = ConnectorFactory::new(&home);
    let info = json!({ "CONNECTOR": "FILE", "URL": "out" });

    let mut writer = factory.create(&object(info.clone())).expect("file connector");
    let template = DocumentTemplate::parse(registry::builtin("JSON").expect("json")).expect("parse");
    writer.set_template(Arc::new(template));
    writer
        .connect(session(info.clone(), json!({ "TARGET": "{CHANNEL_ID}.json" })))
        .await
        .expect("connect");
    let mut r = rule(json!({ "NAME": "IN", "CH": "{CHANNEL_ID}" }));
    writer.before_create(&mut r).await.expect("before create");
    writer.create_partially(&[json!({"IN": "a"}), json!({"IN": "b"})], &mut r).await.expect("create");
    writer.create_partially(&[json!({"IN": "c"})], &mut r).await.expect("create");
    writer.create_partially(&[], &mut r).await.expect("flush");
    writer.after_create(&mut r).await.expect("after create");
    writer.close().await.expect("close");
    assert_eq!(writer.sent(), 3);

    let mut reader = factory.create(&object(info.clone())).expect("file connector");
    reader
        .connect(session(info, json!({ "TARGET": "ch-1.json" })))
        .await
        .expect("connect");
    reader.check().await.expect("exists");
    assert_eq!(reader.count().await.expect("count"), 3);
    let mut none = MappingRule::new();
    reader.before_read(&mut none).await.expect("before read");
    let mut buffer = Vec::new();
    assert_eq!(reader.read_buffer(&mut none, &mut buffer, 2).await.expect("read"), 2);
    assert_eq!(reader.read_buffer(&mut none, &mut buffer, 2).await.expect("read"), 1);
    assert_eq!(reader.read_buffer(&mut none, &mut buffer, 2).await.expect("read"), 0);
    // the system item renders as a statement parameter
    assert_eq!(buffer[2], json!({ "NAME": "c", "CH": "?" }));
    reader.close().await.expect("close");

    assert_eq!(reader.delete().await.expect("delete"), 1);
    assert!(reader.check().await.is_err());
    let _ = std::fs::remove_dir_all(home);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn csv_files_read_as_objects() {
    init_log();
    let home = scratch_dir();
    std::fs::write(home.join("in.csv"), "ID,NAME\n1,one\n2,two\n").expect("write csv");
    let factory = ConnectorFactory::new(&home);
    let info = json!({ "CONNECTOR": "csv" });
    let mut c = factory.create(&object(info.clone())).expect("csv connector");
    c.connect(session(info, json!({ "TARGET": "in.csv" }))).await.expect("connect");
    let mut r = MappingRule::new();
    c.before_read(&mut r).await.expect("before read");
    let rows = c.read(&mut r).await.expect("read");
    assert_eq!(rows, vec![json!({"ID": "1", "NAME": "one"}), json!({"ID": "2", "NAME": "two"})]);
    let _ = std::fs::remove_dir_all(home);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn csv_reads_resume_between_buffers() {
    init_log();
    let home = scratch_dir();
    let body: String = (0..7).map(|i| format!("{},n{}\n", i, i)).collect();
    std::fs::write(home.join("many.csv"), format!("ID,NAME\n{}", body)).expect("write csv");
    let factory = ConnectorFactory::new(&home);
    let info = json!({ "CONNECTOR": "CSV" });
    let mut c = factory.create(&object(info.clone())).expect("csv connector");
    c.connect(session(info, json!({ "TARGET": "many.csv" }))).await.expect("connect");
    assert_eq!(c.count().await.expect("count"), 7);

    let mut r = MappingRule::new();
    c.before_read(&mut r).await.expect("before read");
    let mut buffer = Vec::new();
    let mut sizes = Vec::new();
    loop {
        let n = c.read_buffer(&mut r, &mut buffer, 3).await.expect("read");
        sizes.push(n);
        if n == 0 {
            break;
        }
    }
    assert_eq!(sizes, vec![3, 3, 1, 0]);
    assert_eq!(buffer[6], json!({ "ID": "6", "NAME": "n6" }));
    c.after_read().await.expect("after read");
    let _ = std::fs::remove_dir_all(home);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn sql_batches_and_flushes() {
    init_log();
    let driver = RecordingDriver::new();
    let mut c = SqlConnector::new(Arc::new(driver.clone()));
    let info = json!({ "CONNECTOR": "JDBC", "DBTYPE": "mysql" });
    c.connect(session(info, json!({ "TARGET": "T_OUT", "BATCHSIZE": 2 })))
        .await
        .expect("connect");
    let mut r = rule(json!({ "OUT": "IN", "AT": ">TARGET_DATE", "CH": "{CHANNEL_ID}" }));
    r.set_function_processor(c.function_processor("mysql"));
    c.before_create(&mut r).await.expect("before create");

    let rows: Vec<Value> = (0..5).map(|i| json!({ "IN": i })).collect();
    assert_eq!(c.create_partially(&rows[..3], &mut r).await.expect("first"), 2);
    assert_eq!(c.create_partially(&rows[3..], &mut r).await.expect("second"), 2);
    assert_eq!(c.create_partially(&[], &mut r).await.expect("flush"), 1);
    c.commit().await.expect("commit");
    assert_eq!(c.query(), Some("INSERT INTO T_OUT (OUT, AT, CH) VALUES (?, now(), ?)"));

    let state = driver.state.lock().expect("state");
    let batches: Vec<usize> = state.statements.iter().map(|(_, rows)| rows.len()).collect();
    assert_eq!(batches, vec![2, 2, 1]);
    assert_eq!(state.committed[4], vec![json!(4), json!("ch-1")]);
    assert_eq!(state.commits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn sql_failure_reports_the_item_offset() {
    init_log();
    let driver = RecordingDriver::new();
    driver.fail_on(json!(6));
    let mut c = SqlConnector::new(Arc::new(driver.clone()));
    c.connect(session(json!({}), json!({ "TARGET": "T", "BATCHSIZE": 4 })))
        .await
        .expect("connect");
    let mut r = rule(json!({ "OUT": "IN" }));
    c.before_create(&mut r).await.expect("before create");
    let rows: Vec<Value> = (0..8).map(|i| json!({ "IN": i })).collect();
    match c.create(&rows, &mut r).await {
        Err(FlowError::Create { position, .. }) => assert_eq!(position, 7),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(c.error_position(), Some(7));
    c.rollback().await.expect("rollback");
    assert_eq!(c.sent(), 0);
    assert_eq!(driver.state.lock().expect("state").rollbacks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn sql_reads_selected_columns() {
    init_log();
    let driver = RecordingDriver::new();
    driver.insert_table("T_IN", (0..5).map(|i| json!({ "A": i, "B": "x" })).collect());
    let mut c = SqlConnector::new(Arc::new(driver.clone()));
    c.connect(session(json!({}), json!({ "TARGET": "T_IN", "CONDITION": "A >= 0" })))
        .await
        .expect("connect");
    c.check().await.expect("table exists");
    assert_eq!(c.count().await.expect("count"), 5);
    let mut r = rule(json!({ "OUT": "A", "NOTE": "+$B$!" }));
    c.before_read(&mut r).await.expect("before read");
    let mut buffer = Vec::new();
    assert_eq!(c.read_buffer(&mut r, &mut buffer, 3).await.expect("read"), 3);
    assert_eq!(c.read_partially(&mut r).await.expect("rest").len(), 2);
    let state = driver.state.lock().expect("state");
    let (select, _) = state.statements.last().expect("select");
    assert_eq!(select, "SELECT A, B FROM T_IN WHERE A >= 0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn factory_rejects_unregistered_types() {
    init_log();
    let factory = ConnectorFactory::new(".");
    assert!(matches!(
        factory.create(&object(json!({ "CONNECTOR": "SFTP" }))),
        Err(FlowError::Unsupported(_))
    ));
    assert!(matches!(
        factory.create(&object(json!({}))),
        Err(FlowError::Config(_))
    ));
    factory.register_sql_driver(Arc::new(RecordingDriver::new()));
    let c = factory.create(&object(json!({ "CONNECTOR": "jdbc" }))).expect("jdbc");
    assert_eq!(c.connector_type(), JDBC);
}

fn shareable<T: Send + Sync>() {}

#[test]
fn connectors_can_cross_threads() {
    shareable::<SqlConnector>();
    shareable::<file::FileConnector>();
    shareable::<mock::MockConnector>();
    shareable::<flow_core::carrier::DocumentCarrier>();
    shareable::<Box<dyn Connector>>();
}
