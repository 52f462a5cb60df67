use flow_core::context::Context;
use flow_core::deps::*;
use flow_core::meta::MemoryMetaSource;
use flow_job::dispatcher::TargetDispatcher;
use flow_job::preamble::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn flow_writing(table: &str) -> Value {
    json!({
        "ENTRY": "WRITE",
        "MODULE": {
            "WRITE": { "CONNECT": { "CONNECTOR": "MOCK" }, "ACTION": "CREATE", "TARGET": table, "BATCHSIZE": 2 }
        }
    })
}

fn agent(concurrency: bool) -> (ChannelAgent, Arc<FlowEnv>) {
    let meta = MemoryMetaSource::new();
    for target in ["A", "B", "C"] {
        meta.insert("FG_FLOW", target, flow_writing(&format!("OUT_{}", target)));
    }
    let mut config = FlowConfig::default();
    config.channel.concurrency = concurrency;
    config.channel.workers = 2;
    let env = Arc::new(FlowEnv::new(config, Arc::new(meta)));
    (ChannelAgent::new(env.clone()), env)
}

fn request() -> Context {
    let mut context = Context::new();
    context.add("ITEM", json!([{ "ID": 1 }, { "ID": 2 }, { "ID": 3 }]));
    context
}

async fn run_targets(concurrency: bool) {
    let (agent, env) = agent(concurrency);
    let targets: Vec<String> = ["A", "B", "C", "Z"].iter().map(|t| t.to_string()).collect();
    let replies = agent.process(&targets, request()).await.expect("process");

    for target in ["A", "B", "C"] {
        assert_eq!(replies[target], json!({ "result": "success", "reason": "" }));
        let tables = env.connectors.mock_tables();
        let tables = tables.lock().expect("tables");
        assert_eq!(tables.get(&format!("OUT_{}", target)).map(|r| r.len()), Some(3));
    }
    assert_eq!(replies["Z"]["result"], json!("fail"));
    let latest = agent.latest();
    assert_eq!(latest.result, "fail");
    assert!(latest.message.starts_with("Z: "));
    agent.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn targets_run_in_order() {
    run_targets(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn targets_run_on_the_worker_pool() {
    run_targets(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn final_read_is_the_reply() {
    let meta = MemoryMetaSource::new();
    let env = Arc::new(FlowEnv::new(FlowConfig::default(), Arc::new(meta)));
    {
        let tables = env.connectors.mock_tables();
        tables.lock().expect("tables").insert("SRC".to_string(), vec![json!({ "A": 1 })]);
    }
    let def = FlowDefinition::from_value(&json!({
        "ENTRY": { "GET": "READ" },
        "MODULE": { "READ": { "CONNECT": { "CONNECTOR": "MOCK" }, "ACTION": "READ", "TARGET": "SRC" } }
    }))
    .expect("definition");
    let mut context = Context::new();
    context.add("HTTP_REQUEST_METHOD", "GET");
    let reply = ChannelJob::new(env, "reader", Arc::new(context))
        .with_definition(def)
        .run()
        .await;
    assert_eq!(reply, json!({ "ITEMS": [{ "A": 1 }] }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_target_is_never_run_twice_at_once() {
    let dispatcher = TargetDispatcher::start(3, 8);
    assert_eq!(dispatcher.worker_for("T1"), dispatcher.worker_for("T1"));

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut pending = Vec::new();
    for i in 0..5u64 {
        let order = order.clone();
        let job = Box::pin(async move {
            // later jobs sleep less, so only serial execution keeps the order
            tokio::time::sleep(Duration::from_millis(25 - i * 5)).await;
            order.lock().expect("order").push(i);
            json!(i)
        });
        pending.push(dispatcher.submit("T1", job).await.expect("submit"));
    }
    for (i, rx) in pending.into_iter().enumerate() {
        assert_eq!(rx.await.expect("reply"), json!(i));
    }
    assert_eq!(*order.lock().expect("order"), vec![0, 1, 2, 3, 4]);
    assert_eq!(dispatcher.shutdown().await.expect("shutdown"), 5);
}
