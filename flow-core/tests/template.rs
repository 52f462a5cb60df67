use flow_core::context::Context;
use flow_core::error::FlowError;
use flow_core::rule::MappingRule;
use flow_core::template::*;
use serde_json::{json, Value};

fn rule(v: Value) -> MappingRule {
    MappingRule::from_map(v.as_object().expect("object")).expect("rule")
}

fn context(pairs: &[(&str, &str)]) -> Context {
    let mut ctx = Context::new();
    for (k, v) in pairs {
        ctx.add(*k, *v);
    }
    ctx
}

const IF_ELSE: &str = "#header
#if condition={A}
a
#else
not a
#end
#if condition={B}
b
#else
not b
#end
#end";

#[test]
fn if_and_else_are_siblings() {
    let t = DocumentTemplate::parse(IF_ELSE).expect("parse");
    let header = t.root().section(node::ContainerKind::Header).expect("header");
    let kinds: Vec<_> = header
        .children
        .iter()
        .filter_map(|c| match c {
            node::TemplateNode::Container(c) => Some(c.kind),
            _ => None,
        })
        .collect();
    use node::ContainerKind::*;
    assert_eq!(kinds, vec![If, Else, If, Else]);
}

#[test]
fn each_else_follows_its_own_if() {
    let t = DocumentTemplate::parse(IF_ELSE).expect("parse");
    let mut r = MappingRule::new();
    let out = t.make_header(&context(&[("A", "true"), ("B", "false")]), &mut r, None);
    assert_eq!(out, "anot b");
    let out = t.make_header(&context(&[("A", "false"), ("B", "TRUE")]), &mut r, None);
    assert_eq!(out, "not ab");
}

#[test]
fn lone_else_reuses_the_last_if_of_its_container() {
    let t = DocumentTemplate::parse(
        "#header
#if condition={A}
a
#else
not a
#end
-
#else
lone
#end
#end",
    )
    .expect("parse");
    let mut r = MappingRule::new();
    assert_eq!(t.make_header(&context(&[("A", "true")]), &mut r, None), "a-");
    assert_eq!(t.make_header(&context(&[("A", "false")]), &mut r, None), "not a-lone");
}

#[test]
fn parse_errors_carry_line_numbers() {
    match DocumentTemplate::parse("#header\n#row\nx\n#end") {
        Err(FlowError::Parse { line, .. }) => assert_eq!(line, 1),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    match DocumentTemplate::parse("#header\n#end\n#end") {
        Err(FlowError::Parse { line, .. }) => assert_eq!(line, 3),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn body_continues_across_calls() {
    let t = DocumentTemplate::parse(registry::builtin("JSON").expect("json")).expect("parse");
    let ctx = Context::new();
    let mut r = rule(json!({ "OUT": "IN", "N:NUMBER": "NUM" }));
    let first = vec![json!({"IN": "a", "NUM": 1}), json!({"IN": "b\"q", "NUM": 2})];
    let second = vec![json!({"IN": "c", "NUM": 3})];

    let mut doc = t.make_header(&ctx, &mut r, None);
    doc.push_str(&t.make_body(&ctx, &mut r, Some(&first), 0));
    doc.push_str(&t.make_body(&ctx, &mut r, Some(&second), 2));
    doc.push_str(&t.make_footer(&ctx, &mut r, None));

    let parsed: Value = serde_json::from_str(&doc).expect("valid json");
    assert_eq!(
        parsed,
        json!({"ITEMS": [
            {"OUT": "a", "N": 1},
            {"OUT": "b\"q", "N": 2},
            {"OUT": "c", "N": 3}
        ]})
    );
}

#[test]
fn csv_builtin() {
    let t = DocumentTemplate::parse(registry::builtin("CSV").expect("csv")).expect("parse");
    let ctx = Context::new();
    let mut r = rule(json!({ "A": "X", "B": "Y" }));
    let items = vec![json!({"X": 1, "Y": "one"}), json!({"X": 2, "Y": "two"})];
    let mut doc = t.make_header(&ctx, &mut r, Some(&items));
    doc.push_str(&t.make_body(&ctx, &mut r, Some(&items), 0));
    assert_eq!(doc, "A,B\r\n1,one\r\n2,two");
}

#[test]
fn conditional_column_attributes() {
    let text = "#body
#row delimiter=\"|\"
#column delimiter=\",\" if='regx:[0-9]+' then='replace:# <#>' if=true then=[$]
$SOURCE$
#end
#end
#end";
    let t = DocumentTemplate::parse(text).expect("parse");
    let mut r = rule(json!({ "OUT": "IN" }));
    let items = vec![json!({"IN": "a1b22"}), json!({"IN": "plain"})];
    let out = t.make_body(&Context::new(), &mut r, Some(&items), 0);
    assert_eq!(out, "\"[a<1>b<22>]\"|\"[plain]\"");
}

#[test]
fn placeholders_outside_columns_use_the_context() {
    let t = DocumentTemplate::parse("#header\nchannel {CHANNEL_ID}\n#br\n#end").expect("parse");
    let out = t.make_header(&context(&[("CHANNEL_ID", "c-7")]), &mut MappingRule::new(), None);
    assert_eq!(out, "channel c-7\r\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn registry_caches_named_and_builtin_templates() {
    use flow_core::meta::MemoryMetaSource;
    use std::sync::Arc;

    let meta = MemoryMetaSource::new();
    meta.insert(
        registry::DEFAULT_TEMPLATE_TABLE,
        "PLAIN",
        json!({ "TEMPLATE": "#header\nhello\n#end" }),
    );
    let templates = TemplateRegistry::new(Some(Arc::new(meta)), registry::DEFAULT_TEMPLATE_TABLE);

    let named = templates.get(Some("PLAIN"), "JSON").await.expect("named");
    assert_eq!(named.make_header(&Context::new(), &mut MappingRule::new(), None), "hello");
    let again = templates.get(Some("PLAIN"), "JSON").await.expect("cached");
    assert!(Arc::ptr_eq(&named, &again));

    let builtin = templates.get(None, registry::builtin_for_connector("FILE")).await.expect("builtin");
    assert!(builtin.root().section(node::ContainerKind::Body).is_some());

    assert!(matches!(
        templates.get(Some("MISSING"), "JSON").await,
        Err(FlowError::NotExist { .. })
    ));
}
