use flow_core::carrier::*;
use flow_core::preamble::*;
use flow_core::stream::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn rows(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({ "ID": i })).collect()
}

/// drives every subscriber once per round until all report end of stream
fn drain_round_robin(stream: &mut dyn FlowStream, payloads: &mut Vec<Payload>) -> Vec<Vec<i64>> {
    let mut sizes = vec![Vec::new(); payloads.len()];
    loop {
        let mut ended = 0;
        for (i, p) in payloads.iter_mut().enumerate() {
            let n = stream.next(p).expect("next");
            sizes[i].push(n);
            if n == END_OF_STREAM {
                ended += 1;
            }
        }
        if ended == payloads.len() {
            return sizes;
        }
    }
}

#[test]
fn fan_out_hands_every_chunk_to_every_subscriber() {
    let mut stream = FanOutStream::new(Box::new(ListCarrier::new(rows(5), None, 2)));
    let mut payloads: Vec<Payload> = (0..3).map(|_| stream.subscribe()).collect();
    let sizes = drain_round_robin(&mut stream, &mut payloads);
    for s in sizes {
        assert_eq!(s, vec![2, 2, 1, END_OF_STREAM]);
    }
}

#[test]
fn fan_out_subscribers_share_the_same_chunk() {
    let mut stream = FanOutStream::new(Box::new(ListCarrier::new(rows(4), None, 4)));
    let mut a = stream.subscribe();
    let mut b = stream.subscribe();
    assert_eq!(stream.next(&mut a).expect("a"), 4);
    assert_eq!(stream.next(&mut b).expect("b"), 4);
    assert!(a.data().expect("a data").same_as(b.data().expect("b data")));
    assert_eq!(a.items()[3], json!({ "ID": 3 }));
}

#[test]
fn container_reaches_all_subscribers() {
    let carrier = ContainerCarrier::new(
        json!({ "HEADER": { "FROM": "test" }, "ITEMS": rows(3) }),
        Some(DEFAULT_HEADER_TAG),
        DEFAULT_DATA_TAG,
    )
    .expect("container");
    let mut stream = FanOutStream::new(Box::new(carrier));
    assert_eq!(stream.header(), Some(json!({ "FROM": "test" })));
    let mut payloads: Vec<Payload> = (0..2).map(|_| stream.subscribe()).collect();
    let sizes = drain_round_robin(&mut stream, &mut payloads);
    assert_eq!(sizes, vec![vec![3, END_OF_STREAM], vec![3, END_OF_STREAM]]);
}

#[test]
fn single_stream_hands_out_everything_once() {
    let carrier = ContainerCarrier::from_items(rows(2), None);
    let mut stream = SingleStream::new(Box::new(carrier)).expect("single");
    let mut p = stream.subscribe();
    assert_eq!(stream.next(&mut p).expect("first"), 2);
    assert_eq!(p.items().len(), 2);
    assert_eq!(stream.next(&mut p).expect("second"), END_OF_STREAM);
    assert_eq!(stream.next(&mut p).expect("third"), END_OF_STREAM);
}

#[test]
fn payload_of_another_stream_is_rejected() {
    let mut one = FanOutStream::new(Box::new(ListCarrier::new(rows(1), None, 1)));
    let mut two = FanOutStream::new(Box::new(ListCarrier::new(rows(1), None, 1)));
    let mut p = two.subscribe();
    assert!(matches!(one.next(&mut p), Err(FlowError::StreamMismatch)));
}

#[test]
fn bytes_pass_through_fan_out() {
    let text: &'static [u8] = b"0123456789";
    let carrier = ByteCarrier::with_buffer_size(Box::new(text), Some(text.len()), 4);
    let mut stream = FanOutStream::new(Box::new(carrier));
    let mut p = stream.subscribe();
    let mut out = Vec::new();
    while stream.next(&mut p).expect("next") != END_OF_STREAM {
        if let Some(Chunk::Bytes(b)) = p.data() {
            out.extend_from_slice(b);
        }
    }
    assert_eq!(out, text.to_vec());
}

#[test]
fn blocking_stream_feeds_threads_in_lock_step() {
    let stream = Arc::new(BlockingStream::new(Box::new(ListCarrier::new(rows(10), None, 3))));
    // subscribe before any reader starts so nobody misses a chunk
    let payloads: Vec<Payload> = (0..3).map(|_| stream.subscribe()).collect();
    let handles: Vec<_> = payloads
        .into_iter()
        .map(|mut p| {
            let stream = stream.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while stream.next(&mut p).expect("next") != END_OF_STREAM {
                    seen.extend(p.items().iter().cloned());
                }
                seen
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().expect("reader"), rows(10));
    }
}

#[test]
fn document_carrier_streams_large_input() {
    let body = rows(250)
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let text = format!(r#"{{"HEADER": {{"N": 250}}, "ITEMS": [{}]}}"#, body);
    let carrier = DocumentCarrier::new(
        Box::new(std::io::Cursor::new(text.into_bytes())),
        Some(DEFAULT_HEADER_TAG),
        DEFAULT_DATA_TAG,
        100,
    )
    .expect("document");
    let mut stream = FanOutStream::new(Box::new(carrier));
    let mut p = stream.subscribe();
    let mut sizes = vec![];
    loop {
        let n = stream.next(&mut p).expect("next");
        sizes.push(n);
        if n == END_OF_STREAM {
            break;
        }
    }
    assert_eq!(sizes, vec![100, 100, 50, END_OF_STREAM]);
    assert_eq!(stream.header(), Some(json!({ "N": 250 })));
}
