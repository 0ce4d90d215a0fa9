use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lib0::any::Any;
use ycrdt::{create_doc_from_snapshot, Doc, GetString, Options, Update, Value};

/// Subscribes `doc` to its own committed update bytes, appending each one (in
/// commit order) to a shared log the caller can replay onto another replica.
fn collect_updates(doc: &Doc) -> (ycrdt::Subscription, Arc<Mutex<Vec<Vec<u8>>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let sub = doc.observe_update_v1(move |_txn, e| sink.lock().unwrap().push(e.update.clone()));
    (sub, log)
}

fn replay_into(doc: &Doc, updates: &[Vec<u8>]) {
    for bytes in updates {
        let update = Update::decode(bytes).unwrap();
        doc.transact_mut().apply_update(update).unwrap();
    }
}

#[test]
fn concurrent_text_inserts_converge() {
    let a = Doc::with_options(Options::new(1));
    let b = Doc::with_options(Options::new(2));
    let text_a = a.get_or_insert_text("text");
    let text_b = b.get_or_insert_text("text");

    let (_sub_a, log_a) = collect_updates(&a);
    {
        let mut txn = a.transact_mut();
        text_a.insert(&mut txn, 0, "hello");
    }
    replay_into(&b, &log_a.lock().unwrap());

    // both replicas now edit the shared prefix concurrently, with no
    // further sync until everything below has happened.
    {
        let mut txn = a.transact_mut();
        text_a.insert(&mut txn, 0, "X");
    }
    let (_sub_b, log_b) = collect_updates(&b);
    {
        let mut txn = b.transact_mut();
        text_b.insert(&mut txn, 5, "Y");
    }

    // exchange what each side produced while diverged
    replay_into(&b, &log_a.lock().unwrap()[1..]);
    replay_into(&a, &log_b.lock().unwrap());

    assert_eq!(text_a.get_string(), text_b.get_string());
    assert_eq!(text_a.get_string(), "XhelloY");
}

#[test]
fn text_delete_converges_across_replicas() {
    let a = Doc::with_options(Options::new(1));
    let text_a = a.get_or_insert_text("text");
    let (_sub, log) = collect_updates(&a);
    {
        let mut txn = a.transact_mut();
        text_a.insert(&mut txn, 0, "hello world");
    }

    let b = Doc::with_options(Options::new(2));
    let text_b = b.get_or_insert_text("text");
    replay_into(&b, &log.lock().unwrap());

    {
        let mut txn = a.transact_mut();
        text_a.remove_range(&mut txn, 5, 6); // remove " world"
    }
    replay_into(&b, &log.lock().unwrap()[1..]);

    assert_eq!(text_a.get_string(), "hello");
    assert_eq!(text_b.get_string(), "hello");
}

#[test]
fn map_values_interop_across_replicas() {
    let a = Doc::with_options(Options::new(1));
    let map_a = a.get_or_insert_map("config");
    let (_sub, log) = collect_updates(&a);
    {
        let mut txn = a.transact_mut();
        map_a.insert(&mut txn, "retries", 3.0);
        map_a.insert(&mut txn, "name", "worker");
    }

    let b = Doc::with_options(Options::new(2));
    let map_b = b.get_or_insert_map("config");
    replay_into(&b, &log.lock().unwrap());

    assert_eq!(map_b.get("name"), Some(Value::Any(Any::from("worker"))));
    assert_eq!(map_b.get("retries"), Some(Value::Any(Any::from(3.0))));
}

#[test]
fn concurrent_map_writes_resolve_identically_on_both_sides() {
    let a = Doc::with_options(Options::new(1));
    let b = Doc::with_options(Options::new(2));
    let map_a = a.get_or_insert_map("settings");
    let map_b = b.get_or_insert_map("settings");

    let (_sub_a, log_a) = collect_updates(&a);
    {
        let mut txn = a.transact_mut();
        map_a.insert(&mut txn, "mode", "alpha");
    }
    replay_into(&b, &log_a.lock().unwrap());

    // both replicas overwrite the same key before syncing again
    {
        let mut txn = a.transact_mut();
        map_a.insert(&mut txn, "mode", "from-a");
    }
    let (_sub_b, log_b) = collect_updates(&b);
    {
        let mut txn = b.transact_mut();
        map_b.insert(&mut txn, "mode", "from-b");
    }

    replay_into(&b, &log_a.lock().unwrap()[1..]);
    replay_into(&a, &log_b.lock().unwrap());

    // last-writer-wins by causal order: both sides must agree on the winner,
    // regardless of which update happened to apply first.
    assert_eq!(map_a.get("mode"), map_b.get("mode"));
}

#[test]
fn missing_dependency_is_buffered_until_prerequisite_arrives() {
    let a = Doc::with_options(Options::new(1));
    let text_a = a.get_or_insert_text("text");
    let (_sub, log) = collect_updates(&a);
    {
        let mut txn = a.transact_mut();
        text_a.insert(&mut txn, 0, "a");
    }
    {
        let mut txn = a.transact_mut();
        text_a.insert(&mut txn, 1, "b");
    }
    let updates = log.lock().unwrap().clone();
    let (first, second) = (&updates[0], &updates[1]);

    let b = Doc::new();
    let text_b = b.get_or_insert_text("text");

    // the second update depends on a clock b hasn't seen yet, so it must be
    // buffered rather than integrated or rejected outright.
    b.transact_mut().apply_update(Update::decode(second).unwrap()).unwrap();
    assert_eq!(text_b.get_string(), "");

    // once the prerequisite arrives, the buffered update unblocks too.
    b.transact_mut().apply_update(Update::decode(first).unwrap()).unwrap();
    assert_eq!(text_b.get_string(), "ab");
}

#[test]
fn rich_text_formatting_round_trips_through_an_update() {
    let a = Doc::with_options(Options::new(1));
    let text_a = a.get_or_insert_text("text");
    let (_sub, log) = collect_updates(&a);
    {
        let mut txn = a.transact_mut();
        let mut attrs = HashMap::new();
        attrs.insert(Arc::from("bold"), Any::Bool(true));
        text_a.insert_with_attributes(&mut txn, 0, "hi", attrs);
    }

    let b = Doc::new();
    let text_b = b.get_or_insert_text("text");
    replay_into(&b, &log.lock().unwrap());

    assert_eq!(text_b.get_string(), "hi");
    assert_eq!(text_a.get_string(), text_b.get_string());
}

#[test]
fn snapshot_preserves_document_state_at_a_point_in_time() {
    let doc = Doc::new();
    let text = doc.get_or_insert_text("text");
    {
        let mut txn = doc.transact_mut();
        text.insert(&mut txn, 0, "v1");
    }
    let snapshot = doc.snapshot();
    {
        let mut txn = doc.transact_mut();
        text.insert(&mut txn, 2, "-v2");
    }

    let restored = Doc::new();
    create_doc_from_snapshot(&doc, &snapshot, &restored).unwrap();
    let restored_text = restored.get_or_insert_text("text");

    assert_eq!(restored_text.get_string(), "v1");
    assert_eq!(text.get_string(), "v1-v2");
}

#[test]
fn snapshot_round_trips_through_its_wire_format() {
    let doc = Doc::new();
    let text = doc.get_or_insert_text("text");
    {
        let mut txn = doc.transact_mut();
        text.insert(&mut txn, 0, "abc");
        text.remove_range(&mut txn, 1, 1);
    }
    let snapshot = doc.snapshot();
    let bytes = snapshot.encode();
    let decoded = ycrdt::Snapshot::decode(&bytes).unwrap();
    assert_eq!(snapshot, decoded);
}

/// Decodes the literal reference update cited in the wire-format scenarios:
/// a fresh document receiving this exact byte sequence must read back the
/// same text a local `insert(0,"def"); insert(0,"abc"); insert(6,"ghi");
/// delete(2,5)` sequence produces.
#[test]
fn decodes_reference_text_update_byte_sequence() {
    let bytes: Vec<u8> = vec![
        1, 5, 152, 234, 173, 126, 0, 1, 1, 4, 116, 121, 112, 101, 3, 68, 152, 234, 173, 126, 0, 2, 97,
        98, 193, 152, 234, 173, 126, 4, 152, 234, 173, 126, 0, 1, 129, 152, 234, 173, 126, 2, 1, 132,
        152, 234, 173, 126, 6, 2, 104, 105, 1, 152, 234, 173, 126, 2, 0, 3, 5, 2,
    ];
    let doc = Doc::new();
    let update = Update::decode(&bytes).unwrap();
    doc.transact_mut().apply_update(update).unwrap();

    let text = doc.get_or_insert_text("type");
    assert_eq!(text.get_string(), "abhi");
}

/// Same idea for the map scenario: decoding the reference bytes directly
/// must produce the documented `{k1: "v1", k2: "v2"}`.
#[test]
fn decodes_reference_map_update_byte_sequence() {
    let bytes: Vec<u8> = vec![
        1, 2, 241, 204, 241, 209, 1, 0, 40, 1, 4, 116, 101, 115, 116, 2, 107, 49, 1, 119, 2, 118, 49,
        40, 1, 4, 116, 101, 115, 116, 2, 107, 50, 1, 119, 2, 118, 50, 0,
    ];
    let doc = Doc::new();
    let update = Update::decode(&bytes).unwrap();
    doc.transact_mut().apply_update(update).unwrap();

    let map = doc.get_or_insert_map("test");
    assert_eq!(map.get("k1"), Some(Value::Any(Any::from("v1"))));
    assert_eq!(map.get("k2"), Some(Value::Any(Any::from("v2"))));
}
