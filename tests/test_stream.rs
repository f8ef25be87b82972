use std::sync::Arc;

use httpagent::Error;
use httpagent::stream::{ROOT, Stream, StreamEvent, StreamSet, StreamState};

fn set_with(ids: &[u32]) -> StreamSet {
    let set = StreamSet::new(1);
    for &id in ids {
        set.insert(ROOT, Stream::detached(id)).unwrap();
    }
    set
}

#[test]
fn test_assign_stream_id_steps() {
    let set = StreamSet::new(1);
    assert_eq!(set.assign_stream_id(2), 1);
    assert_eq!(set.assign_stream_id(2), 3);
    assert_eq!(set.assign_stream_id(2), 5);
}

#[test]
fn test_insert_and_lookup() {
    let set = StreamSet::new(1);
    let stream = Stream::detached(1);
    set.insert(ROOT, stream.clone()).unwrap();

    assert!(Arc::ptr_eq(&set.get_stream(1).unwrap(), &stream));
    assert_eq!(set.parent(1), Some(ROOT));
    assert_eq!(set.len(), 1);
    assert!(set.get_stream(ROOT).is_none());
}

#[test]
fn test_duplicate_and_unknown_parent() {
    let set = set_with(&[1]);
    assert!(matches!(
        set.insert(ROOT, Stream::detached(1)),
        Err(Error::DuplicateStream(1))
    ));
    assert!(matches!(
        set.insert(7, Stream::detached(3)),
        Err(Error::UnknownStream(7))
    ));
}

#[test]
fn test_children_most_recent_first() {
    let set = set_with(&[1, 3, 5]);
    assert_eq!(set.children(ROOT), vec![5, 3, 1]);
}

#[test]
fn test_remove_promotes_children() {
    let set = set_with(&[1]);
    set.insert(1, Stream::detached(3)).unwrap();
    set.insert(1, Stream::detached(5)).unwrap();

    let removed = set.remove(1).unwrap();
    assert_eq!(removed.id(), 1);
    assert_eq!(set.parent(3), Some(ROOT));
    assert_eq!(set.parent(5), Some(ROOT));
    assert_eq!(set.len(), 2);
    assert!(set.remove(1).is_none());
    assert!(set.remove(ROOT).is_none());
}

#[test]
fn test_change_moves_subtree() {
    let set = set_with(&[1, 3]);
    set.insert(3, Stream::detached(5)).unwrap();

    set.change(1, 3).unwrap();
    assert_eq!(set.parent(3), Some(1));
    assert_eq!(set.parent(5), Some(3));
    assert_eq!(set.children(ROOT), vec![1]);
}

#[test]
fn test_change_breaks_cycle() {
    // 1 <- 3 <- 5; making 1 depend on 5 lifts 5 to 1's old parent first.
    let set = set_with(&[1]);
    set.insert(1, Stream::detached(3)).unwrap();
    set.insert(3, Stream::detached(5)).unwrap();

    set.change(5, 1).unwrap();
    assert_eq!(set.parent(5), Some(ROOT));
    assert_eq!(set.parent(1), Some(5));
    assert_eq!(set.parent(3), Some(1));
}

#[test]
fn test_change_rejects_self_dependency() {
    let set = set_with(&[1]);
    assert!(matches!(set.change(1, 1), Err(Error::InvalidArgument(_))));
    assert!(matches!(set.change(ROOT, 9), Err(Error::UnknownStream(9))));
}

#[test]
fn test_stream_state_progression() {
    let stream = Stream::detached(1);
    assert_eq!(stream.state(), StreamState::Idle);
    assert_eq!(stream.transition(StreamEvent::RecvHeaders).unwrap(), StreamState::Open);
    assert_eq!(
        stream.transition(StreamEvent::RecvEndStream).unwrap(),
        StreamState::HalfClosedRemote
    );
    assert_eq!(stream.transition(StreamEvent::SendEndStream).unwrap(), StreamState::Closed);
    assert!(matches!(
        stream.transition(StreamEvent::SendHeaders),
        Err(Error::StreamTransition { id: 1, .. })
    ));
}

#[test]
fn test_error_then_end_notifies_in_order() {
    let stream = Stream::detached(1);
    let (tx, rx) = std::sync::mpsc::channel();
    let response = stream.response().unwrap();
    let on_error = tx.clone();
    response.on_error(move |_, reason| {
        let _ = on_error.send(format!("error: {reason}"));
    });
    let on_end = tx.clone();
    response.on_end(move |_| {
        let _ = on_end.send("end".to_string());
    });
    stream.on_close(move |s| {
        let _ = tx.send(format!("close {}", s.id()));
    });

    stream.error("connection closed");
    stream.end();
    stream.error("too late");

    let seen: Vec<String> = rx.try_iter().collect();
    assert_eq!(seen, vec!["error: connection closed", "end", "close 1"]);
    assert_eq!(stream.state(), StreamState::Closed);
}
