// ABOUTME: Tests for the push/pull bridge between callbacks and a pull loop.
// ABOUTME: Covers early buffering, close semantics, overflow and waking a waiting receiver.

use futures::StreamExt;
use prism_agent::bridge::{channel, PushError};

#[tokio::test]
async fn test_items_pushed_before_first_pull_are_kept_in_order() {
    let (tx, mut rx) = channel(16);
    tx.push(1).unwrap();
    tx.push(2).unwrap();
    tx.push(3).unwrap();

    assert_eq!(rx.len(), 3);
    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(rx.recv().await, Some(2));
    assert_eq!(rx.recv().await, Some(3));
}

#[tokio::test]
async fn test_dropping_sender_ends_after_buffer_drains() {
    let (tx, rx) = channel(16);
    tx.push("a").unwrap();
    tx.push("b").unwrap();
    drop(tx);

    let items: Vec<_> = rx.into_stream().collect().await;
    assert_eq!(items, vec!["a", "b"]);
}

#[tokio::test]
async fn test_close_keeps_buffered_items_but_rejects_new_ones() {
    let (tx, mut rx) = channel(16);
    tx.push(1).unwrap();
    rx.close();

    assert!(matches!(tx.push(2), Err(PushError::Closed(2))));
    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_full_buffer_hands_item_back() {
    let (tx, mut rx) = channel(2);
    tx.push(1).unwrap();
    tx.push(2).unwrap();

    let err = tx.push(3).unwrap_err();
    assert!(matches!(err, PushError::Full(_)));
    assert_eq!(err.into_inner(), 3);

    assert_eq!(rx.try_recv(), Some(1));
    tx.push(3).unwrap();
}

#[tokio::test]
async fn test_push_after_receiver_dropped_is_closed() {
    let (tx, rx) = channel::<u8>(4);
    drop(rx);
    assert!(tx.is_closed());
    assert!(matches!(tx.push(7), Err(PushError::Closed(7))));
}

#[tokio::test]
async fn test_waiting_receiver_is_woken_by_push() {
    let (tx, mut rx) = channel(4);
    let waiter = tokio::spawn(async move { rx.recv().await });

    tokio::task::yield_now().await;
    tx.push("wake").unwrap();

    assert_eq!(waiter.await.unwrap(), Some("wake"));
}

#[tokio::test]
async fn test_clone_keeps_channel_open_until_last_sender_drops() {
    let (tx, mut rx) = channel(4);
    let other = tx.clone();
    drop(tx);
    other.push(5).unwrap();
    drop(other);

    assert_eq!(rx.recv().await, Some(5));
    assert_eq!(rx.recv().await, None);
}

#[test]
fn test_zero_capacity_still_buffers_one_item() {
    let (tx, mut rx) = channel(0);
    tx.push('x').unwrap();
    assert!(matches!(tx.push('y'), Err(PushError::Full('y'))));
    assert_eq!(rx.try_recv(), Some('x'));
    assert!(rx.is_empty());
}
