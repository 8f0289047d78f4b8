//! Cross-instance fan-out tests
//!
//! Several instances share one log and one in-process bus, the same way the
//! cluster command wires them:
//! 1. Accepted messages reach clients on every instance exactly once
//! 2. Duplicates are acknowledged but never fanned out
//! 3. Concurrent senders on different instances get distinct sequence ids
//! 4. Concurrent senders on one instance are seen in ascending id order

use std::collections::HashSet;
use std::sync::Arc;

use murmur::models::Handshake;
use murmur::storage::{create_memory_log, MessageLog, SharedMessageLog, SqliteMessageLog};

use super::fixtures::{sequence_ids, shared_bus, start_instance, TestClient};

#[tokio::test]
async fn test_message_reaches_clients_on_every_instance() {
    let log = create_memory_log();
    let bus = shared_bus();
    let a = start_instance("node-a", &log, &bus);
    let b = start_instance("node-b", &log, &bus);

    let mut sender = TestClient::connect(&a, Handshake::fresh()).await;
    let mut local_peer = TestClient::connect(&a, Handshake::fresh()).await;
    let mut remote_peer = TestClient::connect(&b, Handshake::fresh()).await;

    let receipt = sender.send("hello everyone", Some("tok-1")).await.unwrap();
    assert_eq!(receipt.sequence_id, Some(1));
    assert!(!receipt.duplicate);

    for client in [&mut sender, &mut local_peer, &mut remote_peer] {
        let delivery = client.next_delivery().await;
        assert_eq!(delivery.content, "hello everyone");
        assert_eq!(delivery.sequence_id, 1);
        client.expect_silence().await;
    }
}

#[tokio::test]
async fn test_duplicate_from_other_instance_is_not_fanned_out() {
    let log = create_memory_log();
    let bus = shared_bus();
    let a = start_instance("node-a", &log, &bus);
    let b = start_instance("node-b", &log, &bus);

    let mut on_a = TestClient::connect(&a, Handshake::fresh()).await;
    let mut on_b = TestClient::connect(&b, Handshake::fresh()).await;

    let first = on_a.send("only once", Some("retry-me")).await.unwrap();
    assert_eq!(first.sequence_id, Some(1));
    on_a.next_delivery().await;
    on_b.next_delivery().await;

    // Client moved to B and retried with the same token
    let retry = on_b.send("only once", Some("retry-me")).await.unwrap();
    assert!(retry.duplicate);
    assert_eq!(retry.sequence_id, Some(1));

    on_a.expect_silence().await;
    on_b.expect_silence().await;
    assert_eq!(log.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_senders_get_distinct_ids() {
    let log = create_memory_log();
    let bus = shared_bus();
    let a = start_instance("node-a", &log, &bus);
    let b = start_instance("node-b", &log, &bus);

    let mut watcher = TestClient::connect(&b, Handshake::fresh()).await;
    let sender_a = TestClient::connect(&a, Handshake::fresh()).await;
    let sender_b = TestClient::connect(&b, Handshake::fresh()).await;

    let send_a = async {
        for i in 0..10 {
            let token = format!("a-{i}");
            sender_a.send(&token, Some(token.as_str())).await.unwrap();
        }
    };
    let send_b = async {
        for i in 0..10 {
            let token = format!("b-{i}");
            sender_b.send(&token, Some(token.as_str())).await.unwrap();
        }
    };
    tokio::join!(send_a, send_b);

    let received = watcher.deliveries(20).await;
    let ids: HashSet<_> = sequence_ids(&received).into_iter().collect();
    assert_eq!(ids.len(), 20);
    assert_eq!(ids, (1..=20).collect());
    watcher.expect_silence().await;

    // Each sender's own messages keep their submission order
    let a_ids: Vec<_> = received
        .iter()
        .filter(|d| d.content.starts_with("a-"))
        .map(|d| d.sequence_id)
        .collect();
    assert!(a_ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sessions_on_one_instance_deliver_in_id_order() {
    const SENDERS: usize = 16;
    const PER_SENDER: usize = 50;
    const TOTAL: usize = SENDERS * PER_SENDER;

    let log: SharedMessageLog = Arc::new(SqliteMessageLog::in_memory().unwrap());
    let bus = shared_bus();
    let a = start_instance("node-a", &log, &bus);

    let mut observer = TestClient::connect_with_buffer(&a, Handshake::fresh(), TOTAL * 2).await;

    let mut tasks = Vec::with_capacity(SENDERS);
    for s in 0..SENDERS {
        let sender = TestClient::connect_with_buffer(&a, Handshake::fresh(), TOTAL * 2).await;
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                let token = format!("s{s}-{i}");
                sender.send(&token, Some(token.as_str())).await.unwrap();
            }
            sender
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ids = sequence_ids(&observer.deliveries(TOTAL).await);
    let inversions = ids.windows(2).filter(|w| w[0] >= w[1]).count();
    assert_eq!(inversions, 0, "observer saw ids out of order");
    assert_eq!(ids, (1..=TOTAL as i64).collect::<Vec<_>>());
    observer.expect_silence().await;
}

#[tokio::test]
async fn test_untokened_submissions_are_never_deduplicated() {
    let log = create_memory_log();
    let bus = shared_bus();
    let a = start_instance("node-a", &log, &bus);

    let mut client = TestClient::connect(&a, Handshake::fresh()).await;

    let first = client.send("same text", None).await.unwrap();
    let second = client.send("same text", None).await.unwrap();
    assert_eq!(first.sequence_id, Some(1));
    assert_eq!(second.sequence_id, Some(2));

    let received = client.deliveries(2).await;
    assert_eq!(sequence_ids(&received), vec![1, 2]);
}
