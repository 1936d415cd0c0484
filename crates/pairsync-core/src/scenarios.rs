//! Two and three node runs over the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pairsync_net::{CloseReason, Connection, ConnectionRegistry, Envelope, MemoryNetwork};
use pairsync_shared::{ChannelHead, Identity, IdentityId, PullCursor, SyncMessage, TopicId};
use pairsync_store::Database;

use crate::{share, SharedDatabase, SyncConfig, SyncCoordinator};

struct Node {
    id: IdentityId,
    db: SharedDatabase,
    sync: Arc<SyncCoordinator>,
    inbox: mpsc::Receiver<Envelope>,
}

async fn node(network: &MemoryNetwork, config: SyncConfig) -> Node {
    let identity = Identity::generate();
    let id = identity.id();
    let db = share(Database::open_in_memory().unwrap());
    let (transport, inbox) = network.endpoint(id);
    let sync = SyncCoordinator::open(
        db.clone(),
        &identity,
        ConnectionRegistry::new(),
        Arc::new(transport),
        config,
    )
    .await
    .unwrap();

    Node {
        id,
        db,
        sync: Arc::new(sync),
        inbox,
    }
}

/// A node running as a device of `person`.
async fn device(network: &MemoryNetwork, person: &IdentityId) -> Node {
    let identity = Identity::generate();
    let id = identity.id();
    let db = share(Database::open_in_memory().unwrap());
    let (transport, inbox) = network.endpoint(id);
    let sync = SyncCoordinator::open_device(
        db.clone(),
        &identity,
        person,
        ConnectionRegistry::new(),
        Arc::new(transport),
        SyncConfig::default(),
    )
    .await
    .unwrap();

    Node {
        id,
        db,
        sync: Arc::new(sync),
        inbox,
    }
}

/// Open a connection on both sides without running any hooks.
fn connect(a: &Node, b: &Node) -> (Connection, Connection) {
    let a_side = a.sync.connections().begin_connect(b.id);
    let b_side = b.sync.connections().begin_connect(a.id);
    (
        a.sync.connections().mark_connected(a_side).unwrap(),
        b.sync.connections().mark_connected(b_side).unwrap(),
    )
}

/// Deliver queued envelopes until every inbox is empty.
async fn pump(nodes: &mut [&mut Node]) {
    loop {
        let mut delivered = false;
        for node in nodes.iter_mut() {
            while let Ok(envelope) = node.inbox.try_recv() {
                node.sync
                    .handle_incoming(envelope.from, &envelope.payload)
                    .await
                    .unwrap();
                delivered = true;
            }
        }
        if !delivered {
            break;
        }
    }
}

async fn contents(node: &Node, topic: &TopicId) -> Vec<String> {
    node.sync
        .list_messages(topic)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect()
}

#[tokio::test]
async fn test_grant_on_write_without_connection() {
    let network = MemoryNetwork::new();
    let a = node(&network, SyncConfig::default()).await;
    let b = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    let receipt = a.sync.post_message(&topic, "hello").await.unwrap();

    assert_eq!(receipt.channel.owner, a.id);
    assert_eq!(receipt.sweep.created, vec![b.id]);
    assert_eq!(receipt.announced, 0);

    let accessible = a.sync.grants().accessible_channels_for(&b.id).await.unwrap();
    assert_eq!(accessible, vec![receipt.channel.clone()]);
    assert_eq!(
        a.sync.directory().list_channel_instances(&topic).await.unwrap(),
        vec![receipt.channel]
    );
}

#[tokio::test]
async fn test_pull_after_connect_discovers_message() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let mut b = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    a.sync.post_message(&topic, "hello").await.unwrap();

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    let _watch = b.sync.on_topic_updated(&topic, move |update| {
        counter.fetch_add(update.new_messages, Ordering::SeqCst);
    });

    let (a_side, b_side) = connect(&a, &b);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.announced, 1);
    assert_eq!(report.reaffirmed.existing, vec![b.id]);
    b.sync.on_connection_opened(&b_side).await.unwrap();

    pump(&mut [&mut a, &mut b]).await;

    assert_eq!(contents(&b, &topic).await, vec!["hello"]);
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // B answers in its own channel; A learns of it through the live connection.
    b.sync.post_message(&topic, "hi back").await.unwrap();
    pump(&mut [&mut a, &mut b]).await;
    assert_eq!(contents(&a, &topic).await, vec!["hello", "hi back"]);
    assert_eq!(contents(&b, &topic).await, vec!["hello", "hi back"]);
}

#[tokio::test]
async fn test_paged_pull_fetches_every_message() {
    let network = MemoryNetwork::new();
    let small_pages = SyncConfig {
        pull_page_size: 2,
        ..SyncConfig::default()
    };
    let mut a = node(&network, small_pages.clone()).await;
    let mut b = node(&network, small_pages).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    for i in 0..5 {
        a.sync.post_message(&topic, &format!("m{i}")).await.unwrap();
    }

    let (a_side, _) = connect(&a, &b);
    a.sync.on_connection_opened(&a_side).await.unwrap();
    pump(&mut [&mut a, &mut b]).await;

    assert_eq!(contents(&b, &topic).await, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn test_failed_grant_is_created_on_next_connection() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let mut b = node(&network, SyncConfig::default()).await;
    let topic = a.sync.open_topic(&[b.id]).await.unwrap();

    a.db.lock()
        .await
        .conn()
        .execute_batch("ALTER TABLE access_grants RENAME TO access_grants_offline")
        .unwrap();
    let receipt = a.sync.post_message(&topic, "queued").await.unwrap();
    assert_eq!(receipt.sweep.failed, vec![b.id]);
    assert_eq!(a.sync.grants().pending().len(), 1);

    a.db.lock()
        .await
        .conn()
        .execute_batch("ALTER TABLE access_grants_offline RENAME TO access_grants")
        .unwrap();

    let (a_side, _) = connect(&a, &b);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.retried.granted, 1);
    assert!(a.sync.grants().pending().is_empty());

    pump(&mut [&mut a, &mut b]).await;
    assert_eq!(contents(&b, &topic).await, vec!["queued"]);
}

#[tokio::test]
async fn test_connection_reaffirms_missing_grants() {
    let network = MemoryNetwork::new();
    let a = node(&network, SyncConfig::default()).await;
    let b = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    let receipt = a.sync.post_message(&topic, "hello").await.unwrap();
    a.db.lock()
        .await
        .conn()
        .execute_batch("DELETE FROM access_grants")
        .unwrap();
    assert!(a.sync.grants().accessible_channels_for(&b.id).await.unwrap().is_empty());

    let (a_side, _) = connect(&a, &b);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.reaffirmed.created, vec![b.id]);
    assert_eq!(
        a.sync.grants().accessible_channels_for(&b.id).await.unwrap(),
        vec![receipt.channel]
    );
}

#[tokio::test]
async fn test_pull_without_grant_is_refused() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let b = node(&network, SyncConfig::default()).await;
    let mut c = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    a.sync.post_message(&topic, "private").await.unwrap();

    let (a_side, _) = connect(&a, &c);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.announced, 0);

    let pull = SyncMessage::PullRequest {
        wants: vec![PullCursor {
            topic: topic.clone(),
            owner: a.id,
            after_seq: 0,
        }],
    };
    assert!(c.sync.send_to(&a.id, &pull).await.unwrap());

    let request = a.inbox.try_recv().unwrap();
    a.sync
        .handle_incoming(request.from, &request.payload)
        .await
        .unwrap();

    let reply = c.inbox.try_recv().unwrap();
    match SyncMessage::from_bytes(&reply.payload).unwrap() {
        SyncMessage::Refused { topic: refused, owner, reason } => {
            assert_eq!(refused, topic);
            assert_eq!(owner, a.id);
            assert!(reason.contains("may not read"), "{reason}");
        }
        other => panic!("expected a refusal, got {}", other.kind()),
    }
    assert!(c.inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_pairing_grants_before_any_message() {
    let network = MemoryNetwork::new();
    let a = node(&network, SyncConfig::default()).await;
    let mut b = node(&network, SyncConfig::default()).await;

    let channel = a.sync.on_pairing_completed(&b.id).await.unwrap();
    assert_eq!(channel.owner, a.id);
    assert_eq!(a.sync.directory().channel_head(channel.id).await.unwrap(), 0);
    assert_eq!(
        a.sync.grants().accessible_channels_for(&b.id).await.unwrap(),
        vec![channel.clone()]
    );

    let (a_side, _) = connect(&a, &b);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.reaffirmed.existing, vec![b.id]);
    assert_eq!(report.announced, 1);

    let announce = b.inbox.try_recv().unwrap();
    match SyncMessage::from_bytes(&announce.payload).unwrap() {
        SyncMessage::Announce { heads } => assert_eq!(
            heads,
            vec![ChannelHead {
                topic: channel.topic,
                owner: a.id,
                head_seq: 0,
            }]
        ),
        other => panic!("expected an announce, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_grants_survive_connection_teardown() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let mut b = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    let receipt = a.sync.post_message(&topic, "before close").await.unwrap();
    let (a_side, _) = connect(&a, &b);
    a.sync.on_connection_opened(&a_side).await.unwrap();
    pump(&mut [&mut a, &mut b]).await;
    assert_eq!(contents(&b, &topic).await, vec!["before close"]);

    let closed = a.sync.connections().close(a_side.id).unwrap();
    a.sync.on_connection_closed(&closed);
    let attempt = a.sync.connections().begin_connect(b.id);
    let failed = a
        .sync
        .connections()
        .mark_failed(attempt, CloseReason::Failed("reset by peer".to_string()))
        .unwrap();
    a.sync.on_connection_closed(&failed);

    assert_eq!(
        a.sync.grants().accessible_channels_for(&b.id).await.unwrap(),
        vec![receipt.channel.clone()]
    );
    assert!(a.sync.grants().is_accessible(&receipt.channel, &b.id).await.unwrap());

    let apart = a.sync.post_message(&topic, "while apart").await.unwrap();
    assert_eq!(apart.announced, 0);

    let (a_side, _) = connect(&a, &b);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.reaffirmed.existing, vec![b.id]);
    assert_eq!(report.announced, 1);
    pump(&mut [&mut a, &mut b]).await;
    assert_eq!(contents(&b, &topic).await, vec!["before close", "while apart"]);
}

#[tokio::test]
async fn test_device_receives_channel_granted_to_its_person() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let b = node(&network, SyncConfig::default()).await;
    let mut phone = device(&network, &b.id).await;
    assert_eq!(phone.sync.identities().resolve_person().await.unwrap(), b.id);

    a.sync.identities().register_device(&b.id, &phone.id).await.unwrap();
    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    let receipt = a.sync.post_message(&topic, "to every device").await.unwrap();
    assert_eq!(receipt.sweep.created.len(), 2);
    assert!(receipt.sweep.created.contains(&phone.id));

    let (a_side, _) = connect(&a, &phone);
    let report = a.sync.on_connection_opened(&a_side).await.unwrap();
    assert_eq!(report.announced, 1);
    pump(&mut [&mut a, &mut phone]).await;

    let phone_topic = phone.sync.open_topic(&[a.id]).await.unwrap();
    assert_eq!(phone_topic, topic);
    assert_eq!(contents(&phone, &topic).await, vec!["to every device"]);

    // Devices mirror; only the person's main identity owns a channel.
    assert!(matches!(
        phone.sync.post_message(&topic, "from the phone").await,
        Err(crate::SyncError::NotAParticipant { .. })
    ));
}

#[tokio::test]
async fn test_large_messages_are_split_across_pages() {
    let network = MemoryNetwork::new();
    let wide_pages = SyncConfig {
        pull_page_size: 100,
        ..SyncConfig::default()
    };
    let mut a = node(&network, wide_pages.clone()).await;
    let mut b = node(&network, wide_pages).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    let body = "x".repeat(60_000);
    for _ in 0..80 {
        a.sync.post_message(&topic, &body).await.unwrap();
    }

    let (a_side, _) = connect(&a, &b);
    a.sync.on_connection_opened(&a_side).await.unwrap();
    pump(&mut [&mut a, &mut b]).await;

    let received = b.sync.list_messages(&topic).await.unwrap();
    assert_eq!(received.len(), 80);
    assert_eq!(received.last().map(|m| m.seq), Some(80));
}

#[tokio::test]
async fn test_unreadable_channel_does_not_block_other_pulls() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let mut b = node(&network, SyncConfig::default()).await;
    let c = node(&network, SyncConfig::default()).await;

    let pair = a.sync.open_topic(&[b.id]).await.unwrap();
    let group = a.sync.open_topic(&[b.id, c.id]).await.unwrap();
    let broken = a.sync.post_message(&pair, "unreadable").await.unwrap();
    a.sync.post_message(&group, "readable").await.unwrap();
    a.db.lock()
        .await
        .conn()
        .execute(
            "UPDATE messages SET author = 'not-hex' WHERE hash = ?1",
            [broken.message.hash.to_hex()],
        )
        .unwrap();

    let _ = connect(&a, &b);
    let pull = SyncMessage::PullRequest {
        wants: vec![
            PullCursor {
                topic: pair.clone(),
                owner: a.id,
                after_seq: 0,
            },
            PullCursor {
                topic: group.clone(),
                owner: a.id,
                after_seq: 0,
            },
        ],
    };
    assert!(b.sync.send_to(&a.id, &pull).await.unwrap());
    pump(&mut [&mut a, &mut b]).await;

    assert_eq!(contents(&b, &group).await, vec!["readable"]);
    assert!(contents(&b, &pair).await.is_empty());
}

#[tokio::test]
async fn test_forged_objects_are_ignored() {
    let network = MemoryNetwork::new();
    let mut a = node(&network, SyncConfig::default()).await;
    let b = node(&network, SyncConfig::default()).await;
    let c = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    let (_, c_side) = connect(&a, &c);
    assert!(c_side.is_connected());

    // C claims to serve B's channel.
    let forged = SyncMessage::Announce {
        heads: vec![ChannelHead {
            topic: topic.clone(),
            owner: b.id,
            head_seq: 3,
        }],
    };
    c.sync.send_to(&a.id, &forged).await.unwrap();
    pump(&mut [&mut a]).await;

    assert!(a.sync.directory().find_channel(&topic, &b.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_loops_sync_on_connect() {
    let network = MemoryNetwork::new();
    let a = node(&network, SyncConfig::default()).await;
    let b = node(&network, SyncConfig::default()).await;

    let topic = a.sync.open_topic(&[b.id]).await.unwrap();
    a.sync.post_message(&topic, "over the loop").await.unwrap();

    let Node { sync: a_sync, inbox: a_inbox, id: a_id, .. } = a;
    let Node { sync: b_sync, inbox: b_inbox, id: b_id, .. } = b;
    let a_task = a_sync.clone().run(a_inbox);
    let b_task = b_sync.clone().run(b_inbox);

    let a_side = a_sync.connections().begin_connect(b_id);
    let b_side = b_sync.connections().begin_connect(a_id);
    b_sync.connections().mark_connected(b_side).unwrap();
    a_sync.connections().mark_connected(a_side).unwrap();

    let mut received = Vec::new();
    for _ in 0..100 {
        received = b_sync.list_messages(&topic).await.unwrap();
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content, "over the loop");

    a_task.abort();
    b_task.abort();
}

#[tokio::test]
async fn test_stale_connection_surfaces_timeout() {
    let network = MemoryNetwork::new();
    let quick = SyncConfig {
        connect_timeout: Duration::ZERO,
        ..SyncConfig::default()
    };
    let a = node(&network, quick).await;
    let peer = IdentityId([7u8; 32]);

    a.sync.connections().begin_connect(peer);
    let errors = a.sync.expire_stale_connections();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        crate::SyncError::ConnectionTimeout { remote, .. } if remote == peer
    ));
    assert!(errors[0].is_retryable());
    assert_eq!(a.sync.connections().history(&peer).consecutive_failures, 1);
}
