//! Ledger end-to-end scenarios: genesis bring-up, quorum commits, catch-up
//! sync, and leader failover across real nodes on loopback TCP.

use std::time::Duration;
use weft_integration_tests::{
    start_node, start_rendezvous, test_config, wait_connected, wait_for_event, wait_until,
    whitelist_members,
};
use weft_node::NodeEvent;

#[tokio::test]
async fn two_fresh_nodes_stay_at_genesis() {
    let rendezvous = start_rendezvous().await;
    let a = start_node(test_config(rendezvous)).await;
    let b = start_node(test_config(rendezvous)).await;
    let mut a_events = a.subscribe();

    wait_connected(&a, &b).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let a_chain = a.chain().await.unwrap();
    let b_chain = b.chain().await.unwrap();
    assert_eq!(a_chain.len(), 1);
    assert_eq!(b_chain.len(), 1);
    assert_eq!(a_chain[0].index, 0);
    assert_eq!(a_chain[0].previous_hash, "0");
    assert_eq!(a_chain[0].hash, b_chain[0].hash);

    // With empty whitelists nothing must have been committed.
    while let Ok(event) = a_events.try_recv() {
        assert!(
            !matches!(event, NodeEvent::BlockAdded { .. }),
            "unexpected block on an empty whitelist"
        );
    }

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn single_node_commits_its_own_transactions() {
    let rendezvous = start_rendezvous().await;
    let mut config = test_config(rendezvous);
    config.whitelist_self = true;
    let node = start_node(config).await;
    let mut events = node.subscribe();

    let a = node.submit_transaction("ledger", b"a".to_vec(), 1.0).await.unwrap();
    let b = node.submit_transaction("ledger", b"b".to_vec(), 1.0).await.unwrap();
    let c = node.submit_transaction("ledger", b"c".to_vec(), 1.0).await.unwrap();

    let block = wait_for_event(&mut events, "block commit", Duration::from_secs(10), |event| {
        match event {
            NodeEvent::BlockAdded { block } => Some(block.clone()),
            _ => None,
        }
    })
    .await;

    let ids = block.transaction_ids();
    assert_eq!(ids.len(), 3);
    for tx in [&a, &b, &c] {
        assert!(ids.contains(&tx.id));
    }

    let chain = node.chain().await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].index, 1);
    assert_eq!(chain[1].previous_hash, chain[0].hash);
    assert!(node.mempool().await.unwrap().is_empty());

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn two_node_quorum_commits_on_both() {
    let rendezvous = start_rendezvous().await;
    let a = start_node(test_config(rendezvous)).await;
    let b = start_node(test_config(rendezvous)).await;
    wait_connected(&a, &b).await;

    // Identical insertion order on both nodes.
    let members = vec![a.node_id().clone(), b.node_id().clone()];
    whitelist_members(&a, &members).await;
    whitelist_members(&b, &members).await;

    let tx = a.submit_transaction("quorum", b"pay".to_vec(), 7.0).await.unwrap();

    wait_until("both chains at height 2", Duration::from_secs(15), || {
        let (a, b) = (&a, &b);
        async move {
            a.chain().await.unwrap().len() == 2 && b.chain().await.unwrap().len() == 2
        }
    })
    .await;

    let a_chain = a.chain().await.unwrap();
    let b_chain = b.chain().await.unwrap();
    assert_eq!(a_chain[1].hash, b_chain[1].hash);
    assert!(a_chain[1].transaction_ids().contains(&tx.id));
    assert!(a.mempool().await.unwrap().is_empty());
    assert!(b.mempool().await.unwrap().is_empty());

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn late_joiner_catches_up_via_sync() {
    let rendezvous = start_rendezvous().await;
    let mut solo_config = test_config(rendezvous);
    solo_config.whitelist_self = true;
    let a = start_node(solo_config).await;
    let mut a_events = a.subscribe();

    a.submit_transaction("history", b"old".to_vec(), 1.0).await.unwrap();
    wait_for_event(&mut a_events, "first commit", Duration::from_secs(10), |event| {
        matches!(event, NodeEvent::BlockAdded { .. }).then_some(())
    })
    .await;

    // The newcomer whitelists the established node up front, so the
    // catch-up request fires right after the session opens.
    let mut late_config = test_config(rendezvous);
    late_config.whitelist.push(a.node_id().clone());
    let b = start_node(late_config).await;
    wait_connected(&a, &b).await;

    wait_until("late joiner synced", Duration::from_secs(10), || {
        let b = &b;
        async move { b.chain().await.unwrap().len() == 2 }
    })
    .await;

    let a_chain = a.chain().await.unwrap();
    let b_chain = b.chain().await.unwrap();
    assert_eq!(a_chain[1].hash, b_chain[1].hash);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn production_survives_a_member_leaving() {
    let rendezvous = start_rendezvous().await;
    let a = start_node(test_config(rendezvous)).await;
    let b = start_node(test_config(rendezvous)).await;
    let c = start_node(test_config(rendezvous)).await;
    wait_connected(&a, &b).await;
    wait_connected(&a, &c).await;
    wait_connected(&b, &c).await;

    let members = vec![a.node_id().clone(), b.node_id().clone(), c.node_id().clone()];
    whitelist_members(&a, &members).await;
    whitelist_members(&b, &members).await;
    whitelist_members(&c, &members).await;

    // One member leaves; the survivors keep committing.
    c.shutdown().await.unwrap();
    wait_until("survivors notice the loss", Duration::from_secs(10), || {
        let (a, b) = (&a, &b);
        async move {
            a.connected_peers().await.unwrap().len() == 1
                && b.connected_peers().await.unwrap().len() == 1
        }
    })
    .await;

    let tx = a.submit_transaction("failover", b"go".to_vec(), 1.0).await.unwrap();
    wait_until("block after failover", Duration::from_secs(15), || {
        let (a, b) = (&a, &b);
        async move {
            a.chain().await.unwrap().len() >= 2 && b.chain().await.unwrap().len() >= 2
        }
    })
    .await;

    let a_chain = a.chain().await.unwrap();
    assert!(
        a_chain
            .iter()
            .any(|block| block.transaction_ids().contains(&tx.id))
    );

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn gossiped_transaction_lands_in_both_mempools_once() {
    let rendezvous = start_rendezvous().await;
    let a = start_node(test_config(rendezvous)).await;
    let b = start_node(test_config(rendezvous)).await;
    wait_connected(&a, &b).await;

    let tx = a.submit_transaction("gossip", b"x".to_vec(), 3.0).await.unwrap();

    wait_until("transaction gossiped", Duration::from_secs(10), || {
        let b = &b;
        async move { b.mempool().await.unwrap().len() == 1 }
    })
    .await;
    let pool = b.mempool().await.unwrap();
    assert_eq!(pool[0].id, tx.id);
    assert_eq!(pool[0].signature, tx.signature);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}
