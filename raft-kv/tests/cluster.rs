//! Scenario tests against the raft-kv cluster, driven directly through the
//! `raft` crate with the stdio node runtime swapped out for an in-process
//! router (see `fixtures`).

mod fixtures;

use std::time::Duration;

use fixtures::Cluster;
use raft::Role;
use raft_kv::op::Op;
use raft_kv::op::KvResponse;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn elects_a_single_leader_from_a_cold_start() {
    let cluster = Cluster::new(3).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(10)).await;
    assert!(leader.is_some(), "no leader elected within the timeout");

    let mut leaders = 0;
    for id in cluster.nodes.keys() {
        if cluster.metrics(id).await.role == Role::Leader {
            leaders += 1;
        }
    }
    assert_eq!(leaders, 1, "exactly one node should hold leadership");
}

#[tokio::test(start_paused = true)]
async fn a_write_is_readable_back_from_any_node() {
    let cluster = Cluster::new(3).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(10)).await.expect("leader");

    let write = cluster.client_op(&leader, 1, Op::Write { key: "x".into(), value: json!(42) }).await;
    assert!(matches!(write, KvResponse::WriteOk));

    let read = cluster.client_op(&leader, 2, Op::Read { key: "x".into() }).await;
    assert!(matches!(read, KvResponse::ReadOk { value } if value == json!(42)));
}

#[tokio::test(start_paused = true)]
async fn a_write_sent_to_a_follower_is_forwarded_to_the_leader() {
    let cluster = Cluster::new(3).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(10)).await.expect("leader");
    let follower = cluster.nodes.keys().find(|id| **id != leader).expect("a follower exists").clone();

    let response = cluster.client_op(&follower, 3, Op::Write { key: "y".into(), value: json!("hi") }).await;
    assert!(matches!(response, KvResponse::WriteOk));

    let read = cluster.client_op(&leader, 4, Op::Read { key: "y".into() }).await;
    assert!(matches!(read, KvResponse::ReadOk { value } if value == json!("hi")));
}

#[tokio::test(start_paused = true)]
async fn cas_only_succeeds_when_the_expected_value_matches() {
    let cluster = Cluster::new(3).await;
    let leader = cluster.wait_for_leader(Duration::from_secs(10)).await.expect("leader");

    cluster.client_op(&leader, 5, Op::Write { key: "ctr".into(), value: json!(0) }).await;

    let won = cluster
        .client_op(&leader, 6, Op::Cas { key: "ctr".into(), from: json!(0), to: json!(1) })
        .await;
    assert!(matches!(won, KvResponse::CasOk));

    let lost = cluster
        .client_op(&leader, 7, Op::Cas { key: "ctr".into(), from: json!(0), to: json!(2) })
        .await;
    assert!(matches!(lost, KvResponse::Error { .. }), "stale compare-and-swap must not apply");

    let read = cluster.client_op(&leader, 8, Op::Read { key: "ctr".into() }).await;
    assert!(matches!(read, KvResponse::ReadOk { value } if value == json!(1)));
}

#[tokio::test(start_paused = true)]
async fn a_new_leader_is_elected_after_the_old_one_is_partitioned_away() {
    let cluster = Cluster::new(3).await;
    let first_leader = cluster.wait_for_leader(Duration::from_secs(10)).await.expect("leader");

    cluster.client_op(&first_leader, 9, Op::Write { key: "before".into(), value: json!(true) }).await;

    cluster.router.isolate(&first_leader).await;

    let second_leader = cluster
        .wait_for_leader_excluding(&[&first_leader], Duration::from_secs(15))
        .await
        .expect("a replacement leader");
    assert_ne!(second_leader, first_leader, "the isolated node must not still count as leader");

    let write = cluster.client_op(&second_leader, 10, Op::Write { key: "after".into(), value: json!(true) }).await;
    assert!(matches!(write, KvResponse::WriteOk));

    cluster.router.heal(&first_leader).await;
}

#[tokio::test(start_paused = true)]
async fn a_minority_partition_cannot_elect_a_leader() {
    let cluster = Cluster::new(5).await;
    cluster.wait_for_leader(Duration::from_secs(10)).await.expect("initial leader");

    let isolated: Vec<String> = cluster.nodes.keys().take(2).cloned().collect();
    for id in &isolated {
        cluster.router.isolate(id).await;
    }

    let excluded: Vec<&str> = isolated.iter().map(String::as_str).collect();
    let leader = cluster
        .wait_for_leader_excluding(&excluded, Duration::from_secs(15))
        .await
        .expect("majority side still has a leader");
    assert!(!isolated.contains(&leader), "a minority-side node cannot be the surviving leader");

    for id in &isolated {
        assert_ne!(cluster.metrics(id).await.role, Role::Leader, "an isolated minority node must not see itself as leader");
        cluster.router.heal(id).await;
    }
}
