//! Read balance policies as seen from the wire.

mod common;

use anyhow::Result;
use common::*;
use docdb_client::commands::{GetDocumentCommand, PutDocumentCommand};
use docdb_client::{ClientError, ExecutorConfig, HttpMethod, ReadBalancePolicy};
use serde_json::json;
use std::time::Duration;

fn three_nodes() -> String {
    topology_body(1, &[("A", NODE_A), ("B", NODE_B), ("C", NODE_C)])
}

fn policy(read_balance: ReadBalancePolicy) -> ExecutorConfig {
    ExecutorConfig {
        read_balance,
        cache_enabled: false,
        ..ExecutorConfig::default()
    }
}

async fn read(executor: &docdb_client::RequestExecutor, id: &str) -> Result<()> {
    let mut command = GetDocumentCommand::new(id);
    executor.execute(&mut command).await?;
    Ok(())
}

#[tokio::test]
async fn round_robin_spreads_reads_and_pins_writes() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(three_nodes())
        } else if request.method == HttpMethod::Put {
            Reply::ok("{\"Id\":\"orders/1\",\"ChangeVector\":\"A:1\"}")
        } else {
            Reply::ok(document_body(json!({})))
        }
    });
    let executor = executor(&[NODE_A], policy(ReadBalancePolicy::RoundRobin), transport.clone()).await;

    for i in 0..6 {
        read(&executor, &format!("orders/{}", i)).await?;
    }
    assert_eq!(transport.requests_to(NODE_A), 2);
    assert_eq!(transport.requests_to(NODE_B), 2);
    assert_eq!(transport.requests_to(NODE_C), 2);

    for _ in 0..3 {
        let mut write = PutDocumentCommand::new("orders/1", json!({"Total": 10}));
        executor.execute(&mut write).await?;
    }
    let writes_to_a = transport.count(|r| r.method == HttpMethod::Put && r.url.starts_with(NODE_A));
    assert_eq!(writes_to_a, 3);
    Ok(())
}

#[tokio::test]
async fn no_policy_keeps_reads_on_the_preferred_node() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(three_nodes())
        } else {
            Reply::ok(document_body(json!({})))
        }
    });
    let executor = executor(&[NODE_C], policy(ReadBalancePolicy::None), transport.clone()).await;

    for i in 0..4 {
        read(&executor, &format!("orders/{}", i)).await?;
    }
    assert_eq!(transport.requests_to(NODE_A), 4);
    assert_eq!(transport.requests_to(NODE_B) + transport.requests_to(NODE_C), 0);
    Ok(())
}

#[tokio::test]
async fn fastest_node_wins_the_race_and_serves_later_reads() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(topology_body(1, &[("A", NODE_A), ("B", NODE_B)]))
        } else if request.url.starts_with(NODE_A) {
            Reply::ok(document_body(json!({"From": "A"}))).delayed(Duration::from_millis(150))
        } else {
            Reply::ok(document_body(json!({"From": "B"})))
        }
    });
    let executor = executor(&[NODE_A], policy(ReadBalancePolicy::FastestNode), transport.clone()).await;
    assert_eq!(executor.fastest_node(), None);

    let mut raced = GetDocumentCommand::new("orders/1");
    executor.execute(&mut raced).await?;
    assert_eq!(raced.result.unwrap()["From"], "B");
    assert_eq!(executor.fastest_node().as_deref(), Some("B"));
    assert_eq!(transport.requests_to(NODE_A), 1);

    let mut next = GetDocumentCommand::new("orders/2");
    executor.execute(&mut next).await?;
    assert_eq!(next.result.unwrap()["From"], "B");
    assert_eq!(transport.requests_to(NODE_A), 1);
    assert_eq!(transport.requests_to(NODE_B), 2);
    Ok(())
}

#[tokio::test]
async fn periodic_races_keep_probing_slower_nodes() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(topology_body(1, &[("A", NODE_A), ("B", NODE_B)]))
        } else if request.url.starts_with(NODE_A) {
            Reply::ok(document_body(json!({}))).delayed(Duration::from_millis(50))
        } else {
            Reply::ok(document_body(json!({})))
        }
    });
    let config = ExecutorConfig {
        fastest_node_race_interval: 2,
        ..policy(ReadBalancePolicy::FastestNode)
    };
    let executor = executor(&[NODE_A], config, transport.clone()).await;

    for i in 0..6 {
        read(&executor, &format!("orders/{}", i)).await?;
    }

    assert_eq!(executor.fastest_node().as_deref(), Some("B"));
    assert_eq!(transport.requests_to(NODE_B), 6);
    assert_eq!(transport.requests_to(NODE_A), 3);
    Ok(())
}

#[tokio::test]
async fn slow_node_serves_reads_when_the_fastest_is_suspect() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(topology_body(1, &[("A", NODE_A), ("B", NODE_B)]))
        } else if request.url.starts_with(NODE_A) {
            Reply::ok(document_body(json!({"From": "A"}))).delayed(Duration::from_millis(50))
        } else {
            Reply::ok(document_body(json!({"From": "B"})))
        }
    });
    let executor = executor(&[NODE_A], policy(ReadBalancePolicy::FastestNode), transport.clone()).await;

    read(&executor, "orders/1").await?;
    assert_eq!(executor.fastest_node().as_deref(), Some("B"));

    executor.health().on_failure("B");
    executor.health().on_failure("B");

    let mut command = GetDocumentCommand::new("orders/2");
    executor.execute(&mut command).await?;
    assert_eq!(command.result.unwrap()["From"], "A");
    Ok(())
}

#[tokio::test]
async fn slow_node_wins_the_race_when_the_fast_one_fails() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(topology_body(1, &[("A", NODE_A), ("B", NODE_B)]))
        } else if request.url.starts_with(NODE_A) {
            Reply::refused()
        } else {
            Reply::ok(document_body(json!({"From": "B"}))).delayed(Duration::from_millis(50))
        }
    });
    let executor = executor(&[NODE_A], policy(ReadBalancePolicy::FastestNode), transport.clone()).await;

    let mut command = GetDocumentCommand::new("orders/1");
    executor.execute(&mut command).await?;

    assert_eq!(command.result.unwrap()["From"], "B");
    assert_eq!(executor.fastest_node().as_deref(), Some("B"));
    assert_eq!(executor.health().failure_count("A"), 1);
    assert_eq!(executor.health().failure_count("B"), 0);
    assert_eq!(transport.requests_to(NODE_A), 1);
    Ok(())
}

#[tokio::test]
async fn third_candidate_serves_when_both_raced_nodes_fail() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(three_nodes())
        } else if request.url.starts_with(NODE_C) {
            Reply::ok(document_body(json!({"From": "C"})))
        } else {
            Reply::status(503, "busy")
        }
    });
    let executor = executor(&[NODE_A], policy(ReadBalancePolicy::FastestNode), transport.clone()).await;

    let mut command = GetDocumentCommand::new("orders/1");
    executor.execute(&mut command).await?;

    assert_eq!(command.result.unwrap()["From"], "C");
    assert_eq!(executor.fastest_node(), None);
    assert_eq!(executor.health().failure_count("A"), 1);
    assert_eq!(executor.health().failure_count("B"), 1);
    assert_eq!(transport.topology_requests(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_races_are_reported_per_node() -> Result<()> {
    let transport = ScriptedTransport::new(|request| {
        if is_topology_request(request) {
            Reply::ok(topology_body(1, &[("A", NODE_A), ("B", NODE_B)]))
        } else {
            Reply::status(503, "busy")
        }
    });
    let config = ExecutorConfig {
        failure_threshold: 100,
        ..policy(ReadBalancePolicy::FastestNode)
    };
    let executor = executor(&[NODE_A], config, transport.clone()).await;

    let mut command = GetDocumentCommand::new("orders/1");
    let err = executor.execute(&mut command).await.unwrap_err();

    let tags: Vec<_> = err
        .node_failures()
        .iter()
        .map(|failure| failure.node_tag.as_str())
        .collect();
    assert_eq!(tags, ["A", "B", "A", "B"]);
    assert!(err
        .node_failures()
        .iter()
        .all(|failure| matches!(failure.error, ClientError::NodeFailure { status: 503, .. })));
    assert!(command.result.is_none());
    // one at build time, one after the raced pair failed
    assert_eq!(transport.topology_requests(), 2);
    Ok(())
}
