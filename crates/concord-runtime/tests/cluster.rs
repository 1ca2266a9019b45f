//! Nodes linked over loopback TCP

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use concord_crdt::{Reply, Request};
use concord_runtime::{FaultModel, NodeConfig, Service, ServiceHandle};

fn free_ports(count: usize) -> Vec<u16> {
    // Hold every probe until all are bound so the ports are distinct
    let probes: Vec<_> = (0..count)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    probes
        .iter()
        .map(|probe| probe.local_addr().unwrap().port())
        .collect()
}

fn configs(fault_model: FaultModel, count: usize) -> Vec<NodeConfig> {
    let ports = free_ports(count);
    let addr = |port: u16| format!("127.0.0.1:{}", port);

    ports
        .iter()
        .enumerate()
        .map(|(i, &port)| NodeConfig {
            listen: Some(addr(port)),
            neighbors: Some(
                ports
                    .iter()
                    .filter(|&&other| other != port)
                    .map(|&other| addr(other))
                    .collect(),
            ),
            fault_model,
            identity_seed: Some(hex_seed(i as u8 + 1)),
            ..NodeConfig::default()
        })
        .collect()
}

fn hex_seed(byte: u8) -> String {
    format!("{:02x}", byte).repeat(32)
}

async fn start_cluster(fault_model: FaultModel, count: usize) -> Vec<ServiceHandle> {
    let mut handles = Vec::new();
    for config in configs(fault_model, count) {
        let service = Service::start(&config.resolve().unwrap()).await.unwrap();
        let (handle, _task) = service.spawn(64);
        handles.push(handle);
    }

    // Every node must see the full mesh before traffic starts
    let deadline = Instant::now() + Duration::from_secs(10);
    for handle in &handles {
        while handle.neighbors().await.unwrap().len() < count - 1 {
            assert!(Instant::now() < deadline, "mesh did not form");
            sleep(Duration::from_millis(20)).await;
        }
    }
    handles
}

async fn wait_for_digest(handles: &[ServiceHandle], digest: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    for handle in handles {
        while handle.digest().await.unwrap() != digest {
            assert!(Instant::now() < deadline, "replicas did not converge");
            sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn expect_reply(handle: &mut ServiceHandle) -> Reply {
    timeout(Duration::from_secs(10), handle.replies.recv())
        .await
        .expect("reply in time")
        .expect("service running")
}

#[tokio::test]
async fn test_crash_cluster_converges() {
    let mut handles = start_cluster(FaultModel::Crash, 3).await;

    handles[0].requests.send(Request::Add("x".into())).await.unwrap();
    assert_eq!(expect_reply(&mut handles[0]).await, Reply::Add { element: "x".into() });
    handles[1].requests.send(Request::Add("y".into())).await.unwrap();
    expect_reply(&mut handles[1]).await;

    let both = concord_crdt::digest_elements(&["x".to_string(), "y".to_string()].into_iter().collect());
    wait_for_digest(&handles, &both).await;

    handles[2].requests.send(Request::Remove("x".into())).await.unwrap();
    expect_reply(&mut handles[2]).await;
    let only_y = concord_crdt::digest_elements(&["y".to_string()].into_iter().collect());
    wait_for_digest(&handles, &only_y).await;

    handles[1].requests.send(Request::Read).await.unwrap();
    match expect_reply(&mut handles[1]).await {
        Reply::Read { elements } => assert_eq!(elements.into_iter().collect::<Vec<_>>(), vec!["y"]),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_byzantine_cluster_delivers() {
    let mut handles = start_cluster(FaultModel::Byzantine, 4).await;

    handles[3].requests.send(Request::Add("z".into())).await.unwrap();
    // Acknowledged only once the quorum delivered it back
    assert_eq!(expect_reply(&mut handles[3]).await, Reply::Add { element: "z".into() });

    let expected = concord_crdt::digest_elements(&["z".to_string()].into_iter().collect());
    wait_for_digest(&handles, &expected).await;

    for handle in &handles {
        assert_eq!(handle.tags("z").await.unwrap().len(), 1);
    }
}
