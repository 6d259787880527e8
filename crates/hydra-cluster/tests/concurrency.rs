//! Allocation under concurrent callers, with randomized replica latency.

mod common;

use std::time::Duration;

use common::Harness;
use hydra_cluster::ClusterError;
use hydra_core::DeployRequest;

const TRIALS: usize = 20;

fn jitter(h: &Harness) {
    h.runtime
        .set_exec_latency(Duration::from_millis(0), Duration::from_millis(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_deploys_for_all_free_nodes_admit_exactly_one() {
    for trial in 0..TRIALS {
        let h = Harness::start(&[("web", 3)]);
        h.add_nodes(&["node-1.test", "node-2.test", "node-3.test"]);
        jitter(&h);

        let request = DeployRequest::new("web", "img", 8080, 80).with_replicas(3);
        let first = tokio::spawn({
            let controller = h.controller.clone();
            let request = request.clone();
            async move { controller.deploy_service(request).await }
        });
        let second = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.deploy_service(request).await }
        });
        let results = [first.await.unwrap(), second.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1, "trial {trial}: {results:?}");
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(ClusterError::Capacity { available: 0, .. }))),
            "trial {trial}: {results:?}"
        );
        assert_eq!(h.config("web").await.nodes.len(), 3, "trial {trial}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deploys_for_different_aliases_never_interleave() {
    for trial in 0..TRIALS {
        let h = Harness::start(&[("web", 3), ("api", 3)]);
        h.add_nodes(&["node-1.test", "node-2.test", "node-3.test"]);
        jitter(&h);

        let web = tokio::spawn({
            let controller = h.controller.clone();
            async move {
                controller
                    .deploy_service(DeployRequest::new("web", "img", 8080, 80).with_replicas(3))
                    .await
            }
        });
        let api = tokio::spawn({
            let controller = h.controller.clone();
            async move {
                controller
                    .deploy_service(DeployRequest::new("api", "img", 9090, 90).with_replicas(3))
                    .await
            }
        });
        web.await.unwrap().unwrap();
        api.await.unwrap().unwrap();

        // Replica starts of one deploy all complete before the other's begin.
        let aliases: Vec<String> = h
            .runtime
            .exec_log()
            .iter()
            .filter_map(|r| r.arg("--name"))
            .filter_map(|name| name.split('.').next())
            .map(str::to_string)
            .collect();
        assert_eq!(aliases.len(), 6, "trial {trial}");
        let switches = aliases.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "trial {trial}: {aliases:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_node_creation_never_reuses_a_name() {
    let h = Harness::start(&[]);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let controller = h.controller.clone();
        tasks.push(tokio::spawn(async move { controller.create_node().await }));
    }
    let mut names = Vec::new();
    for task in tasks {
        names.push(task.await.unwrap().unwrap().name);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 8);
    assert_eq!(h.controller.watched_nodes().len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_deploy_caller_still_commits_every_replica() {
    let h = Harness::start(&[("web", 2)]);
    h.add_nodes(&["node-1.test", "node-2.test"]);
    h.runtime
        .set_exec_latency(Duration::from_millis(5), Duration::from_millis(80));

    let caller = tokio::spawn({
        let controller = h.controller.clone();
        async move {
            controller
                .deploy_service(DeployRequest::new("web", "img", 8080, 80).with_replicas(2))
                .await
        }
    });
    while h.runtime.exec_log().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    caller.abort();
    let _ = caller.await;

    // Registry and load balancer agree on both replicas.
    let config = h.wait_for_config("web", |c| c.nodes.len() == 2).await;
    let mut placed = config.node_names();
    placed.sort();
    assert_eq!(placed, vec!["node-1.test", "node-2.test"]);
    assert_eq!(h.runtime.exec_log().len(), 2);
    assert_eq!(h.slot_status("web", "node1"), "UP");
    assert_eq!(h.slot_status("web", "node2"), "UP");
}
