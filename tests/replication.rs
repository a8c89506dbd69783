mod common;

use common::*;
use faultline::prelude::*;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn sorted_state(graph: &PropertyGraph) -> (Vec<Vertex>, Vec<Edge>) {
    let mut vertices = graph.get_vertices(None);
    vertices.sort_by(|a, b| a.id.cmp(&b.id));
    let mut edges = graph.get_edges();
    edges.sort_by_key(|e| e.key());
    (vertices, edges)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_replica_matches_the_primary() {
    let provider = InMemoryStateStoreProvider::new();
    let engine = engine(&provider, config()).await;
    load(&engine, &[DEFINITIONS, INSTANCE_NIC]).await;

    let low = engine.senders().low;
    let mut rng = StdRng::seed_from_u64(7);
    for h in 0..4 {
        low.send(host(&format!("h{}", h))).unwrap();
    }
    for step in 0..60 {
        let h = format!("h{}", rng.gen_range(0..4));
        let event = match rng.gen_range(0..4) {
            0 => instance(&format!("i{}", rng.gen_range(0..8)), &h),
            1 => nic_alarm(&format!("n{}", rng.gen_range(0..3)), &h),
            2 => EntityEvent::delete_entity(&format!("n{}", rng.gen_range(0..3))),
            _ => EntityEvent::delete_entity(&format!("i{}", rng.gen_range(0..8))),
        };
        low.send(event).unwrap();
        if step % 20 == 19 {
            tokio::task::yield_now().await;
        }
    }
    low.send(host("sentinel")).unwrap();

    let graph = engine.graph().clone();
    eventually("sentinel applied", || live(&graph, "sentinel").is_some()).await;
    let replicator = engine.replicator();
    eventually("replicas converged", || {
        let primary = sorted_state(&graph);
        (0..replicator.worker_count()).all(|i| {
            replicator
                .replica(i)
                .map(|replica| sorted_state(replica) == primary)
                .unwrap_or(false)
        })
    })
    .await;

    let primary = sorted_state(&graph);
    for i in 0..replicator.worker_count() {
        assert_eq!(sorted_state(replicator.replica(i).unwrap()), primary);
        assert!(replicator.applied_count(i) > 0);
    }
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_templates_are_spread_over_workers_by_name() {
    let provider = InMemoryStateStoreProvider::new();
    let engine = engine(&provider, config()).await;
    load(&engine, &[DEFINITIONS, INSTANCE_NIC, INSTANCE_ON_HOST, RESTART_HOST]).await;

    let replicator = engine.replicator();
    for name in ["instance-nic", "instance-on-host", "restart-host"] {
        let owner = replicator.worker_for(name);
        for i in 0..replicator.worker_count() {
            let installed = replicator.evaluator(i).unwrap().scenarios_of_template(name).len();
            assert_eq!(installed, usize::from(i == owner), "{} on worker {}", name, i);
        }
    }
    engine.shutdown().await;
}
