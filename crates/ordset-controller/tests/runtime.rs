//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "tests"
//! ordset_type: "source"
//! ordset_scope: "test"
//! ordset_description: "Controller runtime driven end to end through informers and workers."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ordset_api::{
    InMemoryStore, LabelSelector, Preconditions, ResourceClient, Workload, WorkloadSpec,
};
use ordset_common::ControllerConfig;
use ordset_controller::{Controller, ControllerContext, EventLog, EventReason};
use ordset_metrics::new_registry;
use tokio::task::JoinHandle;

fn web_spec(replicas: u32) -> WorkloadSpec {
    let mut spec = WorkloadSpec {
        replicas,
        selector: LabelSelector::from_labels([("app", "web")]),
        ..WorkloadSpec::default()
    };
    spec.template.labels.insert("app".into(), "web".into());
    spec
}

fn config() -> ControllerConfig {
    ControllerConfig {
        workers: 2,
        resync_period: Duration::from_millis(200),
        cache_sync_timeout: Duration::from_secs(2),
        ..ControllerConfig::default()
    }
}

fn spawn_node_agent(store: InMemoryStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let pods = store.pods().list("ns", None).await.unwrap_or_default();
            for mut pod in pods {
                if pod.is_terminating() || pod.is_running_and_ready() {
                    continue;
                }
                pod.set_running(true);
                let _ = store.pods().update_status(pod).await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
}

async fn wait_until_ready(store: &InMemoryStore, replicas: u32) {
    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = store.workloads().get("ns", "web").await.unwrap().status;
            if status.ready_replicas == replicas
                && status.updated_replicas == replicas
                && status.replicas == replicas
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "workload did not become ready");
}

#[tokio::test]
async fn invalid_config_is_rejected_before_anything_starts() {
    let store = InMemoryStore::new();
    let zero_resync = ControllerConfig {
        resync_period: Duration::ZERO,
        ..config()
    };
    let err = Controller::new(ControllerContext::in_memory(&store, zero_resync)).unwrap_err();
    assert!(format!("{err:#}").contains("resync_period_ms"));

    let no_workers = ControllerConfig {
        workers: 0,
        ..config()
    };
    assert!(Controller::new(ControllerContext::in_memory(&store, no_workers)).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn controller_converges_workload_from_watch_events() {
    let store = InMemoryStore::new();
    let events = Arc::new(EventLog::new());
    let registry = new_registry();
    let context = ControllerContext::in_memory(&store, config())
        .with_recorder(events.clone())
        .with_registry(registry.clone());
    let handle = Controller::new(context).unwrap().start().await.unwrap();
    let agent = spawn_node_agent(store.clone());

    store
        .workloads()
        .create(Workload::new("ns", "web", web_spec(3)))
        .await
        .unwrap();
    wait_until_ready(&store, 3).await;

    agent.abort();
    let queue = handle.queue().clone();
    handle.shutdown().await.unwrap();
    assert!(queue.is_shutting_down());

    assert_eq!(events.with_reason(EventReason::SuccessfulCreate).len(), 3);
    let names: Vec<String> = registry
        .gather()
        .iter()
        .map(|family| family.get_name().to_owned())
        .collect();
    assert!(names.contains(&"ordset_reconcile_passes_total".to_owned()));
    assert!(names.contains(&"ordset_workqueue_adds_total".to_owned()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn externally_deleted_pod_is_replaced() {
    let store = InMemoryStore::new();
    store
        .workloads()
        .create(Workload::new("ns", "web", web_spec(2)))
        .await
        .unwrap();
    let handle = Controller::new(ControllerContext::in_memory(&store, config()))
        .unwrap()
        .start()
        .await
        .unwrap();
    let agent = spawn_node_agent(store.clone());
    wait_until_ready(&store, 2).await;

    let victim = store.pods().get("ns", "web-1").await.unwrap();
    store
        .pods()
        .delete("ns", "web-1", Preconditions::uid(victim.metadata.uid.clone()))
        .await
        .unwrap();

    let replaced = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(pod) = store.pods().get("ns", "web-1").await {
                if pod.metadata.uid != victim.metadata.uid && pod.is_running_and_ready() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(replaced.is_ok(), "pod was not replaced");

    agent.abort();
    handle.shutdown().await.unwrap();
}
