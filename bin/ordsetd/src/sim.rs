//! ---
//! ordset_section: "01-core-functionality"
//! ordset_subsection: "binary"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "In-memory cluster simulation: manifest seeding and a node agent."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ordset_api::{Bucket, InMemoryStore, ListWatch, Pod, ResourceClient, Workload};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Parse every YAML document in `raw` as a workload, defaulting the namespace.
pub fn parse_manifests(raw: &str, namespace: &str) -> Result<Vec<Workload>> {
    let mut workloads = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(raw).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {index} is not valid YAML"))?;
        if value.is_null() {
            continue;
        }
        let mut workload: Workload = serde_yaml::from_value(value)
            .with_context(|| format!("document {index} is not a workload"))?;
        if workload.metadata.namespace.is_empty() {
            workload.metadata.namespace = namespace.to_owned();
        }
        workloads.push(workload);
    }
    Ok(workloads)
}

/// Create the workloads described by `paths`. Names already present are left alone.
pub async fn seed_store<P: AsRef<Path>>(
    store: &InMemoryStore,
    paths: &[P],
    namespace: &str,
) -> Result<usize> {
    let mut created = 0;
    for path in paths {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read manifest {}", path.display()))?;
        let workloads = parse_manifests(&raw, namespace)
            .with_context(|| format!("invalid manifest {}", path.display()))?;
        for workload in workloads {
            let key = workload.metadata.key();
            match store.workloads().create(workload).await {
                Ok(_) => {
                    info!(workload = %key, manifest = %path.display(), "seeded workload");
                    created += 1;
                }
                Err(err) if err.is_already_exists() => {
                    warn!(workload = %key, "workload already present; skipping manifest entry");
                }
                Err(err) => return Err(err).with_context(|| format!("failed to seed {key}")),
            }
        }
    }
    Ok(created)
}

/// Plays the part of the nodes: starts pods after a delay and completes graceful
/// deletions after the same delay.
pub struct NodeAgent {
    pods: Arc<Bucket<Pod>>,
    delay: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for NodeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeAgent")
            .field("delay", &self.delay)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl NodeAgent {
    pub fn new(pods: Arc<Bucket<Pod>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            pods,
            delay,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn spawn(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let (existing, mut events) = self.pods.list_and_watch();
        existing.iter().for_each(|pod| self.observe(pod));
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = events.recv() => match received {
                    Ok(event) => self.observe(event.object()),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "node agent lagged; rescanning pods");
                        let (existing, fresh) = self.pods.list_and_watch();
                        events = fresh;
                        existing.iter().for_each(|pod| self.observe(pod));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        debug!("node agent stopped");
    }

    fn observe(self: &Arc<Self>, pod: &Pod) {
        let terminating = pod.is_terminating();
        if !terminating && pod.is_running_and_ready() {
            return;
        }
        let ticket = format!("{}:{}", pod.metadata.uid, terminating);
        if !self.in_flight.lock().insert(ticket.clone()) {
            return;
        }
        let agent = Arc::clone(self);
        let namespace = pod.metadata.namespace.clone();
        let name = pod.metadata.name.clone();
        let uid = pod.metadata.uid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(agent.delay).await;
            let outcome = if terminating {
                agent.finish_termination(&namespace, &name, &uid).await
            } else {
                agent.start(&namespace, &name, &uid).await
            };
            if let Err(err) = outcome {
                debug!(pod = %name, error = %err, "node agent step skipped");
            }
            agent.in_flight.lock().remove(&ticket);
        });
    }

    async fn start(&self, namespace: &str, name: &str, uid: &str) -> Result<()> {
        let mut pod = self.pods.get(namespace, name).await?;
        if pod.metadata.uid != uid || pod.is_terminating() || pod.is_running_and_ready() {
            return Ok(());
        }
        pod.set_running(true);
        self.pods.update_status(pod).await?;
        debug!(pod = %name, "pod running and ready");
        Ok(())
    }

    async fn finish_termination(&self, namespace: &str, name: &str, uid: &str) -> Result<()> {
        let pod = self.pods.get(namespace, name).await?;
        if pod.metadata.uid != uid {
            return Ok(());
        }
        self.pods.purge(namespace, name)?;
        debug!(pod = %name, "pod terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordset_api::{ObjectMeta, Preconditions};
    use std::io::Write;

    const MANIFEST: &str = r#"
metadata:
  name: web
spec:
  replicas: 2
  selector:
    matchLabels:
      app: web
  template:
    labels:
      app: web
---
metadata:
  name: db
  namespace: data
spec:
  selector:
    matchLabels:
      app: db
  template:
    labels:
      app: db
"#;

    #[test]
    fn manifests_default_namespace() {
        let workloads = parse_manifests(MANIFEST, "default").unwrap();
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].metadata.key(), "default/web");
        assert_eq!(workloads[0].spec.replicas, 2);
        assert_eq!(workloads[1].metadata.key(), "data/db");
        assert_eq!(workloads[1].spec.replicas, 1);
    }

    #[tokio::test]
    async fn seeding_skips_existing_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        let store = InMemoryStore::new();
        let paths = [file.path().to_path_buf()];
        assert_eq!(seed_store(&store, &paths, "default").await.unwrap(), 2);
        assert_eq!(seed_store(&store, &paths, "default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn agent_starts_pods_and_completes_deletions() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        pods.set_graceful_deletion(true);
        let (shutdown_tx, _) = broadcast::channel(1);
        let agent = NodeAgent::new(pods.clone(), Duration::from_millis(5));
        let task = agent.spawn(shutdown_tx.subscribe());

        let created = pods
            .create(Pod {
                metadata: ObjectMeta::new("ns", "web-0"),
                ..Pod::default()
            })
            .await
            .unwrap();
        let ready = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if pods.get("ns", "web-0").await.unwrap().is_running_and_ready() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(ready.is_ok());

        pods.delete("ns", "web-0", Preconditions::uid(created.metadata.uid))
            .await
            .unwrap();
        let gone = tokio::time::timeout(Duration::from_secs(5), async {
            while pods.get("ns", "web-0").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(gone.is_ok());

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }
}
