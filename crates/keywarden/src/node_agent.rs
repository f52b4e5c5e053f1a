//! node-agent task executor client.
//!
//! key material is written on compute nodes by an external node-agent; the
//! server only submits tasks and waits for their outcome. the executor is a
//! trait so the orchestrator can run against the real cnapi proxy or a mock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keywarden_types::{Guid, TransitionName};

/// errors from node-agent operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeAgentError {
    /// http request failed
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// the executor returned an unusable response
    #[error("node agent error: {0}")]
    Agent(String),
}

/// payload of a recovery-config task sent to a compute node.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryTask {
    /// which lifecycle operation to perform.
    pub action: TransitionName,
    /// the piv token on the target node.
    pub pivtoken: Guid,
    /// the recovery configuration being distributed.
    pub recovery_uuid: Uuid,
    /// ebox template body.
    pub template: String,
    /// recovery token body, hex-encoded.
    pub token: String,
}

/// terminal state of a node-agent task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// the node applied the change.
    Complete,
    /// the node reported failure.
    Failed(String),
}

/// trait for the node-agent task executor: submit a task, wait for it.
///
/// takes owned payloads to avoid lifetime issues with concurrent fan-out.
pub trait NodeAgent: Send + Sync {
    /// submit a recovery-config task to a compute node, returning the
    /// executor's task id.
    fn submit_task(
        &self,
        cn_uuid: Uuid,
        task: RecoveryTask,
    ) -> impl Future<Output = Result<String, NodeAgentError>> + Send;

    /// wait for a previously submitted task to reach a terminal state.
    fn wait_task(
        &self,
        task_id: String,
    ) -> impl Future<Output = Result<TaskStatus, NodeAgentError>> + Send;
}

/// node-agent client going through the cnapi proxy.
#[derive(Clone)]
pub struct CnapiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WaitResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl CnapiClient {
    /// create a client against a cnapi base url.
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl NodeAgent for CnapiClient {
    async fn submit_task(
        &self,
        cn_uuid: Uuid,
        task: RecoveryTask,
    ) -> Result<String, NodeAgentError> {
        let url = format!("{}/servers/{}/recovery-config", self.base_url, cn_uuid);
        let response = self
            .client
            .post(&url)
            .json(&task)
            .send()
            .await?
            .error_for_status()?;
        let body: SubmitResponse = response.json().await?;
        Ok(body.id)
    }

    async fn wait_task(&self, task_id: String) -> Result<TaskStatus, NodeAgentError> {
        let url = format!("{}/tasks/{}/wait", self.base_url, task_id);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: WaitResponse = response.json().await?;
        match body.status.as_str() {
            "complete" => Ok(TaskStatus::Complete),
            other => Ok(TaskStatus::Failed(
                body.message
                    .unwrap_or_else(|| format!("task ended in state {}", other)),
            )),
        }
    }
}

/// in-memory node agent with programmable per-node outcomes, for tests.
#[derive(Clone, Default)]
pub struct MockNodeAgent {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    failures: HashMap<Uuid, String>,
    submitted: Vec<(Uuid, RecoveryTask)>,
    task_nodes: HashMap<String, Uuid>,
    counter: u64,
}

impl MockNodeAgent {
    /// create a mock agent where every task completes.
    pub fn new() -> Self {
        Self::default()
    }

    /// make every task against `cn_uuid` fail with `message`.
    pub fn fail_cn(&self, cn_uuid: Uuid, message: &str) {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.failures.insert(cn_uuid, message.to_string());
    }

    /// clear all programmed failures.
    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.failures.clear();
    }

    /// every task submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<(Uuid, RecoveryTask)> {
        self.inner.lock().expect("mock lock").submitted.clone()
    }
}

impl NodeAgent for MockNodeAgent {
    async fn submit_task(
        &self,
        cn_uuid: Uuid,
        task: RecoveryTask,
    ) -> Result<String, NodeAgentError> {
        let mut inner = self.inner.lock().expect("mock lock");
        inner.counter += 1;
        let id = format!("task-{}", inner.counter);
        inner.submitted.push((cn_uuid, task));
        inner.task_nodes.insert(id.clone(), cn_uuid);
        Ok(id)
    }

    async fn wait_task(&self, task_id: String) -> Result<TaskStatus, NodeAgentError> {
        let inner = self.inner.lock().expect("mock lock");
        let Some(cn_uuid) = inner.task_nodes.get(&task_id) else {
            return Err(NodeAgentError::Agent(format!("unknown task {}", task_id)));
        };
        match inner.failures.get(cn_uuid) {
            Some(message) => Ok(TaskStatus::Failed(message.clone())),
            None => Ok(TaskStatus::Complete),
        }
    }
}
