//! REST API handlers
//!
//! Every handler enters the scheduler by posting a closure onto its event
//! loop and awaiting the result over a oneshot channel.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use nodesched_core::{
    LeaseReply, NodeId, NodeInfo, NodeschedError, NodeschedResult, ResourceSet, ResourcesData,
    SchedulingFailureType, SchedulingStrategy, Task, TaskId, TaskKind, WorkerId,
};
use nodesched_runtime::{EventLoopHandle, Executor, HandlerStats};
use nodesched_scheduler::{
    ClusterTaskManager, LeaseReplyCallback, SchedulerCounters, SchedulingPassSummary,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::directory::NodeDirectory;

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: EventLoopHandle<ClusterTaskManager>,
    pub nodes: NodeDirectory,
}

/// Create the API router
pub fn create_router(scheduler: EventLoopHandle<ClusterTaskManager>, nodes: NodeDirectory) -> Router {
    let state = Arc::new(AppState { scheduler, nodes });

    Router::new()
        .route("/api/v1/leases", post(request_lease))
        .route("/api/v1/leases/:task_id", delete(cancel_lease))
        .route("/api/v1/leases/:task_id/return", post(return_lease))
        .route("/api/v1/cancel", post(cancel_tasks))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:node_id", put(upsert_node))
        .route("/api/v1/nodes/:node_id", delete(remove_node))
        .route("/api/v1/nodes/:node_id/drain", post(drain_node))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/resource-usage", get(get_resource_usage))
        .route("/api/v1/pending-actors", get(get_pending_actors))
        .route("/api/v1/debug", get(get_debug))
        .route("/api/v1/event-stats", get(get_event_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn error_response(e: NodeschedError) -> (StatusCode, String) {
    let status = match e {
        NodeschedError::NodeNotFound(_) | NodeschedError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        NodeschedError::InvalidResources(_) | NodeschedError::Api(_) => StatusCode::BAD_REQUEST,
        NodeschedError::EventLoop(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Run `f` on the scheduler loop and wait for its result
async fn call<T, F>(state: &AppState, name: &str, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut ClusterTaskManager) -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    state
        .scheduler
        .post(name, move |ctm: &mut ClusterTaskManager| {
            let _ = tx.send(f(ctm));
        })
        .map_err(error_response)?;
    rx.await.map_err(|_| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{} did not complete", name),
        )
    })
}

/// Run a pass, and a second one when the first revived infeasible work
fn schedule(ctm: &mut ClusterTaskManager) -> SchedulingPassSummary {
    let mut summary = ctm.schedule_and_dispatch_tasks();
    if summary.revived > 0 {
        summary.merge(ctm.schedule_and_dispatch_tasks());
    }
    summary
}

/// Request for a worker lease
#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    /// Task id; generated when omitted
    #[serde(default)]
    pub task_id: Option<TaskId>,
    /// Function descriptor
    pub name: String,
    /// Required resources
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default)]
    pub scheduling_strategy: SchedulingStrategy,
    #[serde(default)]
    pub owner_worker_id: Option<WorkerId>,
    #[serde(default)]
    pub owner_node_id: Option<NodeId>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub locality_hint: Option<NodeId>,
    /// Grant on this node or reject; never spill back
    #[serde(default)]
    pub grant_or_reject: bool,
    /// The caller picked this node for data locality
    #[serde(default)]
    pub locality_preferred: bool,
}

impl LeaseRequest {
    fn into_task(self) -> NodeschedResult<Task> {
        let resources = ResourceSet::try_from_map(&self.resources)?;
        let mut task = Task::new(self.name, resources)
            .with_kind(self.kind)
            .with_strategy(self.scheduling_strategy)
            .with_owner(
                self.owner_worker_id.unwrap_or_else(WorkerId::nil),
                self.owner_node_id.unwrap_or_else(NodeId::nil),
            );
        if let Some(task_id) = self.task_id {
            task.task_id = task_id;
        }
        task.depth = self.depth;
        task.locality_hint = self.locality_hint;
        Ok(task)
    }
}

/// Resolved lease request
#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub reply: LeaseReply,
}

/// Submit a lease request and wait until it is granted, spilled back or rejected
async fn request_lease(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<Json<LeaseResponse>> {
    let grant_or_reject = req.grant_or_reject;
    let locality_preferred = req.locality_preferred;
    let task = req.into_task().map_err(error_response)?;
    let task_id = task.task_id;
    info!(
        task_id = %task_id,
        name = %task.name,
        resources = %task.required_resources,
        "Lease requested"
    );

    let (callback, rx) = LeaseReplyCallback::channel();
    state
        .scheduler
        .post(
            "ClusterTaskManager.QueueAndScheduleTask",
            move |ctm: &mut ClusterTaskManager| {
                ctm.queue_and_schedule_task(task, grant_or_reject, locality_preferred, callback);
            },
        )
        .map_err(error_response)?;

    let reply = rx.await.map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Lease request {} was dropped without a reply", task_id),
        )
    })?;
    Ok(Json(LeaseResponse { task_id, reply }))
}

/// Cancellation outcome
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Cancel one lease request
async fn cancel_lease(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<CancelResponse>> {
    info!(task_id = %task_id, "Cancelling lease request");
    let cancelled = call(&state, "ClusterTaskManager.CancelTask", move |ctm| {
        ctm.cancel_task(
            &task_id,
            SchedulingFailureType::CancelledIntended,
            "Lease request cancelled by the caller",
        )
    })
    .await?;
    Ok(Json(CancelResponse { cancelled }))
}

/// Return a granted lease
async fn return_lease(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<StatusCode> {
    let returned = call(&state, "ClusterTaskManager.ReturnWorkerLease", move |ctm| {
        ctm.return_worker_lease(&task_id)
    })
    .await?;
    if !returned {
        return Err(error_response(NodeschedError::TaskNotFound(
            task_id.to_string(),
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Which queued or dispatched work to cancel
#[derive(Debug, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum CancelSelector {
    Task { task_id: TaskId },
    Worker { worker_id: WorkerId },
    Node { node_id: NodeId },
    ResourceShapes { shapes: Vec<BTreeMap<String, f64>> },
}

/// Cancellation request
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(flatten)]
    pub selector: CancelSelector,
    #[serde(default)]
    pub failure_type: SchedulingFailureType,
    #[serde(default)]
    pub message: String,
}

/// Cancel by selector
async fn cancel_tasks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<CancelResponse>> {
    debug!(selector = ?req.selector, failure_type = %req.failure_type, "Cancel requested");
    let CancelRequest {
        selector,
        failure_type,
        message,
    } = req;

    let cancelled = match selector {
        CancelSelector::Task { task_id } => {
            call(&state, "ClusterTaskManager.CancelTask", move |ctm| {
                ctm.cancel_task(&task_id, failure_type, &message)
            })
            .await?
        }
        CancelSelector::Worker { worker_id } => {
            call(&state, "ClusterTaskManager.CancelAllTasksOwnedBy", move |ctm| {
                ctm.cancel_all_tasks_owned_by_worker(&worker_id, failure_type, &message)
            })
            .await?
        }
        CancelSelector::Node { node_id } => {
            call(&state, "ClusterTaskManager.CancelAllTasksOwnedBy", move |ctm| {
                ctm.cancel_all_tasks_owned_by_node(&node_id, failure_type, &message)
            })
            .await?
        }
        CancelSelector::ResourceShapes { shapes } => {
            let shapes = shapes
                .iter()
                .map(|shape| ResourceSet::try_from_map(shape))
                .collect::<NodeschedResult<Vec<_>>>()
                .map_err(error_response)?;
            call(
                &state,
                "ClusterTaskManager.CancelTasksWithResourceShapes",
                move |ctm| ctm.cancel_tasks_with_resource_shapes(&shapes),
            )
            .await?
        }
    };
    Ok(Json(CancelResponse { cancelled }))
}

/// Node heartbeat: address and resources
#[derive(Debug, Deserialize)]
pub struct NodeUpdateRequest {
    pub address: String,
    pub port: u16,
    /// Total resources
    pub resources: BTreeMap<String, f64>,
    /// Currently available resources; defaults to total. Ignored for the
    /// local node, whose usage is tracked from its own leases
    #[serde(default)]
    pub available: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Node as seen by the scheduler
#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub node_id: NodeId,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub total: ResourceSet,
    pub available: ResourceSet,
    pub labels: BTreeMap<String, String>,
    pub draining: bool,
}

/// List nodes in the resource view
async fn list_nodes(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<NodeResponse>>> {
    let nodes = call(&state, "NodeManager.ListNodes", |ctm| {
        ctm.cluster_resource_scheduler()
            .view()
            .nodes()
            .map(|(node_id, node)| (*node_id, node.clone()))
            .collect::<Vec<_>>()
    })
    .await?;

    let responses = nodes
        .into_iter()
        .map(|(node_id, node)| {
            let info = state.nodes.get(&node_id);
            NodeResponse {
                node_id,
                address: info.as_ref().map(|i| i.address.clone()),
                port: info.map(|i| i.port),
                total: node.total,
                available: node.available,
                labels: node.labels,
                draining: node.draining,
            }
        })
        .collect();
    Ok(Json(responses))
}

/// Add or update a node and run a scheduling pass
async fn upsert_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<NodeId>,
    Json(req): Json<NodeUpdateRequest>,
) -> ApiResult<Json<SchedulingPassSummary>> {
    let total = ResourceSet::try_from_map(&req.resources).map_err(error_response)?;
    let available = req
        .available
        .as_ref()
        .map(|available| ResourceSet::try_from_map(available))
        .transpose()
        .map_err(error_response)?;
    let labels = req.labels;
    info!(node_id = %node_id, resources = %total, "Node update");
    state
        .nodes
        .upsert(NodeInfo::new(node_id, req.address, req.port));

    let summary = call(
        &state,
        "NodeManager.HandleNodeUpdate",
        move |ctm| -> NodeschedResult<SchedulingPassSummary> {
            let crs = ctm.cluster_resource_scheduler_mut();
            crs.update_node_resources(node_id, total, available);
            crs.view_mut().set_node_labels(&node_id, labels)?;
            Ok(schedule(ctm))
        },
    )
    .await?
    .map_err(error_response)?;
    Ok(Json(summary))
}

/// Remove a node, cancel work its owners submitted and run a scheduling pass
async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<Json<SchedulingPassSummary>> {
    info!(node_id = %node_id, "Node removed");
    let summary = call(
        &state,
        "NodeManager.HandleNodeRemoved",
        move |ctm| -> NodeschedResult<SchedulingPassSummary> {
            if node_id == ctm.self_node_id() {
                return Err(NodeschedError::Api("cannot remove the local node".to_string()));
            }
            if !ctm.cluster_resource_scheduler_mut().remove_node(&node_id) {
                return Err(NodeschedError::NodeNotFound(node_id.to_string()));
            }
            ctm.cancel_all_tasks_owned_by_node(
                &node_id,
                SchedulingFailureType::Failed,
                &format!("Owner node {} was removed from the cluster", node_id),
            );
            Ok(schedule(ctm))
        },
    )
    .await?
    .map_err(error_response)?;
    state.nodes.remove(&node_id);
    Ok(Json(summary))
}

/// Stop placing new work on a node
async fn drain_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<Json<SchedulingPassSummary>> {
    info!(node_id = %node_id, "Draining node");
    let summary = call(
        &state,
        "NodeManager.HandleDrainNode",
        move |ctm| -> NodeschedResult<SchedulingPassSummary> {
            ctm.cluster_resource_scheduler_mut()
                .view_mut()
                .set_node_draining(&node_id, true)?;
            Ok(schedule(ctm))
        },
    )
    .await?
    .map_err(error_response)?;
    Ok(Json(summary))
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub node_id: NodeId,
    pub pending_tasks: usize,
    pub infeasible_tasks: usize,
    pub nodes: usize,
    pub counters: SchedulerCounters,
}

/// Get scheduler status
async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let status = call(&state, "ClusterTaskManager.GetStatus", |ctm| StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: ctm.self_node_id(),
        pending_tasks: ctm.pending_queue_size(),
        infeasible_tasks: ctm.infeasible_queue_size(),
        nodes: ctm.cluster_resource_scheduler().view().num_nodes(),
        counters: ctm.counters(),
    })
    .await?;
    Ok(Json(status))
}

/// Queued demand by resource shape
async fn get_resource_usage(State(state): State<Arc<AppState>>) -> ApiResult<Json<ResourcesData>> {
    let data = call(&state, "ClusterTaskManager.FillResourceUsage", |ctm| {
        let mut data = ResourcesData::new(ctm.self_node_id());
        ctm.fill_resource_usage(&mut data);
        data
    })
    .await?;
    Ok(Json(data))
}

/// Queued actor-creation demand by resource shape
async fn get_pending_actors(State(state): State<Arc<AppState>>) -> ApiResult<Json<ResourcesData>> {
    let data = call(&state, "ClusterTaskManager.FillPendingActorInfo", |ctm| {
        let mut data = ResourcesData::new(ctm.self_node_id());
        ctm.fill_pending_actor_info(&mut data);
        data
    })
    .await?;
    Ok(Json(data))
}

/// Text dump of scheduler state
async fn get_debug(State(state): State<Arc<AppState>>) -> ApiResult<String> {
    call(&state, "ClusterTaskManager.DebugStr", |ctm| ctm.debug_str()).await
}

/// Event loop handler statistics
async fn get_event_stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<BTreeMap<String, HandlerStats>>> {
    Ok(Json(state.scheduler.stats().snapshot()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use nodesched_core::{SchedulerConfig, CPU};
    use nodesched_runtime::EventLoop;
    use nodesched_scheduler::{ClusterResourceScheduler, GrantingLocalTaskManager};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        handle: EventLoopHandle<ClusterTaskManager>,
        local: NodeId,
    }

    fn test_app() -> TestApp {
        let local = NodeId::new();
        let nodes = NodeDirectory::new();
        nodes.upsert(NodeInfo::new(local, "127.0.0.1", 9190));
        let ctm = ClusterTaskManager::new(
            ClusterResourceScheduler::with_default_strategy(
                local,
                ResourceSet::from_pairs([(CPU, 4.0)]),
                0.5,
            ),
            nodes.clone(),
            Box::new(|_: &Task| {}),
            Box::new(GrantingLocalTaskManager::new(local)),
            SchedulerConfig::default(),
        );
        let event_loop = EventLoop::new(ctm).unwrap();
        let handle = event_loop.handle();
        tokio::spawn(event_loop.run());

        TestApp {
            router: create_router(handle.clone(), nodes),
            handle,
            local,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn wait_for_infeasible(router: &Router, expected: u64) {
        for _ in 0..100 {
            let (_, status) = send(router, "GET", "/api/v1/status", None).await;
            if status["infeasible_tasks"] == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("infeasible queue never reached {}", expected);
    }

    #[tokio::test]
    async fn test_lease_granted_and_returned() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/v1/leases",
            Some(json!({"name": "f", "resources": {"CPU": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "granted");
        assert_eq!(body["node_id"], app.local.to_string());

        let task_id = body["task_id"].as_str().unwrap().to_string();
        let uri = format!("/api/v1/leases/{}/return", task_id);
        let (status, _) = send(&app.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.handle.stop();
    }

    #[tokio::test]
    async fn test_invalid_resources_rejected() {
        let app = test_app();
        let (status, _) = send(
            &app.router,
            "POST",
            "/api/v1/leases",
            Some(json!({"name": "f", "resources": {"CPU": -1}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_infeasible_lease() {
        let app = test_app();
        let task_id = TaskId::new();
        let router = app.router.clone();
        let pending = tokio::spawn(async move {
            send(
                &router,
                "POST",
                "/api/v1/leases",
                Some(json!({"task_id": task_id, "name": "big", "resources": {"CPU": 64}})),
            )
            .await
        });
        wait_for_infeasible(&app.router, 1).await;

        let (_, usage) = send(&app.router, "GET", "/api/v1/resource-usage", None).await;
        assert_eq!(usage["resource_load_by_shape"].as_array().unwrap().len(), 1);
        assert_eq!(usage["resource_load"]["CPU"], 64.0);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/v1/cancel",
            Some(json!({"by": "task", "task_id": task_id, "message": "no longer needed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);

        let (status, reply) = pending.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["status"], "rejected");
        assert_eq!(reply["failure_type"], "cancelled_intended");
        assert_eq!(reply["message"], "no longer needed");

        let uri = format!("/api/v1/leases/{}", task_id);
        let (_, body) = send(&app.router, "DELETE", &uri, None).await;
        assert_eq!(body["cancelled"], false);
    }

    #[tokio::test]
    async fn test_node_join_spills_back_infeasible_lease() {
        let app = test_app();
        let router = app.router.clone();
        let pending = tokio::spawn(async move {
            send(
                &router,
                "POST",
                "/api/v1/leases",
                Some(json!({"name": "big", "resources": {"CPU": 64}})),
            )
            .await
        });
        wait_for_infeasible(&app.router, 1).await;

        let remote = NodeId::new();
        let (status, summary) = send(
            &app.router,
            "PUT",
            &format!("/api/v1/nodes/{}", remote),
            Some(json!({"address": "10.0.0.7", "port": 9190, "resources": {"CPU": 128}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["revived"], 1);
        assert_eq!(summary["spilled_back"], 1);

        let (_, reply) = pending.await.unwrap();
        assert_eq!(reply["status"], "spillback");
        assert_eq!(reply["node_id"], remote.to_string());
        assert_eq!(reply["address"], "10.0.0.7");

        let (_, nodes) = send(&app.router, "GET", "/api/v1/nodes", None).await;
        assert_eq!(nodes.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_node_heartbeat_replaces_available() {
        let app = test_app();
        let remote = NodeId::new();
        let uri = format!("/api/v1/nodes/{}", remote);
        let find_remote = |nodes: &Value| {
            nodes
                .as_array()
                .unwrap()
                .iter()
                .find(|n| n["node_id"] == remote.to_string())
                .cloned()
                .unwrap()
        };

        let (status, _) = send(
            &app.router,
            "PUT",
            &uri,
            Some(json!({
                "address": "10.0.0.7",
                "port": 9190,
                "resources": {"CPU": 2},
                "available": {"CPU": 0.5},
                "labels": {"zone": "b"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, nodes) = send(&app.router, "GET", "/api/v1/nodes", None).await;
        assert_eq!(find_remote(&nodes)["available"]["CPU"], 0.5);
        assert_eq!(find_remote(&nodes)["labels"]["zone"], "b");

        let (status, _) = send(
            &app.router,
            "PUT",
            &uri,
            Some(json!({"address": "10.0.0.7", "port": 9190, "resources": {"CPU": 2}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, nodes) = send(&app.router, "GET", "/api/v1/nodes", None).await;
        assert_eq!(find_remote(&nodes)["available"]["CPU"], 2.0);

        app.handle.stop();
    }

    #[tokio::test]
    async fn test_node_removal_errors() {
        let app = test_app();
        let uri = format!("/api/v1/nodes/{}", app.local);
        let (status, _) = send(&app.router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/v1/nodes/{}", NodeId::new());
        let (status, _) = send(&app.router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/api/v1/nodes/{}/drain", NodeId::new());
        let (status, _) = send(&app.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_debug_and_event_stats() {
        let app = test_app();
        send(
            &app.router,
            "POST",
            "/api/v1/leases",
            Some(json!({"name": "f", "resources": {"CPU": 1}})),
        )
        .await;

        let (status, dump) = send(&app.router, "GET", "/api/v1/debug", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(dump
            .as_str()
            .unwrap()
            .starts_with("========== ClusterTaskManager =========="));

        let (_, stats) = send(&app.router, "GET", "/api/v1/event-stats", None).await;
        assert_eq!(stats["ClusterTaskManager.QueueAndScheduleTask"]["cum_count"], 1);

        let (_, actors) = send(&app.router, "GET", "/api/v1/pending-actors", None).await;
        assert!(actors["resource_load_by_shape"].as_array().unwrap().is_empty());
    }
}
