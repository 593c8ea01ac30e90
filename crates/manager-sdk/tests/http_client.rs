use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use manager_sdk::{
    resolve, BlueprintUpload, ClientError, ConnectionParams, DeploymentSpec, ExecutionStatus,
    Inputs, ManagerApi, ManagerClient, PermanentKind, RetryPolicy,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Default)]
struct Recorded {
    token_requests: u32,
    execution_polls: u32,
    authorization: Option<String>,
    tenants: Vec<String>,
    tokens: Vec<String>,
    upload_query: HashMap<String, String>,
    upload_bytes: usize,
    started: Option<Value>,
    update: Option<(String, Value)>,
    cancelled: Option<(String, Value)>,
}

#[derive(Clone, Default)]
struct StubManager {
    recorded: Arc<Mutex<Recorded>>,
}

impl StubManager {
    fn note_request(&self, headers: &HeaderMap) {
        let mut recorded = self.recorded.lock().unwrap();
        if let Some(tenant) = header(headers, "tenant") {
            recorded.tenants.push(tenant);
        }
        if let Some(token) = header(headers, "authentication-token") {
            recorded.tokens.push(token);
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn issue_token(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut recorded = stub.recorded.lock().unwrap();
    recorded.token_requests += 1;
    recorded.authorization = header(&headers, "authorization");
    if body["username"] == "intruder" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "bad credentials", "error_code": "unauthorized_error"})),
        );
    }
    (StatusCode::OK, Json(json!({"value": "tok-123", "role": "user"})))
}

async fn get_blueprint(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    if id == "known" {
        (StatusCode::OK, Json(json!({"id": id})))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"message": format!("blueprint {id} not found")})),
        )
    }
}

async fn put_blueprint(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    stub.note_request(&headers);
    if id == "taken" {
        return (
            StatusCode::CONFLICT,
            Json(json!({"message": "blueprint taken already exists", "error_code": "conflict_error"})),
        );
    }
    let mut recorded = stub.recorded.lock().unwrap();
    recorded.upload_query = query;
    recorded.upload_bytes = body.len();
    (StatusCode::CREATED, Json(json!({"id": id})))
}

async fn get_deployment(State(stub): State<StubManager>, headers: HeaderMap) -> impl IntoResponse {
    stub.note_request(&headers);
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "deployment not found"})),
    )
}

async fn put_deployment(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    (
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "blueprint_id": body["blueprint_id"],
            "inputs": body["inputs"],
            "created_at": "2024-05-01T10:00:00Z"
        })),
    )
}

async fn start_execution(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    let response = json!({
        "id": "exec-1",
        "deployment_id": body["deployment_id"],
        "workflow_id": body["workflow_id"],
        "status": "pending",
        "error": ""
    });
    stub.recorded.lock().unwrap().started = Some(body);
    (StatusCode::CREATED, Json(response))
}

async fn list_executions(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    let deployment_id = query.get("deployment_id").cloned().unwrap_or_default();
    Json(json!({
        "items": [
            {"id": "exec-0", "deployment_id": deployment_id, "workflow_id": "create_deployment_environment", "status": "terminated"},
            {"id": "exec-1", "deployment_id": deployment_id, "workflow_id": "install", "status": "started"}
        ],
        "metadata": {"pagination": {"total": 2}}
    }))
}

async fn initiate_update(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    if id == "frozen" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "deployment frozen has active executions", "error_code": "illegal_action"})),
        );
    }
    stub.recorded.lock().unwrap().update = Some((id.clone(), body));
    (
        StatusCode::OK,
        Json(json!({"id": format!("{id}-update-1"), "execution_id": "exec-upd", "state": "updating"})),
    )
}

/// Fails the first poll with a 503, then reports success.
async fn get_execution(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    let poll = {
        let mut recorded = stub.recorded.lock().unwrap();
        recorded.execution_polls += 1;
        recorded.execution_polls
    };
    if poll == 1 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "manager restarting"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "id": id,
            "deployment_id": "web",
            "workflow_id": "install",
            "status": "terminated",
            "error": ""
        })),
    )
}

async fn cancel_execution(
    State(stub): State<StubManager>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    stub.note_request(&headers);
    let response = json!({
        "id": id,
        "deployment_id": "web",
        "workflow_id": "install",
        "status": "cancelling",
        "error": ""
    });
    stub.recorded.lock().unwrap().cancelled = Some((id, body));
    (StatusCode::OK, Json(response))
}

async fn spawn_stub() -> (SocketAddr, StubManager) {
    let stub = StubManager::default();
    let router = Router::new()
        .route("/api/v3.1/tokens", post(issue_token))
        .route(
            "/api/v3.1/blueprints/:id",
            get(get_blueprint).put(put_blueprint),
        )
        .route(
            "/api/v3.1/deployments/:id",
            get(get_deployment).put(put_deployment),
        )
        .route(
            "/api/v3.1/executions",
            post(start_execution).get(list_executions),
        )
        .route(
            "/api/v3.1/executions/:id",
            get(get_execution).post(cancel_execution),
        )
        .route(
            "/api/v3.1/deployment-updates/:id/update/initiate",
            post(initiate_update),
        )
        .with_state(stub.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (addr, stub)
}

fn client_for(addr: SocketAddr, username: &str) -> ManagerClient {
    let config = resolve(&ConnectionParams {
        endpoint: Some(format!("http://{addr}")),
        username: Some(username.into()),
        password: Some("secret".into()),
        tenant: Some("ops".into()),
        ..Default::default()
    })
    .expect("valid connection");
    let retry = RetryPolicy::default()
        .with_delays(Duration::from_millis(10), Duration::from_millis(50))
        .with_jitter(0.0);
    ManagerClient::new(config, retry).expect("client")
}

#[test_timeout::tokio_timeout_test(20)]
async fn authenticates_once_and_scopes_to_tenant() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    assert!(client.blueprint_exists("known").await.expect("exists"));
    assert!(!client.blueprint_exists("missing").await.expect("missing"));
    assert_eq!(client.get_deployment("web").await.expect("get"), None);

    let recorded = stub.recorded.lock().unwrap();
    assert_eq!(recorded.token_requests, 1);
    // admin:secret
    assert_eq!(
        recorded.authorization.as_deref(),
        Some("Basic YWRtaW46c2VjcmV0")
    );
    assert_eq!(recorded.tenants, vec!["ops"; 3]);
    assert_eq!(recorded.tokens, vec!["tok-123"; 3]);
}

#[test_timeout::tokio_timeout_test(20)]
async fn upload_sends_archive_and_entry_file() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let upload = BlueprintUpload {
        blueprint_id: "web-bp".into(),
        application_file: "blueprint.yaml".into(),
        archive: Bytes::from_static(b"not really a tarball"),
    };
    client.upload_blueprint(&upload).await.expect("upload");

    let recorded = stub.recorded.lock().unwrap();
    assert_eq!(
        recorded
            .upload_query
            .get("application_file_name")
            .map(String::as_str),
        Some("blueprint.yaml")
    );
    assert_eq!(recorded.upload_bytes, upload.archive.len());
}

#[test_timeout::tokio_timeout_test(20)]
async fn upload_conflict_is_permanent() {
    let (addr, _stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let err = client
        .upload_blueprint(&BlueprintUpload {
            blueprint_id: "taken".into(),
            application_file: "blueprint.yaml".into(),
            archive: Bytes::new(),
        })
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.message(), "blueprint taken already exists");
}

#[test_timeout::tokio_timeout_test(20)]
async fn creates_deployment_and_starts_execution() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let mut inputs = Inputs::new();
    inputs.insert("replicas".into(), json!(2));
    let spec = DeploymentSpec {
        blueprint_id: "web-bp".into(),
        inputs,
    };
    let deployment = client
        .create_or_update_deployment("web", &spec)
        .await
        .expect("create");
    assert!(deployment.matches(&spec));

    let execution = client
        .start_execution("web", "install", &Inputs::new())
        .await
        .expect("start");
    assert_eq!(execution.status, ExecutionStatus::Pending);
    assert_eq!(execution.error, None);

    let started = stub.recorded.lock().unwrap().started.clone().expect("body");
    assert_eq!(started["workflow_id"], "install");
    assert!(started.get("parameters").is_none());
}

#[test_timeout::tokio_timeout_test(20)]
async fn updates_deployment_in_place() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let spec = DeploymentSpec {
        blueprint_id: "web-bp-v2".into(),
        inputs: {
            let mut inputs = Inputs::new();
            inputs.insert("replicas".into(), json!(4));
            inputs
        },
    };
    let deployment = client
        .update_deployment("web", &spec)
        .await
        .expect("update");
    assert_eq!(deployment.id, "web");
    assert!(deployment.matches(&spec));

    let recorded = stub.recorded.lock().unwrap();
    let (id, body) = recorded.update.clone().expect("update body");
    assert_eq!(id, "web");
    assert_eq!(body, json!({"blueprint_id": "web-bp-v2", "inputs": {"replicas": 4}}));
    assert_eq!(recorded.tenants, vec!["ops"]);
    assert_eq!(recorded.tokens, vec!["tok-123"]);
}

#[test_timeout::tokio_timeout_test(20)]
async fn refused_update_is_rejected() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let err = client
        .update_deployment(
            "frozen",
            &DeploymentSpec {
                blueprint_id: "web-bp".into(),
                inputs: Inputs::new(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(PermanentKind::Rejected));
    assert!(matches!(err, ClientError::Permanent { status: Some(400), .. }));
    assert_eq!(err.message(), "deployment frozen has active executions");
    assert!(stub.recorded.lock().unwrap().update.is_none());
}

#[test_timeout::tokio_timeout_test(20)]
async fn cancel_posts_cancel_action() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    client.cancel_execution("exec-7").await.expect("cancel");

    let recorded = stub.recorded.lock().unwrap();
    let (id, body) = recorded.cancelled.clone().expect("cancel body");
    assert_eq!(id, "exec-7");
    assert_eq!(body, json!({"action": "cancel"}));
    assert_eq!(recorded.execution_polls, 0);
}

#[test_timeout::tokio_timeout_test(20)]
async fn transient_poll_failure_is_absorbed() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let execution = client.get_execution("exec-1").await.expect("poll");
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(stub.recorded.lock().unwrap().execution_polls, 2);
}

#[test_timeout::tokio_timeout_test(20)]
async fn lists_executions_for_deployment() {
    let (addr, _stub) = spawn_stub().await;
    let client = client_for(addr, "admin");

    let executions = client.list_executions("web").await.expect("list");
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.deployment_id == "web"));
    assert_eq!(executions[1].status, ExecutionStatus::Started);
}

#[test_timeout::tokio_timeout_test(20)]
async fn bad_credentials_are_not_retried() {
    let (addr, stub) = spawn_stub().await;
    let client = client_for(addr, "intruder");

    let err = client.blueprint_exists("known").await.unwrap_err();
    assert_eq!(err.kind(), Some(PermanentKind::Auth));
    assert!(matches!(err, ClientError::Permanent { status: Some(401), .. }));
    assert_eq!(stub.recorded.lock().unwrap().token_requests, 1);
}

#[test_timeout::tokio_timeout_test(20)]
async fn unreachable_manager_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = client_for(addr, "admin");

    let err = client.get_execution("exec-1").await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, ClientError::Transient { attempts: 5, .. }));
}
