//! In-process mock orchestrator (HTTP + WebSocket) for end-to-end tests.

#![allow(dead_code)]

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use url::Url;

pub const RUN_ID: &str = "run-42";

/// What the stream does once a client attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Plan, wait for an approval, execute two tasks, complete.
    ApproveAndComplete,
    /// One event, then the socket disappears without a close frame.
    DropAfterFirstEvent,
}

#[derive(Debug, Default)]
pub struct Recorded {
    /// (field name, file name, byte count)
    pub uploads: Vec<(String, Option<String>, usize)>,
    pub approvals: Vec<(String, Value)>,
    pub stops: Vec<String>,
    pub streams: Vec<String>,
}

struct MockState {
    script: Script,
    recorded: Mutex<Recorded>,
    approved: Notify,
}

pub struct MockOrchestrator {
    pub base: Url,
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockOrchestrator {
    pub async fn start(script: Script) -> Self {
        let state = Arc::new(MockState {
            script,
            recorded: Mutex::new(Recorded::default()),
            approved: Notify::new(),
        });
        let app = Router::new()
            .route("/health", get(health))
            .route("/v1/initiate_from_svad", post(initiate))
            .route("/v1/run/{run_id}/approve_plan", post(approve))
            .route("/v1/run/{run_id}/stop", post(stop))
            .route("/ws/{run_id}", get(stream))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: Url::parse(&format!("http://{}", addr)).unwrap(),
            state,
            server,
        }
    }

    pub fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.state.recorded.lock().unwrap()
    }
}

impl Drop for MockOrchestrator {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "message": "Orchestrator is running"}))
}

async fn initiate(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Json<Value> {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.unwrap();
        state
            .recorded
            .lock()
            .unwrap()
            .uploads
            .push((name, file_name, bytes.len()));
    }
    Json(json!({"message": "Run started", "run_id": RUN_ID}))
}

async fn approve(
    State(state): State<Arc<MockState>>,
    Path(run_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state
        .recorded
        .lock()
        .unwrap()
        .approvals
        .push((run_id, body));
    state.approved.notify_one();
    Json(json!({"status": "success", "message": "Decision recorded"}))
}

async fn stop(State(state): State<Arc<MockState>>, Path(run_id): Path<String>) -> Json<Value> {
    state.recorded.lock().unwrap().stops.push(run_id.clone());
    Json(json!({"message": format!("Stop requested for {}", run_id)}))
}

async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    state.recorded.lock().unwrap().streams.push(run_id.clone());
    ws.on_upgrade(move |socket| play(socket, state, run_id))
}

pub fn frame(run_id: &str, source: &str, kind: &str, data: Value) -> String {
    json!({
        "source": source,
        "type": kind,
        "run_id": run_id,
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    })
    .to_string()
}

async fn send_all(socket: &mut WebSocket, frames: Vec<String>) -> bool {
    for text in frames {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return false;
        }
    }
    true
}

async fn play(mut socket: WebSocket, state: Arc<MockState>, run_id: String) {
    match state.script {
        Script::DropAfterFirstEvent => {
            send_all(
                &mut socket,
                vec![frame(&run_id, "Orchestrator", "phase_start", json!({"name": "PLANNING"}))],
            )
            .await;
            // Returning drops the socket without a closing handshake.
        }
        Script::ApproveAndComplete => {
            let before = vec![
                frame(&run_id, "Orchestrator", "phase_start", json!({"name": "PLANNING"})),
                frame(&run_id, "Planner", "thought", json!({"content": "Reading the document"})),
                "not json at all".to_string(),
                frame(
                    &run_id,
                    "Planner",
                    "plan_generated",
                    json!({
                        "message": "Approve the plan?",
                        "tasks": [
                            {"id": "task-1", "title": "Design schema", "order": 0},
                            {"id": "task-2", "title": "Write handlers", "order": 1}
                        ]
                    }),
                ),
            ];
            if !send_all(&mut socket, before).await {
                return;
            }

            state.approved.notified().await;

            let after = vec![
                frame(
                    &run_id,
                    "Orchestrator",
                    "plan_approved",
                    json!({"message": "Plan approved"}),
                ),
                frame(&run_id, "Orchestrator", "execution_started", json!({})),
                frame(
                    &run_id,
                    "Orchestrator",
                    "task_started",
                    json!({"task_id": "task-1", "worker": "Builder"}),
                ),
                frame(
                    &run_id,
                    "Builder",
                    "file_operation",
                    json!({"operation": "create", "path": "src/schema.sql", "content": "CREATE TABLE t;"}),
                ),
                frame(
                    &run_id,
                    "Orchestrator",
                    "task_completed",
                    json!({"task_id": "task-1", "artifacts": ["src/schema.sql"]}),
                ),
                frame(
                    &run_id,
                    "Orchestrator",
                    "task_started",
                    json!({"task_id": "task-2", "worker": "Builder"}),
                ),
                frame(
                    &run_id,
                    "Orchestrator",
                    "task_completed",
                    json!({"task_id": "task-2", "artifacts": []}),
                ),
                frame(
                    &run_id,
                    "Orchestrator",
                    "run_completed",
                    json!({"message": "All tasks complete"}),
                ),
            ];
            if !send_all(&mut socket, after).await {
                return;
            }
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "done".into(),
                })))
                .await;
        }
    }
}
