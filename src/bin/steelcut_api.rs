//! steelcut_api: REST façade for the cutting optimizer's task supervisor.
//!
//! Endpoints (JSON):
//! - POST   /optimize              submit a job        -> 202 { success, taskId, status }
//! - GET    /task/:id              fetch one task row  -> 200 | 404
//! - GET    /tasks?limit=&status=  list, newest first  -> 200 { success, tasks, total }
//! - DELETE /task/:id              cancel              -> 200 | 400 | 404
//! - GET    /health                liveness            -> 200 { status, version, timestamp }
//! - GET    /version               build + tunables    -> 200
//! - GET    /stats                 task counters       -> 200
//! - POST   /validate-constraints  validator only      -> 200 (isValid may be false)
//!
//! Engine-level failures surface in the task row, never as HTTP errors; 400 is
//! reserved for request shape problems. CORS is permissive for browser
//! clients.

#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use steelcut::config::Config;
use steelcut::model::{Constraints, DesignBar, ModuleStock, OptimizeInput};
use steelcut::task::{MemoryTaskStore, TaskError, TaskStatus, TaskSupervisor};
use steelcut::validate::validate_input;

// ------------------------------ Types ------------------------------

#[derive(Clone)]
struct AppState {
    supervisor: TaskSupervisor,
    config: Config,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeRequest {
    design_steels: Vec<DesignBar>,
    module_steels: Vec<ModuleStock>,
    #[serde(default)]
    constraints: Option<Constraints>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    task_id: String,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    success: bool,
    tasks: Vec<steelcut::task::Task>,
    total: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Version {
    name: &'static str,
    version: &'static str,
    weld_cost_mm: f64,
    swap_benefit_floor_mm: f64,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    status: Option<String>,
}

fn default_limit() -> usize {
    20
}

// ------------------------------ Helpers ------------------------------

fn store_error(e: TaskError) -> (StatusCode, Json<MessageResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(MessageResponse {
            success: false,
            message: e.to_string(),
        }),
    )
}

impl OptimizeRequest {
    fn into_input(self, config: &Config) -> OptimizeInput {
        OptimizeInput {
            design_steels: self.design_steels,
            module_steels: self.module_steels,
            constraints: self
                .constraints
                .unwrap_or_else(|| config.default_constraints()),
        }
    }
}

// ------------------------------ Handlers ------------------------------

async fn submit(
    State(st): State<AppState>,
    Json(req): Json<OptimizeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<MessageResponse>)> {
    let input = req.into_input(&st.config);
    let task_id = st.supervisor.create_pending(input).map_err(store_error)?;
    st.supervisor.spawn(task_id.clone());
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            success: true,
            task_id,
            status: "pending",
        }),
    ))
}

async fn get_task(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<MessageResponse>)> {
    match st.supervisor.get_task(&id).map_err(store_error)? {
        Some(task) => Ok(Json(task)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(MessageResponse {
                success: false,
                message: format!("task {id} not found"),
            }),
        )),
    }
}

async fn list_tasks(
    State(st): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<MessageResponse>)> {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<TaskStatus>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(MessageResponse {
                    success: false,
                    message: e,
                }),
            )
        })?),
    };
    let tasks = st
        .supervisor
        .list_tasks(params.limit, status)
        .map_err(store_error)?;
    let total = tasks.len();
    Ok(Json(ListResponse {
        success: true,
        tasks,
        total,
    }))
}

async fn cancel_task(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<MessageResponse>)> {
    match st.supervisor.cancel(&id) {
        Ok(_) => Ok(Json(MessageResponse {
            success: true,
            message: "cancelled by user".into(),
        })),
        Err(TaskError::NotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(MessageResponse {
                success: false,
                message: format!("task {id} not found"),
            }),
        )),
        Err(e @ TaskError::AlreadyTerminal { .. }) => Err((
            StatusCode::BAD_REQUEST,
            Json(MessageResponse {
                success: false,
                message: e.to_string(),
            }),
        )),
        Err(e) => Err(store_error(e)),
    }
}

async fn health() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn version(State(st): State<AppState>) -> impl IntoResponse {
    Json(Version {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        weld_cost_mm: st.config.weld_cost_mm,
        swap_benefit_floor_mm: st.config.swap_benefit_floor_mm,
    })
}

async fn stats(
    State(st): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<MessageResponse>)> {
    let counters = st.supervisor.counters().map_err(store_error)?;
    Ok(Json(counters))
}

async fn validate_constraints(
    State(st): State<AppState>,
    Json(req): Json<OptimizeRequest>,
) -> impl IntoResponse {
    let input = req.into_input(&st.config);
    let report = validate_input(&input.design_steels, &input.module_steels, &input.constraints);
    Json(report)
}

// ------------------------------ Main ------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "steelcut_api=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env();
    info!("starting steelcut API server");
    match &config.database_url {
        Some(url) => info!(database_url = %url, "task store backend configured"),
        None => warn!("HGJ_DATABASE_URL not set; using the in-process task store"),
    }

    let supervisor = TaskSupervisor::new(Arc::new(MemoryTaskStore::new()));
    let state = AppState {
        supervisor,
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let app = Router::new()
        .route("/optimize", post(submit))
        .route("/task/:id", get(get_task).delete(cancel_task))
        .route("/tasks", get(list_tasks))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/stats", get(stats))
        .route("/validate-constraints", post(validate_constraints))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!(addr = %config.addr, "steelcut API listening");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
