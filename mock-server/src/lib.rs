//! Envelope-speaking API server used to exercise the client pipeline.
//!
//! Every route answers with `{code, result, message}`. Code `0` is success;
//! failures reuse HTTP-like codes (`401`, `404`, `500`) inside the envelope
//! and on the status line.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{FromRef, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{error, info};
use uuid::Uuid;

pub const SUCCESS_CODE: i64 = 0;
pub const DEMO_USERNAME: &str = "admin";
pub const DEMO_PASSWORD: &str = "secret";
pub const DEMO_TOKEN: &str = "demo-token";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            result: Some(result),
            message: "ok".to_string(),
        }
    }
}

/// Failures raised by handlers.
///
/// `Trusted` errors are expected conditions rendered with their own code and
/// message. `Critical` errors are logged and hidden behind a generic 500.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Trusted { status: StatusCode, message: String },
    #[error("{0}")]
    Critical(String),
}

impl AppError {
    pub fn unauthorized() -> Self {
        Self::Trusted {
            status: StatusCode::UNAUTHORIZED,
            message: "unauthorized".to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self::Trusted {
            status: StatusCode::NOT_FOUND,
            message: "user not found".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Trusted { status, message } => (status, message),
            AppError::Critical(detail) => {
                error!(%detail, "unhandled server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        let body: Envelope<()> = Envelope {
            code: i64::from(status.as_u16()),
            result: None,
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, AppError>;

pub type Db = Arc<RwLock<HashMap<Uuid, User>>>;

/// Counters for `/api/slow`. A request whose client hung up mid-wait is
/// started but never completed.
#[derive(Debug, Default)]
pub struct SlowCounters {
    started: AtomicUsize,
    completed: AtomicUsize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlowStats {
    pub started: usize,
    pub completed: usize,
}

#[derive(Clone, Default)]
pub struct AppState {
    pub users: Db,
    pub slow: Arc<SlowCounters>,
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}

impl FromRef<AppState> for Arc<SlowCounters> {
    fn from_ref(state: &AppState) -> Self {
        state.slow.clone()
    }
}

pub fn app() -> Router {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/login", post(login))
        .route("/api/me", get(me))
        .route("/api/echo", get(echo).post(echo_body))
        .route("/api/slow", get(slow))
        .route("/api/stats", get(stats))
        .route("/api/fail", get(fail))
        .route("/api/crash", get(crash))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

async fn list_users(State(db): State<Db>) -> ApiResult<Vec<User>> {
    let users = db.read().await;
    Ok(Json(Envelope::ok(users.values().cloned().collect())))
}

async fn create_user(State(db): State<Db>, Json(input): Json<CreateUser>) -> ApiResult<User> {
    let user = User {
        id: Uuid::new_v4(),
        name: input.name,
    };
    db.write().await.insert(user.id, user.clone());
    info!(id = %user.id, "user created");
    Ok(Json(Envelope::ok(user)))
}

async fn get_user(State(db): State<Db>, Path(id): Path<Uuid>) -> ApiResult<User> {
    let users = db.read().await;
    let user = users.get(&id).cloned().ok_or_else(AppError::not_found)?;
    Ok(Json(Envelope::ok(user)))
}

async fn update_user(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateUser>,
) -> ApiResult<User> {
    let mut users = db.write().await;
    let user = users.get_mut(&id).ok_or_else(AppError::not_found)?;
    user.name = input.name;
    Ok(Json(Envelope::ok(user.clone())))
}

async fn delete_user(State(db): State<Db>, Path(id): Path<Uuid>) -> ApiResult<Uuid> {
    let mut users = db.write().await;
    users.remove(&id).ok_or_else(AppError::not_found)?;
    Ok(Json(Envelope::ok(id)))
}

async fn login(Form(form): Form<LoginForm>) -> ApiResult<String> {
    if form.username == DEMO_USERNAME && form.password == DEMO_PASSWORD {
        Ok(Json(Envelope::ok(DEMO_TOKEN.to_string())))
    } else {
        Err(AppError::unauthorized())
    }
}

async fn me(headers: HeaderMap) -> ApiResult<String> {
    let expected = format!("Bearer {DEMO_TOKEN}");
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if authorized {
        Ok(Json(Envelope::ok(DEMO_USERNAME.to_string())))
    } else {
        Err(AppError::unauthorized())
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Echo {
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

async fn echo(Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> ApiResult<Echo> {
    Ok(Json(Envelope::ok(Echo {
        query,
        headers: header_map(&headers),
    })))
}

async fn echo_body(Json(body): Json<serde_json::Value>) -> ApiResult<serde_json::Value> {
    Ok(Json(Envelope::ok(body)))
}

#[derive(Deserialize)]
struct SlowQuery {
    #[serde(default)]
    ms: u64,
}

async fn slow(
    State(counters): State<Arc<SlowCounters>>,
    Query(q): Query<SlowQuery>,
) -> ApiResult<u64> {
    counters.started.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(q.ms)).await;
    counters.completed.fetch_add(1, Ordering::SeqCst);
    Ok(Json(Envelope::ok(q.ms)))
}

async fn stats(State(counters): State<Arc<SlowCounters>>) -> ApiResult<SlowStats> {
    Ok(Json(Envelope::ok(SlowStats {
        started: counters.started.load(Ordering::SeqCst),
        completed: counters.completed.load(Ordering::SeqCst),
    })))
}

async fn fail() -> ApiResult<()> {
    Err(AppError::Trusted {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "something went wrong".to_string(),
    })
}

async fn crash() -> ApiResult<()> {
    Err(AppError::Critical("database connection lost".to_string()))
}
