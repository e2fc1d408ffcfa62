//! 仪表盘和 JSON 接口。
//!
//! | 方法 | 路径 | 说明 |
//! |------|------|------|
//! | `GET`  | `/` | 仪表盘页面 |
//! | `POST` | `/api/update` | 生成并保存一轮推送 |
//! | `GET`  | `/api/updates` | 已保存推送的摘要，最新在前 |
//! | `GET`  | `/api/updates/:filename` | 单份推送，不存在时 404 |
//! | `GET`  | `/api/topics` | 全部话题 |
//! | `POST` | `/api/topics` | 新增或合并话题，缺少 `name` 时 400 |
//! | `POST` | `/api/email` | 发送推送邮件，失败时 500 |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::pipeline::UpdateService;
use crate::storage::models::{Material, UpdateRecord};
use crate::utils::DigestError;

const DASHBOARD_HTML: &str = include_str!("static/index.html");
const DASHBOARD_JS: &str = include_str!("static/dashboard.js");

#[derive(Clone)]
struct AppState {
    service: Arc<UpdateService>,
}

#[derive(Deserialize)]
struct AddTopicRequest {
    name: Option<String>,
    #[serde(default)]
    sources: Vec<Material>,
}

pub fn router(service: Arc<UpdateService>) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/static/js/dashboard.js", get(dashboard_js))
        .route("/api/update", post(generate_update))
        .route("/api/updates", get(list_updates))
        .route("/api/updates/:filename", get(get_update))
        .route("/api/topics", get(list_topics).post(add_topic))
        .route("/api/email", post(send_email))
        .with_state(AppState { service })
}

/// 监听 `host:port` 直到 `shutdown` 完成
pub async fn run_server(
    host: &str,
    port: u16,
    service: Arc<UpdateService>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("无效的监听地址: {}:{}", host, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("绑定 {} 失败", addr))?;
    info!("Web 服务监听于 http://{}", addr);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn dashboard_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], DASHBOARD_JS)
}

async fn generate_update(State(state): State<AppState>) -> Json<UpdateRecord> {
    Json(state.service.generate_and_save().await)
}

async fn list_updates(State(state): State<AppState>) -> Response {
    match state.service.list_updates().await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => {
            error!("列出推送失败: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_update(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    match state.service.load_update(&filename).await {
        Ok(Some(data)) => Json(data).into_response(),
        Ok(None) | Err(DigestError::InvalidDocumentName(_)) => {
            error_response(StatusCode::NOT_FOUND, "Update not found")
        }
        Err(e) => {
            warn!("读取推送 {} 失败: {}", filename, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error loading update: {}", e),
            )
        }
    }
}

async fn list_topics(State(state): State<AppState>) -> Response {
    Json(state.service.tracker().topics().await).into_response()
}

async fn add_topic(State(state): State<AppState>, body: Bytes) -> Response {
    let request: AddTopicRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Topic name is required"),
    };

    let name = match request.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return error_response(StatusCode::BAD_REQUEST, "Topic name is required"),
    };

    let topic = state.service.tracker().add_topic(&name, request.sources).await;
    Json(topic).into_response()
}

async fn send_email(State(state): State<AppState>, body: Bytes) -> Response {
    let supplied = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(mut payload) => payload.get_mut("update_data").map(Value::take),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body"),
        }
    };

    let record = match supplied {
        Some(data) => match serde_json::from_value::<UpdateRecord>(data) {
            Ok(record) => record,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid update_data: {}", e))
            }
        },
        None => state.service.generate_and_save().await,
    };

    if state.service.send_email_update(&record).await {
        Json(json!({ "status": "success", "message": "Email sent successfully" })).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": "Failed to send email" })),
        )
            .into_response()
    }
}
