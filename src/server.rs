use std::{net::SocketAddr, sync::Arc};

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::controller::{ActionError, Controller};
use crate::logs::{self, LevelCounts, LogEntry};
use crate::samples::{is_image_file, SampleError, SampleImage};
use crate::source::Upload;
use crate::view::SessionView;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Action(ActionError),
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        ApiError::Action(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Action(e) => {
                let status = match &e {
                    ActionError::SessionNotFound => StatusCode::NOT_FOUND,
                    ActionError::Sample(SampleError::NotFound(_)) => StatusCode::NOT_FOUND,
                    ActionError::Sample(SampleError::InvalidName(_))
                    | ActionError::NoActiveImage
                    | ActionError::EmptyQuestion => StatusCode::BAD_REQUEST,
                    ActionError::Sample(SampleError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
                    ActionError::ChatLocked => StatusCode::CONFLICT,
                    ActionError::ModulesUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ActionError::Preprocess(_) | ActionError::Detection(_) | ActionError::Qa(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
}

async fn create_session(State(state): State<AppState>) -> Json<CreateSessionResponse> {
    let session = state.controller.store.create().await;
    tracing::info!(session = %session.id, "session created");
    Json(CreateSessionResponse { id: session.id })
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Uuid>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse { sessions: state.controller.store.list().await })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.controller.view(id).await?))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.controller.store.remove(id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    state.controller.reset(id).await?;
    Ok(Json(state.controller.view(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SelectSampleBody {
    pub file_name: String,
}

async fn select_sample(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SelectSampleBody>,
) -> Result<Json<SessionView>, ApiError> {
    state.controller.select_sample(id, &body.file_name).await?;
    Ok(Json(state.controller.view(id).await?))
}

async fn read_upload(multipart: Option<Multipart>) -> Result<Option<Upload>, ApiError> {
    let Some(mut multipart) = multipart else { return Ok(None) };
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("reading multipart: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.jpg").to_string();
        if !is_image_file(&file_name) {
            return Err(ApiError::BadRequest(format!("unsupported upload type: {file_name}")));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("reading upload: {e}")))?;
        if !bytes.is_empty() {
            upload = Some(Upload { file_name, bytes: bytes.to_vec() });
        }
    }
    Ok(upload)
}

async fn detect(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Option<Multipart>,
) -> Result<Json<SessionView>, ApiError> {
    let upload = read_upload(multipart).await?;
    state.controller.detect(id, upload).await?;
    Ok(Json(state.controller.view(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AskBody {
    pub question: String,
}

async fn ask(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AskBody>,
) -> Result<Json<SessionView>, ApiError> {
    state.controller.ask(id, &body.question).await?;
    Ok(Json(state.controller.view(id).await?))
}

async fn clear_chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    state.controller.clear_chat(id).await?;
    Ok(Json(state.controller.view(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub levels: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub counts: LevelCounts,
    pub entries: Vec<LogEntry>,
}

async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let levels = logs::parse_levels(q.levels.as_deref()).map_err(ApiError::BadRequest)?;
    let entries = state.controller.logs(id, chrono::Local::now().fixed_offset()).await?;
    Ok(Json(LogsResponse {
        counts: logs::counts(&entries),
        entries: logs::feed(&entries, &levels).into_iter().cloned().collect(),
    }))
}

async fn export_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Local::now().fixed_offset();
    let entries = state.controller.logs(id, now).await?;
    let disposition = format!("attachment; filename=\"{}\"", logs::export_file_name(now));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        logs::export_text(&entries),
    ))
}

async fn list_samples(State(state): State<AppState>) -> Json<Vec<SampleImage>> {
    Json(state.controller.samples.list())
}

async fn get_sample(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state
        .controller
        .samples
        .read(&file_name)
        .await
        .map_err(ActionError::from)?;
    let mime = if file_name.to_lowercase().ends_with(".png") { "image/png" } else { "image/jpeg" };
    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.as_ref().map(|h| h.render()).ok_or(StatusCode::NOT_FOUND)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", get(get_session).delete(delete_session))
        .route("/v1/sessions/:id/reset", post(reset_session))
        .route("/v1/sessions/:id/sample", put(select_sample))
        .route("/v1/sessions/:id/detect", post(detect))
        .route("/v1/sessions/:id/questions", post(ask))
        .route("/v1/sessions/:id/chat", delete(clear_chat))
        .route("/v1/sessions/:id/logs", get(get_logs))
        .route("/v1/sessions/:id/logs/export", get(export_logs))
        .route("/v1/samples", get(list_samples))
        .route("/v1/samples/:file_name", get(get_sample))
        .route("/metrics", get(render_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::{harness, Harness};
    use crate::session::UNKNOWN_NAME;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;

    async fn spawn(controller: Controller) -> String {
        let state = AppState { controller: Arc::new(controller), metrics: None };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn new_session(client: &reqwest::Client, base: &str) -> String {
        let v: Value = client.post(format!("{base}/v1/sessions")).send().await.unwrap().json().await.unwrap();
        v["id"].as_str().unwrap().to_string()
    }

    fn image_form(bytes: &[u8]) -> Form {
        Form::new().part("image", Part::bytes(bytes.to_vec()).file_name("photo.jpg"))
    }

    #[tokio::test]
    async fn upload_detect_ask_and_export() {
        let Harness { controller, samples_dir: _dir, .. } = harness(Some("Jane Doe"), false);
        let base = spawn(controller).await;
        let client = reqwest::Client::new();
        let id = new_session(&client, &base).await;

        let view: Value = client
            .post(format!("{base}/v1/sessions/{id}/detect"))
            .multipart(image_form(b"image-a"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["detection"]["state"], "identified");
        assert_eq!(view["detection"]["name"], "Jane Doe");
        assert_eq!(view["chat"]["state"], "open");

        let resp = client
            .post(format!("{base}/v1/sessions/{id}/questions"))
            .json(&serde_json::json!({"question": "What movies?"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let view: Value = resp.json().await.unwrap();
        let entries = view["chat"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["role"], "user");
        assert_eq!(entries[0]["message"], "What movies?");
        assert_eq!(entries[1]["role"], "ai");

        let logs: Value = client
            .get(format!("{base}/v1/sessions/{id}/logs?levels=SUCCESS"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let shown = logs["entries"].as_array().unwrap();
        assert!(shown.iter().all(|e| e["level"] == "SUCCESS"));
        assert_eq!(shown[0]["content"], "ACTION: Detection performed. Result: Jane Doe");
        assert_eq!(logs["counts"]["info"], 3);

        let resp = client.get(format!("{base}/v1/sessions/{id}/logs/export")).send().await.unwrap();
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"system_logs_"));
        assert!(disposition.ends_with(".txt\""));
        let text = resp.text().await.unwrap();
        assert!(text.starts_with("[INFO] SYSTEM STARTUP: Initializing Application..."));
        assert!(text.ends_with("[INFO] ACTION: Chat session active. Messages count: 2"));

        let view: Value = client
            .delete(format!("{base}/v1/sessions/{id}/chat"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["chat"]["entries"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_subject_locks_chat() {
        let Harness { controller, samples_dir: _dir, qa, .. } = harness(Some(UNKNOWN_NAME), false);
        let base = spawn(controller).await;
        let client = reqwest::Client::new();
        let id = new_session(&client, &base).await;

        let view: Value = client
            .post(format!("{base}/v1/sessions/{id}/detect"))
            .multipart(image_form(b"image-b"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["detection"]["state"], "unidentified");
        assert_eq!(view["chat"]["state"], "locked");

        let resp = client
            .post(format!("{base}/v1/sessions/{id}/questions"))
            .json(&serde_json::json!({"question": "Who?"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(qa.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn samples_gallery_select_and_detect() {
        let Harness { controller, samples_dir, detector, .. } = harness(Some("Tom Hanks"), false);
        std::fs::write(samples_dir.path().join("Bill_Gates.jpg"), b"hidden").unwrap();
        let base = spawn(controller).await;
        let client = reqwest::Client::new();

        let gallery: Value = client.get(format!("{base}/v1/samples")).send().await.unwrap().json().await.unwrap();
        assert_eq!(gallery, serde_json::json!([{"file_name": "Tom_Hanks.jpg", "display_name": "Tom Hanks"}]));

        let resp = client.get(format!("{base}/v1/samples/Tom_Hanks.jpg")).send().await.unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"tom");
        let resp = client.get(format!("{base}/v1/samples/Bill_Gates.jpg")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let id = new_session(&client, &base).await;
        let resp = client.post(format!("{base}/v1/sessions/{id}/detect")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let view: Value = client
            .put(format!("{base}/v1/sessions/{id}/sample"))
            .json(&serde_json::json!({"file_name": "Tom_Hanks.jpg"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["selected_sample"]["display_name"], "Tom Hanks");

        let view: Value = client
            .post(format!("{base}/v1/sessions/{id}/detect"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["detection"]["name"], "Tom Hanks");
        assert_eq!(detector.seen.lock().unwrap()[0], b"tom");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let Harness { controller, samples_dir: _dir, .. } = harness(None, false);
        let base = spawn(controller).await;
        let client = reqwest::Client::new();

        let missing = Uuid::new_v4();
        let resp = client.get(format!("{base}/v1/sessions/{missing}")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let id = new_session(&client, &base).await;
        let resp = client
            .post(format!("{base}/v1/sessions/{id}/detect"))
            .multipart(image_form(b"x"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("detector offline"));
        let view: Value = client.get(format!("{base}/v1/sessions/{id}")).send().await.unwrap().json().await.unwrap();
        assert_eq!(view["detection"]["state"], "not_attempted");

        let bad_upload = Form::new().part("image", Part::bytes(b"x".to_vec()).file_name("notes.txt"));
        let resp = client
            .post(format!("{base}/v1/sessions/{id}/detect"))
            .multipart(bad_upload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = client.get(format!("{base}/v1/sessions/{id}/logs?levels=DEBUG")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = client.delete(format!("{base}/v1/sessions/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = client.delete(format!("{base}/v1/sessions/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
