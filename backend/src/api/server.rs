//! HTTP Server for the rosterload API.
//!
//! Exposes one staging session to a browser front end. The session lives
//! behind a mutex; the lock is held for the whole of a save or submit, so
//! edits cannot interleave with a commit.
//!
//! # API Endpoints
//!
//! | Method | Path                               | Description                       |
//! |--------|------------------------------------|-----------------------------------|
//! | GET    | `/health`                          | Health check                      |
//! | GET    | `/api/template[?format=xlsx]`      | Download the import template      |
//! | POST   | `/api/import`                      | Upload a file, start a session    |
//! | GET    | `/api/session[?q=]`                | Session snapshot, filtered        |
//! | DELETE | `/api/session`                     | Discard the session               |
//! | POST   | `/api/session/rows/{row}/select`   | Open a record for editing         |
//! | DELETE | `/api/session/rows/{row}`          | Remove a record                   |
//! | PATCH  | `/api/session/selection`           | Edit one field of the selection   |
//! | POST   | `/api/session/selection/save`      | Create the selected user now      |
//! | POST   | `/api/session/submit`              | Batch-create all unsaved users    |
//! | GET    | `/api/logs`                        | SSE stream for real-time logs     |
//!
//! `{row}` is the zero-based position of the record in the session.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{delete, get, patch, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{
    error_response, EditRequest, ImportResponse, SessionQuery, SessionView, SourceInfo, TemplateQuery,
};
use crate::client::{load_context, HttpLmsClient, LmsApi};
use crate::config::{ImportConfig, MAX_FILE_SIZE};
use crate::error::{ImportError, ServerError, ServerResult, SessionError};
use crate::models::Field;
use crate::parser::{build_template, build_template_xlsx, parse_bytes};
use crate::report::{log_outcome, ImportOutcome};
use crate::session::{Selection, StagingSession};
use crate::submit::{SubmissionCoordinator, SubmitOptions};

/// The session currently being staged.
pub struct ActiveSession {
    pub id: Uuid,
    pub file_name: Option<String>,
    pub session: StagingSession,
}

impl ActiveSession {
    fn view(&self) -> SessionView {
        SessionView::new(self.id, self.file_name.as_deref(), &self.session)
    }
}

/// Shared server state.
pub struct AppState {
    pub session: Mutex<Option<ActiveSession>>,
    pub client: Arc<dyn LmsApi>,
    pub config: ImportConfig,
}

impl AppState {
    pub fn new(client: Arc<dyn LmsApi>, config: ImportConfig) -> Self {
        Self {
            session: Mutex::new(None),
            client,
            config,
        }
    }

    fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            send_welcome: self.config.send_welcome,
        }
    }
}

type SharedState = Arc<AppState>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NoSession => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Import(ref e) => match e {
                ImportError::Ingest(_) | ImportError::EmptyInput | ImportError::Invalid(_) => {
                    StatusCode::BAD_REQUEST
                }
                ImportError::Session(SessionError::RowOutOfRange { .. }) => StatusCode::NOT_FOUND,
                ImportError::Session(SessionError::NoSelection | SessionError::AlreadySaved { .. }) => {
                    StatusCode::CONFLICT
                }
                ImportError::Api(_) => StatusCode::BAD_GATEWAY,
                ImportError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        let message = match self {
            ServerError::Import(ImportError::Api(ref e)) => e.message("Failed to fetch initial data"),
            ref other => other.to_string(),
        };
        (status, Json(error_response(&message))).into_response()
    }
}

/// Build the application router.
pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/template", get(download_template))
        .route("/api/import", post(import_file))
        .route("/api/session", get(get_session).delete(clear_session))
        .route("/api/session/rows/{row}/select", post(select_row))
        .route("/api/session/rows/{row}", delete(remove_row))
        .route("/api/session/selection", patch(edit_selection))
        .route("/api/session/selection/save", post(save_selection))
        .route("/api/session/submit", post(submit_all))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(MAX_FILE_SIZE))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: ImportConfig) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let client: Arc<dyn LmsApi> = Arc::new(HttpLmsClient::from_config(&config));

    println!("🚀 Rosterload server running on http://localhost:{}", port);
    println!("   LMS API: {}", config.api_url);
    println!("   POST /api/import          - Upload a user file");
    println!("   GET  /api/session         - Staged records");
    println!("   POST /api/session/submit  - Create all unsaved users");
    println!("   GET  /api/logs            - SSE log stream");
    println!("   GET  /health              - Health check");
    println!();

    let app = router(Arc::new(AppState::new(client, config)));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rosterload",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "import": "POST /api/import",
            "session": "GET /api/session",
            "submit": "POST /api/session/submit",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn download_template(Query(query): Query<TemplateQuery>) -> ServerResult<Response> {
    let xlsx = query
        .format
        .as_deref()
        .map(|f| f.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false);

    let (bytes, content_type, file_name) = if xlsx {
        (
            build_template_xlsx()?,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "user_upload_template.xlsx",
        )
    } else {
        (build_template()?, "text/csv; charset=utf-8", "user_upload_template.csv")
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        bytes,
    )
        .into_response())
}

/// Upload a file: parse it, load reference data, start a new session.
async fn import_file(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ServerResult<Json<ImportResponse>> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let bytes = file_data.ok_or_else(|| ServerError::BadRequest("No file provided".into()))?;
    log_info(format!(
        "New upload: {} ({} bytes)",
        file_name.as_deref().unwrap_or("unknown"),
        bytes.len()
    ));

    let parsed = parse_bytes(&bytes).map_err(|e| {
        log_error(format!("Error processing file: {}", e));
        ServerError::from(e)
    })?;
    if parsed.records.is_empty() {
        return Err(ImportError::EmptyInput.into());
    }

    let context = load_context(state.client.as_ref(), state.config.page_size)
        .await
        .map_err(ImportError::from)?;

    let source = SourceInfo::from(&parsed);
    let mut session = StagingSession::new(parsed.records, context);
    let invalid = session.revalidate_all().len();
    log_info(format!(
        "Staged {} users ({} with validation errors)",
        session.len(),
        invalid
    ));

    let active = ActiveSession {
        id: Uuid::new_v4(),
        file_name,
        session,
    };
    let response = ImportResponse {
        source,
        session: active.view(),
    };
    *state.session.lock().await = Some(active);

    Ok(Json(response))
}

async fn get_session(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> ServerResult<Json<SessionView>> {
    let mut guard = state.session.lock().await;
    let active = guard.as_mut().ok_or(ServerError::NoSession)?;
    if let Some(q) = query.q {
        active.session.set_query(q);
    }
    Ok(Json(active.view()))
}

async fn clear_session(State(state): State<SharedState>) -> Json<Value> {
    let cleared = state.session.lock().await.take().is_some();
    if cleared {
        log_info("Import session discarded");
    }
    Json(json!({ "cleared": cleared }))
}

async fn select_row(
    State(state): State<SharedState>,
    Path(row): Path<usize>,
) -> ServerResult<Json<Selection>> {
    let mut guard = state.session.lock().await;
    let active = guard.as_mut().ok_or(ServerError::NoSession)?;
    Ok(Json(active.session.select(row)?.clone()))
}

async fn remove_row(
    State(state): State<SharedState>,
    Path(row): Path<usize>,
) -> ServerResult<Json<SessionView>> {
    let mut guard = state.session.lock().await;
    let active = guard.as_mut().ok_or(ServerError::NoSession)?;
    let removed = active.session.remove(row)?;
    log_info(format!(
        "Removed {}",
        removed.get(Field::Email).unwrap_or("record")
    ));
    Ok(Json(active.view()))
}

async fn edit_selection(
    State(state): State<SharedState>,
    Json(edit): Json<EditRequest>,
) -> ServerResult<Json<Selection>> {
    let mut guard = state.session.lock().await;
    let active = guard.as_mut().ok_or(ServerError::NoSession)?;
    Ok(Json(active.session.edit_field(edit.field, edit.value)?.clone()))
}

async fn save_selection(State(state): State<SharedState>) -> ServerResult<Json<ImportOutcome>> {
    let mut guard = state.session.lock().await;
    let active = guard.as_mut().ok_or(ServerError::NoSession)?;

    let coordinator = SubmissionCoordinator::new(state.client.as_ref(), state.submit_options());
    let outcome = coordinator.save_selected(&mut active.session).await;
    log_outcome(&outcome);
    Ok(Json(outcome))
}

async fn submit_all(State(state): State<SharedState>) -> ServerResult<Json<ImportOutcome>> {
    let mut guard = state.session.lock().await;
    let active = guard.as_mut().ok_or(ServerError::NoSession)?;

    let coordinator = SubmissionCoordinator::new(state.client.as_ref(), state.submit_options());
    let outcome = coordinator.submit_batch(&mut active.session).await;
    log_outcome(&outcome);
    Ok(Json(outcome))
}
