use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
};
use chrono::Local;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ConfigError};
use crate::error::DocGenError;
use crate::export::{DOCX_MIME, date_line, export_filename, render_docx};
use crate::extract::{ExtractionError, FileKind, TextExtractor, build_ocr_engine};
use crate::form::{FormDefaults, InMemorySessionStorage, Session, SessionLocks, SessionStorage};
use crate::llm::{LanguageModel, build_language_model};
use crate::models::{
    ClaimForm, DisplayField, ExtractResponse, FormResponse, GenerateResponse, LetterType,
    SourceDocumentType,
};
use crate::pipeline::{draft_letter, extract_fields};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Room for multipart boundaries and the small text fields around the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn payload_too_large_error(limit: usize) -> ApiError {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({
            "error": "Uploaded file is too large",
            "details": format!("The limit is {limit} bytes")
        })),
    )
}

/// Map a pipeline failure onto the HTTP status the client sees.
fn pipeline_error(session_id: &str, err: &DocGenError) -> ApiError {
    let status = match err {
        DocGenError::Validation(_) => StatusCode::BAD_REQUEST,
        DocGenError::Extraction(ExtractionError::UnsupportedFormat(_)) => StatusCode::BAD_REQUEST,
        DocGenError::Extraction(ExtractionError::Worker(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        DocGenError::Extraction(_) | DocGenError::Unextractable => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DocGenError::Api(_) => StatusCode::BAD_GATEWAY,
        DocGenError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(session_id = %session_id, error = %err, "Request failed");
    } else {
        warn!(session_id = %session_id, error = %err, "Request rejected");
    }

    (
        status,
        Json(json!({
            "error": err.to_string(),
            "session_id": session_id
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub session_locks: SessionLocks,
    pub model: Arc<dyn LanguageModel>,
    pub extractor: TextExtractor,
    pub max_upload_bytes: usize,
}

pub fn create_app(config: &AppConfig) -> Result<Router, ConfigError> {
    let model = build_language_model(config);
    let ocr = build_ocr_engine(config, model.clone())?;

    info!(
        provider = ?config.provider,
        model = %config.model,
        ocr_engine = ?config.ocr_engine,
        "Language model configured"
    );

    let app_state = AppState {
        session_storage: Arc::new(InMemorySessionStorage::new()),
        session_locks: SessionLocks::new(),
        model,
        extractor: TextExtractor::new(ocr),
        max_upload_bytes: config.max_upload_bytes,
    };

    Ok(build_router(app_state))
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header_value = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = &header_value {
        request.headers_mut().insert(CORRELATION_HEADER, value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

pub fn build_router(app_state: AppState) -> Router {
    let body_limit = app_state.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/document-types", get(document_types))
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", delete(delete_session))
        .route("/sessions/{session_id}/form", get(get_form))
        .route("/sessions/{session_id}/extract", post(extract_document))
        .route("/sessions/{session_id}/reset", post(reset_form))
        .route("/sessions/{session_id}/generate", post(generate_letter))
        .route("/sessions/{session_id}/document", get(download_document))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Healthcare Document Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Extracts claim details from medical documents and drafts claim and appeal letters",
        "endpoints": {
            "GET /health": "Health check",
            "GET /document-types": "Upload labels and letter types",
            "POST /sessions": "Create a form session",
            "DELETE /sessions/{session_id}": "Discard a session and its letter",
            "GET /sessions/{session_id}/form": "Current pre-filled form",
            "POST /sessions/{session_id}/extract": "Upload a PDF or image and extract claim fields",
            "POST /sessions/{session_id}/reset": "Clear extracted values",
            "POST /sessions/{session_id}/generate": "Draft a letter from the claim form",
            "GET /sessions/{session_id}/document": "Download the last letter as .docx"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn document_types() -> Json<Value> {
    Json(json!({
        "source_document_types": SourceDocumentType::ALL,
        "letter_types": LetterType::ALL,
    }))
}

async fn load_session(state: &AppState, session_id: &str) -> Result<Session, ApiError> {
    match state.session_storage.get(session_id).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(not_found_error("Session not found", session_id)),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

/// Take the session's write lock, then load it. Unknown ids leave no lock behind.
async fn lock_session(
    state: &AppState,
    session_id: &str,
) -> Result<(OwnedMutexGuard<()>, Session), ApiError> {
    let guard = state.session_locks.acquire(session_id).await;
    match load_session(state, session_id).await {
        Ok(session) => Ok((guard, session)),
        Err(e) => {
            drop(guard);
            if e.0 == StatusCode::NOT_FOUND {
                state.session_locks.forget(session_id);
            }
            Err(e)
        }
    }
}

async fn save_session(state: &AppState, session: Session) -> Result<(), ApiError> {
    let session_id = session.id.clone();
    state.session_storage.save(session).await.map_err(|e| {
        error!("Failed to save session {}: {}", session_id, e);
        internal_error("Failed to save session", &e.to_string())
    })
}

async fn create_session(State(state): State<AppState>) -> ApiResult<FormResponse> {
    let session = Session::new_from_id(Uuid::new_v4().to_string());
    let response = FormResponse {
        session_id: session.id.clone(),
        fields: None,
        form: FormDefaults::empty(Local::now().date_naive()),
    };

    info!(session_id = %session.id, "Session created");
    save_session(&state, session).await?;
    Ok(Json(response))
}

async fn get_form(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<FormResponse> {
    let session = load_session(&state, &session_id).await?;
    Ok(Json(FormResponse {
        session_id,
        fields: session.state.fields().cloned(),
        form: session.state.prefill(Local::now().date_naive()),
    }))
}

struct Upload {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Pull the `file` and optional `document_type` parts out of the form.
async fn read_upload(
    multipart: &mut Multipart,
    max_upload_bytes: usize,
) -> Result<(Upload, SourceDocumentType), ApiError> {
    let mut upload = None;
    let mut document_type = SourceDocumentType::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            payload_too_large_error(max_upload_bytes)
        } else {
            bad_request_error(&e.body_text())
        }
    })? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        payload_too_large_error(max_upload_bytes)
                    } else {
                        bad_request_error(&e.body_text())
                    }
                })?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("document_type") => {
                let label = field
                    .text()
                    .await
                    .map_err(|e| bad_request_error(&e.body_text()))?;
                document_type = SourceDocumentType::parse(&label)
                    .ok_or_else(|| bad_request_error(&format!("Unknown document type '{label}'")))?;
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| bad_request_error("A 'file' part is required"))?;
    if upload.bytes.is_empty() {
        return Err(bad_request_error("Uploaded file is empty"));
    }
    if upload.bytes.len() > max_upload_bytes {
        return Err(payload_too_large_error(max_upload_bytes));
    }

    Ok((upload, document_type))
}

async fn extract_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<ExtractResponse> {
    let (_guard, mut session) = lock_session(&state, &session_id).await?;
    let (upload, document_type) = read_upload(&mut multipart, state.max_upload_bytes).await?;

    info!(
        session_id = %session_id,
        file_name = upload.file_name.as_deref().unwrap_or("unknown"),
        document_type = %document_type,
        "Processing uploaded document"
    );

    let kind = FileKind::from_declared(upload.content_type.as_deref(), upload.file_name.as_deref())
        .map_err(|e| pipeline_error(&session_id, &e.into()))?;

    let text = state
        .extractor
        .extract(kind, upload.bytes)
        .await
        .map_err(|e| pipeline_error(&session_id, &e.into()))?;

    let extraction = extract_fields(state.model.as_ref(), &text, document_type)
        .await
        .map_err(|e| pipeline_error(&session_id, &e))?;

    session.state.replace_fields(extraction.fields.clone());
    let form = session.state.prefill(Local::now().date_naive());
    save_session(&state, session).await?;

    let display = extraction
        .fields
        .present()
        .map(|(key, value)| DisplayField {
            label: key.label(),
            value: value.to_string(),
        })
        .collect();

    Ok(Json(ExtractResponse {
        session_id,
        source_document_type: document_type,
        tier: extraction.tier,
        extracted_chars: text.chars().count(),
        fields: extraction.fields,
        display,
        form,
    }))
}

async fn reset_form(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<FormResponse> {
    let (_guard, mut session) = lock_session(&state, &session_id).await?;
    session.state.clear();
    save_session(&state, session).await?;

    info!(session_id = %session_id, "Form reset");
    Ok(Json(FormResponse {
        session_id,
        fields: None,
        form: FormDefaults::empty(Local::now().date_naive()),
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    let (guard, session) = lock_session(&state, &session_id).await?;

    state.session_storage.delete(&session.id).await.map_err(|e| {
        error!("Failed to delete session {}: {}", session_id, e);
        internal_error("Failed to delete session", &e.to_string())
    })?;
    drop(guard);
    state.session_locks.forget(&session_id);

    info!(session_id = %session_id, "Session deleted");
    Ok(Json(json!({
        "session_id": session_id,
        "status": "deleted"
    })))
}

async fn generate_letter(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<ClaimForm>, JsonRejection>,
) -> ApiResult<GenerateResponse> {
    let Json(form) = payload.map_err(|e| bad_request_error(&e.body_text()))?;
    let (_guard, mut session) = lock_session(&state, &session_id).await?;

    let document = draft_letter(state.model.as_ref(), &form, Local::now())
        .await
        .map_err(|e| pipeline_error(&session_id, &e))?;

    let generated_on = document.generated_at.date_naive();
    let response = GenerateResponse {
        session_id: session_id.clone(),
        title: document.title().to_string(),
        date: date_line(generated_on),
        body: document.body.clone(),
        file_name: export_filename(document.letter_type, &document.patient_name, generated_on),
        download_url: format!("/sessions/{session_id}/document"),
    };

    session.state.set_document(document);
    save_session(&state, session).await?;

    info!(session_id = %session_id, file_name = %response.file_name, "Letter generated");
    Ok(Json(response))
}

/// `filename` restricted to printable ASCII, plus the UTF-8 `filename*` form.
fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    )
}

async fn download_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session = load_session(&state, &session_id).await?;
    let document = session
        .state
        .document()
        .ok_or_else(|| not_found_error("No generated document for this session", &session_id))?;

    let bytes = render_docx(document).map_err(|e| pipeline_error(&session_id, &e.into()))?;
    let file_name = export_filename(
        document.letter_type,
        &document.patient_name,
        document.generated_at.date_naive(),
    );
    let disposition = HeaderValue::from_str(&content_disposition(&file_name))
        .map_err(|e| internal_error("Failed to build download headers", &e.to_string()))?;

    info!(session_id = %session_id, bytes = bytes.len(), "Serving generated document");
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(DOCX_MIME)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
