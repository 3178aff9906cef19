use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
};

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::{
    stream::{self, Stream},
    StreamExt,
};
use serde::Deserialize;
use serde_json::json;
use tokio::{
    spawn,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    context::ArtifactContext,
    error::StudioError,
    kinds::DocumentKind,
    models::{DialogueTurn, GenerationRequest},
    session::{DocumentSession, SessionView},
    stream::{apply_event, GenerationHeader, StreamEvent},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads ---

#[derive(Deserialize)]
pub struct SubmitFieldPayload {
    value: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/documents/generate", post(generate_handler))
        .route("/api/session", get(session_handler))
        .route("/api/fields/submit", post(submit_field_handler))
        .route("/api/fields/skip", post(skip_field_handler))
        .route("/api/messages", get(messages_handler))
        .route("/api/versions/current", get(current_version_handler))
        .route("/api/versions/prev", post(prev_version_handler))
        .route("/api/versions/next", post(next_version_handler))
        .route("/api/versions/latest", post(latest_version_handler))
        .route("/api/versions/toggle", post(toggle_diff_handler))
        .route("/api/versions/diff", get(diff_handler))
        .route("/api/export", get(export_handler))
        .route("/api/export/text", get(export_text_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn studio_error(err: StudioError) -> ApiError {
    let status = match &err {
        StudioError::MissingAttachment | StudioError::EmptyValue | StudioError::UnknownKind(_) => {
            StatusCode::BAD_REQUEST
        }
        StudioError::VersionNotFound { .. } => StatusCode::NOT_FOUND,
        StudioError::DiffUnavailable | StudioError::NoActiveSession => StatusCode::CONFLICT,
        StudioError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

// --- Generación ---

/// Arranca la generación y devuelve el canal de eventos como SSE. Al final
/// llega un evento `done` o `error` con el resultado.
///
/// La sesión anterior sigue activa mientras se genera; la nueva la sustituye
/// sólo cuando el streaming termina.
#[axum::debug_handler]
async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let sketch = request
        .require_image_attachment()
        .map_err(studio_error)?
        .clone();
    DocumentKind::from_tag(&request.kind).map_err(studio_error)?;

    let chunks = state.llm_manager.stream_document(&request, &sketch).map_err(|e| {
        error!("No se pudo iniciar la generación: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("No se pudo iniciar la generación: {}", e)})),
        )
    })?;

    let chat_id = Uuid::new_v4().to_string();
    let document_id = Uuid::new_v4().to_string();
    let header = GenerationHeader {
        kind_tag: request.kind.clone(),
        id: document_id.clone(),
        title: request.title.clone(),
    };

    let (events_tx, events_rx) = mpsc::channel::<StreamEvent>(256);
    let (outcome_tx, outcome_rx) = oneshot::channel::<Result<Vec<String>, String>>();

    spawn(async move {
        {
            let mut status = state.status.lock().unwrap();
            status.is_busy = true;
            status.message = format!("Generando '{}'...", request.title);
            status.generation = None;
        }

        state
            .conversation
            .append(&chat_id, &DialogueTurn::user(request.prompt.clone()))
            .await;

        let mut session = DocumentSession::new(
            &chat_id,
            &document_id,
            &request.title,
            &state.config.default_owner_id,
            state.sinks_for(&chat_id),
        );
        let (inner_tx, inner_rx) = mpsc::channel::<StreamEvent>(256);
        let forwarder = spawn(forward_events(inner_rx, events_tx, state.status.clone()));
        let result = session
            .generate(header, chunks, &inner_tx, state.documents.clone())
            .await;
        drop(inner_tx);
        if let Err(e) = forwarder.await {
            error!("El reenvío de eventos terminó con error: {}", e);
        }

        *state.session.lock().await = Some(session);

        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.generation = None;
        let outcome = match result {
            Ok(fields) => {
                status.message = format!(
                    "Documento generado. {} campos pendientes de completar.",
                    fields.len()
                );
                Ok(fields)
            }
            Err(err) => {
                status.message = format!("Error en la generación: {}", err);
                error!("Error de generación: {}", err);
                Err(err.to_string())
            }
        };
        let _ = outcome_tx.send(outcome);
    });

    let events = stream::unfold(events_rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    })
    .map(|ev| Ok(sse_event(ev.name(), &ev)));

    let finish = stream::once(async move {
        let event = match outcome_rx.await {
            Ok(Ok(fields)) => sse_event("done", &json!({ "fields": fields })),
            Ok(Err(message)) => sse_event("error", &json!({ "error": message })),
            Err(_) => sse_event("error", &json!({ "error": "La generación se interrumpió" })),
        };
        Ok(event)
    });

    Ok(Sse::new(events.chain(finish)).keep_alive(KeepAlive::default()))
}

/// Reenvía los eventos al cliente y refleja los metadatos del borrador en
/// `Status`, aplicándolos sobre una copia del contexto.
async fn forward_events(
    mut inner: mpsc::Receiver<StreamEvent>,
    client: mpsc::Sender<StreamEvent>,
    status: Arc<Mutex<Status>>,
) {
    let mut mirror = ArtifactContext::new("", "", DocumentKind::Text, "");
    let mut client_gone = false;
    while let Some(event) = inner.recv().await {
        if apply_event(&mut mirror, &event).is_ok() {
            status.lock().unwrap().generation = Some(mirror.metadata().clone());
        }
        if !client_gone && client.send(event).await.is_err() {
            debug!("El cliente SSE se desconectó; la generación continúa");
            client_gone = true;
        }
    }
}

fn sse_event<T: serde::Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().event("error").data("evento no serializable"))
}

// --- Sesión y campos ---

#[axum::debug_handler]
async fn session_handler(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    let guard = state.session.lock().await;
    let session = guard.as_ref().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    Ok(Json(session.view()))
}

#[axum::debug_handler]
async fn submit_field_handler(
    State(state): State<AppState>,
    Json(payload): Json<SubmitFieldPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut guard = state.session.lock().await;
    let session = guard.as_mut().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    let outcome = session.submit_field(&payload.value).await.map_err(studio_error)?;
    Ok(Json(json!({ "outcome": outcome, "session": session.view() })))
}

#[axum::debug_handler]
async fn skip_field_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut guard = state.session.lock().await;
    let session = guard.as_mut().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    let outcome = session.skip_field().await;
    Ok(Json(json!({ "outcome": outcome, "session": session.view() })))
}

#[axum::debug_handler]
async fn messages_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat_id = {
        let guard = state.session.lock().await;
        guard
            .as_ref()
            .map(|s| s.chat_id.clone())
            .ok_or_else(|| studio_error(StudioError::NoActiveSession))?
    };
    match state.conversation.messages(&chat_id).await {
        Ok(messages) => Ok(Json(json!({ "chat_id": chat_id, "messages": messages }))),
        Err(e) => {
            error!("Error leyendo mensajes: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error al leer la conversación: {}", e)})),
            ))
        }
    }
}

// --- Versiones ---

#[axum::debug_handler]
async fn current_version_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let guard = state.session.lock().await;
    let session = guard.as_ref().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    let snapshot = session.current_version().map_err(studio_error)?;
    Ok(Json(json!({ "snapshot": snapshot, "diff_view": session.cursor.diff_view })))
}

async fn navigate(state: &AppState, action: fn(&mut DocumentSession)) -> Result<Json<SessionView>, ApiError> {
    let mut guard = state.session.lock().await;
    let session = guard.as_mut().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    action(session);
    Ok(Json(session.view()))
}

#[axum::debug_handler]
async fn prev_version_handler(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    navigate(&state, DocumentSession::prev_version).await
}

#[axum::debug_handler]
async fn next_version_handler(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    navigate(&state, DocumentSession::next_version).await
}

#[axum::debug_handler]
async fn latest_version_handler(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    navigate(&state, DocumentSession::latest_version).await
}

#[axum::debug_handler]
async fn toggle_diff_handler(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    navigate(&state, DocumentSession::toggle_diff).await
}

#[axum::debug_handler]
async fn diff_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let guard = state.session.lock().await;
    let session = guard.as_ref().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    let diff = session.diff().map_err(studio_error)?;
    Ok(Json(json!(diff)))
}

// --- Exportación ---

#[axum::debug_handler]
async fn export_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let guard = state.session.lock().await;
    let session = guard.as_ref().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    let record = session.export(&state.record_defaults());
    Ok(Json(json!({ "document_id": session.context.document().id, "record": record })))
}

#[axum::debug_handler]
async fn export_text_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let guard = state.session.lock().await;
    let session = guard.as_ref().ok_or_else(|| studio_error(StudioError::NoActiveSession))?;
    let record = session.export(&state.record_defaults());
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        record.to_string(),
    ))
}

// --- Estado, salud y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(store) = state.neo4j.as_ref() else {
        return Ok(Json(json!({ "status": "disabled", "backend": "memory" })));
    };

    match store.health_check().await {
        Ok(()) => Ok(Json(json!({ "status": "ok", "backend": "neo4j" }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AppConfig, LlmProvider, StorageBackend},
        llm::LlmManager,
        models::Attachment,
        store::{MemoryStore, PersistQueue},
    };

    fn test_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let config = AppConfig {
            server_addr: "127.0.0.1:0".to_string(),
            storage: StorageBackend::Memory,
            neo4j: None,
            llm_provider: LlmProvider::OpenAI,
            llm_chat_model: String::new(),
            default_owner_id: "owner".to_string(),
            export_default_brand: "Brand Name".to_string(),
            export_default_designer: "Designer Name".to_string(),
        };
        AppState {
            llm_manager: LlmManager::from_config(&config).unwrap(),
            config,
            documents: store.clone(),
            persist: PersistQueue::spawn(store.clone()),
            conversation: store,
            neo4j: None,
            status: Arc::new(Mutex::new(Status::default())),
            session: Arc::new(tokio::sync::Mutex::new(None)),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected_before_touching_the_session() {
        let state = test_state();
        *state.session.lock().await = Some(DocumentSession::new(
            "chat-previo",
            "doc-previo",
            "Bomber",
            "owner",
            state.sinks_for("chat-previo"),
        ));

        let request = GenerationRequest {
            title: "Hoja".to_string(),
            kind: "sheet".to_string(),
            prompt: "tabla de medidas".to_string(),
            attachments: vec![Attachment {
                name: "boceto.png".to_string(),
                url: "https://files.local/boceto.png".to_string(),
                content_type: None,
            }],
        };
        match generate_handler(State(state.clone()), Json(request)).await {
            Err((status, _)) => assert_eq!(status, StatusCode::BAD_REQUEST),
            Ok(_) => panic!("se esperaba un 400 por tipo desconocido"),
        }

        let guard = state.session.lock().await;
        assert_eq!(guard.as_ref().map(|s| s.chat_id.as_str()), Some("chat-previo"));
        assert!(!state.status.lock().unwrap().is_busy);
    }

    #[tokio::test]
    async fn forwarded_events_expose_draft_visibility() {
        let status = Arc::new(Mutex::new(Status::default()));
        let (inner_tx, inner_rx) = mpsc::channel(8);
        let (client_tx, mut client_rx) = mpsc::channel(8);

        for event in [
            StreamEvent::Kind("text".into()),
            StreamEvent::Clear,
            StreamEvent::TextDelta("a".repeat(420)),
        ] {
            inner_tx.send(event).await.unwrap();
        }
        drop(inner_tx);
        forward_events(inner_rx, client_tx, status.clone()).await;

        let generation = status.lock().unwrap().generation.clone().unwrap();
        assert!(generation.is_visible);
        let mut forwarded = 0;
        while client_rx.try_recv().is_ok() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 3);
    }

    #[tokio::test]
    async fn forwarding_survives_a_closed_client() {
        let status = Arc::new(Mutex::new(Status::default()));
        let (inner_tx, inner_rx) = mpsc::channel(8);
        let (client_tx, client_rx) = mpsc::channel(8);
        drop(client_rx);

        inner_tx.send(StreamEvent::Kind("code".into())).await.unwrap();
        inner_tx.send(StreamEvent::Clear).await.unwrap();
        drop(inner_tx);
        forward_events(inner_rx, client_tx, status.clone()).await;

        let generation = status.lock().unwrap().generation.clone().unwrap();
        assert_eq!(generation.status, crate::context::ArtifactStatus::Streaming);
    }

    #[test]
    fn domain_errors_map_to_http_status() {
        assert_eq!(studio_error(StudioError::MissingAttachment).0, StatusCode::BAD_REQUEST);
        assert_eq!(studio_error(StudioError::NoActiveSession).0, StatusCode::CONFLICT);
        assert_eq!(
            studio_error(StudioError::VersionNotFound { index: 4, len: 1 }).0,
            StatusCode::NOT_FOUND
        );
        let (_, Json(body)) = studio_error(StudioError::UnknownKind("sheet".into()));
        assert!(body["error"].as_str().unwrap().contains("sheet"));
    }
}
