use axum::{
    body::Bytes,
    extract::{Json, Query, State},
    handler::HandlerWithoutStateExt,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use subtle::ConstantTimeEq;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{app_state::AppState, errors::RagError};

const DEFAULT_SESSION: &str = "default";
const SESSION_HEADER: &str = "x-session-id";

// --- Errores HTTP ---

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotInitialized,
    Internal(String),
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Unauthorized => ApiError::Unauthorized,
            RagError::Validation(msg) => ApiError::BadRequest(msg),
            RagError::NotInitialized => ApiError::NotInitialized,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "Não autorizado",
                    "message": "Chave de API inválida ou ausente",
                    "hint": "Inclua a chave no header Authorization como 'Bearer sua_chave', \
                             no parâmetro 'api_key' ou no campo JSON 'api_key'"
                }),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotInitialized => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Sistema ChatRAG não inicializado" }),
            ),
            ApiError::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Erro interno do servidor", "details": details }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// --- Payloads ---

#[derive(Deserialize)]
pub struct ApiKeyQuery {
    api_key: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct WebPayload {
    session_id: Option<String>,
    message: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    // Un fichero inexistente bajo /ui responde igual que una ruta desconocida.
    let frontend = ServeDir::new(&app_state.config.frontend_dir)
        .not_found_service(not_found_handler.into_service());
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/clear", post(clear_handler))
        .route("/chat/history", get(history_handler))
        // Chat web: sin credencial, la sesión la identifica el navegador.
        .route("/web/session", post(web_session_handler))
        .route("/web/message", post(web_message_handler))
        .route("/web/reset", post(web_reset_handler))
        .nest_service("/ui", frontend)
        .fallback(not_found_handler)
        .with_state(app_state)
}

// --- Handlers de la API ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "Chat RAG API",
        "chat_rag_loaded": state.engine.is_loaded()
    }))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = json_object(&body);
    authorize(&state, &headers, &query, payload.as_ref())?;
    let engine = state.engine.get()?;

    let payload = payload
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Payload JSON é obrigatório".to_string()))?;
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if message.is_empty() {
        return Err(ApiError::BadRequest(
            "Campo 'message' é obrigatório e não pode estar vazio".to_string(),
        ));
    }

    let session_id = session_id(&headers);
    info!("Processando mensagem [{session_id}]: {}...", preview(message, 50));
    let response = engine
        .converse(&state.api_sessions, &session_id, message)
        .await
        .map_err(|e| {
            error!("Erro ao processar mensagem: {e}");
            ApiError::from(e)
        })?;

    Ok(Json(json!({ "response": response, "status": "success" })))
}

#[axum::debug_handler]
async fn clear_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers, &query, json_object(&body).as_ref())?;
    state.engine.get()?;

    let session_id = session_id(&headers);
    state.api_sessions.clear(&session_id);
    info!("Histórico da conversa [{session_id}] limpo");

    Ok(Json(json!({
        "message": "Histórico da conversa limpo com sucesso",
        "status": "success"
    })))
}

#[axum::debug_handler]
async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers, &query, json_object(&body).as_ref())?;
    state.engine.get()?;

    let history = state.api_sessions.history(&session_id(&headers));
    Ok(Json(json!({
        "total_messages": history.len(),
        "history": history,
        "status": "success"
    })))
}

// --- Handlers del chat web ---

/// Abre (o recupera) una sesión del navegador y devuelve su historial.
#[axum::debug_handler]
async fn web_session_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload: WebPayload = parse_payload(&body)?;
    let session_id = payload
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let messages = state.web_sessions.history(&session_id);
    Ok(Json(json!({
        "session_id": session_id,
        "messages": messages,
        "chat_rag_loaded": state.engine.is_loaded()
    })))
}

#[axum::debug_handler]
async fn web_message_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload: WebPayload = parse_payload(&body)?;
    let session_id = required_session(payload.session_id)?;
    let message = payload.message.unwrap_or_default();
    let message = message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest(
            "Campo 'message' é obrigatório e não pode estar vazio".to_string(),
        ));
    }
    let engine = state.engine.get()?;

    let response = engine
        .converse(&state.web_sessions, &session_id, message)
        .await
        .map_err(|e| {
            error!("Erro ao gerar resposta web [{session_id}]: {e}");
            ApiError::from(e)
        })?;

    Ok(Json(json!({ "response": response, "status": "success" })))
}

#[axum::debug_handler]
async fn web_reset_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload: WebPayload = parse_payload(&body)?;
    let session_id = required_session(payload.session_id)?;

    let messages = state.web_sessions.clear(&session_id);
    Ok(Json(json!({ "session_id": session_id, "messages": messages })))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint não encontrado",
            "available_endpoints": [
                "GET /health",
                "POST /chat",
                "POST /chat/clear",
                "GET /chat/history",
                "GET /ui/",
                "POST /web/session",
                "POST /web/message",
                "POST /web/reset"
            ]
        })),
    )
}

// --- Utilidades ---

/// Credencial en `Authorization: Bearer`, en `?api_key=` o en el campo JSON
/// `api_key`, por ese orden.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    query: &ApiKeyQuery,
    payload: Option<&Map<String, Value>>,
) -> Result<(), RagError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let provided = bearer
        .or(query.api_key.as_deref())
        .or_else(|| payload.and_then(|p| p.get("api_key")).and_then(Value::as_str));

    match provided {
        Some(key) if bool::from(key.as_bytes().ct_eq(state.api_key.as_bytes())) => Ok(()),
        _ => {
            warn!("Tentativa de acesso não autorizado");
            Err(RagError::Unauthorized)
        }
    }
}

fn json_object(body: &Bytes) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn parse_payload<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Payload JSON inválido: {e}")))
}

fn required_session(session_id: Option<String>) -> Result<String, ApiError> {
    session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Campo 'session_id' é obrigatório".to_string()))
}

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
