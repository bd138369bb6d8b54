use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use protocol::{ActionResponse, CommandId, CommandRecord, CreateCommandRequest, ErrorResponse};

use crate::engine::Engine;
use crate::error::EngineError;

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Engine,
}

pub(crate) fn router(engine: Engine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/commands", get(list_commands).post(create_command))
        .route("/commands/:id", get(get_command).delete(stop_command))
        .with_state(AppState { engine })
        .layer(middleware::from_fn(log_http_request))
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn invalid_id() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid id")
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::EmptyScript
            | EngineError::NotFound(_)
            | EngineError::StateConflict(_) => StatusCode::BAD_REQUEST,
            EngineError::InternalInconsistency(_)
            | EngineError::Persistence(_)
            | EngineError::Process(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match err {
            EngineError::NotFound(_) => "undefined id".to_string(),
            other => other.to_string(),
        };
        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

fn parse_id(raw: &str) -> Result<CommandId, ApiError> {
    raw.parse::<CommandId>().map_err(|_| ApiError::invalid_id())
}

async fn health() -> &'static str {
    "ok"
}

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;
    let status = response.status();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        "http request"
    );
    response
}

async fn create_command(
    State(state): State<AppState>,
    payload: Result<Json<CreateCommandRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CommandRecord>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "invalid command payload");
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Error decoding JSON: {}", rejection.body_text()),
        )
    })?;
    let record = state.engine.submit(&request.script).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_commands(
    State(state): State<AppState>,
) -> Result<Json<Vec<CommandRecord>>, ApiError> {
    Ok(Json(state.engine.list().await?))
}

async fn get_command(
    Path(raw_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CommandRecord>, ApiError> {
    let id = parse_id(&raw_id)?;
    match state.engine.get(id).await {
        Ok(record) => Ok(Json(record)),
        Err(EngineError::NotFound(_)) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "undefined id",
        )),
        Err(err) => Err(err.into()),
    }
}

async fn stop_command(
    Path(raw_id): Path<String>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    let id = parse_id(&raw_id)?;
    state.engine.stop(id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ActionResponse {
            message: "Commands stopped".to_string(),
        }),
    ))
}
