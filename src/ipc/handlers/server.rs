use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;

use crate::supervisor::error::SupervisorError;

use super::super::IPCServer;

#[derive(Debug, Deserialize, Default)]
pub struct StopRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// POST /api/instance/:id/start - 서버 시작
pub async fn start_server(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.start_server(&id).await?))
}

/// POST /api/instance/:id/stop - 서버 중지 (body 없으면 graceful)
pub async fn stop_server(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    payload: Option<Json<StopRequest>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let force = payload.map(|Json(p)| p.force).unwrap_or(false);
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.stop_server(&id, force).await?))
}

/// POST /api/instance/:id/command - 콘솔 명령 전달 (raw pass-through)
pub async fn send_command(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(payload): Json<CommandRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.send_command(&id, &payload.command).await?))
}

/// GET /api/instance/:id/console?since=0&count=100 - 콘솔 출력 조회
pub async fn get_console(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let since = params.get("since").and_then(|s| s.parse::<u64>().ok());
    let count = params.get("count").and_then(|c| c.parse::<usize>().ok());

    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.get_console(&id, since, count).await?))
}

/// GET /api/instance/:id/status - 서버 상태 조회
pub async fn get_status(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.server_status(&id).await?))
}

/// GET /api/instance/:id/properties - server.properties 조회
pub async fn read_properties(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.read_properties(&id).await?))
}

/// POST /api/instance/:id/accept-eula - EULA 동의 기록
pub async fn accept_eula(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.accept_eula(&id).await?))
}
