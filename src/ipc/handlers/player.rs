use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use crate::player::{self, PlayerRoster};
use crate::supervisor::error::SupervisorError;

use super::super::IPCServer;

async fn instance_dir(state: &IPCServer, id: &str) -> Result<PathBuf, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    let instance = supervisor
        .instance_store
        .get(id)
        .ok_or_else(|| SupervisorError::InstanceNotFound(id.to_string()))?;
    Ok(instance.working_dir.clone())
}

/// GET /api/instance/:id/players - 플레이어 명부 + 통계
pub async fn list_players(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let dir = instance_dir(&state, &id).await?;
    let roster = PlayerRoster::new(&dir);

    Ok(Json(json!({
        "players": roster.list(),
        "statistics": roster.statistics(),
    })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ModerationRequest {
    #[serde(default)]
    pub reason: Option<String>,
    /// tempban용 기간 (예: "1d", "2h", "30m")
    #[serde(default)]
    pub duration: Option<String>,
}

/// POST /api/instance/:id/player/:name/kick
pub async fn kick_player(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
    payload: Option<Json<ModerationRequest>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let reason = payload
        .and_then(|Json(p)| p.reason)
        .unwrap_or_else(|| "Kicked by an operator".to_string());

    let supervisor = state.supervisor.read().await;
    supervisor
        .send_command(&id, &player::kick_command(&name, &reason))
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/instance/:id/player/:name/ban - 영구 또는 기간제 밴
pub async fn ban_player(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
    payload: Option<Json<ModerationRequest>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let reason = request.reason.unwrap_or_else(|| "Banned by an operator".to_string());
    let duration = request.duration;

    let dir = instance_dir(&state, &id).await?;
    let supervisor = state.supervisor.read().await;
    supervisor
        .send_command(&id, &player::ban_command(&name, &reason, duration.as_deref()))
        .await?;

    // 명령이 전송된 뒤에만 로컬 명부를 갱신
    let expires = duration.as_deref().and_then(player::ban_expiry_from_duration);
    let mut roster = PlayerRoster::new(&dir);
    roster
        .record_ban(&name, &reason, expires)
        .map_err(SupervisorError::Internal)?;

    Ok(Json(json!({ "success": true })))
}

/// POST /api/instance/:id/player/:name/pardon
pub async fn pardon_player(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let dir = instance_dir(&state, &id).await?;
    let supervisor = state.supervisor.read().await;
    supervisor.send_command(&id, &player::pardon_command(&name)).await?;

    let mut roster = PlayerRoster::new(&dir);
    roster.record_pardon(&name).map_err(SupervisorError::Internal)?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/instance/:id/player/:name/op
pub async fn op_player(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    set_op(state, &id, &name, true).await
}

/// POST /api/instance/:id/player/:name/deop
pub async fn deop_player(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    set_op(state, &id, &name, false).await
}

async fn set_op(
    state: IPCServer,
    id: &str,
    name: &str,
    grant: bool,
) -> Result<Json<serde_json::Value>, SupervisorError> {
    let dir = instance_dir(&state, id).await?;
    let command = if grant {
        player::op_command(name)
    } else {
        player::deop_command(name)
    };

    let supervisor = state.supervisor.read().await;
    supervisor.send_command(id, &command).await?;

    let mut roster = PlayerRoster::new(&dir);
    roster.record_op(name, grant).map_err(SupervisorError::Internal)?;
    Ok(Json(json!({ "success": true, "op": grant })))
}

#[derive(Debug, Deserialize)]
pub struct WhitelistRequest {
    pub add: bool,
}

/// POST /api/instance/:id/player/:name/whitelist - 화이트리스트 추가/제거
pub async fn whitelist_player(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
    Json(payload): Json<WhitelistRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let dir = instance_dir(&state, &id).await?;
    let supervisor = state.supervisor.read().await;
    supervisor
        .send_command(&id, &player::whitelist_command(&name, payload.add))
        .await?;

    let mut roster = PlayerRoster::new(&dir);
    roster
        .record_whitelist(&name, payload.add)
        .map_err(SupervisorError::Internal)?;
    Ok(Json(json!({ "success": true, "whitelisted": payload.add })))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

/// POST /api/instance/:id/say - 전체 공지
pub async fn broadcast(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(payload): Json<BroadcastRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    supervisor
        .send_command(&id, &player::say_command(&payload.message))
        .await?;
    Ok(Json(json!({ "success": true })))
}
