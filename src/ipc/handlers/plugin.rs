use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::plugin::PluginManager;
use crate::supervisor::error::SupervisorError;

use super::super::IPCServer;

/// 인스턴스 작업 디렉토리 해석 공통 경로
async fn instance_dir(state: &IPCServer, id: &str) -> Result<PathBuf, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    let instance = supervisor
        .instance_store
        .get(id)
        .ok_or_else(|| SupervisorError::InstanceNotFound(id.to_string()))?;
    Ok(instance.working_dir.clone())
}

/// GET /api/instance/:id/plugins - 설치/가용 플러그인 목록 + 통계
pub async fn list_plugins(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let dir = instance_dir(&state, &id).await?;
    let manager = PluginManager::new(&dir).map_err(SupervisorError::Internal)?;

    Ok(Json(json!({
        "installed": manager.installed(),
        "available": manager.available(),
        "statistics": manager.statistics(),
    })))
}

/// GET /api/instance/:id/plugins/search?q=keyword - 카탈로그 검색
pub async fn search_plugins(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let keyword = params.get("q").cloned().unwrap_or_default();
    let dir = instance_dir(&state, &id).await?;
    let manager = PluginManager::new(&dir).map_err(SupervisorError::Internal)?;

    Ok(Json(json!({ "results": manager.search(&keyword) })))
}

#[derive(Debug, Deserialize)]
pub struct InstallPluginRequest {
    pub name: String,
}

/// POST /api/instance/:id/plugin/install - 카탈로그에서 플러그인 설치
pub async fn install_plugin(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(payload): Json<InstallPluginRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let dir = instance_dir(&state, &id).await?;
    let mut manager = PluginManager::new(&dir).map_err(SupervisorError::Internal)?;

    let installed = manager
        .install(&payload.name)
        .await
        .map_err(SupervisorError::Internal)?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "plugin": installed }))))
}

/// DELETE /api/instance/:id/plugin/:name - 플러그인 제거
pub async fn uninstall_plugin(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let dir = instance_dir(&state, &id).await?;
    let mut manager = PluginManager::new(&dir).map_err(SupervisorError::Internal)?;

    if manager.uninstall(&name).map_err(SupervisorError::Internal)? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(SupervisorError::InvalidConfig(format!("Plugin '{}' is not installed", name)))
    }
}

/// POST /api/instance/:id/plugin/:name/enable
pub async fn enable_plugin(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    toggle_plugin(state, &id, &name, true).await
}

/// POST /api/instance/:id/plugin/:name/disable
pub async fn disable_plugin(
    Path((id, name)): Path<(String, String)>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    toggle_plugin(state, &id, &name, false).await
}

async fn toggle_plugin(
    state: IPCServer,
    id: &str,
    name: &str,
    enable: bool,
) -> Result<Json<serde_json::Value>, SupervisorError> {
    let dir = instance_dir(&state, id).await?;
    let mut manager = PluginManager::new(&dir).map_err(SupervisorError::Internal)?;

    let changed = if enable {
        manager.enable(name).map_err(SupervisorError::Internal)?
    } else {
        manager.disable(name).map_err(SupervisorError::Internal)?
    };

    if changed {
        Ok(Json(json!({ "success": true, "enabled": enable })))
    } else {
        Err(SupervisorError::InvalidConfig(format!("Plugin '{}' is not installed", name)))
    }
}
