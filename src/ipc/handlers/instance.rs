use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::supervisor::error::SupervisorError;

use super::super::IPCServer;

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    /// 미지정 시 데이터 디렉토리 아래 servers/<id> 생성
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// 템플릿 이름 — 설정의 기반값으로 사용
    #[serde(default)]
    pub template: Option<String>,
    /// 템플릿 위에 덮어쓸 개별 설정
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// GET /api/instances - 모든 인스턴스 목록 (상태 포함)
pub async fn list_instances(State(state): State<IPCServer>) -> impl IntoResponse {
    let supervisor = state.supervisor.read().await;

    let mut servers = Vec::new();
    for instance in supervisor.instance_store.list().to_vec() {
        let running = supervisor.is_running(&instance.id).await;
        servers.push(json!({
            "id": instance.id,
            "name": instance.name,
            "working_dir": instance.working_dir,
            "status": if running { "running" } else { "stopped" },
            "pid": if running { supervisor.tracker.get_pid(&instance.id).ok() } else { None },
        }));
    }

    Json(json!({ "servers": servers }))
}

/// POST /api/instances - 새 인스턴스 생성
pub async fn create_instance(
    State(state): State<IPCServer>,
    Json(payload): Json<CreateInstanceRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    // 템플릿 설정 위에 사용자가 준 설정을 얹는다
    let mut initial_config = BTreeMap::new();
    if let Some(template_name) = &payload.template {
        let templates = state.templates.lock().await;
        let template = templates
            .get(template_name)
            .ok_or_else(|| SupervisorError::InvalidConfig(format!("unknown template '{}'", template_name)))?;
        initial_config = template.config.clone();
    }
    for (k, v) in payload.config {
        initial_config.insert(k, v);
    }

    let mut supervisor = state.supervisor.write().await;
    let instance = supervisor
        .instance_store
        .create(&payload.name, payload.working_dir, &initial_config)
        .map_err(SupervisorError::Internal)?;

    tracing::info!("Created instance '{}' ({})", instance.name, instance.id);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "instance": instance }))))
}

/// GET /api/instance/:id - 인스턴스 조회
pub async fn get_instance(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    let instance = supervisor
        .instance_store
        .get(&id)
        .ok_or(SupervisorError::InstanceNotFound(id))?;
    Ok(Json(json!({ "instance": instance })))
}

/// DELETE /api/instance/:id - 인스턴스 삭제 (실행 중이면 먼저 중지)
pub async fn delete_instance(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let mut supervisor = state.supervisor.write().await;

    supervisor
        .instance_store
        .get(&id)
        .ok_or_else(|| SupervisorError::InstanceNotFound(id.clone()))?;

    if supervisor.is_running(&id).await {
        supervisor.stop_server(&id, false).await?;
    }

    supervisor.instance_store.remove(&id).map_err(SupervisorError::Internal)?;
    tracing::info!("Deleted instance '{}'", id);
    Ok(Json(json!({ "success": true })))
}

/// GET /api/instance/:id/config - 서버 설정 조회
pub async fn get_config(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.get_config(&id).await?))
}

/// PATCH /api/instance/:id/config - 서버 설정 병합 업데이트
pub async fn update_config(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(overrides): Json<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    Ok(Json(supervisor.update_config(&id, &overrides).await?))
}

#[derive(Debug, Deserialize)]
pub struct CloneRequest {
    pub name: String,
}

/// POST /api/instance/:id/clone - 설정을 복제해 새 인스턴스 생성
pub async fn clone_instance(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(payload): Json<CloneRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let mut supervisor = state.supervisor.write().await;

    let source = supervisor
        .instance_store
        .get(&id)
        .ok_or_else(|| SupervisorError::InstanceNotFound(id.clone()))?;
    let source_config = source.config().values().clone();

    let clone = supervisor
        .instance_store
        .create(&payload.name, None, &source_config)
        .map_err(SupervisorError::Internal)?;

    tracing::info!("Cloned instance '{}' -> '{}'", id, clone.id);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "instance": clone }))))
}
