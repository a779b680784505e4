use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::supervisor::error::SupervisorError;

use super::super::IPCServer;

#[derive(Debug, Deserialize, Default)]
pub struct CreateBackupRequest {
    #[serde(default)]
    pub description: String,
}

/// GET /api/backups - 전체 백업 목록 (최신순)
pub async fn list_backups(State(state): State<IPCServer>) -> impl IntoResponse {
    let backups = state.backups.lock().await;
    Json(json!({ "backups": backups.list() }))
}

/// GET /api/backups/statistics - 백업 통계
pub async fn backup_statistics(State(state): State<IPCServer>) -> impl IntoResponse {
    let backups = state.backups.lock().await;
    Json(backups.statistics())
}

/// GET /api/instance/:id/backups - 인스턴스의 백업 목록
pub async fn list_instance_backups(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let supervisor = state.supervisor.read().await;
    supervisor
        .instance_store
        .get(&id)
        .ok_or(SupervisorError::InstanceNotFound(id.clone()))?;

    let backups = state.backups.lock().await;
    Ok(Json(json!({ "backups": backups.list_for_server(&id) })))
}

/// POST /api/instance/:id/backups - 백업 생성
///
/// 실행 중인 인스턴스는 거부 — 월드 파일이 쓰이는 중이라 일관성이 없다.
pub async fn create_backup(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    payload: Option<Json<CreateBackupRequest>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let description = payload.map(|Json(p)| p.description).unwrap_or_default();

    // supervisor 락은 backups 락을 잡기 전에 내려놓는다 (락 순서 고정)
    let instance = {
        let supervisor = state.supervisor.read().await;
        let instance = supervisor
            .instance_store
            .get(&id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(id.clone()))?
            .clone();

        if supervisor.is_running(&id).await {
            return Err(SupervisorError::AlreadyRunning(instance.name));
        }
        instance
    };

    let mut backups = state.backups.lock().await;
    let info = backups
        .create_backup(&instance.id, &instance.name, &instance.working_dir, "manual", &description)
        .map_err(SupervisorError::Internal)?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "backup": info }))))
}

/// POST /api/backup/:id/restore - 백업을 원래 인스턴스 디렉토리로 복원
pub async fn restore_backup(
    Path(backup_id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let info = {
        let backups = state.backups.lock().await;
        backups
            .get(&backup_id)
            .ok_or_else(|| SupervisorError::InvalidConfig(format!("Backup '{}' not found", backup_id)))?
            .clone()
    };

    let instance = {
        let supervisor = state.supervisor.read().await;
        let instance = supervisor
            .instance_store
            .get(&info.server_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(info.server_id.clone()))?
            .clone();

        // 복원 대상이 돌아가는 중이면 먼저 내려야 한다
        if supervisor.is_running(&instance.id).await {
            return Err(SupervisorError::AlreadyRunning(instance.name));
        }
        instance
    };

    let backups = state.backups.lock().await;
    backups
        .restore_backup(&backup_id, &instance.working_dir)
        .map_err(SupervisorError::Internal)?;

    Ok(Json(json!({ "success": true, "restored_to": instance.working_dir })))
}

/// DELETE /api/backup/:id - 백업 삭제
pub async fn delete_backup(
    Path(backup_id): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let mut backups = state.backups.lock().await;
    let removed = backups.delete_backup(&backup_id).map_err(SupervisorError::Internal)?;
    if removed {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(SupervisorError::InvalidConfig(format!("Backup '{}' not found", backup_id)))
    }
}
